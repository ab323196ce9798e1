use super::frame::{Frame, FrameType, TypeContext};
use crate::jvm::class_file::{ClassConstantIndex, ConstValue, ConstantPool, StackMapFrame, VerificationType};
use crate::jvm::descriptors::{argument_and_return_sizes, JavaFieldType, ParseDescriptor};
use crate::jvm::opcodes::*;
use crate::jvm::{Error, Label, MethodAccessFlags};
use crate::util::Width;
use bitflags::bitflags;
use std::collections::HashMap;

/// How much of the method's metadata the writer recomputes
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ComputeMode {
    /// `max_stack` from stack heights only
    MaxStack,

    /// `max_stack` and the `StackMapTable`, from full type inference
    Frames,
}

bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
    pub struct BlockFlags: u8 {
        /// Jump, switch, or handler target
        const TARGET = 0x01;

        /// Needs an entry in the `StackMapTable`
        const STORE = 0x02;

        const REACHABLE = 0x04;

        /// Currently in the work list
        const PUSHED = 0x08;

        /// Position is known
        const PLACED = 0x10;
    }
}

pub type BlockId = usize;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EdgeKind {
    /// Stack height at the jump, relative to the height at the start of the block
    StackDelta(i32),

    /// Exception handler edge (the handler always starts with exactly the exception)
    Exception,

    Normal,

    /// Exception handler edge carrying the caught type
    Handler(FrameType),
}

#[derive(Copy, Clone, Debug)]
pub struct Edge {
    pub kind: EdgeKind,
    pub successor: BlockId,
}

/// Straight-line run of instructions
///
/// `input_stack_top` and `output_stack_max` are only used when computing `max_stack`: full frame
/// computation tracks the same quantities inside `frame`.
#[derive(Default, Debug)]
pub struct BasicBlock {
    pub position: usize,
    pub flags: BlockFlags,
    pub frame: Option<Frame>,

    /// Next block in offset order
    pub next: Option<BlockId>,
    pub edges: Vec<Edge>,
    pub input_stack_top: i32,
    pub output_stack_max: i32,

    /// Another block found at the same position first (this one is then only a name for it)
    pub alias: Option<BlockId>,
}

#[derive(Debug)]
struct Handler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: Option<String>,
}

/// Control flow graph of a method, built while the method's instructions are emitted
///
/// The writer reports every instruction after writing it (with the code length at that point as
/// `end`), and every non-debug label as it is placed. Instructions that follow an unconditional
/// transfer of control without an intervening label are unreachable and are not analyzed.
#[derive(Debug)]
pub struct ControlFlowGraph {
    mode: ComputeMode,
    blocks: Vec<BasicBlock>,
    label_blocks: HashMap<Label, BlockId>,
    current: Option<BlockId>,

    /// Last block in offset order
    previous: BlockId,

    /// Stack height relative to the start of the current block (`max_stack` computation only)
    stack_size: i32,
    max_stack_size: i32,

    handlers: Vec<Handler>,
}

impl ControlFlowGraph {
    pub fn new(mode: ComputeMode) -> ControlFlowGraph {
        let mut cfg = ControlFlowGraph {
            mode,
            blocks: vec![],
            label_blocks: HashMap::new(),
            current: Some(0),
            previous: 0,
            stack_size: 0,
            max_stack_size: 0,
            handlers: vec![],
        };
        let entry = cfg.new_block();
        cfg.blocks[entry].flags |= BlockFlags::PLACED;
        cfg
    }

    pub fn mode(&self) -> ComputeMode {
        self.mode
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    fn new_block(&mut self) -> BlockId {
        let frame = match self.mode {
            ComputeMode::Frames => Some(Frame::new()),
            ComputeMode::MaxStack => None,
        };
        self.blocks.push(BasicBlock {
            frame,
            ..BasicBlock::default()
        });
        self.blocks.len() - 1
    }

    fn block_of(&mut self, label: Label) -> BlockId {
        if let Some(block) = self.label_blocks.get(&label) {
            return *block;
        }
        let block = self.new_block();
        self.label_blocks.insert(label, block);
        block
    }

    /// The block that actually holds the frame for this one
    fn first(&self, mut block: BlockId) -> BlockId {
        let mut hops = 0;
        while let Some(alias) = self.blocks[block].alias {
            block = alias;
            hops += 1;
            if hops > self.blocks.len() {
                break;
            }
        }
        block
    }

    fn mark_target(&mut self, label: Label) -> BlockId {
        let block = self.block_of(label);
        let first = self.first(block);
        self.blocks[first].flags |= BlockFlags::TARGET;
        block
    }

    fn current_frame(&mut self) -> Option<&mut Frame> {
        match self.current {
            Some(current) => self.blocks[current].frame.as_mut(),
            None => None,
        }
    }

    fn add_edge(&mut self, kind: EdgeKind, successor: BlockId) {
        if let Some(current) = self.current {
            self.blocks[current].edges.push(Edge { kind, successor });
        }
    }

    fn grow_stack(&mut self, delta: i32) {
        let size = self.stack_size + delta;
        if size > self.max_stack_size {
            self.max_stack_size = size;
        }
        self.stack_size = size;
    }

    /// The current block ends without falling through to the next instruction
    fn no_successor(&mut self, end: usize) {
        match self.mode {
            ComputeMode::Frames => {
                let block = self.new_block();
                self.blocks[block].position = end;
                self.blocks[block].flags |= BlockFlags::PLACED;
                self.blocks[self.previous].next = Some(block);
                self.previous = block;
            }
            ComputeMode::MaxStack => {
                if let Some(current) = self.current {
                    self.blocks[current].output_stack_max = self.max_stack_size;
                }
            }
        }
        self.current = None;
    }

    fn start_block(&mut self, block: BlockId, position: usize) {
        self.blocks[block].position = position;
        self.blocks[block].flags |= BlockFlags::PLACED;

        match self.mode {
            ComputeMode::Frames => {
                if let Some(current) = self.current {
                    if self.blocks[current].position == position {
                        self.alias(block, current);
                        return;
                    }
                    self.add_edge(EdgeKind::Normal, block);
                }
                self.current = Some(block);
                let previous = self.previous;
                if previous != block && self.blocks[previous].position == position {
                    self.alias(block, previous);
                    self.current = Some(previous);
                    return;
                }
            }
            ComputeMode::MaxStack => {
                if let Some(current) = self.current {
                    self.blocks[current].output_stack_max = self.max_stack_size;
                    self.add_edge(EdgeKind::StackDelta(self.stack_size), block);
                }
                self.current = Some(block);
                self.stack_size = 0;
                self.max_stack_size = 0;
            }
        }
        self.blocks[self.previous].next = Some(block);
        self.previous = block;
    }

    fn alias(&mut self, block: BlockId, first: BlockId) {
        if block == first {
            return;
        }
        let target = self.blocks[block].flags & BlockFlags::TARGET;
        self.blocks[first].flags |= target;
        self.blocks[block].alias = Some(first);
    }

    /// A (non-debug) label was placed at `position`
    pub fn label(&mut self, label: Label, position: usize) {
        let block = self.block_of(label);
        self.start_block(block, position);
    }

    /// Instruction without operands
    pub fn zero_operand(&mut self, opcode: u8, end: usize) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute(opcode)?;
                }
            }
            ComputeMode::MaxStack => {
                let delta = stack_delta(opcode).ok_or(Error::InvalidOpcode { opcode, offset: end })?;
                self.grow_stack(delta);
            }
        }
        if matches!(opcode, IRETURN..=RETURN | ATHROW) {
            self.no_successor(end);
        }
        Ok(())
    }

    /// `bipush`, `sipush`, or `newarray`
    pub fn int_operand(&mut self, opcode: u8, operand: i32) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute_with_int(opcode, operand)?;
                }
            }
            ComputeMode::MaxStack => {
                if opcode != NEWARRAY {
                    self.grow_stack(1);
                }
            }
        }
        Ok(())
    }

    /// Load, store, or `ret`
    pub fn var(&mut self, opcode: u8, var: u16, end: usize) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute_var(opcode, var)?;
                }
            }
            ComputeMode::MaxStack if opcode == RET => self.no_successor(end),
            ComputeMode::MaxStack => {
                let delta = stack_delta(opcode).ok_or(Error::InvalidOpcode { opcode, offset: end })?;
                self.grow_stack(delta);
            }
        }
        Ok(())
    }

    /// `new`, `anewarray`, `checkcast`, or `instanceof` at `offset`
    pub fn type_insn(
        &mut self,
        pool: &mut ConstantPool,
        opcode: u8,
        offset: usize,
        type_name: &str,
    ) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute_type(pool, opcode, offset, type_name)?;
                }
            }
            ComputeMode::MaxStack => {
                if opcode == NEW {
                    self.grow_stack(1);
                }
            }
        }
        Ok(())
    }

    pub fn field(
        &mut self,
        pool: &mut ConstantPool,
        opcode: u8,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute_member(pool, opcode, name, descriptor)?;
                }
            }
            ComputeMode::MaxStack => {
                let size = JavaFieldType::parse(descriptor)
                    .map_err(|_| Error::MalformedDescriptor(descriptor.to_owned()))?
                    .width() as i32;
                let delta = match opcode {
                    GETSTATIC => size,
                    PUTSTATIC => -size,
                    GETFIELD => size - 1,
                    _ => -size - 1,
                };
                self.grow_stack(delta);
            }
        }
        Ok(())
    }

    /// Method invocation, including `invokedynamic`
    pub fn invoke(
        &mut self,
        pool: &mut ConstantPool,
        opcode: u8,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    if opcode == INVOKEDYNAMIC {
                        frame.execute_invoke_dynamic(pool, descriptor)?;
                    } else {
                        frame.execute_member(pool, opcode, name, descriptor)?;
                    }
                }
            }
            ComputeMode::MaxStack => {
                let (arguments, ret) = argument_and_return_sizes(descriptor)
                    .map_err(|_| Error::MalformedDescriptor(descriptor.to_owned()))?;
                let mut delta = ret as i32 - arguments as i32;
                if opcode == INVOKESTATIC || opcode == INVOKEDYNAMIC {
                    delta += 1;
                }
                self.grow_stack(delta);
            }
        }
        Ok(())
    }

    /// Jump to `target`, written so that the next instruction starts at `end`
    ///
    /// `inverted` is set when a long backward conditional jump was written as the opposite
    /// condition skipping over a `goto_w`: the instruction after it is then a jump target too.
    pub fn jump(&mut self, opcode: u8, target: Label, end: usize, inverted: bool) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        let unconditional = matches!(opcode, GOTO | GOTO_W);
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute(opcode)?;
                }
                let block = self.mark_target(target);
                self.add_edge(EdgeKind::Normal, block);
                if !unconditional {
                    let next = self.new_block();
                    if inverted {
                        self.blocks[next].flags |= BlockFlags::TARGET;
                    }
                    self.start_block(next, end);
                }
            }
            ComputeMode::MaxStack => {
                let delta = stack_delta(opcode).ok_or(Error::InvalidOpcode { opcode, offset: end })?;
                self.stack_size += delta;
                let block = self.block_of(target);
                self.add_edge(EdgeKind::StackDelta(self.stack_size), block);
            }
        }
        if unconditional {
            self.no_successor(end);
        }
        Ok(())
    }

    pub fn ldc(&mut self, pool: &mut ConstantPool, value: &ConstValue) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute_ldc(pool, value)?;
                }
            }
            ComputeMode::MaxStack => self.grow_stack(if value.is_wide() { 2 } else { 1 }),
        }
        Ok(())
    }

    pub fn iinc(&mut self, var: u16) {
        if let Some(frame) = self.current_frame() {
            frame.execute_iinc(var);
        }
    }

    /// `tableswitch` or `lookupswitch`, ending at `end`
    pub fn switch(&mut self, opcode: u8, default: Label, targets: &[Label], end: usize) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute(opcode)?;
                }
                for target in std::iter::once(&default).chain(targets) {
                    let block = self.mark_target(*target);
                    self.add_edge(EdgeKind::Normal, block);
                }
            }
            ComputeMode::MaxStack => {
                self.stack_size -= 1;
                for target in std::iter::once(&default).chain(targets) {
                    let block = self.block_of(*target);
                    self.add_edge(EdgeKind::StackDelta(self.stack_size), block);
                }
            }
        }
        self.no_successor(end);
        Ok(())
    }

    pub fn multi_anewarray(
        &mut self,
        pool: &mut ConstantPool,
        descriptor: &str,
        dimensions: u8,
    ) -> Result<(), Error> {
        if self.current.is_none() {
            return Ok(());
        }
        match self.mode {
            ComputeMode::Frames => {
                if let Some(frame) = self.current_frame() {
                    frame.execute_multi_anewarray(pool, descriptor, dimensions)?;
                }
            }
            ComputeMode::MaxStack => self.grow_stack(1 - dimensions as i32),
        }
        Ok(())
    }

    /// Register an exception handler (edges are added once every block is known)
    pub fn add_handler(&mut self, start: Label, end: Label, handler: Label, catch_type: Option<&str>) {
        self.block_of(start);
        self.block_of(end);
        self.block_of(handler);
        self.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_owned),
        });
    }

    /// Add an edge from every block in `[start, end)` to the handler
    fn add_handler_edges(&mut self, pool: &mut ConstantPool) {
        let handlers = std::mem::take(&mut self.handlers);
        for handler in &handlers {
            let start = self.first(self.label_blocks[&handler.start]);
            let end = self.first(self.label_blocks[&handler.end]);
            let target = self.first(self.label_blocks[&handler.handler]);
            if self.blocks[start].position >= self.blocks[end].position {
                log::debug!(
                    "Ignoring exception handler range {}..{} that covers no code",
                    self.blocks[start].position,
                    self.blocks[end].position
                );
                continue;
            }
            let kind = match self.mode {
                ComputeMode::Frames => {
                    self.blocks[target].flags |= BlockFlags::TARGET;
                    let caught = handler.catch_type.as_deref().unwrap_or("java/lang/Throwable");
                    EdgeKind::Handler(FrameType::object(pool, caught))
                }
                ComputeMode::MaxStack => EdgeKind::Exception,
            };

            let mut block = Some(start);
            while let Some(protected) = block {
                if protected == end {
                    break;
                }
                self.blocks[protected].edges.push(Edge {
                    kind,
                    successor: target,
                });
                block = self.blocks[protected].next;
            }
        }
        self.handlers = handlers;
    }

    /// Maximum stack height over all paths from the method entry
    pub fn compute_max_stack(&mut self, pool: &mut ConstantPool) -> u16 {
        if let Some(current) = self.current {
            self.blocks[current].output_stack_max = self.max_stack_size;
        }
        self.add_handler_edges(pool);

        let mut max = 0;
        let mut stack = vec![0];
        self.blocks[0].flags |= BlockFlags::PUSHED;
        while let Some(block) = stack.pop() {
            let start = self.blocks[block].input_stack_top;
            max = max.max(start + self.blocks[block].output_stack_max);

            for edge_index in 0..self.blocks[block].edges.len() {
                let edge = self.blocks[block].edges[edge_index];
                let successor = &mut self.blocks[edge.successor];
                if !successor.flags.contains(BlockFlags::PUSHED) {
                    successor.input_stack_top = match edge.kind {
                        EdgeKind::StackDelta(delta) => start + delta,
                        _ => 1,
                    };
                    successor.flags |= BlockFlags::PUSHED;
                    stack.push(edge.successor);
                }
            }
        }
        log::trace!("max stack {} over {} blocks", max, self.blocks.len());
        max.clamp(0, u16::MAX as i32) as u16
    }

    /// Run type inference to a fixed point, then return `max_stack` and the stack map frames
    pub fn compute_frames(
        &mut self,
        context: &mut TypeContext,
        access: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        max_locals: u16,
    ) -> Result<(u16, Vec<StackMapFrame>), Error> {
        self.add_handler_edges(context.pool);

        let mut entry = self.blocks[0].frame.take().unwrap_or_default();
        entry.init_input_frame(
            context.pool,
            context.class_name,
            access,
            name,
            descriptor,
            max_locals,
        )?;
        let initial_locals = entry.compressed_locals();
        self.blocks[0].frame = Some(entry);

        let mut max = 0;
        let mut changed = vec![0];
        self.blocks[0].flags |= BlockFlags::PUSHED;
        while let Some(block) = changed.pop() {
            let flags = &mut self.blocks[block].flags;
            flags.remove(BlockFlags::PUSHED);
            if flags.contains(BlockFlags::TARGET) {
                flags.insert(BlockFlags::STORE);
            }
            flags.insert(BlockFlags::REACHABLE);

            let frame = match &self.blocks[block].frame {
                Some(frame) => frame.clone(),
                None => continue,
            };
            max = max.max(frame.input_stack.len() as i32 + frame.output_stack_max);

            for edge_index in 0..self.blocks[block].edges.len() {
                let edge = self.blocks[block].edges[edge_index];
                let successor = self.first(edge.successor);
                let exception = match edge.kind {
                    EdgeKind::Handler(caught) => Some(caught),
                    _ => None,
                };
                let merged = match self.blocks[successor].frame.as_mut() {
                    Some(successor_frame) => frame.merge(context, successor_frame, exception)?,
                    None => false,
                };
                let flags = &mut self.blocks[successor].flags;
                if merged && !flags.contains(BlockFlags::PUSHED) {
                    flags.insert(BlockFlags::PUSHED);
                    changed.push(successor);
                }
            }
        }

        let frames = self.stack_map_frames(context.pool, initial_locals)?;
        log::trace!(
            "max stack {}, {} stack map frame(s) over {} blocks",
            max,
            frames.len(),
            self.blocks.len()
        );
        Ok((max.clamp(0, u16::MAX as i32) as u16, frames))
    }

    /// Frames for every reachable jump target, in offset order, each relative to the last
    fn stack_map_frames(
        &self,
        pool: &mut ConstantPool,
        initial_locals: Vec<FrameType>,
    ) -> Result<Vec<StackMapFrame>, Error> {
        let mut previous_locals = verification_types(pool, &initial_locals)?;
        let mut previous_position: Option<usize> = None;
        let mut frames = vec![];

        let mut block = Some(0);
        while let Some(current) = block {
            let basic_block = &self.blocks[current];
            block = basic_block.next;
            let frame = match &basic_block.frame {
                Some(frame) if basic_block.flags.contains(BlockFlags::STORE) => frame,
                _ => continue,
            };

            let locals = verification_types(pool, &frame.compressed_locals())?;
            let stack = verification_types(pool, &frame.compressed_stack())?;
            let offset_delta = match previous_position {
                None => basic_block.position,
                Some(previous) => basic_block.position - previous - 1,
            } as u16;
            frames.push(stack_map_frame(&previous_locals, locals.clone(), stack, offset_delta));
            previous_locals = locals;
            previous_position = Some(basic_block.position);
        }
        Ok(frames)
    }
}

fn verification_types(
    pool: &mut ConstantPool,
    types: &[FrameType],
) -> Result<Vec<VerificationType<ClassConstantIndex, u16>>, Error> {
    types
        .iter()
        .map(|frame_type| frame_type.verification_type(pool))
        .collect()
}

/// Most compact encoding of a frame given the locals of the previous one
fn stack_map_frame(
    previous_locals: &[VerificationType<ClassConstantIndex, u16>],
    locals: Vec<VerificationType<ClassConstantIndex, u16>>,
    mut stack: Vec<VerificationType<ClassConstantIndex, u16>>,
    offset_delta: u16,
) -> StackMapFrame {
    let same_locals = locals.as_slice() == previous_locals;
    if stack.is_empty() {
        if same_locals {
            return StackMapFrame::SameLocalsNoStack { offset_delta };
        }
        if locals.len() < previous_locals.len()
            && previous_locals.len() - locals.len() <= 3
            && previous_locals.starts_with(&locals)
        {
            return StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k: (previous_locals.len() - locals.len()) as u8,
            };
        }
        if locals.len() > previous_locals.len()
            && locals.len() - previous_locals.len() <= 3
            && locals.starts_with(previous_locals)
        {
            return StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals: locals[previous_locals.len()..].to_vec(),
            };
        }
    } else if stack.len() == 1 && same_locals {
        if let Some(top) = stack.pop() {
            return StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack: top,
            };
        }
    }
    StackMapFrame::Full {
        offset_delta,
        locals,
        stack,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::analysis::{MapHierarchy, ObjectHierarchy};

    #[test]
    fn straight_line_code() {
        let mut pool = ConstantPool::new();
        let mut cfg = ControlFlowGraph::new(ComputeMode::MaxStack);
        cfg.zero_operand(ICONST_1, 1).unwrap();
        cfg.zero_operand(ICONST_2, 2).unwrap();
        cfg.zero_operand(IADD, 3).unwrap();
        cfg.zero_operand(IRETURN, 4).unwrap();
        assert_eq!(cfg.compute_max_stack(&mut pool), 2);
    }

    #[test]
    fn wide_values_and_invocations() {
        let mut pool = ConstantPool::new();
        let mut cfg = ControlFlowGraph::new(ComputeMode::MaxStack);
        cfg.ldc(&mut pool, &ConstValue::Long(1)).unwrap();
        cfg.ldc(&mut pool, &ConstValue::Double(2.0)).unwrap();
        cfg.invoke(&mut pool, INVOKESTATIC, "f", "(JD)I").unwrap();
        cfg.field(&mut pool, GETSTATIC, "x", "J").unwrap();
        cfg.zero_operand(POP2, 12).unwrap();
        cfg.zero_operand(IRETURN, 13).unwrap();
        assert_eq!(cfg.compute_max_stack(&mut pool), 4);
    }

    #[test]
    fn diamond_takes_the_higher_branch() {
        let mut pool = ConstantPool::new();
        let mut cfg = ControlFlowGraph::new(ComputeMode::MaxStack);
        let otherwise = Label::new();
        let join = Label::new();

        cfg.var(ILOAD, 0, 1).unwrap();
        cfg.jump(IFEQ, otherwise, 4, false).unwrap();
        cfg.zero_operand(ICONST_1, 5).unwrap();
        cfg.zero_operand(ICONST_2, 6).unwrap();
        cfg.zero_operand(IADD, 7).unwrap();
        cfg.jump(GOTO, join, 10, false).unwrap();
        cfg.label(otherwise, 10);
        cfg.zero_operand(ICONST_0, 11).unwrap();
        cfg.label(join, 11);
        cfg.zero_operand(IRETURN, 12).unwrap();

        assert_eq!(cfg.compute_max_stack(&mut pool), 2);
        let join_block = cfg.label_blocks[&join];
        assert_eq!(cfg.blocks()[join_block].input_stack_top, 1);
    }

    #[test]
    fn handlers_start_with_one_slot() {
        let mut pool = ConstantPool::new();
        let mut cfg = ControlFlowGraph::new(ComputeMode::MaxStack);
        let (start, end, handler) = (Label::new(), Label::new(), Label::new());
        cfg.add_handler(start, end, handler, None);

        cfg.label(start, 0);
        cfg.zero_operand(NOP, 1).unwrap();
        cfg.label(end, 1);
        cfg.zero_operand(RETURN, 2).unwrap();
        cfg.label(handler, 2);
        cfg.zero_operand(DUP, 3).unwrap();
        cfg.zero_operand(POP2, 4).unwrap();
        cfg.zero_operand(RETURN, 5).unwrap();

        assert_eq!(cfg.compute_max_stack(&mut pool), 2);
    }

    #[test]
    fn inverted_handler_ranges_protect_nothing() {
        let mut pool = ConstantPool::new();
        let mut cfg = ControlFlowGraph::new(ComputeMode::MaxStack);
        let (start, end, handler) = (Label::new(), Label::new(), Label::new());
        cfg.add_handler(start, end, handler, None);

        cfg.label(end, 0);
        cfg.zero_operand(NOP, 1).unwrap();
        cfg.label(start, 1);
        cfg.zero_operand(RETURN, 2).unwrap();
        cfg.label(handler, 2);
        cfg.zero_operand(DUP, 3).unwrap();
        cfg.zero_operand(DUP, 4).unwrap();
        cfg.zero_operand(POP2, 5).unwrap();
        cfg.zero_operand(POP, 6).unwrap();
        cfg.zero_operand(RETURN, 7).unwrap();

        assert_eq!(cfg.compute_max_stack(&mut pool), 0);
        assert!(cfg
            .blocks()
            .iter()
            .all(|block| block.edges.iter().all(|edge| !matches!(edge.kind, EdgeKind::Exception))));
    }

    #[test]
    fn switch_targets_inherit_the_popped_height() {
        let mut pool = ConstantPool::new();
        let mut cfg = ControlFlowGraph::new(ComputeMode::MaxStack);
        let (default, one) = (Label::new(), Label::new());
        cfg.zero_operand(ICONST_5, 1).unwrap();
        cfg.zero_operand(ICONST_1, 2).unwrap();
        cfg.switch(TABLESWITCH, default, &[one], 24).unwrap();
        cfg.label(one, 24);
        cfg.zero_operand(ICONST_2, 25).unwrap();
        cfg.zero_operand(ICONST_3, 26).unwrap();
        cfg.zero_operand(POP2, 27).unwrap();
        cfg.zero_operand(IRETURN, 28).unwrap();
        cfg.label(default, 28);
        cfg.zero_operand(IRETURN, 29).unwrap();

        assert_eq!(cfg.compute_max_stack(&mut pool), 3);
    }

    #[test]
    fn frames_for_a_diamond() {
        let mut pool = ConstantPool::new();
        let mut hierarchy = MapHierarchy::new();
        hierarchy
            .add("Left", "Base")
            .add("Right", "Base")
            .add("Base", "java/lang/Object");

        let mut cfg = ControlFlowGraph::new(ComputeMode::Frames);
        let otherwise = Label::new();
        let join = Label::new();
        cfg.var(ILOAD, 0, 1).unwrap();
        cfg.jump(IFEQ, otherwise, 4, false).unwrap();
        cfg.var(ALOAD, 1, 5).unwrap();
        cfg.var(ASTORE, 3, 6).unwrap();
        cfg.jump(GOTO, join, 9, false).unwrap();
        cfg.label(otherwise, 9);
        cfg.var(ALOAD, 2, 10).unwrap();
        cfg.var(ASTORE, 3, 11).unwrap();
        cfg.label(join, 11);
        cfg.zero_operand(RETURN, 12).unwrap();

        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let (max_stack, frames) = cfg
            .compute_frames(
                &mut context,
                MethodAccessFlags::STATIC,
                "pick",
                "(ZLLeft;LRight;)V",
                4,
            )
            .unwrap();

        assert_eq!(max_stack, 1);
        let base = pool.class("Base").unwrap();
        assert_eq!(
            frames,
            vec![
                StackMapFrame::SameLocalsNoStack { offset_delta: 9 },
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta: 1,
                    locals: vec![VerificationType::Object(base)],
                },
            ]
        );
    }

    #[test]
    fn frames_for_a_handler() {
        let mut pool = ConstantPool::new();
        let mut cfg = ControlFlowGraph::new(ComputeMode::Frames);
        let (start, end, handler) = (Label::new(), Label::new(), Label::new());
        cfg.add_handler(start, end, handler, Some("java/io/IOException"));
        cfg.label(start, 0);
        cfg.invoke(&mut pool, INVOKESTATIC, "io", "()V").unwrap();
        cfg.label(end, 3);
        cfg.zero_operand(RETURN, 4).unwrap();
        cfg.label(handler, 4);
        cfg.var(ASTORE, 0, 5).unwrap();
        cfg.zero_operand(RETURN, 6).unwrap();

        let hierarchy = ObjectHierarchy;
        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let (max_stack, frames) = cfg
            .compute_frames(&mut context, MethodAccessFlags::STATIC, "m", "()V", 1)
            .unwrap();

        assert_eq!(max_stack, 1);
        let io = pool.class("java/io/IOException").unwrap();
        assert_eq!(
            frames,
            vec![StackMapFrame::SameLocalsOneStack {
                offset_delta: 4,
                stack: VerificationType::Object(io),
            }]
        );
    }

    #[test]
    fn unreachable_blocks_get_no_frame() {
        let mut pool = ConstantPool::new();
        let mut cfg = ControlFlowGraph::new(ComputeMode::Frames);
        let dead = Label::new();
        cfg.zero_operand(RETURN, 1).unwrap();
        cfg.label(dead, 1);
        cfg.zero_operand(ICONST_0, 2).unwrap();
        cfg.zero_operand(IRETURN, 3).unwrap();

        let hierarchy = ObjectHierarchy;
        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let (_, frames) = cfg
            .compute_frames(&mut context, MethodAccessFlags::STATIC, "m", "()I", 0)
            .unwrap();
        assert!(frames.is_empty());
        let dead_block = cfg.first(cfg.label_blocks[&dead]);
        assert!(!cfg.blocks()[dead_block].flags.contains(BlockFlags::REACHABLE));
    }

    #[test]
    fn compact_frame_forms() {
        let int = VerificationType::<ClassConstantIndex, u16>::Integer;
        let float = VerificationType::Float;
        assert_eq!(
            stack_map_frame(&[int, float], vec![int], vec![], 3),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 3,
                chopped_k: 1
            }
        );
        assert_eq!(
            stack_map_frame(&[int], vec![int], vec![float], 70),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 70,
                stack: float
            }
        );
        assert_eq!(
            stack_map_frame(&[int], vec![float], vec![], 0),
            StackMapFrame::Full {
                offset_delta: 0,
                locals: vec![float],
                stack: vec![]
            }
        );
        assert_eq!(
            stack_map_frame(&[], vec![int, int, int, int], vec![], 0),
            StackMapFrame::Full {
                offset_delta: 0,
                locals: vec![int, int, int, int],
                stack: vec![]
            }
        );
    }
}
