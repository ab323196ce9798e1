use crate::jvm::analysis::{ClassHierarchy, ComputeMode, ControlFlowGraph, TypeContext};
use crate::jvm::annotations::{AnnotationDefaultWriter, AnnotationSet};
use crate::jvm::class_file::{
    Attribute, ByteVector, ClassConstantIndex, ConstValue, ConstantPool, Exceptions, LineNumber,
    LineNumberTable, LocalVariable, LocalVariableTable, MethodHandle, Serialize, Signature, StackMapTable,
    Utf8ConstantIndex,
};
use crate::jvm::descriptors::{argument_and_return_sizes, JavaMethodDescriptor, ParseDescriptor};
use crate::jvm::opcodes::*;
use crate::jvm::{AnnotationVisitorResult, Error, Label, MethodAccessFlags, MethodInfo, MethodVisitor};
use std::collections::HashMap;

/// Where a label ended up, and the jump operands still waiting for it
#[derive(Default)]
struct LabelState {
    position: Option<usize>,
    forward_references: Vec<ForwardReference>,
}

struct ForwardReference {
    /// Offset of the instruction the jump is relative to
    source: usize,

    /// Offset of the operand to patch
    operand: usize,
    wide: bool,
}

struct TryCatchBlock {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: Option<ClassConstantIndex>,
}

struct LocalVariableEntry {
    start: Label,
    end: Label,
    name: Utf8ConstantIndex,
    descriptor: Utf8ConstantIndex,
    index: u16,
}

/// Writes one `method_info` (with its `Code` attribute) when the method's `visit_end` is seen
///
/// Instructions are encoded as they are visited, picking the most compact form for each
/// (`iload_0`, `ldc` versus `ldc_w`, `wide` for large locals). Jumps to labels that are already
/// placed are encoded directly, switching to `goto_w` (or an inverted condition around a `goto_w`)
/// when the offset does not fit in 16 bits. Jumps to labels that are not placed yet reserve their
/// operand and are patched when the label is visited.
///
/// Every instruction is also fed to a [`ControlFlowGraph`], which works out `max_stack` (and the
/// stack map frames, in [`ComputeMode::Frames`]) once the method ends.
pub struct MethodWriter<'a> {
    pool: &'a mut ConstantPool,
    hierarchy: &'a dyn ClassHierarchy,
    class_name: &'a str,
    output: &'a mut ByteVector,
    count: &'a mut u16,

    access: MethodAccessFlags,
    name: String,
    descriptor: String,
    name_index: Utf8ConstantIndex,
    descriptor_index: Utf8ConstantIndex,
    parameter_count: usize,

    /// `Exceptions`, `Signature`, `Deprecated`
    attributes: Vec<Attribute>,
    annotation_default: Option<ByteVector>,
    visible_annotations: AnnotationSet,
    invisible_annotations: AnnotationSet,
    visible_parameter_annotations: Vec<AnnotationSet>,
    invisible_parameter_annotations: Vec<AnnotationSet>,

    has_code: bool,
    code: ByteVector,
    cfg: ControlFlowGraph,
    labels: HashMap<Label, LabelState>,
    try_catch_blocks: Vec<TryCatchBlock>,
    line_numbers: Vec<(Label, u16)>,
    local_variables: Vec<LocalVariableEntry>,

    /// Locals used so far (starting with the arguments)
    max_locals: u16,

    /// Values passed to `visit_maxs`
    visited_max_stack: u16,
    visited_max_locals: u16,
}

impl<'a> MethodWriter<'a> {
    pub fn new(
        pool: &'a mut ConstantPool,
        hierarchy: &'a dyn ClassHierarchy,
        class_name: &'a str,
        output: &'a mut ByteVector,
        count: &'a mut u16,
        compute: ComputeMode,
        method: &MethodInfo,
    ) -> Result<MethodWriter<'a>, Error> {
        let parsed = JavaMethodDescriptor::parse(&method.descriptor)
            .map_err(|_| Error::MalformedDescriptor(method.descriptor.clone()))?;
        let arguments = parsed.parameter_length(!method.access.contains(MethodAccessFlags::STATIC));
        let parameter_count = parsed.parameters.len();

        let name_index = pool.utf8(&method.name)?;
        let descriptor_index = pool.utf8(&method.descriptor)?;
        let mut attributes = vec![];
        if !method.exceptions.is_empty() {
            let exceptions = method
                .exceptions
                .iter()
                .map(|exception| pool.class(exception))
                .collect::<Result<_, _>>()?;
            attributes.push(pool.get_attribute(Exceptions(exceptions))?);
        }
        if let Some(signature) = &method.signature {
            let signature = Signature(pool.utf8(signature)?);
            attributes.push(pool.get_attribute(signature)?);
        }
        if method.deprecated {
            attributes.push(Attribute {
                name_index: pool.utf8("Deprecated")?,
                info: vec![],
            });
        }

        Ok(MethodWriter {
            pool,
            hierarchy,
            class_name,
            output,
            count,
            access: method.access,
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            name_index,
            descriptor_index,
            parameter_count,
            attributes,
            annotation_default: None,
            visible_annotations: AnnotationSet::default(),
            invisible_annotations: AnnotationSet::default(),
            visible_parameter_annotations: vec![],
            invisible_parameter_annotations: vec![],
            has_code: false,
            code: ByteVector::new(),
            cfg: ControlFlowGraph::new(compute),
            labels: HashMap::new(),
            try_catch_blocks: vec![],
            line_numbers: vec![],
            local_variables: vec![],
            max_locals: arguments as u16,
            visited_max_stack: 0,
            visited_max_locals: 0,
        })
    }

    fn use_local(&mut self, var: u16, width: u16) {
        self.max_locals = self.max_locals.max(var.saturating_add(width));
    }

    fn label_position(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).and_then(|state| state.position)
    }

    fn resolved(&self, label: Label) -> Result<usize, Error> {
        self.label_position(label).ok_or(Error::UnresolvedLabel(label))
    }

    /// Write the offset from `source` to `label`, or a placeholder patched once `label` is placed
    fn put_offset(&mut self, label: Label, source: usize, wide: bool) -> Result<(), Error> {
        match self.label_position(label) {
            Some(position) => {
                let offset = position as i64 - source as i64;
                if wide {
                    self.code.put_i32(offset as i32);
                } else {
                    let offset = i16::try_from(offset).map_err(|_| Error::JumpOffsetOverflow {
                        source,
                        target: position,
                    })?;
                    self.code.put_i16(offset);
                }
            }
            None => {
                let operand = self.code.len();
                self.labels
                    .entry(label)
                    .or_default()
                    .forward_references
                    .push(ForwardReference { source, operand, wide });
                if wide {
                    self.code.put_i32(0);
                } else {
                    self.code.put_i16(0);
                }
            }
        }
        Ok(())
    }

    fn code_attribute(&mut self) -> Result<Attribute, Error> {
        for (label, state) in &self.labels {
            if state.position.is_none() && !state.forward_references.is_empty() {
                return Err(Error::UnresolvedLabel(*label));
            }
        }
        let length = self.code.len();
        if length > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow(length));
        }

        let max_locals = self.max_locals.max(self.visited_max_locals);
        let (max_stack, frames) = match self.cfg.mode() {
            ComputeMode::Frames => {
                let mut context = TypeContext {
                    pool: &mut *self.pool,
                    hierarchy: self.hierarchy,
                    class_name: self.class_name,
                };
                self.cfg.compute_frames(
                    &mut context,
                    self.access,
                    &self.name,
                    &self.descriptor,
                    max_locals,
                )?
            }
            ComputeMode::MaxStack => {
                let computed = self.cfg.compute_max_stack(self.pool);
                (computed.max(self.visited_max_stack), vec![])
            }
        };

        let mut exception_table = ByteVector::new();
        let mut handler_count: u16 = 0;
        for block in &self.try_catch_blocks {
            let start = self.resolved(block.start)?;
            let end = self.resolved(block.end)?;
            let handler = self.resolved(block.handler)?;
            if start >= end {
                log::debug!("Dropping empty exception handler range at {} in {}", start, self.name);
                continue;
            }
            exception_table
                .put_u16(start as u16)
                .put_u16(end as u16)
                .put_u16(handler as u16)
                .put_u16(block.catch_type.map_or(0, |index| index.0 .0));
            handler_count += 1;
        }

        let mut code_attributes = vec![];
        if !self.line_numbers.is_empty() {
            let mut lines = Vec::with_capacity(self.line_numbers.len());
            for (start, line) in &self.line_numbers {
                lines.push(LineNumber {
                    start_pc: self.resolved(*start)? as u16,
                    line_number: *line,
                });
            }
            code_attributes.push(self.pool.get_attribute(LineNumberTable(lines))?);
        }
        if !self.local_variables.is_empty() {
            let mut locals = Vec::with_capacity(self.local_variables.len());
            for local in &self.local_variables {
                let start = self.resolved(local.start)?;
                let end = self.resolved(local.end)?;
                locals.push(LocalVariable {
                    start_pc: start as u16,
                    length: end.saturating_sub(start) as u16,
                    name_index: local.name,
                    descriptor_index: local.descriptor,
                    index: local.index,
                });
            }
            code_attributes.push(self.pool.get_attribute(LocalVariableTable(locals))?);
        }
        let frame_count = frames.len();
        if !frames.is_empty() {
            code_attributes.push(self.pool.get_attribute(StackMapTable(frames))?);
        }

        log::trace!(
            "Method {}{}: {} byte(s) of code, max_stack {}, max_locals {}, {} frame(s)",
            self.name,
            self.descriptor,
            length,
            max_stack,
            max_locals,
            frame_count
        );

        let mut payload = ByteVector::with_capacity(length + exception_table.len() + 16);
        payload
            .put_u16(max_stack)
            .put_u16(max_locals)
            .put_u32(length as u32)
            .put_bytes(self.code.as_slice())
            .put_u16(handler_count)
            .put_bytes(exception_table.as_slice());
        code_attributes.serialize(&mut payload)?;
        Ok(Attribute {
            name_index: self.pool.utf8("Code")?,
            info: payload.into_vec(),
        })
    }
}

/// Conditional jump taken in exactly the opposite cases
fn inverted(opcode: u8) -> u8 {
    match opcode {
        IFNULL => IFNONNULL,
        IFNONNULL => IFNULL,
        // `ifeq`/`ifne`, `iflt`/`ifge`, ... are pairs starting at an odd opcode
        _ => ((opcode + 1) ^ 1) - 1,
    }
}

impl<'a> MethodVisitor for MethodWriter<'a> {
    fn visit_annotation_default(&mut self) -> AnnotationVisitorResult<'_> {
        let buffer = self.annotation_default.insert(ByteVector::new());
        Ok(Some(Box::new(AnnotationDefaultWriter::new(&mut *self.pool, buffer))))
    }

    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        let set = if visible {
            &mut self.visible_annotations
        } else {
            &mut self.invisible_annotations
        };
        Ok(Some(Box::new(set.add(&mut *self.pool, descriptor)?)))
    }

    fn visit_parameter_annotation(
        &mut self,
        parameter: u8,
        descriptor: &str,
        visible: bool,
    ) -> AnnotationVisitorResult<'_> {
        let sets = if visible {
            &mut self.visible_parameter_annotations
        } else {
            &mut self.invisible_parameter_annotations
        };
        let parameter = parameter as usize;
        if sets.len() <= parameter {
            sets.resize_with(parameter + 1, AnnotationSet::default);
        }
        Ok(Some(Box::new(sets[parameter].add(&mut *self.pool, descriptor)?)))
    }

    fn visit_code(&mut self) -> Result<(), Error> {
        self.has_code = true;
        Ok(())
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<(), Error> {
        self.code.put_u8(opcode);
        self.cfg.zero_operand(opcode, self.code.len())
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<(), Error> {
        if opcode == SIPUSH {
            self.code.put_u8(opcode).put_i16(operand as i16);
        } else {
            self.code.put11(opcode, operand as u8);
        }
        self.cfg.int_operand(opcode, operand)
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<(), Error> {
        let compact = match opcode {
            ILOAD..=ALOAD => Some(ILOAD_0 + 4 * (opcode - ILOAD)),
            ISTORE..=ASTORE => Some(ISTORE_0 + 4 * (opcode - ISTORE)),
            _ => None,
        };
        match compact {
            Some(base) if var < 4 => self.code.put_u8(base + var as u8),
            _ if var > u8::MAX as u16 => self.code.put_u8(WIDE).put_u8(opcode).put_u16(var),
            _ => self.code.put11(opcode, var as u8),
        };

        let width = if matches!(opcode, LLOAD | DLOAD | LSTORE | DSTORE) { 2 } else { 1 };
        self.use_local(var, width);
        self.cfg.var(opcode, var, self.code.len())?;

        // A store inside a protected range changes what the handler may see
        if self.cfg.mode() == ComputeMode::Frames
            && matches!(opcode, ISTORE..=ASTORE)
            && self.cfg.has_handlers()
        {
            self.visit_label(Label::new())?;
        }
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<(), Error> {
        let offset = self.code.len();
        let class = self.pool.class(type_name)?;
        self.code.put12(opcode, class.0 .0);
        self.cfg.type_insn(self.pool, opcode, offset, type_name)
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        let field = self.pool.field_ref(owner, name, descriptor)?;
        self.code.put12(opcode, field.0 .0);
        self.cfg.field(self.pool, opcode, name, descriptor)
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<(), Error> {
        let method = self.pool.method_ref(owner, name, descriptor, interface)?;
        self.code.put12(opcode, method.0 .0);
        if opcode == INVOKEINTERFACE {
            let (arguments, _) = argument_and_return_sizes(descriptor)
                .map_err(|_| Error::MalformedDescriptor(descriptor.to_owned()))?;
            self.code.put11(arguments as u8, 0);
        }
        self.cfg.invoke(self.pool, opcode, name, descriptor)
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &MethodHandle,
        bootstrap_arguments: &[ConstValue],
    ) -> Result<(), Error> {
        let bootstrap_method = self.pool.bootstrap_method(bootstrap_method, bootstrap_arguments)?;
        let call_site = self.pool.invoke_dynamic(name, descriptor, bootstrap_method)?;
        self.code.put12(INVOKEDYNAMIC, call_site.0 .0).put_u16(0);
        self.cfg.invoke(self.pool, INVOKEDYNAMIC, name, descriptor)
    }

    fn visit_jump_insn(&mut self, opcode: u8, target: Label) -> Result<(), Error> {
        let source = self.code.len();
        let (opcode, wide) = match opcode {
            GOTO_W => (GOTO, true),
            JSR_W => (JSR, true),
            opcode => (opcode, false),
        };
        let wide_opcode = if opcode == GOTO { GOTO_W } else { JSR_W };

        let mut inverted_jump = false;
        match self.label_position(target) {
            Some(position) => {
                let offset = position as i64 - source as i64;
                match i16::try_from(offset) {
                    Ok(offset) if !wide => {
                        self.code.put_u8(opcode).put_i16(offset);
                    }
                    _ if opcode == GOTO || opcode == JSR => {
                        self.code.put_u8(wide_opcode).put_i32(offset as i32);
                    }
                    _ => {
                        // Opposite condition skipping over a `goto_w` (3 + 5 bytes)
                        inverted_jump = true;
                        self.code
                            .put_u8(inverted(opcode))
                            .put_i16(8)
                            .put_u8(GOTO_W)
                            .put_i32((offset - 3) as i32);
                    }
                }
            }
            None if wide => {
                self.code.put_u8(wide_opcode);
                self.put_offset(target, source, true)?;
            }
            None => {
                self.code.put_u8(opcode);
                self.put_offset(target, source, false)?;
            }
        }
        self.cfg.jump(opcode, target, self.code.len(), inverted_jump)
    }

    fn visit_label(&mut self, label: Label) -> Result<(), Error> {
        let position = self.code.len();
        let state = self.labels.entry(label).or_default();
        state.position = Some(position);
        for reference in std::mem::take(&mut state.forward_references) {
            let offset = position as i64 - reference.source as i64;
            if reference.wide {
                self.code.set_i32(reference.operand, offset as i32);
            } else {
                let offset = i16::try_from(offset).map_err(|_| Error::JumpOffsetOverflow {
                    source: reference.source,
                    target: position,
                })?;
                self.code.set_i16(reference.operand, offset);
            }
        }
        if !label.is_debug() {
            self.cfg.label(label, position);
        }
        Ok(())
    }

    fn visit_ldc_insn(&mut self, value: &ConstValue) -> Result<(), Error> {
        let index = self.pool.constant(value)?.0;
        if value.is_wide() {
            self.code.put12(LDC2_W, index);
        } else if index <= u8::MAX as u16 {
            self.code.put11(LDC, index as u8);
        } else {
            self.code.put12(LDC_W, index);
        }
        self.cfg.ldc(self.pool, value)
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<(), Error> {
        match (u8::try_from(var), i8::try_from(increment)) {
            (Ok(var), Ok(increment)) => {
                self.code.put11(IINC, var).put_u8(increment as u8);
            }
            _ => {
                self.code
                    .put11(WIDE, IINC)
                    .put_u16(var)
                    .put_i16(increment);
            }
        }
        self.use_local(var, 1);
        self.cfg.iinc(var);
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        targets: &[Label],
    ) -> Result<(), Error> {
        let source = self.code.len();
        self.code.put_u8(TABLESWITCH).align4();
        self.put_offset(default, source, true)?;
        self.code.put_i32(min).put_i32(max);
        for target in targets {
            self.put_offset(*target, source, true)?;
        }
        self.cfg.switch(TABLESWITCH, default, targets, self.code.len())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        targets: &[Label],
    ) -> Result<(), Error> {
        if keys.len() != targets.len() {
            return Err(Error::SwitchArity {
                keys: keys.len(),
                targets: targets.len(),
            });
        }
        let source = self.code.len();
        self.code.put_u8(LOOKUPSWITCH).align4();
        self.put_offset(default, source, true)?;
        self.code.put_i32(keys.len() as i32);
        for (key, target) in keys.iter().zip(targets) {
            self.code.put_i32(*key);
            self.put_offset(*target, source, true)?;
        }
        self.cfg.switch(LOOKUPSWITCH, default, targets, self.code.len())
    }

    fn visit_multi_anewarray_insn(&mut self, descriptor: &str, dimensions: u8) -> Result<(), Error> {
        let class = self.pool.class(descriptor)?;
        self.code.put12(MULTIANEWARRAY, class.0 .0).put_u8(dimensions);
        self.cfg.multi_anewarray(self.pool, descriptor, dimensions)
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error> {
        let catch_class = match catch_type {
            Some(catch_type) => Some(self.pool.class(catch_type)?),
            None => None,
        };
        self.try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: catch_class,
        });
        self.cfg.add_handler(start, end, handler, catch_type);
        Ok(())
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<(), Error> {
        let width = if descriptor == "J" || descriptor == "D" { 2 } else { 1 };
        self.use_local(index, width);
        self.local_variables.push(LocalVariableEntry {
            start,
            end,
            name: self.pool.utf8(name)?,
            descriptor: self.pool.utf8(descriptor)?,
            index,
        });
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        self.line_numbers.push((start, line));
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<(), Error> {
        self.visited_max_stack = max_stack;
        self.visited_max_locals = max_locals;
        Ok(())
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        let mut attributes = std::mem::take(&mut self.attributes);
        if self.has_code {
            attributes.insert(0, self.code_attribute()?);
        }
        if let Some(default) = self.annotation_default.take() {
            attributes.push(Attribute {
                name_index: self.pool.utf8("AnnotationDefault")?,
                info: default.into_vec(),
            });
        }
        for (set, name) in [
            (&self.visible_annotations, "RuntimeVisibleAnnotations"),
            (&self.invisible_annotations, "RuntimeInvisibleAnnotations"),
        ] {
            if let Some(attribute) = set.attribute(&mut *self.pool, name)? {
                attributes.push(attribute);
            }
        }
        for (sets, name) in [
            (&self.visible_parameter_annotations, "RuntimeVisibleParameterAnnotations"),
            (&self.invisible_parameter_annotations, "RuntimeInvisibleParameterAnnotations"),
        ] {
            let attribute =
                AnnotationSet::parameters_attribute(sets, self.parameter_count, &mut *self.pool, name)?;
            if let Some(attribute) = attribute {
                attributes.push(attribute);
            }
        }

        let output = &mut *self.output;
        self.access.serialize(output)?;
        self.name_index.serialize(output)?;
        self.descriptor_index.serialize(output)?;
        attributes.serialize(output)?;
        *self.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::analysis::ObjectHierarchy;

    /// Write a single method, returning the bytes of its `method_info`
    fn write_method(
        pool: &mut ConstantPool,
        access: MethodAccessFlags,
        descriptor: &str,
        body: impl FnOnce(&mut MethodWriter) -> Result<(), Error>,
    ) -> Result<Vec<u8>, Error> {
        let mut output = ByteVector::new();
        let mut count = 0;
        {
            let info = MethodInfo {
                access,
                name: String::from("m"),
                descriptor: String::from(descriptor),
                signature: None,
                exceptions: vec![],
                deprecated: false,
            };
            let mut writer = MethodWriter::new(
                pool,
                &ObjectHierarchy,
                "Test",
                &mut output,
                &mut count,
                ComputeMode::MaxStack,
                &info,
            )?;
            writer.visit_code()?;
            body(&mut writer)?;
            writer.visit_maxs(0, 0)?;
            writer.visit_end()?;
        }
        assert_eq!(count, 1);
        Ok(output.into_vec())
    }

    // `method_info` header (8 bytes), `Code` attribute header (6 bytes), then max_stack,
    // max_locals, and code_length
    fn max_stack(method: &[u8]) -> u16 {
        u16::from_be_bytes([method[14], method[15]])
    }

    fn max_locals(method: &[u8]) -> u16 {
        u16::from_be_bytes([method[16], method[17]])
    }

    fn code(method: &[u8]) -> &[u8] {
        let length = u32::from_be_bytes([method[18], method[19], method[20], method[21]]) as usize;
        &method[22..22 + length]
    }

    #[test]
    fn locals_use_compact_and_wide_forms() {
        let mut pool = ConstantPool::new();
        let method = write_method(&mut pool, MethodAccessFlags::STATIC, "(IJ)V", |writer| {
            writer.visit_var_insn(ILOAD, 0)?;
            writer.visit_var_insn(ISTORE, 300)?;
            writer.visit_var_insn(LLOAD, 1)?;
            writer.visit_insn(POP2)?;
            writer.visit_iinc_insn(2, 1)?;
            writer.visit_insn(RETURN)
        })
        .unwrap();
        assert_eq!(
            code(&method),
            &[ILOAD_0, WIDE, ISTORE, 0x01, 0x2C, ILOAD_0 + 5, POP2, IINC, 2, 1, RETURN]
        );
        assert_eq!(max_stack(&method), 2);
        assert_eq!(max_locals(&method), 301);
    }

    #[test]
    fn far_backward_conditional_is_inverted_around_goto_w() {
        let mut pool = ConstantPool::new();
        let method = write_method(&mut pool, MethodAccessFlags::STATIC, "(I)V", |writer| {
            let top = Label::new();
            writer.visit_label(top)?;
            for _ in 0..40000 {
                writer.visit_insn(NOP)?;
            }
            writer.visit_var_insn(ILOAD, 0)?;
            writer.visit_jump_insn(IFEQ, top)?;
            writer.visit_insn(RETURN)
        })
        .unwrap();
        let code = code(&method);
        let jump = &code[40001..];
        let back = (-(40001 + 3) as i32).to_be_bytes();
        assert_eq!(
            jump,
            &[IFNE, 0, 8, GOTO_W, back[0], back[1], back[2], back[3], RETURN]
        );
        assert_eq!(max_stack(&method), 1);
    }

    #[test]
    fn forward_jumps_are_patched() {
        let mut pool = ConstantPool::new();
        let method = write_method(&mut pool, MethodAccessFlags::STATIC, "(I)I", |writer| {
            let zero = Label::new();
            writer.visit_var_insn(ILOAD, 0)?;
            writer.visit_jump_insn(IFEQ, zero)?;
            writer.visit_insn(ICONST_1)?;
            writer.visit_insn(IRETURN)?;
            writer.visit_label(zero)?;
            writer.visit_insn(ICONST_0)?;
            writer.visit_insn(IRETURN)
        })
        .unwrap();
        assert_eq!(
            code(&method),
            &[ILOAD_0, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN]
        );
    }

    #[test]
    fn far_forward_jump_is_an_error() {
        let mut pool = ConstantPool::new();
        let result = write_method(&mut pool, MethodAccessFlags::STATIC, "()V", |writer| {
            let end = Label::new();
            writer.visit_jump_insn(GOTO, end)?;
            for _ in 0..40000 {
                writer.visit_insn(NOP)?;
            }
            writer.visit_label(end)?;
            writer.visit_insn(RETURN)
        });
        assert!(matches!(
            result,
            Err(Error::JumpOffsetOverflow { source: 0, target: 40003 })
        ));
    }

    #[test]
    fn jump_to_a_label_never_placed_is_an_error() {
        let mut pool = ConstantPool::new();
        let nowhere = Label::new();
        let result = write_method(&mut pool, MethodAccessFlags::STATIC, "()V", |writer| {
            writer.visit_jump_insn(GOTO, nowhere)
        });
        assert!(matches!(result, Err(Error::UnresolvedLabel(label)) if label == nowhere));
    }

    #[test]
    fn lookup_switch_needs_a_target_per_key() {
        let mut pool = ConstantPool::new();
        let result = write_method(&mut pool, MethodAccessFlags::STATIC, "(I)V", |writer| {
            let (default, one) = (Label::new(), Label::new());
            writer.visit_var_insn(ILOAD, 0)?;
            writer.visit_lookup_switch_insn(default, &[1, 2], &[one])?;
            writer.visit_label(one)?;
            writer.visit_label(default)?;
            writer.visit_insn(RETURN)
        });
        assert!(matches!(
            result,
            Err(Error::SwitchArity { keys: 2, targets: 1 })
        ));
    }

    #[test]
    fn ldc_picks_the_narrowest_encoding() {
        let mut pool = ConstantPool::new();
        for value in 0..300 {
            pool.integer(value).unwrap();
        }
        let method = write_method(&mut pool, MethodAccessFlags::STATIC, "()V", |writer| {
            writer.visit_ldc_insn(&ConstValue::Integer(7))?;
            writer.visit_ldc_insn(&ConstValue::Integer(1_000_000))?;
            writer.visit_ldc_insn(&ConstValue::Long(1))?;
            writer.visit_insn(POP2)?;
            writer.visit_insn(POP2)?;
            writer.visit_insn(RETURN)
        })
        .unwrap();
        let seven = pool.integer(7).unwrap().0;
        let million = pool.integer(1_000_000).unwrap().0.to_be_bytes();
        let one = pool.long(1).unwrap().0.to_be_bytes();
        assert_eq!(
            code(&method),
            &[
                LDC,
                seven as u8,
                LDC_W,
                million[0],
                million[1],
                LDC2_W,
                one[0],
                one[1],
                POP2,
                POP2,
                RETURN
            ]
        );
        assert_eq!(max_stack(&method), 4);
    }

    #[test]
    fn switches_are_aligned() {
        let mut pool = ConstantPool::new();
        let method = write_method(&mut pool, MethodAccessFlags::STATIC, "(I)V", |writer| {
            let done = Label::new();
            writer.visit_var_insn(ILOAD, 0)?;
            writer.visit_table_switch_insn(1, 2, done, &[done, done])?;
            writer.visit_label(done)?;
            writer.visit_insn(RETURN)
        })
        .unwrap();
        // iload_0 at 0, tableswitch at 1, two padding bytes, then default/low/high/2 targets
        let code = code(&method);
        assert_eq!(code.len(), 1 + 1 + 2 + 5 * 4 + 1);
        assert_eq!(&code[1..4], &[TABLESWITCH, 0, 0]);
        assert_eq!(&code[4..8], &23i32.to_be_bytes());
        assert_eq!(&code[8..16], &[0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(code[24], RETURN);
    }
}
