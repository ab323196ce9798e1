use crate::jvm::class_file::BytecodeReader;
use crate::jvm::opcodes::*;
use crate::jvm::{Error, Label, MethodVisitor};

/// Visitor that ignores everything, for the pass that only finds jump targets
struct Skip;

impl MethodVisitor for Skip {}

/// Walks the instructions of one `Code` attribute
struct CodeReader<'r, 'a> {
    reader: &'r BytecodeReader<'a>,

    /// Offset of the first instruction in the class file
    start: usize,
    length: usize,

    /// Label of each code offset that something refers to (one extra slot for the end)
    labels: Vec<Option<Label>>,
}

impl<'r, 'a> CodeReader<'r, 'a> {
    /// Label for a code offset, made on first use
    ///
    /// Jump targets are found before debug attributes are read, so a label is only a debug label
    /// if nothing but debug attributes refer to its offset.
    fn label(&mut self, source: usize, target: i64, debug: bool) -> Result<Label, Error> {
        if target < 0 || target as usize > self.length {
            return Err(Error::InvalidCodeOffset { source, target });
        }
        let slot = &mut self.labels[target as usize];
        Ok(*slot.get_or_insert_with(|| {
            if debug {
                Label::new_debug()
            } else {
                Label::new()
            }
        }))
    }

    fn jump_target(&mut self, pc: usize, delta: i64) -> Result<Label, Error> {
        self.label(pc, pc as i64 + delta, false)
    }

    /// Decode the instruction at `pc` into one visitor event and return the next `pc`
    fn instruction(&mut self, pc: usize, visitor: &mut dyn MethodVisitor) -> Result<usize, Error> {
        let reader = self.reader;
        let at = self.start + pc;
        let opcode = reader.u8_at(at)?;
        let next = match opcode {
            NOP..=DCONST_1
            | IALOAD..=SALOAD
            | IASTORE..=SASTORE
            | POP..=LXOR
            | I2L..=DCMPG
            | IRETURN..=RETURN
            | ARRAYLENGTH
            | ATHROW
            | MONITORENTER
            | MONITOREXIT => {
                visitor.visit_insn(opcode)?;
                pc + 1
            }
            BIPUSH => {
                visitor.visit_int_insn(opcode, reader.i8_at(at + 1)? as i32)?;
                pc + 2
            }
            SIPUSH => {
                visitor.visit_int_insn(opcode, reader.i16_at(at + 1)? as i32)?;
                pc + 3
            }
            NEWARRAY => {
                visitor.visit_int_insn(opcode, reader.u8_at(at + 1)? as i32)?;
                pc + 2
            }
            LDC => {
                let index = reader.u8_at(at + 1)? as u16;
                visitor.visit_ldc_insn(&reader.read_const(index)?)?;
                pc + 2
            }
            LDC_W | LDC2_W => {
                visitor.visit_ldc_insn(&reader.read_const(reader.u16_at(at + 1)?)?)?;
                pc + 3
            }
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
                visitor.visit_var_insn(opcode, reader.u8_at(at + 1)? as u16)?;
                pc + 2
            }
            ILOAD_0..=ALOAD_3 => {
                let shape = opcode - ILOAD_0;
                visitor.visit_var_insn(ILOAD + shape / 4, (shape % 4) as u16)?;
                pc + 1
            }
            ISTORE_0..=ASTORE_3 => {
                let shape = opcode - ISTORE_0;
                visitor.visit_var_insn(ISTORE + shape / 4, (shape % 4) as u16)?;
                pc + 1
            }
            IINC => {
                let var = reader.u8_at(at + 1)? as u16;
                let increment = reader.i8_at(at + 2)? as i16;
                visitor.visit_iinc_insn(var, increment)?;
                pc + 3
            }
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let target = self.jump_target(pc, reader.i16_at(at + 1)? as i64)?;
                visitor.visit_jump_insn(opcode, target)?;
                pc + 3
            }
            GOTO_W | JSR_W => {
                let target = self.jump_target(pc, reader.i32_at(at + 1)? as i64)?;
                let opcode = if opcode == GOTO_W { GOTO } else { JSR };
                visitor.visit_jump_insn(opcode, target)?;
                pc + 5
            }
            TABLESWITCH => {
                // operands are 4-byte aligned relative to the start of the code
                let mut cursor = at + 1 + (4 - (pc + 1) % 4) % 4;
                let default = self.jump_target(pc, reader.i32_at(cursor)? as i64)?;
                let min = reader.i32_at(cursor + 4)?;
                let max = reader.i32_at(cursor + 8)?;
                if max < min {
                    return Err(Error::InvalidOpcode { opcode, offset: pc });
                }
                cursor += 12;
                let count = (max as i64 - min as i64 + 1) as usize;
                reader.bytes_at(cursor, 4 * count)?;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(self.jump_target(pc, reader.i32_at(cursor)? as i64)?);
                    cursor += 4;
                }
                visitor.visit_table_switch_insn(min, max, default, &targets)?;
                cursor - self.start
            }
            LOOKUPSWITCH => {
                let mut cursor = at + 1 + (4 - (pc + 1) % 4) % 4;
                let default = self.jump_target(pc, reader.i32_at(cursor)? as i64)?;
                let pairs = reader.i32_at(cursor + 4)?;
                if pairs < 0 {
                    return Err(Error::InvalidOpcode { opcode, offset: pc });
                }
                cursor += 8;
                let pairs = pairs as usize;
                reader.bytes_at(cursor, 8 * pairs)?;
                let mut keys = Vec::with_capacity(pairs);
                let mut targets = Vec::with_capacity(pairs);
                for _ in 0..pairs {
                    keys.push(reader.i32_at(cursor)?);
                    targets.push(self.jump_target(pc, reader.i32_at(cursor + 4)? as i64)?);
                    cursor += 8;
                }
                visitor.visit_lookup_switch_insn(default, &keys, &targets)?;
                cursor - self.start
            }
            GETSTATIC..=PUTFIELD => {
                let member = reader.read_member_ref(reader.u16_at(at + 1)?)?;
                visitor.visit_field_insn(opcode, &member.owner, &member.name, &member.descriptor)?;
                pc + 3
            }
            INVOKEVIRTUAL..=INVOKEINTERFACE => {
                let member = reader.read_member_ref(reader.u16_at(at + 1)?)?;
                visitor.visit_method_insn(
                    opcode,
                    &member.owner,
                    &member.name,
                    &member.descriptor,
                    member.interface,
                )?;
                if opcode == INVOKEINTERFACE {
                    pc + 5
                } else {
                    pc + 3
                }
            }
            INVOKEDYNAMIC => {
                let (name, descriptor, bootstrap_index) =
                    reader.read_invoke_dynamic(reader.u16_at(at + 1)?)?;
                let (handle, arguments) = reader.read_bootstrap_method(bootstrap_index)?;
                visitor.visit_invoke_dynamic_insn(&name, &descriptor, &handle, &arguments)?;
                pc + 5
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                let class = reader.read_class(reader.u16_at(at + 1)?)?;
                visitor.visit_type_insn(opcode, &class)?;
                pc + 3
            }
            WIDE => {
                let wide_opcode = reader.u8_at(at + 1)?;
                match wide_opcode {
                    IINC => {
                        let var = reader.u16_at(at + 2)?;
                        let increment = reader.i16_at(at + 4)?;
                        visitor.visit_iinc_insn(var, increment)?;
                        pc + 6
                    }
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
                        visitor.visit_var_insn(wide_opcode, reader.u16_at(at + 2)?)?;
                        pc + 4
                    }
                    _ => {
                        return Err(Error::InvalidOpcode {
                            opcode: wide_opcode,
                            offset: pc + 1,
                        })
                    }
                }
            }
            MULTIANEWARRAY => {
                let descriptor = reader.read_class(reader.u16_at(at + 1)?)?;
                visitor.visit_multi_anewarray_insn(&descriptor, reader.u8_at(at + 3)?)?;
                pc + 4
            }
            _ => return Err(Error::InvalidOpcode { opcode, offset: pc }),
        };
        if next > self.length {
            return Err(Error::InvalidCodeOffset {
                source: pc,
                target: next as i64,
            });
        }
        Ok(next)
    }
}

struct LocalVariableEntry {
    start: Label,
    end: Label,
    /// Offset of the name and descriptor indices
    entry: usize,
    index: u16,
}

/// Replay the `Code` attribute whose payload starts at `offset`
///
/// Events: try/catch blocks, then instructions interleaved with labels and line numbers, then
/// local variables, then `visit_maxs`. Attributes other than `LineNumberTable` and
/// `LocalVariableTable` (notably `StackMapTable`) are dropped.
pub fn read_code(
    reader: &BytecodeReader,
    offset: usize,
    visitor: &mut dyn MethodVisitor,
) -> Result<(), Error> {
    let max_stack = reader.u16_at(offset)?;
    let max_locals = reader.u16_at(offset + 2)?;
    let length = reader.u32_at(offset + 4)? as usize;
    let start = offset + 8;
    reader.bytes_at(start, length)?;

    let mut code = CodeReader {
        reader,
        start,
        length,
        labels: vec![None; length + 1],
    };

    // First pass: labels for jump and switch targets
    let mut pc = 0;
    while pc < length {
        pc = code.instruction(pc, &mut Skip)?;
    }

    let table = start + length;
    let handler_count = reader.u16_at(table)? as usize;
    let mut handlers = Vec::with_capacity(handler_count);
    for handler in 0..handler_count {
        let entry = table + 2 + 8 * handler;
        let start_pc = code.label(entry, reader.u16_at(entry)? as i64, false)?;
        let end_pc = code.label(entry, reader.u16_at(entry + 2)? as i64, false)?;
        let handler_pc = code.label(entry, reader.u16_at(entry + 4)? as i64, false)?;
        handlers.push((start_pc, end_pc, handler_pc, reader.class_at(entry + 6)?));
    }

    let mut line_numbers: Vec<(usize, u16)> = vec![];
    let mut local_variables = vec![];
    let attributes = table + 2 + 8 * handler_count;
    let mut attribute = attributes + 2;
    for _ in 0..reader.u16_at(attributes)? {
        let name = reader.utf8_at(attribute)?;
        let payload = attribute + 6;
        match name.as_str() {
            "LineNumberTable" => {
                for line in 0..reader.u16_at(payload)? as usize {
                    let entry = payload + 2 + 4 * line;
                    let line_pc = reader.u16_at(entry)? as usize;
                    code.label(entry, line_pc as i64, true)?;
                    line_numbers.push((line_pc, reader.u16_at(entry + 2)?));
                }
            }
            "LocalVariableTable" => {
                for local in 0..reader.u16_at(payload)? as usize {
                    let entry = payload + 2 + 10 * local;
                    let start_pc = reader.u16_at(entry)? as i64;
                    let end_pc = start_pc + reader.u16_at(entry + 2)? as i64;
                    local_variables.push(LocalVariableEntry {
                        start: code.label(entry, start_pc, true)?,
                        end: code.label(entry, end_pc, true)?,
                        entry: entry + 4,
                        index: reader.u16_at(entry + 8)?,
                    });
                }
            }
            _ => (),
        }
        attribute = payload + reader.u32_at(attribute + 2)? as usize;
    }
    line_numbers.sort_by_key(|(line_pc, _)| *line_pc);

    for (start_pc, end_pc, handler_pc, catch_type) in &handlers {
        visitor.visit_try_catch_block(*start_pc, *end_pc, *handler_pc, catch_type.as_deref())?;
    }

    // Second pass: the events themselves
    let mut pc = 0;
    let mut next_line = 0;
    loop {
        if let Some(label) = code.labels[pc] {
            visitor.visit_label(label)?;
            while next_line < line_numbers.len() && line_numbers[next_line].0 < pc {
                next_line += 1;
            }
            while let Some((line_pc, line)) = line_numbers.get(next_line) {
                if *line_pc != pc {
                    break;
                }
                visitor.visit_line_number(*line, label)?;
                next_line += 1;
            }
        }
        if pc >= length {
            break;
        }
        pc = code.instruction(pc, visitor)?;
    }

    for local in &local_variables {
        let name = reader.utf8_at(local.entry)?;
        let descriptor = reader.utf8_at(local.entry + 2)?;
        visitor.visit_local_variable(&name, &descriptor, local.start, local.end, local.index)?;
    }
    visitor.visit_maxs(max_stack, max_locals)
}
