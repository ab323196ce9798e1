//! Event interfaces between class readers, writers, and anything that sits in between
//!
//! Every trait comes with a `delegate` hook. The provided methods forward each event to the
//! delegate when there is one and do nothing otherwise, so a visitor that rewrites a class only
//! needs to override the events it cares about and return its downstream visitor from
//! `delegate`.
//!
//! Visitors for nested structures (fields, methods, annotations) are handed out boxed and may
//! borrow from their parent. Returning `None` means the caller is not interested in the nested
//! events.

use super::annotations::AnnotationValue;
use super::class_file::{ConstValue, MethodHandle, Version};
use super::{ClassAccessFlags, Error, FieldAccessFlags, InnerClassAccessFlags, Label, MethodAccessFlags};

pub type AnnotationVisitorResult<'a> = Result<Option<Box<dyn AnnotationVisitor + 'a>>, Error>;

/// Class header details passed to [`ClassVisitor::visit`]
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct ClassInfo {
    /// Absent only for `java/lang/Object` (and module descriptors)
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub source_file: Option<String>,
    pub nest_host: Option<String>,
    pub nest_members: Vec<String>,
    pub deprecated: bool,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InnerClassInfo {
    pub name: String,
    pub outer_name: Option<String>,
    pub inner_name: Option<String>,
    pub access: InnerClassAccessFlags,
}

#[derive(Clone, PartialEq, Debug)]
pub struct FieldInfo {
    pub access: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,

    /// Initial value from the `ConstantValue` attribute (static fields only)
    pub value: Option<ConstValue>,
    pub deprecated: bool,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodInfo {
    pub access: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,

    /// Checked exceptions, from the `Exceptions` attribute
    pub exceptions: Vec<String>,
    pub deprecated: bool,
}

/// Events for a class, in this order:
///
///   1. `visit`
///   2. `visit_annotation`*
///   3. `visit_inner_class`*
///   4. `visit_field`* and `visit_method`* (fields first when produced by a reader)
///   5. `visit_end`
///
pub trait ClassVisitor {
    fn delegate(&mut self) -> Option<&mut dyn ClassVisitor> {
        None
    }

    fn visit(
        &mut self,
        version: Version,
        access: ClassAccessFlags,
        name: &str,
        info: &ClassInfo,
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit(version, access, name, info),
            None => Ok(()),
        }
    }

    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        match self.delegate() {
            Some(delegate) => delegate.visit_annotation(descriptor, visible),
            None => Ok(None),
        }
    }

    fn visit_inner_class(&mut self, inner_class: &InnerClassInfo) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_inner_class(inner_class),
            None => Ok(()),
        }
    }

    fn visit_field(
        &mut self,
        field: &FieldInfo,
    ) -> Result<Option<Box<dyn FieldVisitor + '_>>, Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_field(field),
            None => Ok(None),
        }
    }

    fn visit_method(
        &mut self,
        method: &MethodInfo,
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>, Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_method(method),
            None => Ok(None),
        }
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_end(),
            None => Ok(()),
        }
    }
}

/// Events for a field: `visit_annotation`* then `visit_end`
pub trait FieldVisitor {
    fn delegate(&mut self) -> Option<&mut dyn FieldVisitor> {
        None
    }

    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        match self.delegate() {
            Some(delegate) => delegate.visit_annotation(descriptor, visible),
            None => Ok(None),
        }
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_end(),
            None => Ok(()),
        }
    }
}

/// Events for a method, in this order:
///
///   1. `visit_annotation_default`?, `visit_annotation`*, `visit_parameter_annotation`*
///   2. `visit_code`, if the method has a body
///   3. `visit_try_catch_block`* (before the labels they use are placed)
///   4. instructions, `visit_label`, and `visit_line_number` (after the label it refers to)
///   5. `visit_local_variable`*
///   6. `visit_maxs` (if there was code)
///   7. `visit_end`
///
/// Instructions always come in their general form: `iload 0` rather than `iload_0`, `ldc`
/// rather than `ldc_w`/`ldc2_w`, `goto` rather than `goto_w`, and no `wide` prefixes. Writers pick
/// the compact encodings.
pub trait MethodVisitor {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        None
    }

    /// Default value of an annotation interface element
    fn visit_annotation_default(&mut self) -> AnnotationVisitorResult<'_> {
        match self.delegate() {
            Some(delegate) => delegate.visit_annotation_default(),
            None => Ok(None),
        }
    }

    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        match self.delegate() {
            Some(delegate) => delegate.visit_annotation(descriptor, visible),
            None => Ok(None),
        }
    }

    fn visit_parameter_annotation(
        &mut self,
        parameter: u8,
        descriptor: &str,
        visible: bool,
    ) -> AnnotationVisitorResult<'_> {
        match self.delegate() {
            Some(delegate) => delegate.visit_parameter_annotation(parameter, descriptor, visible),
            None => Ok(None),
        }
    }

    fn visit_code(&mut self) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_code(),
            None => Ok(()),
        }
    }

    /// Instruction without operands (eg. `iadd`, `return`, `aload_0` is *not* one of these)
    fn visit_insn(&mut self, opcode: u8) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_insn(opcode),
            None => Ok(()),
        }
    }

    /// `bipush`, `sipush`, or `newarray` (whose operand is an array type code)
    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_int_insn(opcode, operand),
            None => Ok(()),
        }
    }

    /// Load, store, or `ret` of a local variable
    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_var_insn(opcode, var),
            None => Ok(()),
        }
    }

    /// `new`, `anewarray`, `checkcast`, or `instanceof`
    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_type_insn(opcode, type_name),
            None => Ok(()),
        }
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_field_insn(opcode, owner, name, descriptor),
            None => Ok(()),
        }
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_method_insn(opcode, owner, name, descriptor, interface),
            None => Ok(()),
        }
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &MethodHandle,
        bootstrap_arguments: &[ConstValue],
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_invoke_dynamic_insn(
                name,
                descriptor,
                bootstrap_method,
                bootstrap_arguments,
            ),
            None => Ok(()),
        }
    }

    fn visit_jump_insn(&mut self, opcode: u8, target: Label) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_jump_insn(opcode, target),
            None => Ok(()),
        }
    }

    fn visit_label(&mut self, label: Label) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_label(label),
            None => Ok(()),
        }
    }

    fn visit_ldc_insn(&mut self, value: &ConstValue) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_ldc_insn(value),
            None => Ok(()),
        }
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_iinc_insn(var, increment),
            None => Ok(()),
        }
    }

    /// `tableswitch` where `targets[i]` is the target for key `min + i`
    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        targets: &[Label],
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_table_switch_insn(min, max, default, targets),
            None => Ok(()),
        }
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        targets: &[Label],
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_lookup_switch_insn(default, keys, targets),
            None => Ok(()),
        }
    }

    fn visit_multi_anewarray_insn(&mut self, descriptor: &str, dimensions: u8) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_multi_anewarray_insn(descriptor, dimensions),
            None => Ok(()),
        }
    }

    /// Exception handler covering `[start, end)`; `catch_type` of `None` catches everything
    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_try_catch_block(start, end, handler, catch_type),
            None => Ok(()),
        }
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_local_variable(name, descriptor, start, end, index),
            None => Ok(()),
        }
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_line_number(line, start),
            None => Ok(()),
        }
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_maxs(max_stack, max_locals),
            None => Ok(()),
        }
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_end(),
            None => Ok(()),
        }
    }
}

/// Events for the values of an annotation (or of an array inside an annotation)
///
/// Names are present for the element-value pairs of an annotation and absent for the entries of
/// an array. Each nested visitor gets its own `visit_end`.
pub trait AnnotationVisitor {
    fn delegate(&mut self) -> Option<&mut dyn AnnotationVisitor> {
        None
    }

    /// Primitive, string, or class value
    fn visit(&mut self, name: Option<&str>, value: &AnnotationValue) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit(name, value),
            None => Ok(()),
        }
    }

    fn visit_enum(&mut self, name: Option<&str>, descriptor: &str, value: &str) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_enum(name, descriptor, value),
            None => Ok(()),
        }
    }

    fn visit_annotation(&mut self, name: Option<&str>, descriptor: &str) -> AnnotationVisitorResult<'_> {
        match self.delegate() {
            Some(delegate) => delegate.visit_annotation(name, descriptor),
            None => Ok(None),
        }
    }

    fn visit_array(&mut self, name: Option<&str>) -> AnnotationVisitorResult<'_> {
        match self.delegate() {
            Some(delegate) => delegate.visit_array(name),
            None => Ok(None),
        }
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        match self.delegate() {
            Some(delegate) => delegate.visit_end(),
            None => Ok(()),
        }
    }
}
