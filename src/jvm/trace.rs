//! Plain text rendering of visitor events
//!
//! Classes that produce the same events produce the same text, so a [`Tracer`] is a convenient
//! way to compare a class before and after a round trip (and to eyeball what a reader sees).
//! Labels are numbered in order of first mention within each method.

use super::annotations::AnnotationValue;
use super::class_file::{ConstValue, MethodHandle, Version};
use super::opcodes::mnemonic;
use super::{
    AnnotationVisitor, AnnotationVisitorResult, ClassAccessFlags, ClassInfo, ClassVisitor, Error,
    FieldInfo, FieldVisitor, InnerClassInfo, Label, MethodInfo, MethodVisitor,
};
use std::collections::HashMap;
use std::fmt;

/// Records class events as lines of text
#[derive(Default, Debug)]
pub struct Tracer {
    lines: Vec<String>,
}

impl Tracer {
    pub fn new() -> Tracer {
        Tracer::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

impl ClassVisitor for Tracer {
    fn visit(
        &mut self,
        version: Version,
        access: ClassAccessFlags,
        name: &str,
        info: &ClassInfo,
    ) -> Result<(), Error> {
        self.lines.push(format!(
            "class {} version {}.{} access 0x{:04x}",
            name,
            version.major_version,
            version.minor_version,
            access.bits()
        ));
        if let Some(super_name) = &info.super_name {
            self.lines.push(format!("  extends {}", super_name));
        }
        if !info.interfaces.is_empty() {
            self.lines.push(format!("  implements {}", info.interfaces.join(", ")));
        }
        if let Some(signature) = &info.signature {
            self.lines.push(format!("  signature {}", signature));
        }
        if let Some(source_file) = &info.source_file {
            self.lines.push(format!("  source {}", source_file));
        }
        if let Some(nest_host) = &info.nest_host {
            self.lines.push(format!("  nest host {}", nest_host));
        }
        if !info.nest_members.is_empty() {
            self.lines.push(format!("  nest members {}", info.nest_members.join(", ")));
        }
        if info.deprecated {
            self.lines.push(String::from("  deprecated"));
        }
        Ok(())
    }

    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        self.lines.push(format!("  @{}{}", descriptor, invisible(visible)));
        Ok(Some(Box::new(AnnotationTracer::new(&mut self.lines, 2))))
    }

    fn visit_inner_class(&mut self, inner_class: &InnerClassInfo) -> Result<(), Error> {
        self.lines.push(format!(
            "  inner class {} outer {} name {} access 0x{:04x}",
            inner_class.name,
            inner_class.outer_name.as_deref().unwrap_or("-"),
            inner_class.inner_name.as_deref().unwrap_or("-"),
            inner_class.access.bits()
        ));
        Ok(())
    }

    fn visit_field(&mut self, field: &FieldInfo) -> Result<Option<Box<dyn FieldVisitor + '_>>, Error> {
        let mut line = format!(
            "  field {} {} access 0x{:04x}",
            field.name,
            field.descriptor,
            field.access.bits()
        );
        if let Some(value) = &field.value {
            line.push_str(&format!(" = {:?}", value));
        }
        self.lines.push(line);
        if let Some(signature) = &field.signature {
            self.lines.push(format!("    signature {}", signature));
        }
        if field.deprecated {
            self.lines.push(String::from("    deprecated"));
        }
        Ok(Some(Box::new(MemberTracer::new(&mut self.lines))))
    }

    fn visit_method(
        &mut self,
        method: &MethodInfo,
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>, Error> {
        self.lines.push(format!(
            "  method {}{} access 0x{:04x}",
            method.name,
            method.descriptor,
            method.access.bits()
        ));
        if !method.exceptions.is_empty() {
            self.lines.push(format!("    throws {}", method.exceptions.join(", ")));
        }
        if let Some(signature) = &method.signature {
            self.lines.push(format!("    signature {}", signature));
        }
        if method.deprecated {
            self.lines.push(String::from("    deprecated"));
        }
        Ok(Some(Box::new(MemberTracer::new(&mut self.lines))))
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        self.lines.push(String::from("end"));
        Ok(())
    }
}

fn invisible(visible: bool) -> &'static str {
    if visible {
        ""
    } else {
        " (invisible)"
    }
}

/// Events of a field or a method
struct MemberTracer<'a> {
    lines: &'a mut Vec<String>,
    labels: HashMap<Label, usize>,
}

impl<'a> MemberTracer<'a> {
    fn new(lines: &'a mut Vec<String>) -> MemberTracer<'a> {
        MemberTracer {
            lines,
            labels: HashMap::new(),
        }
    }

    fn label(&mut self, label: Label) -> String {
        let next = self.labels.len();
        format!("L{}", self.labels.entry(label).or_insert(next))
    }

    fn labels(&mut self, labels: &[Label]) -> String {
        let names: Vec<String> = labels.iter().map(|label| self.label(*label)).collect();
        names.join(", ")
    }

    fn push(&mut self, line: String) -> Result<(), Error> {
        self.lines.push(format!("    {}", line));
        Ok(())
    }
}

impl<'a> FieldVisitor for MemberTracer<'a> {
    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        self.lines.push(format!("    @{}{}", descriptor, invisible(visible)));
        Ok(Some(Box::new(AnnotationTracer::new(&mut *self.lines, 3))))
    }
}

impl<'a> MethodVisitor for MemberTracer<'a> {
    fn visit_annotation_default(&mut self) -> AnnotationVisitorResult<'_> {
        self.lines.push(String::from("    default"));
        Ok(Some(Box::new(AnnotationTracer::new(&mut *self.lines, 3))))
    }

    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        self.lines.push(format!("    @{}{}", descriptor, invisible(visible)));
        Ok(Some(Box::new(AnnotationTracer::new(&mut *self.lines, 3))))
    }

    fn visit_parameter_annotation(
        &mut self,
        parameter: u8,
        descriptor: &str,
        visible: bool,
    ) -> AnnotationVisitorResult<'_> {
        self.lines.push(format!(
            "    parameter {} @{}{}",
            parameter,
            descriptor,
            invisible(visible)
        ));
        Ok(Some(Box::new(AnnotationTracer::new(&mut *self.lines, 3))))
    }

    fn visit_code(&mut self) -> Result<(), Error> {
        self.push(String::from("code"))
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<(), Error> {
        self.push(mnemonic(opcode).to_owned())
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<(), Error> {
        self.push(format!("{} {}", mnemonic(opcode), operand))
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<(), Error> {
        self.push(format!("{} {}", mnemonic(opcode), var))
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<(), Error> {
        self.push(format!("{} {}", mnemonic(opcode), type_name))
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        self.push(format!("{} {}.{} {}", mnemonic(opcode), owner, name, descriptor))
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<(), Error> {
        let suffix = if interface { " (interface)" } else { "" };
        self.push(format!("{} {}.{}{}{}", mnemonic(opcode), owner, name, descriptor, suffix))
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &MethodHandle,
        bootstrap_arguments: &[ConstValue],
    ) -> Result<(), Error> {
        self.push(format!(
            "invokedynamic {}{} {:?} {}.{}{} {:?}",
            name,
            descriptor,
            bootstrap_method.kind,
            bootstrap_method.owner,
            bootstrap_method.name,
            bootstrap_method.descriptor,
            bootstrap_arguments
        ))
    }

    fn visit_jump_insn(&mut self, opcode: u8, target: Label) -> Result<(), Error> {
        let target = self.label(target);
        self.push(format!("{} {}", mnemonic(opcode), target))
    }

    fn visit_label(&mut self, label: Label) -> Result<(), Error> {
        let label = self.label(label);
        self.lines.push(format!("   {}:", label));
        Ok(())
    }

    fn visit_ldc_insn(&mut self, value: &ConstValue) -> Result<(), Error> {
        self.push(format!("ldc {:?}", value))
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<(), Error> {
        self.push(format!("iinc {} {}", var, increment))
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        targets: &[Label],
    ) -> Result<(), Error> {
        let default = self.label(default);
        let targets = self.labels(targets);
        self.push(format!(
            "tableswitch {}..{} [{}] default {}",
            min, max, targets, default
        ))
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        targets: &[Label],
    ) -> Result<(), Error> {
        let default = self.label(default);
        let mut pairs = vec![];
        for (key, target) in keys.iter().zip(targets) {
            pairs.push(format!("{}: {}", key, self.label(*target)));
        }
        self.push(format!("lookupswitch [{}] default {}", pairs.join(", "), default))
    }

    fn visit_multi_anewarray_insn(&mut self, descriptor: &str, dimensions: u8) -> Result<(), Error> {
        self.push(format!("multianewarray {} {}", descriptor, dimensions))
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error> {
        let range = self.labels(&[start, end, handler]);
        self.push(format!("try {} catch {}", range, catch_type.unwrap_or("*")))
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<(), Error> {
        let range = self.labels(&[start, end]);
        self.push(format!("local {} {} {} slot {}", name, descriptor, range, index))
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        let start = self.label(start);
        self.push(format!("line {} {}", line, start))
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<(), Error> {
        self.push(format!("maxs stack {} locals {}", max_stack, max_locals))
    }
}

/// Values of an annotation, indented under it
struct AnnotationTracer<'a> {
    lines: &'a mut Vec<String>,
    depth: usize,
}

impl<'a> AnnotationTracer<'a> {
    fn new(lines: &'a mut Vec<String>, depth: usize) -> AnnotationTracer<'a> {
        AnnotationTracer { lines, depth }
    }

    fn push(&mut self, name: Option<&str>, value: String) {
        let indent = "  ".repeat(self.depth);
        match name {
            Some(name) => self.lines.push(format!("{}{} = {}", indent, name, value)),
            None => self.lines.push(format!("{}{}", indent, value)),
        }
    }
}

impl<'a> AnnotationVisitor for AnnotationTracer<'a> {
    fn visit(&mut self, name: Option<&str>, value: &AnnotationValue) -> Result<(), Error> {
        self.push(name, format!("{:?}", value));
        Ok(())
    }

    fn visit_enum(&mut self, name: Option<&str>, descriptor: &str, value: &str) -> Result<(), Error> {
        self.push(name, format!("{}.{}", descriptor, value));
        Ok(())
    }

    fn visit_annotation(&mut self, name: Option<&str>, descriptor: &str) -> AnnotationVisitorResult<'_> {
        self.push(name, format!("@{}", descriptor));
        Ok(Some(Box::new(AnnotationTracer::new(&mut *self.lines, self.depth + 1))))
    }

    fn visit_array(&mut self, name: Option<&str>) -> AnnotationVisitorResult<'_> {
        self.push(name, String::from("["));
        Ok(Some(Box::new(AnnotationTracer::new(&mut *self.lines, self.depth + 1))))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::opcodes::*;

    #[test]
    fn labels_are_numbered_by_first_mention() {
        let mut tracer = Tracer::new();
        let method = MethodInfo {
            access: crate::jvm::MethodAccessFlags::STATIC,
            name: String::from("f"),
            descriptor: String::from("(I)I"),
            signature: None,
            exceptions: vec![],
            deprecated: false,
        };
        {
            let mut method_tracer = tracer.visit_method(&method).unwrap().unwrap();
            let (done, other) = (Label::new(), Label::new());
            method_tracer.visit_code().unwrap();
            method_tracer.visit_var_insn(ILOAD, 0).unwrap();
            method_tracer.visit_jump_insn(IFEQ, done).unwrap();
            method_tracer.visit_insn(ICONST_1).unwrap();
            method_tracer.visit_insn(IRETURN).unwrap();
            method_tracer.visit_label(done).unwrap();
            method_tracer.visit_label(other).unwrap();
            method_tracer.visit_maxs(1, 1).unwrap();
            method_tracer.visit_end().unwrap();
        }
        assert_eq!(
            tracer.to_string(),
            "  method f(I)I access 0x0008\n\
             \x20   code\n\
             \x20   iload 0\n\
             \x20   ifeq L0\n\
             \x20   iconst_1\n\
             \x20   ireturn\n\
             \x20  L0:\n\
             \x20  L1:\n\
             \x20   maxs stack 1 locals 1\n"
        );
    }

    #[test]
    fn annotations_are_indented() {
        let mut tracer = Tracer::new();
        {
            let mut annotation = tracer.visit_annotation("LA;", false).unwrap().unwrap();
            annotation.visit(Some("x"), &AnnotationValue::Int(1)).unwrap();
            let mut array = annotation.visit_array(Some("e")).unwrap().unwrap();
            array.visit_enum(None, "LE;", "ON").unwrap();
            array.visit_end().unwrap();
        }
        assert_eq!(
            tracer.lines(),
            &[
                String::from("  @LA; (invisible)"),
                String::from("    x = Int(1)"),
                String::from("    e = ["),
                String::from("      LE;.ON"),
            ]
        );
    }
}
