mod common;

use classweave::jvm::analysis::{ComputeMode, MapHierarchy};
use classweave::jvm::class_file::Version;
use classweave::jvm::opcodes::*;
use classweave::jvm::*;
use common::*;

/// `local = new A(); do { local.touch(); local = new B(); } while (flag);`
fn swap_in_loop(method: &mut dyn MethodVisitor, touch_owner: &str) -> Result<(), Error> {
    let head = Label::new();
    method.visit_code()?;
    method.visit_type_insn(NEW, "lib/A")?;
    method.visit_insn(DUP)?;
    method.visit_method_insn(INVOKESPECIAL, "lib/A", "<init>", "()V", false)?;
    method.visit_var_insn(ASTORE, 1)?;
    method.visit_label(head)?;
    method.visit_var_insn(ALOAD, 1)?;
    method.visit_method_insn(INVOKEVIRTUAL, touch_owner, "hashCode", "()I", false)?;
    method.visit_insn(POP)?;
    method.visit_type_insn(NEW, "lib/B")?;
    method.visit_insn(DUP)?;
    method.visit_method_insn(INVOKESPECIAL, "lib/B", "<init>", "()V", false)?;
    method.visit_var_insn(ASTORE, 1)?;
    method.visit_var_insn(ILOAD, 0)?;
    method.visit_jump_insn(IFNE, head)?;
    method.visit_insn(RETURN)?;
    method.visit_maxs(0, 0)?;
    method.visit_end()
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

#[test]
fn loop_merges_to_the_nearest_common_super_class() {
    let mut hierarchy = MapHierarchy::new();
    hierarchy
        .add("lib/A", "lib/Base")
        .add("lib/B", "lib/Base")
        .add("lib/Base", "java/lang/Object");
    let bytes = build_class("test/Loop", frames_with(hierarchy), |class| {
        let mut method = class.visit_method(&static_method("spin", "(Z)V"))?.unwrap();
        swap_in_loop(method.as_mut(), "lib/Base")
    });

    let code = code_of(&bytes, "spin");
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 2);

    // One `append_frame` at the loop head (offset 8) adding the merged local
    let frames = code.attribute("StackMapTable").unwrap();
    assert_eq!(u16_at(frames, 0), 1);
    assert_eq!(frames[2], 252);
    assert_eq!(u16_at(frames, 3), 8);
    assert_eq!(frames[5], 7);
    assert_eq!(class_name(&bytes, u16_at(frames, 6)), "lib/Base");
    assert_eq!(frames.len(), 8);
}

#[test]
fn unknown_classes_merge_to_object() {
    let options = WriterOptions::new(ComputeMode::Frames);
    let bytes = build_class("test/Loop", options, |class| {
        let mut method = class.visit_method(&static_method("spin", "(Z)V"))?.unwrap();
        swap_in_loop(method.as_mut(), "java/lang/Object")
    });

    let frames = code_of(&bytes, "spin").attribute("StackMapTable").unwrap().to_vec();
    assert_eq!(frames[5], 7);
    assert_eq!(class_name(&bytes, u16_at(&frames, 6)), "java/lang/Object");
}

#[test]
fn compact_frame_forms() {
    let options = WriterOptions::new(ComputeMode::Frames);
    let bytes = build_class("test/Choice", options, |class| {
        let mut method = class.visit_method(&static_method("choose", "(Z)I"))?.unwrap();
        let (otherwise, join) = (Label::new(), Label::new());
        method.visit_code()?;
        method.visit_var_insn(ILOAD, 0)?;
        method.visit_jump_insn(IFEQ, otherwise)?;
        method.visit_insn(ICONST_1)?;
        method.visit_jump_insn(GOTO, join)?;
        method.visit_label(otherwise)?;
        method.visit_insn(ICONST_0)?;
        method.visit_label(join)?;
        method.visit_insn(IRETURN)?;
        method.visit_maxs(0, 0)?;
        method.visit_end()
    });

    let code = code_of(&bytes, "choose");
    assert_eq!(code.max_stack, 1);
    // `same_frame` at 8, then `same_locals_1_stack_item_frame` holding an int at 9
    assert_eq!(code.attribute("StackMapTable"), Some(&[0, 2, 8, 64, 1][..]));
}

#[test]
fn old_class_versions_get_no_frames() {
    let mut writer = ClassWriter::new(WriterOptions::new(ComputeMode::Frames));
    let info = ClassInfo {
        super_name: Some(String::from("java/lang/Object")),
        ..ClassInfo::default()
    };
    // Java 5 predates `StackMapTable`
    let java5 = Version {
        major_version: 49,
        minor_version: 0,
    };
    assert!(!java5.uses_stack_map_frames());
    writer
        .visit(java5, ClassAccessFlags::PUBLIC, "test/Old", &info)
        .unwrap();
    {
        let mut method = writer.visit_method(&static_method("choose", "(Z)I")).unwrap().unwrap();
        let otherwise = Label::new();
        method.visit_code().unwrap();
        method.visit_var_insn(ILOAD, 0).unwrap();
        method.visit_jump_insn(IFEQ, otherwise).unwrap();
        method.visit_insn(ICONST_1).unwrap();
        method.visit_insn(IRETURN).unwrap();
        method.visit_label(otherwise).unwrap();
        method.visit_insn(ICONST_0).unwrap();
        method.visit_insn(IRETURN).unwrap();
        method.visit_maxs(0, 0).unwrap();
        method.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    let bytes = writer.to_bytes().unwrap();

    let code = code_of(&bytes, "choose");
    assert_eq!(code.max_stack, 1);
    assert!(code.attribute("StackMapTable").is_none());
}

#[test]
fn subroutines_cannot_be_framed() {
    let mut writer = ClassWriter::new(WriterOptions::new(ComputeMode::Frames));
    writer
        .visit(
            Version::JAVA8,
            ClassAccessFlags::PUBLIC,
            "test/Jsr",
            &ClassInfo::default(),
        )
        .unwrap();
    let mut method = writer.visit_method(&static_method("old", "()V")).unwrap().unwrap();
    let subroutine = Label::new();
    let result = (|| {
        method.visit_code()?;
        method.visit_jump_insn(JSR, subroutine)?;
        method.visit_insn(RETURN)?;
        method.visit_label(subroutine)?;
        method.visit_var_insn(ASTORE, 0)?;
        method.visit_var_insn(RET, 0)?;
        method.visit_maxs(0, 0)?;
        method.visit_end()
    })();
    assert!(matches!(
        result,
        Err(Error::UnsupportedInstruction { opcode: JSR })
    ));
}
