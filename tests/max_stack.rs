mod common;

use classweave::jvm::analysis::ComputeMode;
use classweave::jvm::opcodes::*;
use classweave::jvm::*;
use common::*;

fn max_stack_options() -> WriterOptions {
    WriterOptions::new(ComputeMode::MaxStack)
}

#[test]
fn straight_line_code() {
    let bytes = build_class("test/Straight", max_stack_options(), |class| {
        let mut method = class.visit_method(&static_method("mix", "(IJ)J"))?.unwrap();
        method.visit_code()?;
        method.visit_var_insn(ILOAD, 0)?;
        method.visit_insn(I2L)?;
        method.visit_var_insn(LLOAD, 1)?;
        method.visit_insn(LADD)?;
        method.visit_insn(ICONST_2)?;
        method.visit_insn(LSHL)?;
        method.visit_insn(LRETURN)?;
        method.visit_maxs(0, 0)?;
        method.visit_end()
    });

    let code = code_of(&bytes, "mix");
    assert_eq!(code.max_stack, 4);
    assert_eq!(code.max_locals, 3);
    // `lload_1` is the second of the compact `lload` forms
    let lload_1 = ILOAD_0 + 4 + 1;
    assert_eq!(
        code.code,
        vec![ILOAD_0, I2L, lload_1, LADD, ICONST_2, LSHL, LRETURN]
    );
    assert!(code.attribute("StackMapTable").is_none());
}

#[test]
fn diamond_takes_the_deeper_branch() {
    let bytes = build_class("test/Diamond", max_stack_options(), |class| {
        let mut method = class.visit_method(&static_method("pick", "(I)I"))?.unwrap();
        let (otherwise, join) = (Label::new(), Label::new());
        method.visit_code()?;
        method.visit_var_insn(ILOAD, 0)?;
        method.visit_jump_insn(IFEQ, otherwise)?;
        method.visit_insn(ICONST_1)?;
        method.visit_jump_insn(GOTO, join)?;
        method.visit_label(otherwise)?;
        method.visit_insn(ICONST_1)?;
        method.visit_insn(ICONST_2)?;
        method.visit_insn(ICONST_3)?;
        method.visit_insn(IADD)?;
        method.visit_insn(IADD)?;
        method.visit_label(join)?;
        method.visit_insn(ICONST_5)?;
        method.visit_insn(IADD)?;
        method.visit_insn(IRETURN)?;
        method.visit_maxs(0, 0)?;
        method.visit_end()
    });

    let code = code_of(&bytes, "pick");
    assert_eq!(code.max_stack, 3);
    assert_eq!(code.max_locals, 1);
}

#[test]
fn handlers_start_with_the_exception_on_the_stack() {
    let bytes = build_class("test/Catch", max_stack_options(), |class| {
        let mut method = class.visit_method(&static_method("guarded", "()V"))?.unwrap();
        let (start, end, handler) = (Label::new(), Label::new(), Label::new());
        method.visit_code()?;
        method.visit_try_catch_block(start, end, handler, Some("java/lang/Exception"))?;
        method.visit_label(start)?;
        method.visit_insn(ICONST_1)?;
        method.visit_insn(POP)?;
        method.visit_label(end)?;
        method.visit_insn(RETURN)?;
        method.visit_label(handler)?;
        method.visit_insn(DUP)?;
        method.visit_method_insn(
            INVOKEVIRTUAL,
            "java/lang/Throwable",
            "printStackTrace",
            "()V",
            false,
        )?;
        method.visit_insn(ATHROW)?;
        method.visit_maxs(0, 0)?;
        method.visit_end()
    });

    let code = code_of(&bytes, "guarded");
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 0);
    assert_eq!(code.handlers, 1);
}

#[test]
fn empty_protected_ranges_are_dropped() {
    let bytes = build_class("test/Empty", max_stack_options(), |class| {
        let mut method = class.visit_method(&static_method("nothing", "()V"))?.unwrap();
        let (start, handler) = (Label::new(), Label::new());
        method.visit_code()?;
        method.visit_try_catch_block(start, start, handler, None)?;
        method.visit_label(start)?;
        method.visit_insn(RETURN)?;
        method.visit_label(handler)?;
        method.visit_insn(ATHROW)?;
        method.visit_maxs(0, 0)?;
        method.visit_end()
    });

    assert_eq!(code_of(&bytes, "nothing").handlers, 0);
}

#[test]
fn visited_maxs_are_a_lower_bound() {
    let bytes = build_class("test/Padded", max_stack_options(), |class| {
        let mut method = class.visit_method(&static_method("padded", "()V"))?.unwrap();
        method.visit_code()?;
        method.visit_insn(RETURN)?;
        method.visit_maxs(10, 4)?;
        method.visit_end()
    });

    let code = code_of(&bytes, "padded");
    assert_eq!(code.max_stack, 10);
    assert_eq!(code.max_locals, 4);
}

#[test]
fn receiver_counts_as_a_local() {
    let bytes = build_class("test/Instance", max_stack_options(), |class| {
        let info = MethodInfo {
            access: MethodAccessFlags::PUBLIC,
            name: String::from("self"),
            descriptor: String::from("(D)Ljava/lang/Object;"),
            signature: None,
            exceptions: vec![],
            deprecated: false,
        };
        let mut method = class.visit_method(&info)?.unwrap();
        method.visit_code()?;
        method.visit_var_insn(ALOAD, 0)?;
        method.visit_insn(ARETURN)?;
        method.visit_maxs(0, 0)?;
        method.visit_end()
    });

    let code = code_of(&bytes, "self");
    assert_eq!(code.max_stack, 1);
    assert_eq!(code.max_locals, 3);
}
