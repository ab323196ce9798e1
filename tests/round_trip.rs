mod common;

use classweave::jvm::analysis::ComputeMode;
use classweave::jvm::annotations::AnnotationValue;
use classweave::jvm::class_file::{ConstValue, HandleKind, MethodHandle, Version};
use classweave::jvm::opcodes::*;
use classweave::jvm::*;
use common::*;

fn method(access: MethodAccessFlags, name: &str, descriptor: &str) -> MethodInfo {
    MethodInfo {
        access,
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        signature: None,
        exceptions: vec![],
        deprecated: false,
    }
}

fn field(access: FieldAccessFlags, name: &str, descriptor: &str, value: Option<ConstValue>) -> FieldInfo {
    FieldInfo {
        access,
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        signature: None,
        value,
        deprecated: false,
    }
}

/// Body with switches, a handler, wide locals, debug info, and most operand kinds
fn compute_body(code: &mut dyn MethodVisitor) -> Result<(), Error> {
    let (start, end) = (Label::new(), Label::new());
    let (zero, one, two, fallback, other) = (
        Label::new(),
        Label::new(),
        Label::new(),
        Label::new(),
        Label::new(),
    );
    let (after, try_start, try_end, handler, done) = (
        Label::new(),
        Label::new(),
        Label::new(),
        Label::new(),
        Label::new(),
    );
    let metafactory = MethodHandle {
        kind: HandleKind::InvokeStatic,
        owner: String::from("java/lang/invoke/LambdaMetafactory"),
        name: String::from("metafactory"),
        descriptor: String::from(
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;\
             Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)\
             Ljava/lang/invoke/CallSite;",
        ),
        interface: false,
    };
    let lambda = MethodHandle {
        kind: HandleKind::InvokeStatic,
        owner: String::from("test/Sample"),
        name: String::from("lambda$0"),
        descriptor: String::from("()I"),
        interface: false,
    };

    code.visit_code()?;
    code.visit_try_catch_block(try_start, try_end, handler, Some("java/lang/ArithmeticException"))?;
    code.visit_label(start)?;
    code.visit_line_number(10, start)?;
    code.visit_var_insn(ILOAD, 0)?;
    code.visit_table_switch_insn(0, 2, fallback, &[zero, one, two])?;

    code.visit_label(zero)?;
    code.visit_insn(ICONST_1)?;
    code.visit_var_insn(ISTORE, 1)?;
    code.visit_jump_insn(GOTO, after)?;

    code.visit_label(one)?;
    code.visit_ldc_insn(&ConstValue::String(String::from("two")))?;
    code.visit_method_insn(INVOKEVIRTUAL, "java/lang/String", "length", "()I", false)?;
    code.visit_var_insn(ISTORE, 1)?;
    code.visit_jump_insn(GOTO, after)?;

    code.visit_label(two)?;
    code.visit_ldc_insn(&ConstValue::Long(1 << 40))?;
    code.visit_insn(L2I)?;
    code.visit_var_insn(ISTORE, 1)?;
    code.visit_jump_insn(GOTO, after)?;

    code.visit_label(fallback)?;
    code.visit_var_insn(ILOAD, 0)?;
    code.visit_lookup_switch_insn(other, &[-5, 100], &[zero, one])?;
    code.visit_label(other)?;
    code.visit_int_insn(SIPUSH, 1000)?;
    code.visit_var_insn(ISTORE, 1)?;

    code.visit_label(after)?;
    code.visit_line_number(11, after)?;
    code.visit_iinc_insn(1, 7)?;
    code.visit_var_insn(ILOAD, 1)?;
    code.visit_var_insn(ISTORE, 300)?;
    code.visit_iinc_insn(300, 1000)?;

    code.visit_label(try_start)?;
    code.visit_field_insn(GETSTATIC, "test/Sample", "LIMIT", "I")?;
    code.visit_var_insn(ILOAD, 300)?;
    code.visit_insn(IDIV)?;
    code.visit_var_insn(ISTORE, 1)?;
    code.visit_label(try_end)?;
    code.visit_jump_insn(GOTO, done)?;

    code.visit_label(handler)?;
    code.visit_var_insn(ASTORE, 2)?;
    code.visit_insn(ICONST_M1)?;
    code.visit_var_insn(ISTORE, 1)?;

    code.visit_label(done)?;
    code.visit_int_insn(BIPUSH, 3)?;
    code.visit_insn(ICONST_4)?;
    code.visit_multi_anewarray_insn("[[I", 2)?;
    code.visit_insn(POP)?;
    code.visit_int_insn(BIPUSH, 8)?;
    code.visit_int_insn(NEWARRAY, T_INT as i32)?;
    code.visit_insn(POP)?;
    code.visit_ldc_insn(&ConstValue::Type(String::from("java/lang/String")))?;
    code.visit_insn(POP)?;
    code.visit_ldc_insn(&ConstValue::Double(-0.0))?;
    code.visit_insn(POP2)?;
    code.visit_invoke_dynamic_insn(
        "getAsInt",
        "()Ljava/util/function/IntSupplier;",
        &metafactory,
        &[
            ConstValue::MethodType(String::from("()I")),
            ConstValue::MethodHandle(lambda),
            ConstValue::MethodType(String::from("()I")),
        ],
    )?;
    code.visit_method_insn(
        INVOKEINTERFACE,
        "java/util/function/IntSupplier",
        "getAsInt",
        "()I",
        true,
    )?;
    code.visit_insn(POP)?;
    code.visit_var_insn(ILOAD, 1)?;
    code.visit_insn(IRETURN)?;
    code.visit_label(end)?;

    code.visit_local_variable("x", "I", start, end, 0)?;
    code.visit_local_variable("y", "I", start, end, 1)?;
    code.visit_maxs(0, 0)?;
    code.visit_end()
}

fn sample_class() -> Vec<u8> {
    let mut writer = ClassWriter::new(WriterOptions::new(ComputeMode::MaxStack));
    let info = ClassInfo {
        super_name: Some(String::from("java/lang/Object")),
        interfaces: vec![String::from("java/lang/Runnable")],
        signature: Some(String::from("Ljava/lang/Object;Ljava/lang/Runnable;")),
        source_file: Some(String::from("Sample.java")),
        nest_host: None,
        nest_members: vec![String::from("test/Sample$Inner")],
        deprecated: false,
    };
    writer
        .visit(Version::JAVA8, ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, "test/Sample", &info)
        .unwrap();
    {
        let mut marker = writer.visit_annotation("Ltest/Marker;", true).unwrap().unwrap();
        marker
            .visit(Some("value"), &AnnotationValue::String(String::from("sample")))
            .unwrap();
        marker.visit_enum(Some("level"), "Ltest/Level;", "HIGH").unwrap();
        marker.visit_end().unwrap();
    }
    writer
        .visit_inner_class(&InnerClassInfo {
            name: String::from("test/Sample$Inner"),
            outer_name: Some(String::from("test/Sample")),
            inner_name: Some(String::from("Inner")),
            access: InnerClassAccessFlags::PUBLIC | InnerClassAccessFlags::STATIC,
        })
        .unwrap();

    let constant = FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
    for info in [
        field(constant, "LIMIT", "I", Some(ConstValue::Integer(42))),
        field(constant, "BIG", "J", Some(ConstValue::Long(-1))),
        field(constant, "NEGATIVE_ZERO", "F", Some(ConstValue::Float(-0.0))),
        field(constant, "ZERO", "F", Some(ConstValue::Float(0.0))),
        field(constant, "NAME", "Ljava/lang/String;", Some(ConstValue::String(String::from("caf\u{e9}\0")))),
        FieldInfo {
            signature: Some(String::from("Ljava/util/List<Ljava/lang/String;>;")),
            deprecated: true,
            ..field(FieldAccessFlags::PRIVATE, "names", "Ljava/util/List;", None)
        },
    ] {
        let mut field_writer = writer.visit_field(&info).unwrap().unwrap();
        field_writer.visit_end().unwrap();
    }

    {
        let mut init = writer
            .visit_method(&method(MethodAccessFlags::PUBLIC, "<init>", "()V"))
            .unwrap()
            .unwrap();
        init.visit_code().unwrap();
        init.visit_var_insn(ALOAD, 0).unwrap();
        init.visit_method_insn(INVOKESPECIAL, "java/lang/Object", "<init>", "()V", false)
            .unwrap();
        init.visit_insn(RETURN).unwrap();
        init.visit_maxs(0, 0).unwrap();
        init.visit_end().unwrap();
    }
    {
        let run = MethodInfo {
            exceptions: vec![String::from("java/io/IOException")],
            signature: Some(String::from("()V")),
            deprecated: true,
            ..method(MethodAccessFlags::PUBLIC, "run", "()V")
        };
        let mut run = writer.visit_method(&run).unwrap().unwrap();
        run.visit_code().unwrap();
        run.visit_insn(RETURN).unwrap();
        run.visit_maxs(0, 0).unwrap();
        run.visit_end().unwrap();
    }
    {
        let access = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
        let mut compute = writer.visit_method(&method(access, "compute", "(I)I")).unwrap().unwrap();
        {
            let mut not_null = compute
                .visit_parameter_annotation(0, "Ltest/Positive;", false)
                .unwrap()
                .unwrap();
            not_null.visit_end().unwrap();
        }
        compute_body(compute.as_mut()).unwrap();
    }
    {
        let access = MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC;
        let mut lambda = writer.visit_method(&method(access, "lambda$0", "()I")).unwrap().unwrap();
        lambda.visit_code().unwrap();
        lambda.visit_int_insn(BIPUSH, 42).unwrap();
        lambda.visit_insn(IRETURN).unwrap();
        lambda.visit_maxs(0, 0).unwrap();
        lambda.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    writer.to_bytes().unwrap()
}

#[test]
fn rewriting_preserves_the_event_trace() {
    let original = sample_class();
    let expected = trace(&original);

    let rewritten = rewrite(&original, WriterOptions::new(ComputeMode::MaxStack));
    assert_eq!(trace(&rewritten), expected);
    assert_eq!(
        ClassReader::new(&rewritten).unwrap().items(),
        ClassReader::new(&original).unwrap().items()
    );

    // Twice, to make sure nothing drifts
    let again = rewrite(&rewritten, WriterOptions::new(ComputeMode::MaxStack));
    assert_eq!(trace(&again), expected);
}

#[test]
fn rewriting_with_frames_preserves_the_event_trace() {
    let original = sample_class();
    let rewritten = rewrite(&original, WriterOptions::new(ComputeMode::Frames));
    assert_eq!(trace(&rewritten), trace(&original));
    assert!(code_of(&rewritten, "compute").attribute("StackMapTable").is_some());
    assert!(code_of(&original, "compute").attribute("StackMapTable").is_none());
}

#[test]
fn rewriting_into_a_fresh_pool_preserves_the_event_trace() {
    let original = sample_class();
    let reader = ClassReader::new(&original).unwrap();
    let mut writer = ClassWriter::new(WriterOptions::default());
    reader.accept(&mut writer).unwrap();
    let rewritten = writer.to_bytes().unwrap();
    assert_eq!(trace(&rewritten), trace(&original));
}

#[test]
fn trace_shows_normalized_instructions() {
    let trace = trace(&sample_class());
    for expected in [
        "class test/Sample version 52.0 access 0x0021",
        "  implements java/lang/Runnable",
        "  source Sample.java",
        "  nest members test/Sample$Inner",
        "  @Ltest/Marker;",
        "    level = Ltest/Level;.HIGH",
        "  inner class test/Sample$Inner outer test/Sample name Inner access 0x0009",
        "  field LIMIT I access 0x0019 = Integer(42)",
        "  field NEGATIVE_ZERO F access 0x0019 = Float(-0.0)",
        "  field NAME Ljava/lang/String; access 0x0019 = String(\"caf\u{e9}\\0\")",
        "    signature Ljava/util/List<Ljava/lang/String;>;",
        "    throws java/io/IOException",
        "    parameter 0 @Ltest/Positive; (invisible)",
        "    aload 0",
        "    istore 300",
        "    iinc 300 1000",
        "    ldc Long(1099511627776)",
        "    ldc Double(-0.0)",
        "    tableswitch 0..2",
        "    multianewarray [[I 2",
        "    newarray 10",
        "    invokeinterface java/util/function/IntSupplier.getAsInt()I (interface)",
        "    try L",
        "    line 10 L",
        "    local x I L",
        "    maxs stack 2 locals 301",
        "end",
    ] {
        assert!(trace.contains(expected), "missing `{}` in:\n{}", expected, trace);
    }
}

#[test]
fn zero_and_negative_zero_are_distinct_constants() {
    let bytes = sample_class();
    let reader = ClassReader::new(&bytes).unwrap();
    let mut floats = vec![];
    for index in 1..reader.items() {
        if let Ok(ConstValue::Float(value)) = reader.bytecode().read_const(index) {
            floats.push(value.to_bits());
        }
    }
    floats.sort_unstable();
    assert_eq!(floats, vec![0.0f32.to_bits(), (-0.0f32).to_bits()]);
}
