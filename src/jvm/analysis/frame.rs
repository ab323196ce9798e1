use super::ClassHierarchy;
use crate::jvm::class_file::{ClassConstantIndex, ConstValue, ConstantPool, TypeEntry, VerificationType};
use crate::jvm::descriptors::{
    argument_and_return_sizes, BaseType, FieldType, JavaFieldType, JavaMethodDescriptor,
    ParseDescriptor, RefType, RenderDescriptor,
};
use crate::util::Width;
use crate::jvm::opcodes::*;
use crate::jvm::{Error, MethodAccessFlags};

/// Base of an abstract type tracked during frame computation
///
/// `Object` and `Uninitialized` carry an index into the type table of the constant pool.
/// `Local` and `Stack` are only found in the outputs of a frame: they stand for "whatever was in
/// this local (or this many slots from the top of the stack) when the block was entered".
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeKind {
    /// Not yet known (input of a block that no edge has reached)
    Unset,
    Top,
    Boolean,
    Byte,
    Char,
    Short,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object(u32),
    Uninitialized(u32),

    /// `top_if_wide` marks a local whose neighbour was overwritten: if it turns out to hold a
    /// `long` or `double`, only half of that value is left
    Local { index: u16, top_if_wide: bool },
    Stack { index: u16, top_if_wide: bool },
}

impl TypeKind {
    /// Kind of an array element of the given primitive type
    fn from_base(base: BaseType) -> TypeKind {
        match base {
            BaseType::Boolean => TypeKind::Boolean,
            BaseType::Byte => TypeKind::Byte,
            BaseType::Char => TypeKind::Char,
            BaseType::Short => TypeKind::Short,
            BaseType::Int => TypeKind::Integer,
            BaseType::Float => TypeKind::Float,
            BaseType::Long => TypeKind::Long,
            BaseType::Double => TypeKind::Double,
        }
    }

    fn base_type(self) -> Option<BaseType> {
        Some(match self {
            TypeKind::Boolean => BaseType::Boolean,
            TypeKind::Byte => BaseType::Byte,
            TypeKind::Char => BaseType::Char,
            TypeKind::Short => BaseType::Short,
            TypeKind::Integer => BaseType::Int,
            TypeKind::Float => BaseType::Float,
            TypeKind::Long => BaseType::Long,
            TypeKind::Double => BaseType::Double,
            _ => return None,
        })
    }

    /// Sub-`int` primitives widen to `Integer` once loaded
    fn stack_kind(self) -> TypeKind {
        match self {
            TypeKind::Boolean | TypeKind::Byte | TypeKind::Char | TypeKind::Short => {
                TypeKind::Integer
            }
            kind => kind,
        }
    }
}

/// Abstract type: a base plus a number of array dimensions
///
/// Dimensions may go negative on relative types (the element type of an array held in a local).
/// `Boolean`, `Byte`, `Char`, and `Short` only appear as array elements: scalars of those types
/// are `Integer`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FrameType {
    pub dims: i8,
    pub kind: TypeKind,
}

const OBJECT_CLASS: &str = "java/lang/Object";

impl FrameType {
    pub const UNSET: FrameType = FrameType::base(TypeKind::Unset);
    pub const TOP: FrameType = FrameType::base(TypeKind::Top);
    pub const INTEGER: FrameType = FrameType::base(TypeKind::Integer);
    pub const FLOAT: FrameType = FrameType::base(TypeKind::Float);
    pub const LONG: FrameType = FrameType::base(TypeKind::Long);
    pub const DOUBLE: FrameType = FrameType::base(TypeKind::Double);
    pub const NULL: FrameType = FrameType::base(TypeKind::Null);
    pub const UNINITIALIZED_THIS: FrameType = FrameType::base(TypeKind::UninitializedThis);

    pub const fn base(kind: TypeKind) -> FrameType {
        FrameType { dims: 0, kind }
    }

    pub fn object(pool: &mut ConstantPool, name: &str) -> FrameType {
        FrameType::base(TypeKind::Object(pool.normal_type(name)))
    }

    /// Scalar that takes two slots
    pub fn is_wide(self) -> bool {
        self.dims == 0 && matches!(self.kind, TypeKind::Long | TypeKind::Double)
    }

    /// Object or array (of anything)
    pub fn is_reference(self) -> bool {
        self.dims > 0 || matches!(self.kind, TypeKind::Object(_))
    }

    fn is_top(self) -> bool {
        matches!(self.kind, TypeKind::Top | TypeKind::Unset)
    }

    fn with_extra_dims(self, extra: i8) -> FrameType {
        if extra == 0 || self.kind == TypeKind::Null {
            return self;
        }
        match self.dims.checked_add(extra) {
            Some(dims) if dims >= 0 || self.is_relative() => FrameType { dims, kind: self.kind },
            _ => FrameType::TOP,
        }
    }

    fn is_relative(self) -> bool {
        matches!(self.kind, TypeKind::Local { .. } | TypeKind::Stack { .. })
    }

    /// Type of the elements of this array type
    fn element(self) -> FrameType {
        self.with_extra_dims(-1)
    }

    fn array_of(self) -> FrameType {
        self.with_extra_dims(1)
    }

    /// Same kind, but base kinds are compared as "primitive", "object", or "uninitialized"
    fn same_base_kind(self, other: FrameType) -> bool {
        use TypeKind::*;
        match (self.kind, other.kind) {
            (Object(_), Object(_)) | (Uninitialized(_), Uninitialized(_)) => true,
            (Object(_) | Uninitialized(_), _) | (_, Object(_) | Uninitialized(_)) => false,
            (Local { .. } | Stack { .. }, _) | (_, Local { .. } | Stack { .. }) => false,
            _ => true,
        }
    }

    /// Replace a relative type with the absolute type it refers to
    fn resolve(self, input_locals: &[FrameType], input_stack: &[FrameType]) -> FrameType {
        let (base, top_if_wide) = match self.kind {
            TypeKind::Local { index, top_if_wide } => (
                input_locals
                    .get(index as usize)
                    .copied()
                    .unwrap_or(FrameType::TOP),
                top_if_wide,
            ),
            TypeKind::Stack { index, top_if_wide } => (
                input_stack
                    .len()
                    .checked_sub(index as usize)
                    .and_then(|slot| input_stack.get(slot))
                    .copied()
                    .unwrap_or(FrameType::TOP),
                top_if_wide,
            ),
            _ => return self,
        };
        let resolved = base.with_extra_dims(self.dims);
        if top_if_wide && resolved.is_wide() {
            FrameType::TOP
        } else {
            resolved
        }
    }

    /// Abstract type of a value of the given field descriptor (or the return type of a method
    /// descriptor), `None` for `void`
    pub fn from_descriptor(
        pool: &mut ConstantPool,
        descriptor: &str,
    ) -> Result<Option<FrameType>, Error> {
        let field_type = if descriptor.starts_with('(') {
            parse_descriptor::<JavaMethodDescriptor>(descriptor)?.return_type
        } else if descriptor == "V" {
            None
        } else {
            Some(parse_descriptor::<JavaFieldType>(descriptor)?)
        };
        field_type
            .map(|field_type| FrameType::from_field_type(pool, &field_type))
            .transpose()
    }

    /// Abstract type of a value of a parsed field type
    ///
    /// Sub-`int` primitives only keep their own kind as array elements.
    pub fn from_field_type(
        pool: &mut ConstantPool,
        field_type: &JavaFieldType,
    ) -> Result<FrameType, Error> {
        let (dims, kind) = match field_type {
            FieldType::Base(base) => (0, TypeKind::from_base(*base).stack_kind()),
            FieldType::Ref(RefType::Object(name)) => (0, TypeKind::Object(pool.normal_type(name))),
            FieldType::Ref(RefType::PrimitiveArray(array)) => {
                (array.dimensions(), TypeKind::from_base(array.element_type))
            }
            FieldType::Ref(RefType::ObjectArray(array)) => (
                array.dimensions(),
                TypeKind::Object(pool.normal_type(&array.element_type)),
            ),
        };
        let dims = i8::try_from(dims).map_err(|_| Error::MalformedDescriptor(field_type.render()))?;
        Ok(FrameType { dims, kind })
    }

    /// Type as it is written into a `StackMapTable`
    pub fn verification_type(
        self,
        pool: &mut ConstantPool,
    ) -> Result<VerificationType<ClassConstantIndex, u16>, Error> {
        if self.dims > 0 {
            let element = match self.kind {
                TypeKind::Object(index) => {
                    let name = pool.type_entry(index)?.name();
                    if name.starts_with('[') {
                        parse_descriptor::<JavaFieldType>(name)?
                    } else {
                        FieldType::object(name.to_owned())
                    }
                }
                kind => match kind.base_type() {
                    Some(base) => FieldType::Base(base),
                    None => return Ok(VerificationType::Top),
                },
            };
            let descriptor = element.with_dimensions(self.dims as usize).render();
            return Ok(VerificationType::Object(pool.class(&descriptor)?));
        }

        Ok(match self.kind {
            TypeKind::Boolean
            | TypeKind::Byte
            | TypeKind::Char
            | TypeKind::Short
            | TypeKind::Integer => VerificationType::Integer,
            TypeKind::Float => VerificationType::Float,
            TypeKind::Long => VerificationType::Long,
            TypeKind::Double => VerificationType::Double,
            TypeKind::Null => VerificationType::Null,
            TypeKind::UninitializedThis => VerificationType::UninitializedThis,
            TypeKind::Object(index) => {
                let name = pool.type_entry(index)?.name().to_owned();
                VerificationType::Object(pool.class(&name)?)
            }
            TypeKind::Uninitialized(index) => match pool.type_entry(index)? {
                TypeEntry::Uninitialized { offset, .. } => VerificationType::Uninitialized(*offset as u16),
                TypeEntry::Normal(_) => return Err(Error::InvalidTypeIndex(index)),
            },
            TypeKind::Unset | TypeKind::Top | TypeKind::Local { .. } | TypeKind::Stack { .. } => {
                VerificationType::Top
            }
        })
    }
}

/// What the frame merge needs to know about the method being analyzed
pub struct TypeContext<'a> {
    pub pool: &'a mut ConstantPool,
    pub hierarchy: &'a dyn ClassHierarchy,

    /// Internal name of the class declaring the method (type of `this` once initialized)
    pub class_name: &'a str,
}

/// Abstract state of the locals and operand stack of one basic block
///
/// The input part is absolute and only known once the fixed point is reached. The output part
/// is relative to the input: it is filled in by the `execute*` transfer functions while the
/// instructions are emitted, before anything is known about the input.
#[derive(Clone, Default, Debug)]
pub struct Frame {
    pub input_locals: Vec<FrameType>,
    pub input_stack: Vec<FrameType>,
    has_input_locals: bool,
    has_input_stack: bool,

    /// `None` means "unchanged since the start of the block"
    output_locals: Vec<Option<FrameType>>,
    output_stack: Vec<FrameType>,

    /// Number of input stack slots popped by the block, as a non-positive offset
    pub input_stack_top: i32,

    /// Highest stack height reached in the block, relative to the input height
    pub output_stack_max: i32,

    /// Types on which a constructor was invoked within the block
    initializations: Vec<FrameType>,
}

impl Frame {
    pub fn new() -> Frame {
        Frame::default()
    }

    /// Whether an edge (or the method entry) ever set the input of this frame
    pub fn is_reached(&self) -> bool {
        self.has_input_locals
    }

    /// Input frame of the method entry block: receiver, then arguments, then `Top`
    pub fn init_input_frame(
        &mut self,
        pool: &mut ConstantPool,
        class_name: &str,
        access: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        max_locals: u16,
    ) -> Result<(), Error> {
        let mut locals = Vec::with_capacity(max_locals as usize);
        if !access.contains(MethodAccessFlags::STATIC) {
            if name == "<init>" {
                locals.push(FrameType::UNINITIALIZED_THIS);
            } else {
                locals.push(FrameType::object(pool, class_name));
            }
        }
        for parameter in &parse_descriptor::<JavaMethodDescriptor>(descriptor)?.parameters {
            let argument = FrameType::from_field_type(pool, parameter)?;
            locals.push(argument);
            if argument.is_wide() {
                locals.push(FrameType::TOP);
            }
        }
        while locals.len() < max_locals as usize {
            locals.push(FrameType::TOP);
        }
        self.input_locals = locals;
        self.input_stack = vec![];
        self.has_input_locals = true;
        self.has_input_stack = true;
        Ok(())
    }

    fn get(&mut self, local: u16) -> FrameType {
        let index = local as usize;
        if index >= self.output_locals.len() {
            self.output_locals.resize(index + 1, None);
        }
        *self.output_locals[index].get_or_insert(FrameType::base(TypeKind::Local {
            index: local,
            top_if_wide: false,
        }))
    }

    fn set(&mut self, local: u16, frame_type: FrameType) {
        let index = local as usize;
        if index >= self.output_locals.len() {
            self.output_locals.resize(index + 1, None);
        }
        self.output_locals[index] = Some(frame_type);
    }

    fn push(&mut self, frame_type: FrameType) {
        self.output_stack.push(frame_type);
        let height = self.input_stack_top + self.output_stack.len() as i32;
        if height > self.output_stack_max {
            self.output_stack_max = height;
        }
    }

    /// Push the value(s) of a descriptor (nothing for `void`)
    fn push_descriptor(&mut self, pool: &mut ConstantPool, descriptor: &str) -> Result<(), Error> {
        if let Some(frame_type) = FrameType::from_descriptor(pool, descriptor)? {
            self.push(frame_type);
            if frame_type.is_wide() {
                self.push(FrameType::TOP);
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> FrameType {
        match self.output_stack.pop() {
            Some(frame_type) => frame_type,
            None => {
                self.input_stack_top -= 1;
                FrameType::base(TypeKind::Stack {
                    index: (-self.input_stack_top) as u16,
                    top_if_wide: false,
                })
            }
        }
    }

    fn pop_n(&mut self, count: usize) {
        let output = self.output_stack.len();
        if output >= count {
            self.output_stack.truncate(output - count);
        } else {
            self.input_stack_top -= (count - output) as i32;
            self.output_stack.clear();
        }
    }

    /// Pop the arguments of a method descriptor, or the value of a field descriptor
    fn pop_descriptor(&mut self, descriptor: &str) -> Result<(), Error> {
        match descriptor.as_bytes().first() {
            Some(b'(') => {
                let (arguments, _) = argument_and_return_sizes(descriptor)
                    .map_err(|_| Error::MalformedDescriptor(descriptor.to_owned()))?;
                self.pop_n(arguments - 1);
            }
            _ => self.pop_n(parse_descriptor::<JavaFieldType>(descriptor)?.width()),
        }
        Ok(())
    }

    /// Storing a single-slot value at `local` clobbers a wide value that started at `local - 1`
    fn invalidate_previous(&mut self, local: u16) {
        if local == 0 {
            return;
        }
        let previous = self.get(local - 1);
        if previous.is_wide() {
            self.set(local - 1, FrameType::TOP);
        } else if let TypeKind::Local { index, .. } = previous.kind {
            self.set(
                local - 1,
                FrameType {
                    dims: previous.dims,
                    kind: TypeKind::Local {
                        index,
                        top_if_wide: true,
                    },
                },
            );
        } else if let TypeKind::Stack { index, .. } = previous.kind {
            self.set(
                local - 1,
                FrameType {
                    dims: previous.dims,
                    kind: TypeKind::Stack {
                        index,
                        top_if_wide: true,
                    },
                },
            );
        }
    }

    /// Instructions without operands (also conditional jumps, switches, and returns, for the
    /// values they pop)
    pub fn execute(&mut self, opcode: u8) -> Result<(), Error> {
        match opcode {
            NOP | INEG | LNEG | FNEG | DNEG | I2B | I2C | I2S | GOTO | GOTO_W | RETURN => (),
            ACONST_NULL => self.push(FrameType::NULL),
            ICONST_M1..=ICONST_5 => self.push(FrameType::INTEGER),
            LCONST_0 | LCONST_1 => {
                self.push(FrameType::LONG);
                self.push(FrameType::TOP);
            }
            FCONST_0..=FCONST_2 => self.push(FrameType::FLOAT),
            DCONST_0 | DCONST_1 => {
                self.push(FrameType::DOUBLE);
                self.push(FrameType::TOP);
            }
            IALOAD | BALOAD | CALOAD | SALOAD => {
                self.pop_n(2);
                self.push(FrameType::INTEGER);
            }
            LALOAD | D2L => {
                self.pop_n(2);
                self.push(FrameType::LONG);
                self.push(FrameType::TOP);
            }
            FALOAD => {
                self.pop_n(2);
                self.push(FrameType::FLOAT);
            }
            DALOAD | L2D => {
                self.pop_n(2);
                self.push(FrameType::DOUBLE);
                self.push(FrameType::TOP);
            }
            AALOAD => {
                self.pop_n(1);
                let array = self.pop();
                self.push(array.element());
            }
            IASTORE | BASTORE | CASTORE | SASTORE | FASTORE | AASTORE => self.pop_n(3),
            LASTORE | DASTORE => self.pop_n(4),
            POP | IFEQ..=IFLE | IRETURN | FRETURN | ARETURN | TABLESWITCH | LOOKUPSWITCH
            | ATHROW | MONITORENTER | MONITOREXIT | IFNULL | IFNONNULL => self.pop_n(1),
            POP2 | IF_ICMPEQ..=IF_ACMPNE | LRETURN | DRETURN => self.pop_n(2),
            DUP => {
                let t1 = self.pop();
                self.push(t1);
                self.push(t1);
            }
            DUP_X1 => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t1);
                self.push(t2);
                self.push(t1);
            }
            DUP_X2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                self.push(t1);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            DUP2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t2);
                self.push(t1);
            }
            DUP2_X1 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            DUP2_X2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                let t4 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t4);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            SWAP => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t1);
                self.push(t2);
            }
            IADD | ISUB | IMUL | IDIV | IREM | IAND | IOR | IXOR | ISHL | ISHR | IUSHR | L2I
            | D2I | FCMPL | FCMPG => {
                self.pop_n(2);
                self.push(FrameType::INTEGER);
            }
            LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => {
                self.pop_n(4);
                self.push(FrameType::LONG);
                self.push(FrameType::TOP);
            }
            FADD | FSUB | FMUL | FDIV | FREM | L2F | D2F => {
                self.pop_n(2);
                self.push(FrameType::FLOAT);
            }
            DADD | DSUB | DMUL | DDIV | DREM => {
                self.pop_n(4);
                self.push(FrameType::DOUBLE);
                self.push(FrameType::TOP);
            }
            LSHL | LSHR | LUSHR => {
                self.pop_n(3);
                self.push(FrameType::LONG);
                self.push(FrameType::TOP);
            }
            I2L | F2L => {
                self.pop_n(1);
                self.push(FrameType::LONG);
                self.push(FrameType::TOP);
            }
            I2F => {
                self.pop_n(1);
                self.push(FrameType::FLOAT);
            }
            I2D | F2D => {
                self.pop_n(1);
                self.push(FrameType::DOUBLE);
                self.push(FrameType::TOP);
            }
            F2I | ARRAYLENGTH => {
                self.pop_n(1);
                self.push(FrameType::INTEGER);
            }
            LCMP | DCMPL | DCMPG => {
                self.pop_n(4);
                self.push(FrameType::INTEGER);
            }
            JSR | JSR_W | RET => return Err(Error::UnsupportedInstruction { opcode }),
            _ => return Err(Error::InvalidOpcode { opcode, offset: 0 }),
        }
        Ok(())
    }

    /// `bipush`, `sipush`, and `newarray`
    pub fn execute_with_int(&mut self, opcode: u8, operand: i32) -> Result<(), Error> {
        match opcode {
            BIPUSH | SIPUSH => self.push(FrameType::INTEGER),
            NEWARRAY => {
                self.pop_n(1);
                let element = BaseType::from_newarray_code(operand as u8)
                    .map_or(TypeKind::Long, TypeKind::from_base);
                self.push(FrameType::base(element).array_of());
            }
            _ => return Err(Error::InvalidOpcode { opcode, offset: 0 }),
        }
        Ok(())
    }

    /// Loads and stores of locals
    pub fn execute_var(&mut self, opcode: u8, var: u16) -> Result<(), Error> {
        match opcode {
            ILOAD => self.push(FrameType::INTEGER),
            FLOAD => self.push(FrameType::FLOAT),
            LLOAD => {
                self.push(FrameType::LONG);
                self.push(FrameType::TOP);
            }
            DLOAD => {
                self.push(FrameType::DOUBLE);
                self.push(FrameType::TOP);
            }
            ALOAD => {
                let local = self.get(var);
                self.push(local);
            }
            ISTORE | FSTORE | ASTORE => {
                let value = self.pop();
                self.set(var, value);
                self.invalidate_previous(var);
            }
            LSTORE | DSTORE => {
                self.pop_n(1);
                let value = self.pop();
                self.set(var, value);
                self.set(var.saturating_add(1), FrameType::TOP);
                self.invalidate_previous(var);
            }
            RET => return Err(Error::UnsupportedInstruction { opcode }),
            _ => return Err(Error::InvalidOpcode { opcode, offset: 0 }),
        }
        Ok(())
    }

    pub fn execute_iinc(&mut self, var: u16) {
        self.set(var, FrameType::INTEGER);
    }

    /// `new`, `anewarray`, `checkcast`, and `instanceof`
    ///
    /// `offset` is the position of the instruction itself, which identifies the uninitialized
    /// value pushed by `new`.
    pub fn execute_type(
        &mut self,
        pool: &mut ConstantPool,
        opcode: u8,
        offset: usize,
        type_name: &str,
    ) -> Result<(), Error> {
        match opcode {
            NEW => {
                let index = pool.uninitialized_type(type_name, offset);
                self.push(FrameType::base(TypeKind::Uninitialized(index)));
            }
            ANEWARRAY => {
                self.pop_n(1);
                if type_name.starts_with('[') {
                    self.push_descriptor(pool, &format!("[{}", type_name))?;
                } else {
                    self.push(FrameType::object(pool, type_name).array_of());
                }
            }
            CHECKCAST => {
                self.pop_n(1);
                if type_name.starts_with('[') {
                    self.push_descriptor(pool, type_name)?;
                } else {
                    self.push(FrameType::object(pool, type_name));
                }
            }
            INSTANCEOF => {
                self.pop_n(1);
                self.push(FrameType::INTEGER);
            }
            _ => return Err(Error::InvalidOpcode { opcode, offset }),
        }
        Ok(())
    }

    /// Field accesses and method invocations (except `invokedynamic`)
    pub fn execute_member(
        &mut self,
        pool: &mut ConstantPool,
        opcode: u8,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        match opcode {
            GETSTATIC => self.push_descriptor(pool, descriptor)?,
            PUTSTATIC => self.pop_descriptor(descriptor)?,
            GETFIELD => {
                self.pop_n(1);
                self.push_descriptor(pool, descriptor)?;
            }
            PUTFIELD => {
                self.pop_descriptor(descriptor)?;
                self.pop();
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                self.pop_descriptor(descriptor)?;
                if opcode != INVOKESTATIC {
                    let receiver = self.pop();
                    if opcode == INVOKESPECIAL && name.starts_with('<') {
                        self.initializations.push(receiver);
                    }
                }
                self.push_descriptor(pool, descriptor)?;
            }
            _ => return Err(Error::InvalidOpcode { opcode, offset: 0 }),
        }
        Ok(())
    }

    pub fn execute_invoke_dynamic(
        &mut self,
        pool: &mut ConstantPool,
        descriptor: &str,
    ) -> Result<(), Error> {
        self.pop_descriptor(descriptor)?;
        self.push_descriptor(pool, descriptor)
    }

    pub fn execute_ldc(&mut self, pool: &mut ConstantPool, value: &ConstValue) -> Result<(), Error> {
        match value {
            ConstValue::Integer(_) => self.push(FrameType::INTEGER),
            ConstValue::Float(_) => self.push(FrameType::FLOAT),
            ConstValue::Long(_) => {
                self.push(FrameType::LONG);
                self.push(FrameType::TOP);
            }
            ConstValue::Double(_) => {
                self.push(FrameType::DOUBLE);
                self.push(FrameType::TOP);
            }
            ConstValue::String(_) => self.push(FrameType::object(pool, "java/lang/String")),
            ConstValue::Type(_) => self.push(FrameType::object(pool, "java/lang/Class")),
            ConstValue::MethodType(_) => {
                self.push(FrameType::object(pool, "java/lang/invoke/MethodType"))
            }
            ConstValue::MethodHandle(_) => {
                self.push(FrameType::object(pool, "java/lang/invoke/MethodHandle"))
            }
            ConstValue::Dynamic(dynamic) => self.push_descriptor(pool, &dynamic.descriptor)?,
        }
        Ok(())
    }

    pub fn execute_multi_anewarray(
        &mut self,
        pool: &mut ConstantPool,
        descriptor: &str,
        dimensions: u8,
    ) -> Result<(), Error> {
        self.pop_n(dimensions as usize);
        self.push_descriptor(pool, descriptor)
    }

    /// Type once its constructor has run, if a constructor was invoked on it in this block
    fn initialized(&self, context: &mut TypeContext, frame_type: FrameType) -> Result<FrameType, Error> {
        if frame_type.dims != 0 {
            return Ok(frame_type);
        }
        let name = match frame_type.kind {
            TypeKind::UninitializedThis => context.class_name.to_owned(),
            TypeKind::Uninitialized(index) => context.pool.type_entry(index)?.name().to_owned(),
            _ => return Ok(frame_type),
        };
        for initialization in &self.initializations {
            if initialization.resolve(&self.input_locals, &self.input_stack) == frame_type {
                return Ok(FrameType::object(context.pool, &name));
            }
        }
        Ok(frame_type)
    }

    /// Merge the output of this frame into the input of a successor
    ///
    /// `exception` is the caught type when the successor is an exception handler: the handler
    /// then sees the locals from anywhere in the block and just the exception on the stack.
    /// Returns whether the successor's input changed.
    pub fn merge(
        &self,
        context: &mut TypeContext,
        successor: &mut Frame,
        exception: Option<FrameType>,
    ) -> Result<bool, Error> {
        let mut changed = false;
        let local_count = self.input_locals.len();
        if !successor.has_input_locals {
            successor.input_locals = vec![FrameType::UNSET; local_count];
            successor.has_input_locals = true;
            changed = true;
        }

        for local in 0..local_count {
            let mut frame_type = match self.output_locals.get(local).copied().flatten() {
                Some(output) => output.resolve(&self.input_locals, &self.input_stack),
                None => self.input_locals[local],
            };
            if !self.initializations.is_empty() {
                frame_type = self.initialized(context, frame_type)?;
            }
            changed |= merge_type(context, frame_type, &mut successor.input_locals, local)?;
        }

        if let Some(exception) = exception {
            for local in 0..local_count {
                let frame_type = self.input_locals[local];
                changed |= merge_type(context, frame_type, &mut successor.input_locals, local)?;
            }
            if !successor.has_input_stack {
                successor.input_stack = vec![FrameType::UNSET];
                successor.has_input_stack = true;
                changed = true;
            }
            changed |= merge_type(context, exception, &mut successor.input_stack, 0)?;
            return Ok(changed);
        }

        let kept = (self.input_stack.len() as i32 + self.input_stack_top).max(0) as usize;
        if !successor.has_input_stack {
            successor.input_stack = vec![FrameType::UNSET; kept + self.output_stack.len()];
            successor.has_input_stack = true;
            changed = true;
        }
        for slot in 0..kept {
            let mut frame_type = self.input_stack[slot];
            if !self.initializations.is_empty() {
                frame_type = self.initialized(context, frame_type)?;
            }
            changed |= merge_type(context, frame_type, &mut successor.input_stack, slot)?;
        }
        for (slot, output) in self.output_stack.iter().enumerate() {
            let mut frame_type = output.resolve(&self.input_locals, &self.input_stack);
            if !self.initializations.is_empty() {
                frame_type = self.initialized(context, frame_type)?;
            }
            changed |= merge_type(context, frame_type, &mut successor.input_stack, kept + slot)?;
        }
        Ok(changed)
    }

    /// Input locals as written in a stack map: one entry per long/double and no trailing `Top`
    pub fn compressed_locals(&self) -> Vec<FrameType> {
        let mut locals = vec![];
        let mut used = 0;
        let mut slot = 0;
        while let Some(local) = self.input_locals.get(slot) {
            locals.push(*local);
            if !local.is_top() {
                used = locals.len();
            }
            slot += if local.is_wide() { 2 } else { 1 };
        }
        locals.truncate(used);
        locals
    }

    /// Input stack as written in a stack map: one entry per long/double
    pub fn compressed_stack(&self) -> Vec<FrameType> {
        let mut stack = vec![];
        let mut slot = 0;
        while let Some(value) = self.input_stack.get(slot) {
            stack.push(*value);
            slot += if value.is_wide() { 2 } else { 1 };
        }
        stack
    }
}

/// Merge one type into an entry of a successor's input, returning whether the entry changed
fn merge_type(
    context: &mut TypeContext,
    frame_type: FrameType,
    types: &mut [FrameType],
    index: usize,
) -> Result<bool, Error> {
    let current = match types.get(index) {
        Some(current) => *current,
        None => return Ok(false),
    };
    if current == frame_type {
        return Ok(false);
    }

    let mut incoming = frame_type;
    if incoming.kind == TypeKind::Null {
        if current == FrameType::NULL {
            return Ok(false);
        }
        incoming = FrameType::NULL;
    }
    if current.kind == TypeKind::Unset {
        types[index] = incoming;
        return Ok(true);
    }

    let merged = if current.is_reference() {
        if incoming == FrameType::NULL {
            return Ok(false);
        } else if incoming.dims == current.dims && incoming.same_base_kind(current) {
            match (incoming.kind, current.kind) {
                (TypeKind::Object(a), TypeKind::Object(b)) => FrameType {
                    dims: incoming.dims,
                    kind: TypeKind::Object(context.pool.merged_type(a, b, context.hierarchy)?),
                },
                _ => FrameType {
                    dims: incoming.dims - 1,
                    kind: TypeKind::Object(context.pool.normal_type(OBJECT_CLASS)),
                },
            }
        } else if incoming.is_reference() {
            let object_dims = |t: FrameType| {
                if t.dims == 0 || matches!(t.kind, TypeKind::Object(_)) {
                    t.dims
                } else {
                    t.dims - 1
                }
            };
            FrameType {
                dims: object_dims(incoming).min(object_dims(current)),
                kind: TypeKind::Object(context.pool.normal_type(OBJECT_CLASS)),
            }
        } else {
            FrameType::TOP
        }
    } else if current == FrameType::NULL {
        if incoming.is_reference() {
            incoming
        } else {
            FrameType::TOP
        }
    } else {
        FrameType::TOP
    };

    if merged != current {
        types[index] = merged;
        Ok(true)
    } else {
        Ok(false)
    }
}

fn parse_descriptor<T: ParseDescriptor>(descriptor: &str) -> Result<T, Error> {
    T::parse(descriptor).map_err(|_| Error::MalformedDescriptor(descriptor.to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::analysis::{MapHierarchy, ObjectHierarchy};

    fn entry_frame(pool: &mut ConstantPool, descriptor: &str, max_locals: u16) -> Frame {
        let mut frame = Frame::new();
        frame
            .init_input_frame(
                pool,
                "Owner",
                MethodAccessFlags::STATIC,
                "m",
                descriptor,
                max_locals,
            )
            .unwrap();
        frame
    }

    #[test]
    fn descriptors_map_to_types() {
        let mut pool = ConstantPool::new();
        assert_eq!(FrameType::from_descriptor(&mut pool, "V").unwrap(), None);
        assert_eq!(
            FrameType::from_descriptor(&mut pool, "()Z").unwrap(),
            Some(FrameType::INTEGER)
        );
        let string = pool.normal_type("java/lang/String");
        assert_eq!(
            FrameType::from_descriptor(&mut pool, "[[Ljava/lang/String;").unwrap(),
            Some(FrameType {
                dims: 2,
                kind: TypeKind::Object(string)
            })
        );
        assert_eq!(
            FrameType::from_descriptor(&mut pool, "[Z").unwrap(),
            Some(FrameType {
                dims: 1,
                kind: TypeKind::Boolean
            })
        );
        assert!(FrameType::from_descriptor(&mut pool, "L;").is_err());
        assert!(FrameType::from_descriptor(&mut pool, "Q").is_err());
        assert!(FrameType::from_descriptor(&mut pool, "(Q)I").is_err());
        assert!(FrameType::from_descriptor(&mut pool, "IJ").is_err());
    }

    #[test]
    fn field_accesses_pop_by_width() {
        let mut pool = ConstantPool::new();
        let mut block = entry_frame(&mut pool, "()V", 0);
        block.execute(LCONST_0).unwrap();
        block.execute(ICONST_0).unwrap();
        block
            .execute_member(&mut pool, PUTSTATIC, "count", "I")
            .unwrap();
        block
            .execute_member(&mut pool, PUTSTATIC, "total", "J")
            .unwrap();
        assert_eq!(block.input_stack_top, 0);
        assert_eq!(block.output_stack_max, 3);
        assert!(matches!(
            block.execute_member(&mut pool, PUTSTATIC, "broken", "Q"),
            Err(Error::MalformedDescriptor(_))
        ));
        assert!(matches!(
            block.execute_member(&mut pool, PUTSTATIC, "broken", ""),
            Err(Error::MalformedDescriptor(_))
        ));
    }

    #[test]
    fn entry_frame_covers_receiver_and_arguments() {
        let mut pool = ConstantPool::new();
        let mut frame = Frame::new();
        frame
            .init_input_frame(
                &mut pool,
                "Owner",
                MethodAccessFlags::PUBLIC,
                "<init>",
                "(JI)V",
                6,
            )
            .unwrap();
        assert_eq!(
            frame.input_locals,
            vec![
                FrameType::UNINITIALIZED_THIS,
                FrameType::LONG,
                FrameType::TOP,
                FrameType::INTEGER,
                FrameType::TOP,
                FrameType::TOP,
            ]
        );
        assert_eq!(
            frame.compressed_locals(),
            vec![
                FrameType::UNINITIALIZED_THIS,
                FrameType::LONG,
                FrameType::INTEGER
            ]
        );
    }

    #[test]
    fn outputs_are_relative_until_merged() {
        let mut pool = ConstantPool::new();
        let mut block = entry_frame(&mut pool, "(Ljava/lang/String;I)V", 2);

        // swap the two arguments through the stack
        block.execute_var(ALOAD, 0).unwrap();
        block.execute_var(ILOAD, 1).unwrap();
        block.execute_var(ISTORE, 0).unwrap();
        block.execute_var(ASTORE, 1).unwrap();
        assert_eq!(block.output_stack_max, 2);

        let hierarchy = ObjectHierarchy;
        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let mut successor = Frame::new();
        assert!(block.merge(&mut context, &mut successor, None).unwrap());
        let string = context.pool.normal_type("java/lang/String");
        assert_eq!(
            successor.input_locals,
            vec![FrameType::INTEGER, FrameType::base(TypeKind::Object(string))]
        );
        assert!(successor.input_stack.is_empty());

        // merging the same thing again is a fixed point
        assert!(!block.merge(&mut context, &mut successor, None).unwrap());
    }

    #[test]
    fn merging_classes_uses_the_hierarchy() {
        let mut pool = ConstantPool::new();
        let mut hierarchy = MapHierarchy::new();
        hierarchy
            .add("Left", "Base")
            .add("Right", "Base")
            .add("Base", "java/lang/Object");

        let mut left = entry_frame(&mut pool, "(LLeft;)V", 1);
        left.execute_var(ALOAD, 0).unwrap();
        let mut right = entry_frame(&mut pool, "(LRight;)V", 1);
        right.execute_var(ALOAD, 0).unwrap();

        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let mut join = Frame::new();
        left.merge(&mut context, &mut join, None).unwrap();
        assert!(right.merge(&mut context, &mut join, None).unwrap());

        let base = context.pool.normal_type("Base");
        let expected = FrameType::base(TypeKind::Object(base));
        assert_eq!(join.input_locals, vec![expected]);
        assert_eq!(join.input_stack, vec![expected]);
    }

    #[test]
    fn incompatible_values_merge_to_top() {
        let mut pool = ConstantPool::new();
        let mut ints = entry_frame(&mut pool, "()V", 1);
        ints.execute(ICONST_0).unwrap();
        ints.execute_var(ISTORE, 0).unwrap();
        let mut floats = entry_frame(&mut pool, "()V", 1);
        floats.execute(FCONST_0).unwrap();
        floats.execute_var(FSTORE, 0).unwrap();

        let hierarchy = ObjectHierarchy;
        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let mut join = Frame::new();
        ints.merge(&mut context, &mut join, None).unwrap();
        floats.merge(&mut context, &mut join, None).unwrap();
        assert_eq!(join.input_locals, vec![FrameType::TOP]);
        assert!(join.compressed_locals().is_empty());
    }

    #[test]
    fn null_merges_into_references() {
        let mut pool = ConstantPool::new();
        let mut nulls = entry_frame(&mut pool, "()V", 1);
        nulls.execute(ACONST_NULL).unwrap();
        nulls.execute_var(ASTORE, 0).unwrap();
        let mut strings = entry_frame(&mut pool, "()V", 1);
        strings.execute_ldc(&mut pool, &ConstValue::String(String::from("s"))).unwrap();
        strings.execute_var(ASTORE, 0).unwrap();

        let hierarchy = ObjectHierarchy;
        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let mut join = Frame::new();
        nulls.merge(&mut context, &mut join, None).unwrap();
        assert_eq!(join.input_locals, vec![FrameType::NULL]);
        strings.merge(&mut context, &mut join, None).unwrap();
        let string = context.pool.normal_type("java/lang/String");
        assert_eq!(join.input_locals, vec![FrameType::base(TypeKind::Object(string))]);
    }

    #[test]
    fn constructor_call_initializes_this() {
        let mut pool = ConstantPool::new();
        let mut block = Frame::new();
        block
            .init_input_frame(&mut pool, "Owner", MethodAccessFlags::PUBLIC, "<init>", "()V", 1)
            .unwrap();
        block.execute_var(ALOAD, 0).unwrap();
        block
            .execute_member(&mut pool, INVOKESPECIAL, "<init>", "()V")
            .unwrap();

        let hierarchy = ObjectHierarchy;
        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let mut successor = Frame::new();
        block.merge(&mut context, &mut successor, None).unwrap();
        let owner = context.pool.normal_type("Owner");
        assert_eq!(successor.input_locals, vec![FrameType::base(TypeKind::Object(owner))]);
    }

    #[test]
    fn handlers_see_the_exception_alone_on_the_stack() {
        let mut pool = ConstantPool::new();
        let mut block = entry_frame(&mut pool, "(I)V", 1);
        block.execute(ICONST_1).unwrap();
        block.execute(ICONST_2).unwrap();

        let throwable = FrameType::object(&mut pool, "java/lang/Throwable");
        let hierarchy = ObjectHierarchy;
        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let mut handler = Frame::new();
        block.merge(&mut context, &mut handler, Some(throwable)).unwrap();
        assert_eq!(handler.input_locals, vec![FrameType::INTEGER]);
        assert_eq!(handler.input_stack, vec![throwable]);
    }

    #[test]
    fn wide_store_clobbers_neighbour() {
        let mut pool = ConstantPool::new();
        let mut block = entry_frame(&mut pool, "(J)V", 3);
        // overwrite the second half of the long argument
        block.execute(ICONST_0).unwrap();
        block.execute_var(ISTORE, 1).unwrap();

        let hierarchy = ObjectHierarchy;
        let mut context = TypeContext {
            pool: &mut pool,
            hierarchy: &hierarchy,
            class_name: "Owner",
        };
        let mut successor = Frame::new();
        block.merge(&mut context, &mut successor, None).unwrap();
        assert_eq!(
            successor.input_locals,
            vec![FrameType::TOP, FrameType::INTEGER, FrameType::TOP]
        );
    }

    #[test]
    fn subroutines_are_rejected() {
        let mut frame = Frame::new();
        assert!(matches!(
            frame.execute(JSR),
            Err(Error::UnsupportedInstruction { opcode: JSR })
        ));
        assert!(matches!(
            frame.execute_var(RET, 1),
            Err(Error::UnsupportedInstruction { opcode: RET })
        ));
    }

    #[test]
    fn array_types_become_class_entries() {
        let mut pool = ConstantPool::new();
        let ints = FrameType {
            dims: 1,
            kind: TypeKind::Integer,
        };
        match ints.verification_type(&mut pool).unwrap() {
            VerificationType::Object(class) => {
                assert_eq!(class, pool.class("[I").unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }
        let uninitialized = pool.uninitialized_type("Thing", 7);
        assert_eq!(
            FrameType::base(TypeKind::Uninitialized(uninitialized))
                .verification_type(&mut pool)
                .unwrap(),
            VerificationType::Uninitialized(7)
        );
    }
}
