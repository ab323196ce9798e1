use super::Serialize;
use byteorder::WriteBytesExt;

/// Value that can be pushed with `ldc`, passed as a bootstrap argument, or used as a field's
/// constant value
///
/// This is the symbolic form: classes, strings, and descriptors are spelled out rather than
/// referenced by constant pool index.
#[derive(Clone, Debug)]
pub enum ConstValue {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),

    /// Class literal: an internal name (`java/lang/String`) or an array descriptor (`[I`)
    Type(String),

    /// Method type, given by its descriptor
    MethodType(String),

    MethodHandle(MethodHandle),

    /// Dynamically-computed constant
    Dynamic(Box<ConstantDynamic>),
}

impl ConstValue {
    /// Does this value take two operand stack slots?
    pub fn is_wide(&self) -> bool {
        match self {
            ConstValue::Long(_) | ConstValue::Double(_) => true,
            ConstValue::Dynamic(dynamic) => {
                dynamic.descriptor == "J" || dynamic.descriptor == "D"
            }
            _ => false,
        }
    }
}

/// Bit-level equality, so that `0.0` and `-0.0` (or two NaN payloads) are different values
impl PartialEq for ConstValue {
    fn eq(&self, other: &ConstValue) -> bool {
        match (self, other) {
            (ConstValue::Integer(a), ConstValue::Integer(b)) => a == b,
            (ConstValue::Float(a), ConstValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::Long(a), ConstValue::Long(b)) => a == b,
            (ConstValue::Double(a), ConstValue::Double(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::String(a), ConstValue::String(b))
            | (ConstValue::Type(a), ConstValue::Type(b))
            | (ConstValue::MethodType(a), ConstValue::MethodType(b)) => a == b,
            (ConstValue::MethodHandle(a), ConstValue::MethodHandle(b)) => a == b,
            (ConstValue::Dynamic(a), ConstValue::Dynamic(b)) => a == b,
            _ => false,
        }
    }
}

/// Symbolic method handle
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodHandle {
    pub kind: HandleKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,

    /// Is `owner` an interface?
    pub interface: bool,
}

/// Symbolic dynamically-computed constant (or call site)
#[derive(Clone, PartialEq, Debug)]
pub struct ConstantDynamic {
    pub name: String,
    pub descriptor: String,
    pub bootstrap_method: MethodHandle,
    pub bootstrap_arguments: Vec<ConstValue>,
}

/// Symbolic field or method reference
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,

    /// Was this an `InterfaceMethodref`?
    pub interface: bool,
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    pub const fn tag(self) -> u8 {
        match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<HandleKind> {
        Some(match tag {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }

    /// Handles 1 through 4 refer to fields, the rest to methods
    pub const fn is_field(self) -> bool {
        self.tag() <= 4
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.tag().serialize(writer)
    }
}
