use super::class_file::Constant;
use super::Label;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Input ended before a read of `needed` bytes at `offset` could complete
    UnexpectedEof { offset: usize, needed: usize },

    /// The first four bytes are not `0xCAFEBABE`
    BadMagic(u32),

    /// Constant pool index is zero, past the end, or the unusable half of a `long`/`double`
    InvalidConstantIndex(u16),

    /// Constant pool record has an unrecognized tag byte
    InvalidConstantTag { tag: u8, offset: usize },

    /// Constant pool index points at a record of the wrong kind
    UnexpectedConstant { index: u16, expected: &'static str },

    InvalidOpcode { opcode: u8, offset: usize },

    /// Jump, switch, handler, or debug entry pointing outside of the method's code
    InvalidCodeOffset { source: usize, target: i64 },

    /// Annotation element value has an unrecognized tag byte
    InvalidAnnotationTag { tag: u8, offset: usize },

    MalformedDescriptor(String),
    MalformedUtf8 { offset: usize },

    ConstantPoolOverflow { constant: Constant, offset: usize },

    /// A `Dynamic`/`InvokeDynamic` record refers to a bootstrap method that is not in the table
    MissingBootstrapMethod(u16),

    /// A type table index was used that was never handed out (indicates a bug)
    InvalidTypeIndex(u32),

    /// A label was referenced by a jump, switch, handler, or debug entry but never placed
    UnresolvedLabel(Label),

    /// A forward jump does not fit in a 16-bit offset
    JumpOffsetOverflow { source: usize, target: usize },

    /// Method body exceeds 65535 bytes
    MethodCodeOverflow(usize),

    /// Instruction that frame computation cannot model (`jsr`/`ret`)
    UnsupportedInstruction { opcode: u8 },

    /// `lookupswitch` given a different number of keys and targets
    SwitchArity { keys: usize, targets: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::UnexpectedEof { offset, needed } => write!(
                f,
                "truncated class file: needed {} byte(s) at offset {}",
                needed, offset
            ),
            Error::BadMagic(magic) => write!(f, "bad magic number 0x{:08X}", magic),
            Error::InvalidConstantIndex(index) => {
                write!(f, "invalid constant pool index #{}", index)
            }
            Error::InvalidConstantTag { tag, offset } => write!(
                f,
                "unknown constant pool tag {} at offset {}",
                tag, offset
            ),
            Error::UnexpectedConstant { index, expected } => {
                write!(f, "constant #{} is not a {} constant", index, expected)
            }
            Error::InvalidOpcode { opcode, offset } => {
                write!(f, "invalid opcode {} at code offset {}", opcode, offset)
            }
            Error::InvalidCodeOffset { source, target } => write!(
                f,
                "code offset {} referenced at {} is outside of the method body",
                target, source
            ),
            Error::InvalidAnnotationTag { tag, offset } => write!(
                f,
                "unknown annotation element tag '{}' at offset {}",
                *tag as char, offset
            ),
            Error::MalformedDescriptor(descriptor) => {
                write!(f, "malformed descriptor '{}'", descriptor)
            }
            Error::MalformedUtf8 { offset } => {
                write!(f, "malformed modified UTF-8 at offset {}", offset)
            }
            Error::ConstantPoolOverflow { constant, offset } => write!(
                f,
                "constant pool overflow at #{} while adding {:?}",
                offset, constant
            ),
            Error::MissingBootstrapMethod(index) => {
                write!(f, "bootstrap method {} is not in the table", index)
            }
            Error::InvalidTypeIndex(index) => write!(f, "invalid type table index {}", index),
            Error::UnresolvedLabel(label) => write!(f, "label {:?} was never placed", label),
            Error::JumpOffsetOverflow { source, target } => write!(
                f,
                "jump from {} to {} does not fit in a 16-bit offset",
                source, target
            ),
            Error::MethodCodeOverflow(len) => {
                write!(f, "method code is {} bytes long (max 65535)", len)
            }
            Error::UnsupportedInstruction { opcode } => write!(
                f,
                "opcode {} is not supported when computing frames",
                opcode
            ),
            Error::SwitchArity { keys, targets } => write!(
                f,
                "lookupswitch has {} key(s) but {} target(s)",
                keys, targets
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
