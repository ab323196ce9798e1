use super::opcodes::{
    IALOAD, IASTORE, T_BOOLEAN, T_BYTE, T_CHAR, T_DOUBLE, T_FLOAT, T_INT, T_LONG, T_SHORT,
};
use crate::util::Width;
use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to and from string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(ret),
            Some(c) => {
                let msg = format!("Unexpected leftover input '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Operand of `newarray` for arrays of this type
    pub const fn newarray_code(self) -> u8 {
        match self {
            BaseType::Boolean => T_BOOLEAN,
            BaseType::Char => T_CHAR,
            BaseType::Float => T_FLOAT,
            BaseType::Double => T_DOUBLE,
            BaseType::Byte => T_BYTE,
            BaseType::Short => T_SHORT,
            BaseType::Int => T_INT,
            BaseType::Long => T_LONG,
        }
    }

    /// Inverse of [`BaseType::newarray_code`]
    pub const fn from_newarray_code(code: u8) -> Option<BaseType> {
        Some(match code {
            T_BOOLEAN => BaseType::Boolean,
            T_CHAR => BaseType::Char,
            T_FLOAT => BaseType::Float,
            T_DOUBLE => BaseType::Double,
            T_BYTE => BaseType::Byte,
            T_SHORT => BaseType::Short,
            T_INT => BaseType::Int,
            T_LONG => BaseType::Long,
            _ => return None,
        })
    }
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Byte
            | BaseType::Char
            | BaseType::Float
            | BaseType::Int
            | BaseType::Short
            | BaseType::Boolean => 1,
            BaseType::Double | BaseType::Long => 2,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let typ = match source.next() {
            Some('B') => BaseType::Byte,
            Some('C') => BaseType::Char,
            Some('D') => BaseType::Double,
            Some('F') => BaseType::Float,
            Some('I') => BaseType::Int,
            Some('J') => BaseType::Long,
            Some('S') => BaseType::Short,
            Some('Z') => BaseType::Boolean,
            Some(c) => {
                let msg = format!("Invalid base type character '{}'", c);
                return Err(Error::new(ErrorKind::InvalidInput, msg));
            }
            None => {
                let msg = "Missing base type character";
                return Err(Error::new(ErrorKind::UnexpectedEof, msg));
            }
        };
        Ok(typ)
    }
}

/// Reference type
///
/// Classes are identified by their internal name (eg. `java/lang/String`).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType<Class> {
    Object(Class),
    ObjectArray(ArrayType<Class>),
    PrimitiveArray(ArrayType<BaseType>),
}

/// Generic array type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Additional dimensions (`A[]` has 0 additional dimensions, `A[][][][]` has 3)
    pub additional_dimensions: usize,

    /// Underlying element type (`A` is the underlying element type of `A[][]`)
    pub element_type: T,
}

impl<T> ArrayType<T> {
    /// Total number of dimensions in the array type
    pub const fn dimensions(&self) -> usize {
        self.additional_dimensions + 1
    }
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, write_to: &mut String) {
        for _ in 0..=self.additional_dimensions {
            write_to.push('[');
        }
        self.element_type.render_to(write_to);
    }
}

/// Object types render as `L<internal name>;`
impl RenderDescriptor for String {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self);
        write_to.push(';');
    }
}

impl ParseDescriptor for String {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if let Some('L') = source.next() {
            let mut class_name = String::new();
            loop {
                let c: char = source.next().ok_or_else(|| {
                    let msg = format!("Missing terminator for 'L{}'", class_name);
                    Error::new(ErrorKind::UnexpectedEof, msg)
                })?;
                if c == ';' {
                    if class_name.is_empty() {
                        let msg = "Empty class name in object type";
                        return Err(Error::new(ErrorKind::InvalidInput, msg));
                    }
                    return Ok(class_name);
                } else {
                    class_name.push(c)
                }
            }
        } else {
            Err(Error::new(
                ErrorKind::InvalidInput,
                "Expected object type to start with `L`",
            ))
        }
    }
}

impl<C: RenderDescriptor> RenderDescriptor for RefType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => cls.render_to(write_to),
            RefType::PrimitiveArray(arr) => arr.render_to(write_to),
            RefType::ObjectArray(arr) => arr.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for RefType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        Ok(match source.peek().copied() {
            Some('L') => RefType::Object(C::parse_from(source)?),
            Some('[') => {
                source.next();
                let mut additional_dimensions = 0;
                while source.next_if_eq(&'[').is_some() {
                    additional_dimensions += 1;
                }
                if let Some('L') = source.peek().copied() {
                    RefType::ObjectArray(ArrayType {
                        additional_dimensions,
                        element_type: C::parse_from(source)?,
                    })
                } else {
                    RefType::PrimitiveArray(ArrayType {
                        additional_dimensions,
                        element_type: BaseType::parse_from(source)?,
                    })
                }
            }
            Some(c) => {
                let msg = format!("Invalid reference type character '{}'", c);
                return Err(Error::new(ErrorKind::InvalidInput, msg));
            }
            None => {
                let msg = "Missing field type";
                return Err(Error::new(ErrorKind::UnexpectedEof, msg));
            }
        })
    }
}

/// Type of a class, instance, or local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType<Class> {
    Base(BaseType),
    Ref(RefType<Class>),
}

impl<C> Width for FieldType<C> {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl<C> FieldType<C> {
    pub const fn object(class_name: C) -> FieldType<C> {
        FieldType::Ref(RefType::Object(class_name))
    }

    /// Array of this type with `dimensions` more dimensions (the type itself for 0)
    pub fn with_dimensions(self, dimensions: usize) -> FieldType<C> {
        let additional_dimensions = match dimensions.checked_sub(1) {
            Some(additional) => additional,
            None => return self,
        };
        FieldType::Ref(match self {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions,
                element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(array)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: array.additional_dimensions + dimensions,
                element_type: array.element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(array)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: array.additional_dimensions + dimensions,
                element_type: array.element_type,
            }),
        })
    }

    /// Adapt an `int` flavoured opcode to this type
    ///
    /// `int_opcode` must be one of `iload`, `istore`, `iaload`, `iastore`, `ireturn` or an `int`
    /// arithmetic instruction (`iadd`, `isub`, `ineg`, ...). For instance, `iload` on a `double`
    /// type becomes `dload` and `iastore` on a `char` type becomes `castore`. Reference types
    /// only make sense with loads, stores, and returns.
    pub fn opcode(&self, int_opcode: u8) -> u8 {
        let array_access = int_opcode == IALOAD || int_opcode == IASTORE;
        let shift = match self {
            FieldType::Base(BaseType::Boolean) | FieldType::Base(BaseType::Byte) if array_access => 5,
            FieldType::Base(BaseType::Char) if array_access => 6,
            FieldType::Base(BaseType::Short) if array_access => 7,
            FieldType::Base(
                BaseType::Int
                | BaseType::Boolean
                | BaseType::Byte
                | BaseType::Char
                | BaseType::Short,
            ) => 0,
            FieldType::Base(BaseType::Long) => 1,
            FieldType::Base(BaseType::Float) => 2,
            FieldType::Base(BaseType::Double) => 3,
            FieldType::Ref(_) => 4,
        };
        int_opcode + shift
    }
}

impl<C: RenderDescriptor> RenderDescriptor for FieldType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(reference_type) => reference_type.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for FieldType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            None => Err(Error::new(ErrorKind::UnexpectedEof, "Missing field type")),
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                BaseType::parse_from(source).map(FieldType::Base)
            }
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(c) => {
                let msg = format!("Invalid field type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor<Class> {
    pub parameters: Vec<FieldType<Class>>,
    pub return_type: Option<FieldType<Class>>, // `None` is for `void` (ie. no return)
}

impl<C> MethodDescriptor<C> {
    /// Total length of parameters (not the same as the length of the vector),
    /// which must be 255 or less for it to be valid
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let mut len = if has_this_param { 1 } else { 0 };
        for parameter in &self.parameters {
            len += parameter.width();
        }
        len
    }

    /// Number of stack slots taken by the return value
    pub fn return_length(&self) -> usize {
        self.return_type.as_ref().map_or(0, |ret| ret.width())
    }
}

impl<C: RenderDescriptor> RenderDescriptor for MethodDescriptor<C> {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl<C: ParseDescriptor> ParseDescriptor for MethodDescriptor<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next_if_eq(&'(').is_none() {
            let msg = "Expected '(' for method";
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }

        let mut parameters = vec![];
        loop {
            match source.peek().copied() {
                Some(')') => break,
                None => {
                    let msg = "Expected ')' for method";
                    return Err(Error::new(ErrorKind::UnexpectedEof, msg));
                }
                Some(_) => parameters.push(FieldType::<C>::parse_from(source)?),
            }
        }
        let _ = source.next();

        let return_type = if source.next_if_eq(&'V').is_some() {
            None
        } else {
            Some(FieldType::<C>::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

/// Parsed form used throughout the codec (classes are internal names)
pub type JavaFieldType = FieldType<String>;
pub type JavaMethodDescriptor = MethodDescriptor<String>;

/// End of the field type starting at `pos`, if there is a well formed one
fn field_type_end(bytes: &[u8], mut pos: usize) -> Option<usize> {
    while bytes.get(pos) == Some(&b'[') {
        pos += 1;
    }
    match bytes.get(pos)? {
        b'L' => match bytes[pos..].iter().position(|b| *b == b';')? {
            1 => None,
            semicolon => Some(pos + semicolon + 1),
        },
        b'Z' | b'B' | b'C' | b'S' | b'I' | b'F' | b'J' | b'D' => Some(pos + 1),
        _ => None,
    }
}

/// Slot sizes of a method's arguments and return value, computed straight from the descriptor
///
/// The argument size counts one extra slot for an implicit receiver (callers invoking static
/// methods subtract it). Nothing is allocated, so this is what the analysis uses on every
/// invocation it visits.
pub fn argument_and_return_sizes(descriptor: &str) -> Result<(usize, usize)> {
    let bytes = descriptor.as_bytes();
    let malformed = || {
        let msg = format!("Malformed method descriptor '{}'", descriptor);
        Error::new(ErrorKind::InvalidInput, msg)
    };
    let slots = |start: usize, end: usize| match &bytes[start..end] {
        [b'J' | b'D'] => 2,
        _ => 1,
    };
    if bytes.first() != Some(&b'(') {
        return Err(malformed());
    }

    let mut arguments = 1;
    let mut pos = 1;
    while bytes.get(pos) != Some(&b')') {
        let end = field_type_end(bytes, pos).ok_or_else(malformed)?;
        arguments += slots(pos, end);
        pos = end;
    }

    let start = pos + 1;
    let ret = if &bytes[start..] == b"V" {
        0
    } else {
        match field_type_end(bytes, start) {
            Some(end) if end == bytes.len() => slots(start, end),
            _ => return Err(malformed()),
        }
    };
    Ok((arguments, ret))
}
