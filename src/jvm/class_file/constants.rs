use super::{
    Attribute, AttributeLike, BootstrapMethod, BootstrapMethods, BytecodeReader, ConstValue,
    HandleKind, MethodHandle, Serialize,
};
use crate::jvm::analysis::ClassHierarchy;
use crate::jvm::Error;
use crate::util::{InternTable, Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::hash::{Hash, Hasher};

pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELD_REF: u8 = 9;
pub const CONSTANT_METHOD_REF: u8 = 10;
pub const CONSTANT_INTERFACE_METHOD_REF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub const CONSTANT_METHOD_HANDLE: u8 = 15;
pub const CONSTANT_METHOD_TYPE: u8 = 16;
pub const CONSTANT_DYNAMIC: u8 = 17;
pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
pub const CONSTANT_MODULE: u8 = 19;
pub const CONSTANT_PACKAGE: u8 = 20;

/// Class file constants pool
///
/// The pool is append only: an index, once handed out, keeps referring to the same record.
/// Records are deduplicated by content, so asking for the same constant twice returns the same
/// index. Besides the constants that end up in the class file, the pool also carries:
///
///   - the bootstrap methods table (since `Dynamic` and `InvokeDynamic` records refer to it)
///   - a type table used while computing stack map frames, which is never serialized
///
pub struct ConstantPool {
    constants: OffsetVec<Constant>,
    lookup: InternTable<Constant, ConstantIndex>,

    bootstrap_methods: Vec<BootstrapMethod>,
    bootstrap_lookup: InternTable<BootstrapMethod, u16>,

    types: Vec<TypeEntry>,
    type_lookup: InternTable<TypeEntry, u32>,
    merged_types: InternTable<(u32, u32), u32>,
}

/// Entry in the type table used by frame computation
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeEntry {
    /// Reference type, given by internal name (or array descriptor)
    Normal(String),

    /// Result of a `new` instruction at `offset`, before its constructor has run
    Uninitialized { name: String, offset: usize },
}

impl TypeEntry {
    /// Name of the type (once initialized, for uninitialized entries)
    pub fn name(&self) -> &str {
        match self {
            TypeEntry::Normal(name) => name,
            TypeEntry::Uninitialized { name, .. } => name,
        }
    }
}

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            lookup: InternTable::new(),
            bootstrap_methods: vec![],
            bootstrap_lookup: InternTable::new(),
            types: vec![],
            type_lookup: InternTable::new(),
            merged_types: InternTable::new(),
        }
    }

    /// Rebuild the constant pool (and bootstrap methods table) of an existing class
    ///
    /// Every record keeps its original index, so code and attributes copied verbatim from the
    /// source remain valid. Copied records take part in deduplication, so constants added
    /// afterwards reuse them.
    pub fn copy_from(
        source: &BytecodeReader,
        bootstrap_methods_offset: Option<usize>,
    ) -> Result<ConstantPool, Error> {
        let mut pool = ConstantPool::new();

        if let Some(mut offset) = bootstrap_methods_offset {
            let count = source.u16_at(offset)?;
            offset += 2;
            for _ in 0..count {
                let handle = ConstantIndex(source.u16_at(offset)?);
                let argument_count = source.u16_at(offset + 2)?;
                offset += 4;
                let mut arguments = Vec::with_capacity(argument_count as usize);
                for _ in 0..argument_count {
                    arguments.push(ConstantIndex(source.u16_at(offset)?));
                    offset += 2;
                }
                pool.push_bootstrap_method(BootstrapMethod {
                    bootstrap_method: handle,
                    bootstrap_arguments: arguments,
                });
            }
        }

        let mut index: u16 = 1;
        while index < source.item_count() {
            let constant = pool.copy_item(source, index)?;
            index += constant.width() as u16;
            let copied_at = pool.push_constant(constant.clone())?;
            pool.lookup.insert(constant, copied_at);
        }

        log::trace!(
            "Copied {} constants and {} bootstrap methods",
            pool.constants.len(),
            pool.bootstrap_methods.len()
        );
        Ok(pool)
    }

    fn copy_item(&self, source: &BytecodeReader, index: u16) -> Result<Constant, Error> {
        let offset = source.item_offset(index)?;
        let u16_at = |delta: usize| source.u16_at(offset + delta);
        let constant = match source.u8_at(offset)? {
            CONSTANT_UTF8 => Constant::Utf8(source.read_utf8(index)?),
            CONSTANT_INTEGER => Constant::Integer(source.i32_at(offset + 1)?),
            CONSTANT_FLOAT => Constant::Float(f32::from_bits(source.i32_at(offset + 1)? as u32)),
            CONSTANT_LONG => Constant::Long(source.i64_at(offset + 1)?),
            CONSTANT_DOUBLE => Constant::Double(f64::from_bits(source.i64_at(offset + 1)? as u64)),
            CONSTANT_CLASS => Constant::Class(Utf8ConstantIndex(ConstantIndex(u16_at(1)?))),
            CONSTANT_STRING => Constant::String(Utf8ConstantIndex(ConstantIndex(u16_at(1)?))),
            CONSTANT_MODULE => Constant::Module(Utf8ConstantIndex(ConstantIndex(u16_at(1)?))),
            CONSTANT_PACKAGE => Constant::Package(Utf8ConstantIndex(ConstantIndex(u16_at(1)?))),
            CONSTANT_METHOD_TYPE => Constant::MethodType {
                descriptor: Utf8ConstantIndex(ConstantIndex(u16_at(1)?)),
            },
            CONSTANT_FIELD_REF => Constant::FieldRef(
                ClassConstantIndex(ConstantIndex(u16_at(1)?)),
                NameAndTypeConstantIndex(ConstantIndex(u16_at(3)?)),
            ),
            tag @ (CONSTANT_METHOD_REF | CONSTANT_INTERFACE_METHOD_REF) => Constant::MethodRef {
                class: ClassConstantIndex(ConstantIndex(u16_at(1)?)),
                name_and_type: NameAndTypeConstantIndex(ConstantIndex(u16_at(3)?)),
                is_interface: tag == CONSTANT_INTERFACE_METHOD_REF,
            },
            CONSTANT_NAME_AND_TYPE => Constant::NameAndType {
                name: Utf8ConstantIndex(ConstantIndex(u16_at(1)?)),
                descriptor: Utf8ConstantIndex(ConstantIndex(u16_at(3)?)),
            },
            CONSTANT_METHOD_HANDLE => {
                let kind = source.u8_at(offset + 1)?;
                Constant::MethodHandle {
                    handle_kind: HandleKind::from_tag(kind).ok_or(Error::UnexpectedConstant {
                        index,
                        expected: "method handle",
                    })?,
                    member: ConstantIndex(u16_at(2)?),
                }
            }
            tag @ (CONSTANT_DYNAMIC | CONSTANT_INVOKE_DYNAMIC) => {
                let bootstrap_method = u16_at(1)?;
                if bootstrap_method as usize >= self.bootstrap_methods.len() {
                    return Err(Error::MissingBootstrapMethod(bootstrap_method));
                }
                let name_and_type = NameAndTypeConstantIndex(ConstantIndex(u16_at(3)?));
                if tag == CONSTANT_DYNAMIC {
                    Constant::Dynamic {
                        bootstrap_method,
                        name_and_type,
                    }
                } else {
                    Constant::InvokeDynamic {
                        bootstrap_method,
                        name_and_type,
                    }
                }
            }
            tag => return Err(Error::InvalidConstantTag { tag, offset }),
        };
        Ok(constant)
    }

    /// Value of `constant_pool_count` (one more than the largest index)
    pub fn count(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    /// Look up the record at an index
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get_offset(Offset(index.0 as usize))
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow { constant, offset });
        }
        self.constants.push(constant);
        Ok(ConstantIndex(offset as u16))
    }

    /// Get or insert a constant
    pub fn intern(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        if let Some(idx) = self.lookup.get(&constant) {
            return Ok(idx);
        }
        let idx = self.push_constant(constant.clone())?;
        self.lookup.insert(constant, idx);
        Ok(idx)
    }

    pub fn utf8(&mut self, utf8: &str) -> Result<Utf8ConstantIndex, Error> {
        self.intern(Constant::Utf8(utf8.to_owned()))
            .map(Utf8ConstantIndex)
    }

    /// Class reference, from an internal name or an array descriptor
    pub fn class(&mut self, name: &str) -> Result<ClassConstantIndex, Error> {
        let name = self.utf8(name)?;
        self.intern(Constant::Class(name)).map(ClassConstantIndex)
    }

    pub fn string(&mut self, string: &str) -> Result<StringConstantIndex, Error> {
        let utf8 = self.utf8(string)?;
        self.intern(Constant::String(utf8))
            .map(StringConstantIndex)
    }

    pub fn integer(&mut self, value: i32) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Float(value))
    }

    pub fn long(&mut self, value: i64) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Long(value))
    }

    pub fn double(&mut self, value: f64) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Double(value))
    }

    pub fn name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
            .map(NameAndTypeConstantIndex)
    }

    pub fn field_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, Error> {
        let class = self.class(owner)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.intern(Constant::FieldRef(class, name_and_type))
            .map(FieldRefConstantIndex)
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class = self.class(owner)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.intern(Constant::MethodRef {
            class,
            name_and_type,
            is_interface,
        })
        .map(MethodRefConstantIndex)
    }

    pub fn method_handle(&mut self, handle: &MethodHandle) -> Result<ConstantIndex, Error> {
        let member = if handle.kind.is_field() {
            self.field_ref(&handle.owner, &handle.name, &handle.descriptor)?
                .into()
        } else {
            self.method_ref(
                &handle.owner,
                &handle.name,
                &handle.descriptor,
                handle.interface,
            )?
            .into()
        };
        self.intern(Constant::MethodHandle {
            handle_kind: handle.kind,
            member,
        })
    }

    pub fn method_type(&mut self, descriptor: &str) -> Result<ConstantIndex, Error> {
        let descriptor = self.utf8(descriptor)?;
        self.intern(Constant::MethodType { descriptor })
    }

    pub fn module(&mut self, name: &str) -> Result<ConstantIndex, Error> {
        let name = self.utf8(name)?;
        self.intern(Constant::Module(name))
    }

    pub fn package(&mut self, name: &str) -> Result<ConstantIndex, Error> {
        let name = self.utf8(name)?;
        self.intern(Constant::Package(name))
    }

    /// Get or insert an entry in the bootstrap methods table
    pub fn bootstrap_method(
        &mut self,
        handle: &MethodHandle,
        arguments: &[ConstValue],
    ) -> Result<u16, Error> {
        let bootstrap_method = self.method_handle(handle)?;
        let mut bootstrap_arguments = Vec::with_capacity(arguments.len());
        for argument in arguments {
            bootstrap_arguments.push(self.constant(argument)?);
        }
        Ok(self.push_bootstrap_method(BootstrapMethod {
            bootstrap_method,
            bootstrap_arguments,
        }))
    }

    fn push_bootstrap_method(&mut self, entry: BootstrapMethod) -> u16 {
        let next_index = self.bootstrap_methods.len() as u16;
        let index = self.bootstrap_lookup.insert(entry.clone(), next_index);
        if index == next_index {
            self.bootstrap_methods.push(entry);
        }
        index
    }

    pub fn dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: u16,
    ) -> Result<ConstantIndex, Error> {
        self.check_bootstrap_method(bootstrap_method)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.intern(Constant::Dynamic {
            bootstrap_method,
            name_and_type,
        })
    }

    pub fn invoke_dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: u16,
    ) -> Result<InvokeDynamicConstantIndex, Error> {
        self.check_bootstrap_method(bootstrap_method)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.intern(Constant::InvokeDynamic {
            bootstrap_method,
            name_and_type,
        })
        .map(InvokeDynamicConstantIndex)
    }

    fn check_bootstrap_method(&self, bootstrap_method: u16) -> Result<(), Error> {
        if (bootstrap_method as usize) < self.bootstrap_methods.len() {
            Ok(())
        } else {
            Err(Error::MissingBootstrapMethod(bootstrap_method))
        }
    }

    /// Get or insert any loadable constant
    pub fn constant(&mut self, value: &ConstValue) -> Result<ConstantIndex, Error> {
        match value {
            ConstValue::Integer(integer) => self.integer(*integer),
            ConstValue::Float(float) => self.float(*float),
            ConstValue::Long(long) => self.long(*long),
            ConstValue::Double(double) => self.double(*double),
            ConstValue::String(string) => self.string(string).map(Into::into),
            ConstValue::Type(name) => self.class(name).map(Into::into),
            ConstValue::MethodType(descriptor) => self.method_type(descriptor),
            ConstValue::MethodHandle(handle) => self.method_handle(handle),
            ConstValue::Dynamic(dynamic) => {
                let bootstrap_method = self
                    .bootstrap_method(&dynamic.bootstrap_method, &dynamic.bootstrap_arguments)?;
                self.dynamic(&dynamic.name, &dynamic.descriptor, bootstrap_method)
            }
        }
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info).map_err(Error::IoError)?;

        Ok(Attribute { name_index, info })
    }

    /// `BootstrapMethods` attribute, if any bootstrap method was registered
    pub fn bootstrap_methods_attribute(&mut self) -> Result<Option<Attribute>, Error> {
        if self.bootstrap_methods.is_empty() {
            return Ok(None);
        }
        let table = BootstrapMethods(self.bootstrap_methods.clone());
        self.get_attribute(table).map(Some)
    }

    /// Get or insert a reference type in the type table
    pub fn normal_type(&mut self, name: &str) -> u32 {
        self.push_type(TypeEntry::Normal(name.to_owned()))
    }

    /// Get or insert the type pushed by the `new` instruction at `offset`
    pub fn uninitialized_type(&mut self, name: &str, offset: usize) -> u32 {
        self.push_type(TypeEntry::Uninitialized {
            name: name.to_owned(),
            offset,
        })
    }

    fn push_type(&mut self, entry: TypeEntry) -> u32 {
        let next_index = self.types.len() as u32;
        let index = self.type_lookup.insert(entry.clone(), next_index);
        if index == next_index {
            self.types.push(entry);
        }
        index
    }

    pub fn type_entry(&self, index: u32) -> Result<&TypeEntry, Error> {
        self.types
            .get(index as usize)
            .ok_or(Error::InvalidTypeIndex(index))
    }

    /// Type table index of the common super class of two reference types
    ///
    /// Results are memoized per unordered pair. When the hierarchy cannot tell, the answer is
    /// `java/lang/Object`.
    pub fn merged_type(
        &mut self,
        type1: u32,
        type2: u32,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<u32, Error> {
        let key = (type1.min(type2), type1.max(type2));
        if let Some(merged) = self.merged_types.get(&key) {
            return Ok(merged);
        }
        let common = {
            let name1 = self.type_entry(type1)?.name();
            let name2 = self.type_entry(type2)?.name();
            hierarchy
                .common_super_class(name1, name2)
                .unwrap_or_else(|| String::from("java/lang/Object"))
        };
        let merged = self.normal_type(&common);
        self.merged_types.insert(key, merged);
        Ok(merged)
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

/// `constant_pool_count` followed by every record
impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.count().serialize(writer)?;
        for (_, _, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Constants as in the constant pool
///
/// Composite records refer to their parts by index. Since the parts are deduplicated first,
/// comparing indices is the same as comparing contents.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),
    Package(Utf8ConstantIndex),
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => CONSTANT_UTF8,
            Constant::Integer(_) => CONSTANT_INTEGER,
            Constant::Float(_) => CONSTANT_FLOAT,
            Constant::Long(_) => CONSTANT_LONG,
            Constant::Double(_) => CONSTANT_DOUBLE,
            Constant::Class(_) => CONSTANT_CLASS,
            Constant::String(_) => CONSTANT_STRING,
            Constant::FieldRef(_, _) => CONSTANT_FIELD_REF,
            Constant::MethodRef {
                is_interface: false,
                ..
            } => CONSTANT_METHOD_REF,
            Constant::MethodRef {
                is_interface: true, ..
            } => CONSTANT_INTERFACE_METHOD_REF,
            Constant::NameAndType { .. } => CONSTANT_NAME_AND_TYPE,
            Constant::MethodHandle { .. } => CONSTANT_METHOD_HANDLE,
            Constant::MethodType { .. } => CONSTANT_METHOD_TYPE,
            Constant::Dynamic { .. } => CONSTANT_DYNAMIC,
            Constant::InvokeDynamic { .. } => CONSTANT_INVOKE_DYNAMIC,
            Constant::Module(_) => CONSTANT_MODULE,
            Constant::Package(_) => CONSTANT_PACKAGE,
        }
    }
}

/// Literals compare by bit pattern: `0.0` and `-0.0` are different constants
impl PartialEq for Constant {
    fn eq(&self, other: &Constant) -> bool {
        use Constant::*;
        match (self, other) {
            (Utf8(a), Utf8(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Class(a), Class(b))
            | (String(a), String(b))
            | (Module(a), Module(b))
            | (Package(a), Package(b))
            | (MethodType { descriptor: a }, MethodType { descriptor: b }) => a == b,
            (FieldRef(c1, nt1), FieldRef(c2, nt2)) => c1 == c2 && nt1 == nt2,
            (
                MethodRef {
                    class: c1,
                    name_and_type: nt1,
                    is_interface: i1,
                },
                MethodRef {
                    class: c2,
                    name_and_type: nt2,
                    is_interface: i2,
                },
            ) => c1 == c2 && nt1 == nt2 && i1 == i2,
            (
                NameAndType {
                    name: n1,
                    descriptor: d1,
                },
                NameAndType {
                    name: n2,
                    descriptor: d2,
                },
            ) => n1 == n2 && d1 == d2,
            (
                MethodHandle {
                    handle_kind: k1,
                    member: m1,
                },
                MethodHandle {
                    handle_kind: k2,
                    member: m2,
                },
            ) => k1 == k2 && m1 == m2,
            (
                Dynamic {
                    bootstrap_method: b1,
                    name_and_type: nt1,
                },
                Dynamic {
                    bootstrap_method: b2,
                    name_and_type: nt2,
                },
            )
            | (
                InvokeDynamic {
                    bootstrap_method: b1,
                    name_and_type: nt1,
                },
                InvokeDynamic {
                    bootstrap_method: b2,
                    name_and_type: nt2,
                },
            ) => b1 == b2 && nt1 == nt2,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            Constant::Utf8(string) => string.hash(state),
            Constant::Integer(integer) => integer.hash(state),
            Constant::Float(float) => float.to_bits().hash(state),
            Constant::Long(long) => long.hash(state),
            Constant::Double(double) => double.to_bits().hash(state),
            Constant::Class(utf8)
            | Constant::String(utf8)
            | Constant::Module(utf8)
            | Constant::Package(utf8)
            | Constant::MethodType { descriptor: utf8 } => utf8.hash(state),
            Constant::FieldRef(class, name_and_type)
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.hash(state);
                name_and_type.hash(state);
            }
            Constant::NameAndType { name, descriptor } => {
                name.hash(state);
                descriptor.hash(state);
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                handle_kind.hash(state);
                member.hash(state);
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                bootstrap_method.hash(state);
                name_and_type.hash(state);
            }
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.tag().serialize(writer)?;
        match self {
            Constant::Utf8(string) => {
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => integer.serialize(writer)?,
            Constant::Float(float) => float.serialize(writer)?,
            Constant::Long(long) => long.serialize(writer)?,
            Constant::Double(double) => double.serialize(writer)?,
            Constant::Class(name)
            | Constant::String(name)
            | Constant::Module(name)
            | Constant::Package(name)
            | Constant::MethodType { descriptor: name } => name.serialize(writer)?,
            Constant::FieldRef(class, name_and_type)
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. From
/// JVMS 4.4.5:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x1F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Bytes are first decoded into UTF-16 code units, then surrogate pairs are joined. A lone
/// surrogate (legal in Java strings, not in Rust ones) becomes `U+FFFD`. On a malformed byte
/// sequence, the error holds the position of the offending byte.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, usize> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let b0 = bytes[pos] as u16;
        let continuation = |at: usize| -> Result<u16, usize> {
            match bytes.get(at) {
                Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u16),
                _ => Err(at),
            }
        };
        if b0 < 0x80 {
            units.push(b0);
            pos += 1;
        } else if b0 & 0b1110_0000 == 0b1100_0000 {
            units.push((b0 & 0x1F) << 6 | continuation(pos + 1)?);
            pos += 2;
        } else if b0 & 0b1111_0000 == 0b1110_0000 {
            units.push((b0 & 0x0F) << 12 | continuation(pos + 1)? << 6 | continuation(pos + 2)?);
            pos += 3;
        } else {
            return Err(pos);
        }
    }
    Ok(std::char::decode_utf16(units)
        .map(|c| c.unwrap_or(std::char::REPLACEMENT_CHARACTER))
        .collect())
}

macro_rules! typed_index {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
        pub struct $name(pub ConstantIndex);

        impl From<$name> for ConstantIndex {
            fn from(index: $name) -> ConstantIndex {
                index.0
            }
        }

        impl Serialize for $name {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }
    };
}

/// Index into the constant pool
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

typed_index!(
    /// Index of a `CONSTANT_Utf8_info`
    Utf8ConstantIndex
);
typed_index!(StringConstantIndex);
typed_index!(NameAndTypeConstantIndex);
typed_index!(
    /// Index of a `CONSTANT_Class_info`
    ClassConstantIndex
);
typed_index!(FieldRefConstantIndex);
typed_index!(
    /// Index of a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
    MethodRefConstantIndex
);
typed_index!(InvokeDynamicConstantIndex);

#[cfg(test)]
mod encode_modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(
            encode_modified_utf8("hel10_World"),
            vec![104, 101, 108, 49, 48, 95, 87, 111, 114, 108, 100]
        );
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(
            encode_modified_utf8("ĄǍǞǠǺȀȂȦȺӐӒ"),
            vec![
                196, 132, 199, 141, 199, 158, 199, 160, 199, 186, 200, 128, 200, 130, 200, 166,
                200, 186, 211, 144, 211, 146
            ]
        );
    }

    #[test]
    fn supplementary_characters() {
        assert_eq!(
            encode_modified_utf8("\u{10000}\u{dffff}\u{10FFFF}"),
            vec![
                237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237,
                191, 191
            ]
        );
    }

    #[test]
    fn decoding_inverts_encoding() {
        for string in ["", "foo", "a\x00a", "ऄअॲঅਅ", "\u{10000}x\u{10FFFF}"] {
            let encoded = encode_modified_utf8(string);
            assert_eq!(decode_modified_utf8(&encoded).as_deref(), Ok(string));
        }
    }

    #[test]
    fn truncated_sequences_are_rejected() {
        assert_eq!(decode_modified_utf8(&[97, 0xE0, 0x80]), Err(3));
        assert_eq!(decode_modified_utf8(&[0xFF]), Err(0));
        assert_eq!(decode_modified_utf8(&[0xC0, 0x41]), Err(1));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::analysis::{MapHierarchy, ObjectHierarchy};

    #[test]
    fn interning_is_idempotent() {
        let mut pool = ConstantPool::new();
        let first = pool.method_ref("java/lang/Object", "<init>", "()V", false).unwrap();
        let count = pool.count();
        let second = pool.method_ref("java/lang/Object", "<init>", "()V", false).unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.count(), count);

        // utf8, class, utf8 x2, name and type, method ref
        assert_eq!(count, 7);
        let interface = pool.method_ref("java/lang/Object", "<init>", "()V", true).unwrap();
        assert_ne!(first, interface);
    }

    #[test]
    fn literals_are_bit_exact() {
        let mut pool = ConstantPool::new();
        let positive = pool.double(0.0).unwrap();
        let negative = pool.double(-0.0).unwrap();
        assert_ne!(positive, negative);
        assert_eq!(pool.double(0.0).unwrap(), positive);

        let nan1 = pool.float(f32::from_bits(0x7FC0_0000)).unwrap();
        let nan2 = pool.float(f32::from_bits(0x7FC0_0001)).unwrap();
        assert_ne!(nan1, nan2);
        assert_eq!(pool.float(f32::from_bits(0x7FC0_0001)).unwrap(), nan2);
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.long(1).unwrap(), ConstantIndex(1));
        assert_eq!(pool.integer(1).unwrap(), ConstantIndex(3));
        assert_eq!(pool.double(1.0).unwrap(), ConstantIndex(4));
        assert_eq!(pool.count(), 6);
        assert!(pool.get(ConstantIndex(2)).is_none());
        assert!(matches!(pool.get(ConstantIndex(3)), Some(Constant::Integer(1))));
    }

    #[test]
    fn serialized_records() {
        let mut pool = ConstantPool::new();
        pool.string("hi").unwrap();
        pool.long(-1).unwrap();
        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        assert_eq!(
            bytes,
            vec![
                0, 5, // count
                1, 0, 2, b'h', b'i', // utf8
                8, 0, 1, // string
                5, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // long
            ]
        );
    }

    #[test]
    fn bootstrap_methods_are_deduplicated() {
        let mut pool = ConstantPool::new();
        let handle = MethodHandle {
            kind: HandleKind::InvokeStatic,
            owner: String::from("java/lang/invoke/LambdaMetafactory"),
            name: String::from("metafactory"),
            descriptor: String::from("()Ljava/lang/invoke/CallSite;"),
            interface: false,
        };
        let args = vec![ConstValue::MethodType(String::from("()V"))];
        let first = pool.bootstrap_method(&handle, &args).unwrap();
        let second = pool.bootstrap_method(&handle, &args).unwrap();
        let third = pool.bootstrap_method(&handle, &[]).unwrap();
        assert_eq!((first, second, third), (0, 0, 1));

        assert!(pool.invoke_dynamic("run", "()Ljava/lang/Runnable;", 1).is_ok());
        assert!(matches!(
            pool.invoke_dynamic("run", "()Ljava/lang/Runnable;", 2),
            Err(Error::MissingBootstrapMethod(2))
        ));
        assert!(pool.bootstrap_methods_attribute().unwrap().is_some());
    }

    #[test]
    fn type_table() {
        let mut pool = ConstantPool::new();
        let string = pool.normal_type("java/lang/String");
        let integer = pool.normal_type("java/lang/Integer");
        assert_eq!(pool.normal_type("java/lang/String"), string);
        let fresh = pool.uninitialized_type("java/lang/String", 4);
        assert_ne!(fresh, string);
        assert_eq!(pool.type_entry(fresh).unwrap().name(), "java/lang/String");

        let merged = pool.merged_type(string, integer, &ObjectHierarchy).unwrap();
        assert_eq!(pool.type_entry(merged).unwrap().name(), "java/lang/Object");

        let mut hierarchy = MapHierarchy::new();
        hierarchy.add("java/lang/Integer", "java/lang/Number");
        hierarchy.add("java/lang/Long", "java/lang/Number");
        hierarchy.add("java/lang/Number", "java/lang/Object");
        let long = pool.normal_type("java/lang/Long");
        let merged = pool.merged_type(long, integer, &hierarchy).unwrap();
        assert_eq!(pool.type_entry(merged).unwrap().name(), "java/lang/Number");
        assert!(pool.type_entry(1000).is_err());
    }
}
