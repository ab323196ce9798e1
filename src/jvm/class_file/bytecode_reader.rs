use super::constants::*;
use super::{decode_modified_utf8, ConstValue, ConstantDynamic, HandleKind, MemberRef, MethodHandle, MAGIC};
use crate::jvm::Error;
use byteorder::{BigEndian, ByteOrder};
use std::cell::RefCell;

/// Bounds-checked view over the bytes of a class file
///
/// On construction, the constant pool is scanned once to record where each record starts. After
/// that, pool entries can be looked up by index in constant time and strings are decoded (and
/// cached) on first use. Every read is checked: running off the end of the input is
/// `Error::UnexpectedEof`, never a panic.
///
/// Besides random access reads at an absolute offset, the reader has a cursor for sequential
/// decoding.
pub struct BytecodeReader<'a> {
    bytes: &'a [u8],
    position: usize,

    /// Offset of each constant pool record's tag, by index (0 for the unusable slots)
    item_offsets: Vec<usize>,

    /// Offset right after the constant pool (where `access_flags` start)
    header: usize,

    /// Offset of the class attributes count
    class_attributes: usize,

    /// Offset of each entry of the `BootstrapMethods` attribute
    bootstrap_method_offsets: Vec<usize>,

    /// Payload offset of the `BootstrapMethods` attribute
    bootstrap_methods_attribute: Option<usize>,

    strings: RefCell<Vec<Option<String>>>,
}

impl<'a> BytecodeReader<'a> {
    /// Check the magic number, then index the constant pool and the bootstrap methods
    pub fn new(bytes: &'a [u8]) -> Result<BytecodeReader<'a>, Error> {
        let mut reader = BytecodeReader {
            bytes,
            position: 0,
            item_offsets: vec![],
            header: 0,
            class_attributes: 0,
            bootstrap_method_offsets: vec![],
            bootstrap_methods_attribute: None,
            strings: RefCell::new(vec![]),
        };

        let magic = reader.u32_at(0)?;
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let count = reader.u16_at(8)? as usize;
        let mut item_offsets = vec![0; count.max(1)];
        let mut index = 1;
        let mut offset = 10;
        while index < count {
            item_offsets[index] = offset;
            let (size, width) = match reader.u8_at(offset)? {
                CONSTANT_UTF8 => (3 + reader.u16_at(offset + 1)? as usize, 1),
                CONSTANT_INTEGER
                | CONSTANT_FLOAT
                | CONSTANT_FIELD_REF
                | CONSTANT_METHOD_REF
                | CONSTANT_INTERFACE_METHOD_REF
                | CONSTANT_NAME_AND_TYPE
                | CONSTANT_DYNAMIC
                | CONSTANT_INVOKE_DYNAMIC => (5, 1),
                CONSTANT_LONG | CONSTANT_DOUBLE => (9, 2),
                CONSTANT_METHOD_HANDLE => (4, 1),
                CONSTANT_CLASS
                | CONSTANT_STRING
                | CONSTANT_METHOD_TYPE
                | CONSTANT_MODULE
                | CONSTANT_PACKAGE => (3, 1),
                tag => return Err(Error::InvalidConstantTag { tag, offset }),
            };
            offset += size;
            index += width;
        }
        reader.item_offsets = item_offsets;
        reader.strings = RefCell::new(vec![None; count.max(1)]);
        reader.header = offset;
        reader.class_attributes = reader.find_class_attributes()?;
        reader.index_bootstrap_methods()?;

        log::trace!(
            "Indexed {} constant pool slots, header at {}, {} bootstrap methods",
            count,
            reader.header,
            reader.bootstrap_method_offsets.len()
        );
        Ok(reader)
    }

    /// Skip `access_flags`, `this_class`, `super_class`, interfaces, fields, and methods
    fn find_class_attributes(&self) -> Result<usize, Error> {
        let interfaces = self.u16_at(self.header + 6)? as usize;
        let mut offset = self.header + 8 + 2 * interfaces;
        for _ in 0..2 {
            let members = self.u16_at(offset)?;
            offset += 2;
            for _ in 0..members {
                offset = self.skip_attributes(offset + 6)?;
            }
        }
        Ok(offset)
    }

    /// Offset right after the attributes table starting at `offset`
    pub fn skip_attributes(&self, offset: usize) -> Result<usize, Error> {
        let count = self.u16_at(offset)?;
        let mut offset = offset + 2;
        for _ in 0..count {
            offset += 6 + self.u32_at(offset + 2)? as usize;
        }
        Ok(offset)
    }

    fn index_bootstrap_methods(&mut self) -> Result<(), Error> {
        let mut offset = self.class_attributes + 2;
        for _ in 0..self.u16_at(self.class_attributes)? {
            let length = self.u32_at(offset + 2)? as usize;
            if self.utf8_at(offset)? == "BootstrapMethods" {
                let payload = offset + 6;
                let mut entry = payload + 2;
                for _ in 0..self.u16_at(payload)? {
                    self.bootstrap_method_offsets.push(entry);
                    entry += 4 + 2 * self.u16_at(entry + 2)? as usize;
                }
                self.bootstrap_methods_attribute = Some(payload);
            }
            offset += 6 + length;
        }
        Ok(())
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Value of `constant_pool_count` (one more than the largest index)
    pub fn item_count(&self) -> u16 {
        self.item_offsets.len() as u16
    }

    /// Offset right after the constant pool
    pub fn header(&self) -> usize {
        self.header
    }

    /// Offset of the class level `attributes_count`
    pub fn class_attributes(&self) -> usize {
        self.class_attributes
    }

    /// Payload offset of the `BootstrapMethods` attribute, if there is one
    pub fn bootstrap_methods_attribute(&self) -> Option<usize> {
        self.bootstrap_methods_attribute
    }

    /// Offset of the tag of the constant pool record at `index`
    pub fn item_offset(&self, index: u16) -> Result<usize, Error> {
        match self.item_offsets.get(index as usize) {
            Some(offset) if *offset != 0 => Ok(*offset),
            _ => Err(Error::InvalidConstantIndex(index)),
        }
    }

    fn slice(&self, offset: usize, needed: usize) -> Result<&'a [u8], Error> {
        offset
            .checked_add(needed)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(Error::UnexpectedEof { offset, needed })
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8, Error> {
        self.slice(offset, 1).map(|bytes| bytes[0])
    }

    pub fn i8_at(&self, offset: usize) -> Result<i8, Error> {
        self.u8_at(offset).map(|byte| byte as i8)
    }

    pub fn u16_at(&self, offset: usize) -> Result<u16, Error> {
        self.slice(offset, 2).map(BigEndian::read_u16)
    }

    pub fn i16_at(&self, offset: usize) -> Result<i16, Error> {
        self.slice(offset, 2).map(BigEndian::read_i16)
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32, Error> {
        self.slice(offset, 4).map(BigEndian::read_u32)
    }

    pub fn i32_at(&self, offset: usize) -> Result<i32, Error> {
        self.slice(offset, 4).map(BigEndian::read_i32)
    }

    pub fn i64_at(&self, offset: usize) -> Result<i64, Error> {
        self.slice(offset, 8).map(BigEndian::read_i64)
    }

    pub fn f32_at(&self, offset: usize) -> Result<f32, Error> {
        self.slice(offset, 4).map(BigEndian::read_f32)
    }

    pub fn f64_at(&self, offset: usize) -> Result<f64, Error> {
        self.slice(offset, 8).map(BigEndian::read_f64)
    }

    pub fn bytes_at(&self, offset: usize, length: usize) -> Result<&'a [u8], Error> {
        self.slice(offset, length)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub fn skip(&mut self, count: usize) {
        self.position += count;
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let value = self.u8_at(self.position)?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let value = self.u16_at(self.position)?;
        self.position += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let value = self.u32_at(self.position)?;
        self.position += 4;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        let value = self.i32_at(self.position)?;
        self.position += 4;
        Ok(value)
    }

    /// Decode (or fetch from cache) the `Utf8` record at `index`
    pub fn read_utf8(&self, index: u16) -> Result<String, Error> {
        if let Some(Some(cached)) = self.strings.borrow().get(index as usize) {
            return Ok(cached.clone());
        }
        let offset = self.expect_tag(index, CONSTANT_UTF8, "utf8")?;
        let length = self.u16_at(offset + 1)? as usize;
        let start = offset + 3;
        let string = decode_modified_utf8(self.slice(start, length)?)
            .map_err(|at| Error::MalformedUtf8 { offset: start + at })?;
        if let Some(slot) = self.strings.borrow_mut().get_mut(index as usize) {
            *slot = Some(string.clone());
        }
        Ok(string)
    }

    /// `Utf8` record whose index is stored at `offset`
    pub fn utf8_at(&self, offset: usize) -> Result<String, Error> {
        self.read_utf8(self.u16_at(offset)?)
    }

    /// Internal name of the `Class` record at `index`
    pub fn read_class(&self, index: u16) -> Result<String, Error> {
        let offset = self.expect_tag(index, CONSTANT_CLASS, "class")?;
        self.utf8_at(offset + 1)
    }

    /// `Class` record whose index is stored at `offset`, where index 0 means "none"
    pub fn class_at(&self, offset: usize) -> Result<Option<String>, Error> {
        match self.u16_at(offset)? {
            0 => Ok(None),
            index => self.read_class(index).map(Some),
        }
    }

    /// Name and descriptor of a `NameAndType` record
    pub fn read_name_and_type(&self, index: u16) -> Result<(String, String), Error> {
        let offset = self.expect_tag(index, CONSTANT_NAME_AND_TYPE, "name and type")?;
        Ok((self.utf8_at(offset + 1)?, self.utf8_at(offset + 3)?))
    }

    /// Field, method, or interface method reference
    pub fn read_member_ref(&self, index: u16) -> Result<MemberRef, Error> {
        let offset = self.item_offset(index)?;
        let interface = match self.u8_at(offset)? {
            CONSTANT_FIELD_REF | CONSTANT_METHOD_REF => false,
            CONSTANT_INTERFACE_METHOD_REF => true,
            _ => {
                return Err(Error::UnexpectedConstant {
                    index,
                    expected: "member reference",
                })
            }
        };
        let owner = self.read_class(self.u16_at(offset + 1)?)?;
        let (name, descriptor) = self.read_name_and_type(self.u16_at(offset + 3)?)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
            interface,
        })
    }

    pub fn read_method_handle(&self, index: u16) -> Result<MethodHandle, Error> {
        let offset = self.expect_tag(index, CONSTANT_METHOD_HANDLE, "method handle")?;
        let kind = HandleKind::from_tag(self.u8_at(offset + 1)?).ok_or(
            Error::UnexpectedConstant {
                index,
                expected: "method handle",
            },
        )?;
        let member = self.read_member_ref(self.u16_at(offset + 2)?)?;
        Ok(MethodHandle {
            kind,
            owner: member.owner,
            name: member.name,
            descriptor: member.descriptor,
            interface: member.interface,
        })
    }

    /// Bootstrap method handle and arguments of an entry in the `BootstrapMethods` attribute
    pub fn read_bootstrap_method(
        &self,
        bootstrap_method: u16,
    ) -> Result<(MethodHandle, Vec<ConstValue>), Error> {
        let offset = *self
            .bootstrap_method_offsets
            .get(bootstrap_method as usize)
            .ok_or(Error::MissingBootstrapMethod(bootstrap_method))?;
        let handle = self.read_method_handle(self.u16_at(offset)?)?;
        let count = self.u16_at(offset + 2)? as usize;
        let mut arguments = Vec::with_capacity(count);
        for i in 0..count {
            arguments.push(self.read_const(self.u16_at(offset + 4 + 2 * i)?)?);
        }
        Ok((handle, arguments))
    }

    /// Name, descriptor, and bootstrap method entry of an `InvokeDynamic` record
    pub fn read_invoke_dynamic(&self, index: u16) -> Result<(String, String, u16), Error> {
        let offset = self.expect_tag(index, CONSTANT_INVOKE_DYNAMIC, "invokedynamic")?;
        let bootstrap_method = self.u16_at(offset + 1)?;
        let (name, descriptor) = self.read_name_and_type(self.u16_at(offset + 3)?)?;
        Ok((name, descriptor, bootstrap_method))
    }

    /// Any constant that can be loaded with `ldc` or passed as a bootstrap argument
    pub fn read_const(&self, index: u16) -> Result<ConstValue, Error> {
        let offset = self.item_offset(index)?;
        let value = match self.u8_at(offset)? {
            CONSTANT_INTEGER => ConstValue::Integer(self.i32_at(offset + 1)?),
            CONSTANT_FLOAT => ConstValue::Float(self.f32_at(offset + 1)?),
            CONSTANT_LONG => ConstValue::Long(self.i64_at(offset + 1)?),
            CONSTANT_DOUBLE => ConstValue::Double(self.f64_at(offset + 1)?),
            CONSTANT_STRING => ConstValue::String(self.utf8_at(offset + 1)?),
            CONSTANT_CLASS => ConstValue::Type(self.utf8_at(offset + 1)?),
            CONSTANT_METHOD_TYPE => ConstValue::MethodType(self.utf8_at(offset + 1)?),
            CONSTANT_METHOD_HANDLE => ConstValue::MethodHandle(self.read_method_handle(index)?),
            CONSTANT_DYNAMIC => {
                let (name, descriptor) = self.read_name_and_type(self.u16_at(offset + 3)?)?;
                let (bootstrap_method, bootstrap_arguments) =
                    self.read_bootstrap_method(self.u16_at(offset + 1)?)?;
                ConstValue::Dynamic(Box::new(ConstantDynamic {
                    name,
                    descriptor,
                    bootstrap_method,
                    bootstrap_arguments,
                }))
            }
            _ => {
                return Err(Error::UnexpectedConstant {
                    index,
                    expected: "loadable",
                })
            }
        };
        Ok(value)
    }

    /// Offset of the record at `index`, checking that it has the right tag
    fn expect_tag(&self, index: u16, tag: u8, expected: &'static str) -> Result<usize, Error> {
        let offset = self.item_offset(index)?;
        if self.u8_at(offset)? == tag {
            Ok(offset)
        } else {
            Err(Error::UnexpectedConstant { index, expected })
        }
    }
}
