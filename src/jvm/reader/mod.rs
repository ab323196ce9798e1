//! Decoding of class files into visitor events

mod code;

pub use code::read_code;

use super::annotations::{read_annotation, read_element_value, unbox};
use super::class_file::{BytecodeReader, Version};
use super::{
    ClassAccessFlags, ClassInfo, ClassVisitor, Error, FieldAccessFlags, FieldInfo, InnerClassAccessFlags,
    InnerClassInfo, MethodAccessFlags, MethodInfo,
};

/// Walk an annotations table (`num_annotations` then the annotations) starting at `$offset`,
/// opening one nested visitor per annotation with `$open`
macro_rules! read_annotations {
    ($reader:expr, $offset:expr, |$descriptor:ident| $open:expr) => {{
        let reader: &BytecodeReader = $reader;
        let mut offset = $offset + 2;
        for _ in 0..reader.u16_at($offset)? {
            let $descriptor: &str = &reader.utf8_at(offset)?;
            let mut nested = $open?;
            offset = read_annotation(reader, offset + 2, unbox(&mut nested))?;
        }
        offset
    }};
}

/// Attribute of a class, field, or method: its name and where its payload starts
struct RawAttribute {
    name: String,
    offset: usize,
}

/// Parses a class file and replays it as [`ClassVisitor`] events
///
/// The constant pool is indexed once when the reader is created; everything else is decoded
/// lazily from the byte slice, so a reader can be accepted any number of times.
pub struct ClassReader<'a> {
    reader: BytecodeReader<'a>,
}

impl<'a> ClassReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<ClassReader<'a>, Error> {
        Ok(ClassReader {
            reader: BytecodeReader::new(bytes)?,
        })
    }

    /// Underlying decoder, for copying the constant pool
    pub fn bytecode(&self) -> &BytecodeReader<'a> {
        &self.reader
    }

    pub fn version(&self) -> Result<Version, Error> {
        Ok(Version {
            minor_version: self.reader.u16_at(4)?,
            major_version: self.reader.u16_at(6)?,
        })
    }

    pub fn access(&self) -> Result<ClassAccessFlags, Error> {
        Ok(ClassAccessFlags::from_bits_retain(
            self.reader.u16_at(self.reader.header())?,
        ))
    }

    pub fn class_name(&self) -> Result<String, Error> {
        let offset = self.reader.header() + 2;
        match self.reader.class_at(offset)? {
            Some(name) => Ok(name),
            None => Err(Error::InvalidConstantIndex(0)),
        }
    }

    pub fn super_name(&self) -> Result<Option<String>, Error> {
        self.reader.class_at(self.reader.header() + 4)
    }

    pub fn interfaces(&self) -> Result<Vec<String>, Error> {
        self.classes_at(self.reader.header() + 6)
    }

    /// Number of constant pool slots (`constant_pool_count`)
    pub fn items(&self) -> u16 {
        self.reader.item_count()
    }

    fn attributes(&self, offset: usize) -> Result<(Vec<RawAttribute>, usize), Error> {
        let count = self.reader.u16_at(offset)? as usize;
        let mut attributes = Vec::with_capacity(count);
        let mut offset = offset + 2;
        for _ in 0..count {
            let name = self.reader.utf8_at(offset)?;
            let length = self.reader.u32_at(offset + 2)? as usize;
            self.reader.bytes_at(offset + 6, length)?;
            attributes.push(RawAttribute {
                name,
                offset: offset + 6,
            });
            offset += 6 + length;
        }
        Ok((attributes, offset))
    }

    fn classes_at(&self, offset: usize) -> Result<Vec<String>, Error> {
        let count = self.reader.u16_at(offset)? as usize;
        let mut classes = Vec::with_capacity(count);
        for class in 0..count {
            classes.push(self.reader.read_class(self.reader.u16_at(offset + 2 + 2 * class)?)?);
        }
        Ok(classes)
    }

    /// Replay the whole class
    pub fn accept(&self, visitor: &mut dyn ClassVisitor) -> Result<(), Error> {
        let reader = &self.reader;
        let name = self.class_name()?;
        let mut access = self.access()?;
        let mut info = ClassInfo {
            super_name: self.super_name()?,
            interfaces: self.interfaces()?,
            ..ClassInfo::default()
        };

        let mut annotations = vec![];
        let mut inner_classes = None;
        let (attributes, _) = self.attributes(reader.class_attributes())?;
        for attribute in &attributes {
            let offset = attribute.offset;
            match attribute.name.as_str() {
                "SourceFile" => info.source_file = Some(reader.utf8_at(offset)?),
                "Signature" => info.signature = Some(reader.utf8_at(offset)?),
                "NestHost" => info.nest_host = reader.class_at(offset)?,
                "NestMembers" => info.nest_members = self.classes_at(offset)?,
                "InnerClasses" => inner_classes = Some(offset),
                "Deprecated" => info.deprecated = true,
                "Synthetic" => access |= ClassAccessFlags::SYNTHETIC,
                "RuntimeVisibleAnnotations" => annotations.push((offset, true)),
                "RuntimeInvisibleAnnotations" => annotations.push((offset, false)),
                _ => (),
            }
        }

        let version = self.version()?;
        log::debug!("Reading class {} (version {}.{})", name, version.major_version, version.minor_version);
        visitor.visit(version, access, &name, &info)?;

        for (offset, visible) in annotations {
            read_annotations!(reader, offset, |descriptor| visitor
                .visit_annotation(descriptor, visible));
        }

        if let Some(offset) = inner_classes {
            for inner_class in 0..reader.u16_at(offset)? as usize {
                let entry = offset + 2 + 8 * inner_class;
                let name = match reader.class_at(entry)? {
                    Some(name) => name,
                    None => return Err(Error::InvalidConstantIndex(0)),
                };
                let inner_name = match reader.u16_at(entry + 4)? {
                    0 => None,
                    index => Some(reader.read_utf8(index)?),
                };
                visitor.visit_inner_class(&InnerClassInfo {
                    name,
                    outer_name: reader.class_at(entry + 2)?,
                    inner_name,
                    access: InnerClassAccessFlags::from_bits_retain(reader.u16_at(entry + 6)?),
                })?;
            }
        }

        let interface_count = reader.u16_at(reader.header() + 6)? as usize;
        let mut offset = reader.header() + 8 + 2 * interface_count;
        let field_count = reader.u16_at(offset)?;
        offset += 2;
        for _ in 0..field_count {
            offset = self.read_field(visitor, offset)?;
        }
        let method_count = reader.u16_at(offset)?;
        offset += 2;
        for _ in 0..method_count {
            offset = self.read_method(visitor, offset)?;
        }

        visitor.visit_end()
    }

    /// Replay the field at `offset`, returning the offset of the next member
    fn read_field(&self, visitor: &mut dyn ClassVisitor, offset: usize) -> Result<usize, Error> {
        let reader = &self.reader;
        let mut info = FieldInfo {
            access: FieldAccessFlags::from_bits_retain(reader.u16_at(offset)?),
            name: reader.utf8_at(offset + 2)?,
            descriptor: reader.utf8_at(offset + 4)?,
            signature: None,
            value: None,
            deprecated: false,
        };

        let mut annotations = vec![];
        let (attributes, end) = self.attributes(offset + 6)?;
        for attribute in &attributes {
            let offset = attribute.offset;
            match attribute.name.as_str() {
                "ConstantValue" => info.value = Some(reader.read_const(reader.u16_at(offset)?)?),
                "Signature" => info.signature = Some(reader.utf8_at(offset)?),
                "Deprecated" => info.deprecated = true,
                "Synthetic" => info.access |= FieldAccessFlags::SYNTHETIC,
                "RuntimeVisibleAnnotations" => annotations.push((offset, true)),
                "RuntimeInvisibleAnnotations" => annotations.push((offset, false)),
                _ => (),
            }
        }

        if let Some(mut field_visitor) = visitor.visit_field(&info)? {
            for (offset, visible) in annotations {
                read_annotations!(reader, offset, |descriptor| field_visitor
                    .visit_annotation(descriptor, visible));
            }
            field_visitor.visit_end()?;
        }
        Ok(end)
    }

    /// Replay the method at `offset`, returning the offset of the next member
    fn read_method(&self, visitor: &mut dyn ClassVisitor, offset: usize) -> Result<usize, Error> {
        let reader = &self.reader;
        let mut info = MethodInfo {
            access: MethodAccessFlags::from_bits_retain(reader.u16_at(offset)?),
            name: reader.utf8_at(offset + 2)?,
            descriptor: reader.utf8_at(offset + 4)?,
            signature: None,
            exceptions: vec![],
            deprecated: false,
        };

        let mut code = None;
        let mut annotation_default = None;
        let mut annotations = vec![];
        let mut parameter_annotations = vec![];
        let (attributes, end) = self.attributes(offset + 6)?;
        for attribute in &attributes {
            let offset = attribute.offset;
            match attribute.name.as_str() {
                "Code" => code = Some(offset),
                "Exceptions" => info.exceptions = self.classes_at(offset)?,
                "Signature" => info.signature = Some(reader.utf8_at(offset)?),
                "Deprecated" => info.deprecated = true,
                "Synthetic" => info.access |= MethodAccessFlags::SYNTHETIC,
                "AnnotationDefault" => annotation_default = Some(offset),
                "RuntimeVisibleAnnotations" => annotations.push((offset, true)),
                "RuntimeInvisibleAnnotations" => annotations.push((offset, false)),
                "RuntimeVisibleParameterAnnotations" => parameter_annotations.push((offset, true)),
                "RuntimeInvisibleParameterAnnotations" => parameter_annotations.push((offset, false)),
                _ => (),
            }
        }

        let mut method_visitor = match visitor.visit_method(&info)? {
            Some(method_visitor) => method_visitor,
            None => return Ok(end),
        };
        log::trace!("Reading method {}{}", info.name, info.descriptor);

        if let Some(offset) = annotation_default {
            let mut default_visitor = method_visitor.visit_annotation_default()?;
            read_element_value(reader, offset, None, unbox(&mut default_visitor))?;
            if let Some(default_visitor) = default_visitor.as_mut() {
                default_visitor.visit_end()?;
            }
        }
        for (offset, visible) in annotations {
            read_annotations!(reader, offset, |descriptor| method_visitor
                .visit_annotation(descriptor, visible));
        }
        for (offset, visible) in parameter_annotations {
            let parameters = reader.u8_at(offset)?;
            let mut offset = offset + 1;
            for parameter in 0..parameters {
                offset = read_annotations!(reader, offset, |descriptor| method_visitor
                    .visit_parameter_annotation(parameter, descriptor, visible));
            }
        }
        if let Some(offset) = code {
            method_visitor.visit_code()?;
            read_code(reader, offset, method_visitor.as_mut())?;
        }
        method_visitor.visit_end()?;
        Ok(end)
    }
}
