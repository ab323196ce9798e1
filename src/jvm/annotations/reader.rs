use super::AnnotationValue;
use crate::jvm::class_file::{BytecodeReader, ConstValue};
use crate::jvm::{AnnotationVisitor, Error};

/// Decode the element-value pairs of an annotation starting at `offset` (right after its type
/// index), then call `visit_end`
///
/// Without a visitor, the values are still walked (and checked) so that the offset right after
/// the annotation can be returned.
pub fn read_annotation(
    reader: &BytecodeReader,
    offset: usize,
    mut visitor: Option<&mut dyn AnnotationVisitor>,
) -> Result<usize, Error> {
    let count = reader.u16_at(offset)?;
    let mut offset = offset + 2;
    for _ in 0..count {
        let name = reader.utf8_at(offset)?;
        offset = read_element_value(reader, offset + 2, Some(&name), reborrow(&mut visitor))?;
    }
    if let Some(visitor) = visitor {
        visitor.visit_end()?;
    }
    Ok(offset)
}

/// Decode a single element value, returning the offset right after it
pub fn read_element_value(
    reader: &BytecodeReader,
    offset: usize,
    name: Option<&str>,
    visitor: Option<&mut dyn AnnotationVisitor>,
) -> Result<usize, Error> {
    let tag = reader.u8_at(offset)?;
    let index_at = offset + 1;
    let primitive = |reader: &BytecodeReader| -> Result<ConstValue, Error> {
        reader.read_const(reader.u16_at(index_at)?)
    };
    let value = match tag {
        b'B' | b'C' | b'S' | b'Z' | b'I' => match primitive(reader)? {
            ConstValue::Integer(i) => match tag {
                b'B' => AnnotationValue::Byte(i as i8),
                b'C' => AnnotationValue::Char(i as u16),
                b'S' => AnnotationValue::Short(i as i16),
                b'Z' => AnnotationValue::Boolean(i != 0),
                _ => AnnotationValue::Int(i),
            },
            _ => return Err(mismatched(reader, index_at, "integer")),
        },
        b'J' => match primitive(reader)? {
            ConstValue::Long(l) => AnnotationValue::Long(l),
            _ => return Err(mismatched(reader, index_at, "long")),
        },
        b'F' => match primitive(reader)? {
            ConstValue::Float(f) => AnnotationValue::Float(f),
            _ => return Err(mismatched(reader, index_at, "float")),
        },
        b'D' => match primitive(reader)? {
            ConstValue::Double(d) => AnnotationValue::Double(d),
            _ => return Err(mismatched(reader, index_at, "double")),
        },
        b's' => AnnotationValue::String(reader.utf8_at(index_at)?),
        b'c' => AnnotationValue::Class(reader.utf8_at(index_at)?),
        b'e' => {
            let descriptor = reader.utf8_at(index_at)?;
            let value = reader.utf8_at(index_at + 2)?;
            if let Some(visitor) = visitor {
                visitor.visit_enum(name, &descriptor, &value)?;
            }
            return Ok(offset + 5);
        }
        b'@' => {
            let descriptor = reader.utf8_at(index_at)?;
            return match visitor {
                Some(visitor) => {
                    let mut nested = visitor.visit_annotation(name, &descriptor)?;
                    read_annotation(reader, offset + 3, unbox(&mut nested))
                }
                None => read_annotation(reader, offset + 3, None),
            };
        }
        b'[' => {
            let count = reader.u16_at(index_at)?;
            let mut nested = match visitor {
                Some(visitor) => visitor.visit_array(name)?,
                None => None,
            };
            let mut offset = offset + 3;
            for _ in 0..count {
                offset = read_element_value(reader, offset, None, unbox(&mut nested))?;
            }
            if let Some(nested) = nested.as_mut() {
                nested.visit_end()?;
            }
            return Ok(offset);
        }
        tag => return Err(Error::InvalidAnnotationTag { tag, offset }),
    };
    if let Some(visitor) = visitor {
        visitor.visit(name, &value)?;
    }
    Ok(offset + 3)
}

fn reborrow<'s>(
    visitor: &'s mut Option<&mut dyn AnnotationVisitor>,
) -> Option<&'s mut dyn AnnotationVisitor> {
    match visitor {
        Some(visitor) => Some(&mut **visitor),
        None => None,
    }
}

/// Borrow a nested visitor handed out by `visit_annotation`/`visit_array`, for passing on to
/// [`read_annotation`] or [`read_element_value`]
pub fn unbox<'s>(
    visitor: &'s mut Option<Box<dyn AnnotationVisitor + '_>>,
) -> Option<&'s mut dyn AnnotationVisitor> {
    match visitor {
        Some(visitor) => Some(visitor.as_mut()),
        None => None,
    }
}

fn mismatched(reader: &BytecodeReader, index_at: usize, expected: &'static str) -> Error {
    match reader.u16_at(index_at) {
        Ok(index) => Error::UnexpectedConstant { index, expected },
        Err(err) => err,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::annotations::{Annotation, AnnotationSet};
    use crate::jvm::class_file::{ByteVector, ConstantPool, Serialize, Version};
    use crate::jvm::ClassAccessFlags;

    /// Class file bytes with the given pool and nothing else, followed by `extra`
    fn class_with(pool: &ConstantPool, extra: &[u8]) -> (Vec<u8>, usize) {
        let mut bytes = ByteVector::new();
        bytes.put_u32(0xCAFE_BABE);
        Version::JAVA8.serialize(&mut bytes).unwrap();
        pool.serialize(&mut bytes).unwrap();
        ClassAccessFlags::PUBLIC.serialize(&mut bytes).unwrap();
        bytes.put_u16(0).put_u16(0).put_u16(0).put_u16(0).put_u16(0).put_u16(0);
        let start = bytes.len();
        bytes.put_bytes(extra);
        (bytes.into_vec(), start)
    }

    #[test]
    fn decodes_what_was_written() {
        let original = Annotation {
            descriptor: String::from("LOuter;"),
            values: vec![
                (
                    String::from("ints"),
                    AnnotationValue::Array(vec![AnnotationValue::Int(1), AnnotationValue::Int(2)]),
                ),
                (String::from("c"), AnnotationValue::Char(b'x' as u16)),
                (String::from("type"), AnnotationValue::Class(String::from("Ljava/lang/String;"))),
                (
                    String::from("inner"),
                    AnnotationValue::Annotation(Annotation {
                        descriptor: String::from("LInner;"),
                        values: vec![(
                            String::from("mode"),
                            AnnotationValue::Enum {
                                descriptor: String::from("LMode;"),
                                value: String::from("ON"),
                            },
                        )],
                    }),
                ),
            ],
        };

        let mut pool = ConstantPool::new();
        let mut set = AnnotationSet::default();
        original
            .accept(&mut set.add(&mut pool, &original.descriptor).unwrap())
            .unwrap();
        let attribute = set.attribute(&mut pool, "RuntimeVisibleAnnotations").unwrap().unwrap();
        let (bytes, start) = class_with(&pool, &attribute.info);
        let reader = BytecodeReader::new(&bytes).unwrap();

        assert_eq!(reader.u16_at(start).unwrap(), 1);
        assert_eq!(reader.utf8_at(start + 2).unwrap(), "LOuter;");
        let mut decoded = Annotation::new("LOuter;");
        let end = read_annotation(&reader, start + 4, Some(&mut decoded.collector())).unwrap();
        assert_eq!(end, bytes.len());
        assert_eq!(decoded, original);

        // Skipping walks the same bytes
        assert_eq!(read_annotation(&reader, start + 4, None).unwrap(), end);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let pool = ConstantPool::new();
        let (bytes, start) = class_with(&pool, &[b'x', 0, 0]);
        let reader = BytecodeReader::new(&bytes).unwrap();
        assert!(matches!(
            read_element_value(&reader, start, None, None),
            Err(Error::InvalidAnnotationTag { tag: b'x', .. })
        ));
    }
}
