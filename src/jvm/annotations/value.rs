use crate::jvm::{AnnotationVisitor, AnnotationVisitorResult, Error};

/// Annotation, as found on a class, field, method, or parameter
#[derive(Clone, PartialEq, Debug)]
pub struct Annotation {
    /// Field descriptor of the annotation interface (eg. `Ljava/lang/Deprecated;`)
    pub descriptor: String,

    /// Element-value pairs, in the order they were visited
    pub values: Vec<(String, AnnotationValue)>,
}

/// Element value of an annotation
#[derive(Clone, Debug)]
pub enum AnnotationValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),

    /// Class literal, given by its return descriptor (eg. `Ljava/lang/String;` or `V`)
    Class(String),

    Enum { descriptor: String, value: String },
    Annotation(Annotation),
    Array(Vec<AnnotationValue>),
}

impl PartialEq for AnnotationValue {
    fn eq(&self, other: &AnnotationValue) -> bool {
        use AnnotationValue::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) | (Class(a), Class(b)) => a == b,
            (
                Enum {
                    descriptor: d1,
                    value: v1,
                },
                Enum {
                    descriptor: d2,
                    value: v2,
                },
            ) => d1 == d2 && v1 == v2,
            (Annotation(a), Annotation(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Annotation {
    pub fn new(descriptor: &str) -> Annotation {
        Annotation {
            descriptor: descriptor.to_owned(),
            values: vec![],
        }
    }

    /// Visitor that appends the visited values to this annotation
    pub fn collector(&mut self) -> AnnotationCollector<'_> {
        AnnotationCollector {
            target: CollectTarget::Named(&mut self.values),
        }
    }

    /// Replay the values of this annotation, then `visit_end`
    pub fn accept(&self, visitor: &mut dyn AnnotationVisitor) -> Result<(), Error> {
        for (name, value) in &self.values {
            value.accept(Some(name), visitor)?;
        }
        visitor.visit_end()
    }
}

impl AnnotationValue {
    /// Replay this value as one event (plus nested events for annotations and arrays)
    pub fn accept(&self, name: Option<&str>, visitor: &mut dyn AnnotationVisitor) -> Result<(), Error> {
        match self {
            AnnotationValue::Enum { descriptor, value } => {
                visitor.visit_enum(name, descriptor, value)
            }
            AnnotationValue::Annotation(annotation) => {
                match visitor.visit_annotation(name, &annotation.descriptor)? {
                    Some(mut nested) => annotation.accept(nested.as_mut()),
                    None => Ok(()),
                }
            }
            AnnotationValue::Array(values) => match visitor.visit_array(name)? {
                Some(mut nested) => {
                    for value in values {
                        value.accept(None, nested.as_mut())?;
                    }
                    nested.visit_end()
                }
                None => Ok(()),
            },
            _ => visitor.visit(name, self),
        }
    }
}

enum CollectTarget<'a> {
    Named(&'a mut Vec<(String, AnnotationValue)>),
    Unnamed(&'a mut Vec<AnnotationValue>),
}

/// Builds an in-memory [`Annotation`] (or array value) out of visitor events
pub struct AnnotationCollector<'a> {
    target: CollectTarget<'a>,
}

impl<'a> AnnotationCollector<'a> {
    /// Visitor that appends visited values to a list (for collecting an array or a default value)
    pub fn for_values(values: &'a mut Vec<AnnotationValue>) -> AnnotationCollector<'a> {
        AnnotationCollector {
            target: CollectTarget::Unnamed(values),
        }
    }

    fn push(&mut self, name: Option<&str>, value: AnnotationValue) -> &mut AnnotationValue {
        match &mut self.target {
            CollectTarget::Named(values) => {
                values.push((name.unwrap_or_default().to_owned(), value));
                let last = values.len() - 1;
                &mut values[last].1
            }
            CollectTarget::Unnamed(values) => {
                values.push(value);
                let last = values.len() - 1;
                &mut values[last]
            }
        }
    }
}

impl<'a> AnnotationVisitor for AnnotationCollector<'a> {
    fn visit(&mut self, name: Option<&str>, value: &AnnotationValue) -> Result<(), Error> {
        self.push(name, value.clone());
        Ok(())
    }

    fn visit_enum(&mut self, name: Option<&str>, descriptor: &str, value: &str) -> Result<(), Error> {
        self.push(
            name,
            AnnotationValue::Enum {
                descriptor: descriptor.to_owned(),
                value: value.to_owned(),
            },
        );
        Ok(())
    }

    fn visit_annotation(&mut self, name: Option<&str>, descriptor: &str) -> AnnotationVisitorResult<'_> {
        let nested = self.push(name, AnnotationValue::Annotation(Annotation::new(descriptor)));
        match nested {
            AnnotationValue::Annotation(annotation) => Ok(Some(Box::new(annotation.collector()))),
            _ => Ok(None),
        }
    }

    fn visit_array(&mut self, name: Option<&str>) -> AnnotationVisitorResult<'_> {
        match self.push(name, AnnotationValue::Array(vec![])) {
            AnnotationValue::Array(values) => {
                Ok(Some(Box::new(AnnotationCollector::for_values(values))))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Annotation {
        Annotation {
            descriptor: String::from("LSample;"),
            values: vec![
                (String::from("flag"), AnnotationValue::Boolean(true)),
                (
                    String::from("bytes"),
                    AnnotationValue::Array(vec![AnnotationValue::Byte(1), AnnotationValue::Byte(-1)]),
                ),
                (
                    String::from("nested"),
                    AnnotationValue::Annotation(Annotation {
                        descriptor: String::from("LInner;"),
                        values: vec![(
                            String::from("kind"),
                            AnnotationValue::Enum {
                                descriptor: String::from("LKind;"),
                                value: String::from("FAST"),
                            },
                        )],
                    }),
                ),
            ],
        }
    }

    #[test]
    fn collector_rebuilds_accepted_tree() {
        let original = sample();
        let mut copy = Annotation::new("LSample;");
        original.accept(&mut copy.collector()).unwrap();
        assert_eq!(copy, original);
    }

    #[test]
    fn float_values_compare_by_bits() {
        assert_ne!(AnnotationValue::Float(0.0), AnnotationValue::Float(-0.0));
        assert_eq!(AnnotationValue::Double(f64::NAN), AnnotationValue::Double(f64::NAN));
    }
}
