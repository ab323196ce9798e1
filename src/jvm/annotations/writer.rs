use super::AnnotationValue;
use crate::jvm::class_file::{Attribute, ByteVector, ConstantPool, Placeholder};
use crate::jvm::{AnnotationVisitor, AnnotationVisitorResult, Error};

/// Encodes annotation values straight into a class file buffer
///
/// The writer reserves the count of the values it is about to write when it is created and
/// patches it on `visit_end`. Nested annotations and arrays get child writers that append to the
/// same buffer, so events must come depth first (which is how readers and [`Annotation::accept`]
/// produce them).
///
/// [`Annotation::accept`]: super::Annotation::accept
pub struct AnnotationWriter<'a> {
    pool: &'a mut ConstantPool,
    buffer: &'a mut ByteVector,

    /// Element-value pairs carry a name, array entries do not
    named: bool,
    count: u16,
    count_at: Placeholder,
}

impl<'a> AnnotationWriter<'a> {
    pub fn new(pool: &'a mut ConstantPool, buffer: &'a mut ByteVector, named: bool) -> AnnotationWriter<'a> {
        let count_at = buffer.reserve_u16();
        AnnotationWriter {
            pool,
            buffer,
            named,
            count: 0,
            count_at,
        }
    }

    /// Start a top-level annotation in a fresh buffer: type index, then the pairs
    pub fn annotation(
        pool: &'a mut ConstantPool,
        buffer: &'a mut ByteVector,
        descriptor: &str,
    ) -> Result<AnnotationWriter<'a>, Error> {
        let type_index = pool.utf8(descriptor)?;
        buffer.put_u16(type_index.0 .0);
        Ok(AnnotationWriter::new(pool, buffer, true))
    }

    fn put_name(&mut self, name: Option<&str>) -> Result<(), Error> {
        self.count += 1;
        if self.named {
            let name_index = self.pool.utf8(name.unwrap_or_default())?;
            self.buffer.put_u16(name_index.0 .0);
        }
        Ok(())
    }

    fn put_value(&mut self, value: &AnnotationValue) -> Result<(), Error> {
        let pool = &mut *self.pool;
        let (tag, index) = match value {
            AnnotationValue::Boolean(b) => (b'Z', pool.integer(*b as i32)?),
            AnnotationValue::Byte(b) => (b'B', pool.integer(*b as i32)?),
            AnnotationValue::Char(c) => (b'C', pool.integer(*c as i32)?),
            AnnotationValue::Short(s) => (b'S', pool.integer(*s as i32)?),
            AnnotationValue::Int(i) => (b'I', pool.integer(*i)?),
            AnnotationValue::Long(l) => (b'J', pool.long(*l)?),
            AnnotationValue::Float(f) => (b'F', pool.float(*f)?),
            AnnotationValue::Double(d) => (b'D', pool.double(*d)?),
            AnnotationValue::String(s) => (b's', pool.utf8(s)?.into()),
            AnnotationValue::Class(c) => (b'c', pool.utf8(c)?.into()),
            AnnotationValue::Enum { descriptor, value } => {
                let type_name = pool.utf8(descriptor)?;
                let const_name = pool.utf8(value)?;
                self.buffer
                    .put12(b'e', type_name.0 .0)
                    .put_u16(const_name.0 .0);
                return Ok(());
            }
            AnnotationValue::Annotation(annotation) => {
                let type_index = pool.utf8(&annotation.descriptor)?;
                self.buffer.put12(b'@', type_index.0 .0);
                let mut nested = AnnotationWriter::new(&mut *self.pool, &mut *self.buffer, true);
                for (name, value) in &annotation.values {
                    nested.put_name(Some(name))?;
                    nested.put_value(value)?;
                }
                return nested.visit_end();
            }
            AnnotationValue::Array(values) => {
                self.buffer.put_u8(b'[');
                let mut nested = AnnotationWriter::new(&mut *self.pool, &mut *self.buffer, false);
                for value in values {
                    nested.put_name(None)?;
                    nested.put_value(value)?;
                }
                return nested.visit_end();
            }
        };
        self.buffer.put12(tag, index.0);
        Ok(())
    }
}

impl<'a> AnnotationVisitor for AnnotationWriter<'a> {
    fn visit(&mut self, name: Option<&str>, value: &AnnotationValue) -> Result<(), Error> {
        self.put_name(name)?;
        self.put_value(value)
    }

    fn visit_enum(&mut self, name: Option<&str>, descriptor: &str, value: &str) -> Result<(), Error> {
        self.put_name(name)?;
        let type_name = self.pool.utf8(descriptor)?;
        let const_name = self.pool.utf8(value)?;
        self.buffer
            .put12(b'e', type_name.0 .0)
            .put_u16(const_name.0 .0);
        Ok(())
    }

    fn visit_annotation(&mut self, name: Option<&str>, descriptor: &str) -> AnnotationVisitorResult<'_> {
        self.put_name(name)?;
        let type_index = self.pool.utf8(descriptor)?;
        self.buffer.put12(b'@', type_index.0 .0);
        Ok(Some(Box::new(AnnotationWriter::new(
            &mut *self.pool,
            &mut *self.buffer,
            true,
        ))))
    }

    fn visit_array(&mut self, name: Option<&str>) -> AnnotationVisitorResult<'_> {
        self.put_name(name)?;
        self.buffer.put_u8(b'[');
        Ok(Some(Box::new(AnnotationWriter::new(
            &mut *self.pool,
            &mut *self.buffer,
            false,
        ))))
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        self.buffer.patch_u16(self.count_at, self.count);
        Ok(())
    }
}

/// Writes the default value of an annotation interface element (a single unnamed value)
pub struct AnnotationDefaultWriter<'a> {
    pool: &'a mut ConstantPool,
    buffer: &'a mut ByteVector,
}

impl<'a> AnnotationDefaultWriter<'a> {
    pub fn new(pool: &'a mut ConstantPool, buffer: &'a mut ByteVector) -> AnnotationDefaultWriter<'a> {
        AnnotationDefaultWriter { pool, buffer }
    }
}

impl<'a> AnnotationVisitor for AnnotationDefaultWriter<'a> {
    fn visit(&mut self, _name: Option<&str>, value: &AnnotationValue) -> Result<(), Error> {
        let mut scratch = ByteVector::new();
        let mut writer = AnnotationWriter::new(&mut *self.pool, &mut scratch, false);
        writer.put_value(value)?;
        // Drop the 2-byte count the scratch writer reserved
        self.buffer.put_bytes(&scratch.as_slice()[2..]);
        Ok(())
    }

    fn visit_enum(&mut self, _name: Option<&str>, descriptor: &str, value: &str) -> Result<(), Error> {
        let type_name = self.pool.utf8(descriptor)?;
        let const_name = self.pool.utf8(value)?;
        self.buffer
            .put12(b'e', type_name.0 .0)
            .put_u16(const_name.0 .0);
        Ok(())
    }

    fn visit_annotation(&mut self, _name: Option<&str>, descriptor: &str) -> AnnotationVisitorResult<'_> {
        let type_index = self.pool.utf8(descriptor)?;
        self.buffer.put12(b'@', type_index.0 .0);
        Ok(Some(Box::new(AnnotationWriter::new(
            &mut *self.pool,
            &mut *self.buffer,
            true,
        ))))
    }

    fn visit_array(&mut self, _name: Option<&str>) -> AnnotationVisitorResult<'_> {
        self.buffer.put_u8(b'[');
        Ok(Some(Box::new(AnnotationWriter::new(
            &mut *self.pool,
            &mut *self.buffer,
            false,
        ))))
    }
}

/// Annotations of one kind (visible or invisible) on a class, field, or method
#[derive(Default, Debug)]
pub struct AnnotationSet {
    annotations: Vec<ByteVector>,
}

impl AnnotationSet {
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Start writing one more annotation
    pub fn add<'a>(
        &'a mut self,
        pool: &'a mut ConstantPool,
        descriptor: &str,
    ) -> Result<AnnotationWriter<'a>, Error> {
        self.annotations.push(ByteVector::new());
        let last = self.annotations.len() - 1;
        AnnotationWriter::annotation(pool, &mut self.annotations[last], descriptor)
    }

    fn put(&self, payload: &mut ByteVector) {
        payload.put_u16(self.annotations.len() as u16);
        for annotation in &self.annotations {
            payload.put_bytes(annotation.as_slice());
        }
    }

    /// `Runtime[In]VisibleAnnotations` attribute, if there are any annotations
    pub fn attribute(&self, pool: &mut ConstantPool, name: &str) -> Result<Option<Attribute>, Error> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut payload = ByteVector::new();
        self.put(&mut payload);
        Ok(Some(Attribute {
            name_index: pool.utf8(name)?,
            info: payload.into_vec(),
        }))
    }

    /// `Runtime[In]VisibleParameterAnnotations` attribute, if any parameter has annotations
    ///
    /// The table always covers at least `parameter_count` parameters.
    pub fn parameters_attribute(
        parameters: &[AnnotationSet],
        parameter_count: usize,
        pool: &mut ConstantPool,
        name: &str,
    ) -> Result<Option<Attribute>, Error> {
        if parameters.iter().all(AnnotationSet::is_empty) {
            return Ok(None);
        }
        let empty = AnnotationSet::default();
        let count = parameters.len().max(parameter_count);
        let mut payload = ByteVector::new();
        payload.put_u8(count as u8);
        for parameter in 0..count {
            parameters.get(parameter).unwrap_or(&empty).put(&mut payload);
        }
        Ok(Some(Attribute {
            name_index: pool.utf8(name)?,
            info: payload.into_vec(),
        }))
    }
}
