//! Encoding of visitor events back into a class file

mod method;

pub use method::MethodWriter;

use super::analysis::{ClassHierarchy, ComputeMode, ObjectHierarchy};
use super::annotations::AnnotationSet;
use super::class_file::{
    Attribute, ByteVector, ClassConstantIndex, ConstantPool, ConstantValue, InnerClass, InnerClasses,
    NestHost, NestMembers, Serialize, Signature, SourceFile, Utf8ConstantIndex, Version, MAGIC,
};
use super::reader::ClassReader;
use super::{
    AnnotationVisitorResult, ClassAccessFlags, ClassInfo, ClassVisitor, Error, FieldAccessFlags,
    FieldInfo, FieldVisitor, InnerClassInfo, MethodInfo, MethodVisitor,
};
use std::collections::HashSet;

/// What the writer recomputes, and how it answers questions about the class hierarchy
pub struct WriterOptions {
    /// `Frames` only applies to classes whose version uses stack map frames (Java 6 and up);
    /// older classes get `MaxStack`
    pub compute: ComputeMode,
    pub hierarchy: Box<dyn ClassHierarchy>,
}

impl WriterOptions {
    pub fn new(compute: ComputeMode) -> WriterOptions {
        WriterOptions {
            compute,
            hierarchy: Box::new(ObjectHierarchy),
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: impl ClassHierarchy + 'static) -> WriterOptions {
        self.hierarchy = Box::new(hierarchy);
        self
    }
}

impl Default for WriterOptions {
    fn default() -> WriterOptions {
        WriterOptions::new(ComputeMode::MaxStack)
    }
}

/// Builds a class file from [`ClassVisitor`] events
///
/// Every name, descriptor, and constant seen is interned into the writer's constant pool as a
/// side effect of visiting. Fields and methods are serialized as soon as their `visit_end` is
/// seen, so only the pool and the class level attributes are held until [`ClassWriter::to_bytes`].
pub struct ClassWriter {
    options: WriterOptions,
    pool: ConstantPool,

    version: Version,
    access: ClassAccessFlags,
    name: String,
    this_class: Option<ClassConstantIndex>,
    super_class: Option<ClassConstantIndex>,
    interfaces: Vec<ClassConstantIndex>,

    /// `SourceFile`, `Signature`, `NestHost`, `NestMembers`, `Deprecated`
    header_attributes: Vec<Attribute>,
    inner_classes: Vec<InnerClass>,
    inner_class_names: HashSet<String>,
    visible_annotations: AnnotationSet,
    invisible_annotations: AnnotationSet,

    fields: ByteVector,
    field_count: u16,
    methods: ByteVector,
    method_count: u16,
}

impl ClassWriter {
    pub fn new(options: WriterOptions) -> ClassWriter {
        ClassWriter::with_pool(options, ConstantPool::new())
    }

    /// Writer whose constant pool starts as a copy of the reader's (same indices), along with its
    /// bootstrap methods
    ///
    /// Rewriting a class this way leaves every unchanged constant where it was.
    pub fn from_reader(reader: &ClassReader, options: WriterOptions) -> Result<ClassWriter, Error> {
        let bytecode = reader.bytecode();
        let pool = ConstantPool::copy_from(bytecode, bytecode.bootstrap_methods_attribute())?;
        log::debug!("Copied {} constant pool slot(s)", pool.count());
        Ok(ClassWriter::with_pool(options, pool))
    }

    fn with_pool(options: WriterOptions, pool: ConstantPool) -> ClassWriter {
        ClassWriter {
            options,
            pool,
            version: Version::JAVA8,
            access: ClassAccessFlags::empty(),
            name: String::new(),
            this_class: None,
            super_class: None,
            interfaces: vec![],
            header_attributes: vec![],
            inner_classes: vec![],
            inner_class_names: HashSet::new(),
            visible_annotations: AnnotationSet::default(),
            invisible_annotations: AnnotationSet::default(),
            fields: ByteVector::new(),
            field_count: 0,
            methods: ByteVector::new(),
            method_count: 0,
        }
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.pool
    }

    /// Effective computation mode for the methods of this class
    fn compute(&self) -> ComputeMode {
        match self.options.compute {
            ComputeMode::Frames if self.version.uses_stack_map_frames() => ComputeMode::Frames,
            _ => ComputeMode::MaxStack,
        }
    }

    /// Assemble the class file
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let this_class = match self.this_class {
            Some(this_class) => this_class,
            None => self.pool.class(&self.name)?,
        };

        // Every attribute name has to be in the pool before the pool is written out
        let mut attributes = self.header_attributes.clone();
        if !self.inner_classes.is_empty() {
            let inner_classes = InnerClasses(self.inner_classes.clone());
            attributes.push(self.pool.get_attribute(inner_classes)?);
        }
        for (set, name) in [
            (&self.visible_annotations, "RuntimeVisibleAnnotations"),
            (&self.invisible_annotations, "RuntimeInvisibleAnnotations"),
        ] {
            if let Some(attribute) = set.attribute(&mut self.pool, name)? {
                attributes.push(attribute);
            }
        }
        if let Some(attribute) = self.pool.bootstrap_methods_attribute()? {
            attributes.push(attribute);
        }

        let mut bytes = ByteVector::with_capacity(
            self.pool.count() as usize * 8 + self.fields.len() + self.methods.len(),
        );
        bytes.put_u32(MAGIC);
        self.version.serialize(&mut bytes)?;
        self.pool.serialize(&mut bytes)?;
        self.access.serialize(&mut bytes)?;
        this_class.serialize(&mut bytes)?;
        bytes.put_u16(self.super_class.map_or(0, |index| index.0 .0));
        self.interfaces.serialize(&mut bytes)?;
        bytes.put_u16(self.field_count).put_bytes(self.fields.as_slice());
        bytes.put_u16(self.method_count).put_bytes(self.methods.as_slice());
        attributes.serialize(&mut bytes)?;

        log::debug!(
            "Wrote class {} ({} bytes, {} constant pool slot(s))",
            self.name,
            bytes.len(),
            self.pool.count()
        );
        Ok(bytes.into_vec())
    }
}

/// Zero length marker attribute (eg. `Deprecated`)
fn marker(pool: &mut ConstantPool, name: &str) -> Result<Attribute, Error> {
    Ok(Attribute {
        name_index: pool.utf8(name)?,
        info: vec![],
    })
}

impl ClassVisitor for ClassWriter {
    fn visit(
        &mut self,
        version: Version,
        access: ClassAccessFlags,
        name: &str,
        info: &ClassInfo,
    ) -> Result<(), Error> {
        self.version = version;
        self.access = access;
        self.name = name.to_owned();
        self.this_class = Some(self.pool.class(name)?);
        self.super_class = match &info.super_name {
            Some(super_name) => Some(self.pool.class(super_name)?),
            None => None,
        };
        self.interfaces = info
            .interfaces
            .iter()
            .map(|interface| self.pool.class(interface))
            .collect::<Result<_, _>>()?;

        let pool = &mut self.pool;
        let mut attributes = vec![];
        if let Some(source_file) = &info.source_file {
            let source_file = SourceFile(pool.utf8(source_file)?);
            attributes.push(pool.get_attribute(source_file)?);
        }
        if let Some(signature) = &info.signature {
            let signature = Signature(pool.utf8(signature)?);
            attributes.push(pool.get_attribute(signature)?);
        }
        if let Some(nest_host) = &info.nest_host {
            let nest_host = NestHost(pool.class(nest_host)?);
            attributes.push(pool.get_attribute(nest_host)?);
        }
        if !info.nest_members.is_empty() {
            let members = info
                .nest_members
                .iter()
                .map(|member| pool.class(member))
                .collect::<Result<_, _>>()?;
            attributes.push(pool.get_attribute(NestMembers(members))?);
        }
        if info.deprecated {
            attributes.push(marker(pool, "Deprecated")?);
        }
        self.header_attributes = attributes;
        Ok(())
    }

    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        let set = if visible {
            &mut self.visible_annotations
        } else {
            &mut self.invisible_annotations
        };
        Ok(Some(Box::new(set.add(&mut self.pool, descriptor)?)))
    }

    fn visit_inner_class(&mut self, inner_class: &InnerClassInfo) -> Result<(), Error> {
        if !self.inner_class_names.insert(inner_class.name.clone()) {
            return Ok(());
        }
        let outer_class = match &inner_class.outer_name {
            Some(outer_name) => Some(self.pool.class(outer_name)?),
            None => None,
        };
        let inner_name = match &inner_class.inner_name {
            Some(inner_name) => Some(self.pool.utf8(inner_name)?),
            None => None,
        };
        self.inner_classes.push(InnerClass {
            inner_class: self.pool.class(&inner_class.name)?,
            outer_class,
            inner_name,
            access_flags: inner_class.access,
        });
        Ok(())
    }

    fn visit_field(&mut self, field: &FieldInfo) -> Result<Option<Box<dyn FieldVisitor + '_>>, Error> {
        let writer = FieldWriter::new(
            &mut self.pool,
            &mut self.fields,
            &mut self.field_count,
            field,
        )?;
        Ok(Some(Box::new(writer)))
    }

    fn visit_method(
        &mut self,
        method: &MethodInfo,
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>, Error> {
        let compute = self.compute();
        let ClassWriter {
            options,
            pool,
            name,
            methods,
            method_count,
            ..
        } = self;
        let writer = MethodWriter::new(
            pool,
            &*options.hierarchy,
            name.as_str(),
            methods,
            method_count,
            compute,
            method,
        )?;
        Ok(Some(Box::new(writer)))
    }
}

/// Writes one `field_info` when the field's `visit_end` is seen
pub struct FieldWriter<'a> {
    pool: &'a mut ConstantPool,
    output: &'a mut ByteVector,
    count: &'a mut u16,

    access: FieldAccessFlags,
    name_index: Utf8ConstantIndex,
    descriptor_index: Utf8ConstantIndex,

    /// `ConstantValue`, `Signature`, `Deprecated`
    attributes: Vec<Attribute>,
    visible_annotations: AnnotationSet,
    invisible_annotations: AnnotationSet,
}

impl<'a> FieldWriter<'a> {
    fn new(
        pool: &'a mut ConstantPool,
        output: &'a mut ByteVector,
        count: &'a mut u16,
        field: &FieldInfo,
    ) -> Result<FieldWriter<'a>, Error> {
        let name_index = pool.utf8(&field.name)?;
        let descriptor_index = pool.utf8(&field.descriptor)?;

        let mut attributes = vec![];
        if let Some(value) = &field.value {
            let value = ConstantValue(pool.constant(value)?);
            attributes.push(pool.get_attribute(value)?);
        }
        if let Some(signature) = &field.signature {
            let signature = Signature(pool.utf8(signature)?);
            attributes.push(pool.get_attribute(signature)?);
        }
        if field.deprecated {
            attributes.push(marker(pool, "Deprecated")?);
        }

        Ok(FieldWriter {
            pool,
            output,
            count,
            access: field.access,
            name_index,
            descriptor_index,
            attributes,
            visible_annotations: AnnotationSet::default(),
            invisible_annotations: AnnotationSet::default(),
        })
    }
}

impl<'a> FieldVisitor for FieldWriter<'a> {
    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> AnnotationVisitorResult<'_> {
        let set = if visible {
            &mut self.visible_annotations
        } else {
            &mut self.invisible_annotations
        };
        Ok(Some(Box::new(set.add(&mut *self.pool, descriptor)?)))
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        let mut attributes = std::mem::take(&mut self.attributes);
        for (set, name) in [
            (&self.visible_annotations, "RuntimeVisibleAnnotations"),
            (&self.invisible_annotations, "RuntimeInvisibleAnnotations"),
        ] {
            if let Some(attribute) = set.attribute(&mut *self.pool, name)? {
                attributes.push(attribute);
            }
        }

        let output = &mut *self.output;
        self.access.serialize(output)?;
        self.name_index.serialize(output)?;
        self.descriptor_index.serialize(output)?;
        attributes.serialize(output)?;
        *self.count += 1;
        Ok(())
    }
}
