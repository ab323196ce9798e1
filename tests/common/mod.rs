#![allow(dead_code)]

use classweave::jvm::analysis::{ComputeMode, MapHierarchy};
use classweave::jvm::class_file::{BytecodeReader, Version};
use classweave::jvm::*;

/// Class extending `java/lang/Object`, with whatever `build` adds to it
pub fn build_class(
    name: &str,
    options: WriterOptions,
    build: impl FnOnce(&mut ClassWriter) -> Result<(), Error>,
) -> Vec<u8> {
    let mut writer = ClassWriter::new(options);
    let info = ClassInfo {
        super_name: Some(String::from("java/lang/Object")),
        ..ClassInfo::default()
    };
    writer
        .visit(Version::JAVA8, ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, name, &info)
        .unwrap();
    build(&mut writer).unwrap();
    writer.visit_end().unwrap();
    writer.to_bytes().unwrap()
}

pub fn frames_with(hierarchy: MapHierarchy) -> WriterOptions {
    WriterOptions::new(ComputeMode::Frames).with_hierarchy(hierarchy)
}

pub fn static_method(name: &str, descriptor: &str) -> MethodInfo {
    MethodInfo {
        access: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        signature: None,
        exceptions: vec![],
        deprecated: false,
    }
}

pub fn trace(bytes: &[u8]) -> String {
    let mut tracer = Tracer::new();
    ClassReader::new(bytes).unwrap().accept(&mut tracer).unwrap();
    tracer.to_string()
}

/// Read the class back and write it out again
pub fn rewrite(bytes: &[u8], options: WriterOptions) -> Vec<u8> {
    let reader = ClassReader::new(bytes).unwrap();
    let mut writer = ClassWriter::from_reader(&reader, options).unwrap();
    reader.accept(&mut writer).unwrap();
    writer.to_bytes().unwrap()
}

/// Parts of a `Code` attribute, pulled straight out of the class file bytes
#[derive(Debug)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub handlers: u16,

    /// Nested attributes, by name
    pub attributes: Vec<(String, Vec<u8>)>,
}

impl Code {
    pub fn attribute(&self, name: &str) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, payload)| payload.as_slice())
    }
}

pub fn code_of(bytes: &[u8], method_name: &str) -> Code {
    let reader = BytecodeReader::new(bytes).unwrap();
    let interfaces = reader.u16_at(reader.header() + 6).unwrap() as usize;
    let mut offset = reader.header() + 8 + 2 * interfaces;
    let fields = reader.u16_at(offset).unwrap();
    offset += 2;
    for _ in 0..fields {
        offset = reader.skip_attributes(offset + 6).unwrap();
    }
    let methods = reader.u16_at(offset).unwrap();
    offset += 2;
    for _ in 0..methods {
        let name = reader.utf8_at(offset + 2).unwrap();
        let mut attribute = offset + 8;
        for _ in 0..reader.u16_at(offset + 6).unwrap() {
            let length = reader.u32_at(attribute + 2).unwrap() as usize;
            if name == method_name && reader.utf8_at(attribute).unwrap() == "Code" {
                return parse_code(&reader, attribute + 6);
            }
            attribute += 6 + length;
        }
        offset = reader.skip_attributes(offset + 6).unwrap();
    }
    panic!("no code for method {}", method_name)
}

fn parse_code(reader: &BytecodeReader, offset: usize) -> Code {
    let code_length = reader.u32_at(offset + 4).unwrap() as usize;
    let code = reader.bytes_at(offset + 8, code_length).unwrap().to_vec();
    let handlers_offset = offset + 8 + code_length;
    let handlers = reader.u16_at(handlers_offset).unwrap();
    let attributes_offset = handlers_offset + 2 + 8 * handlers as usize;

    let mut attributes = vec![];
    let mut attribute = attributes_offset + 2;
    for _ in 0..reader.u16_at(attributes_offset).unwrap() {
        let name = reader.utf8_at(attribute).unwrap();
        let length = reader.u32_at(attribute + 2).unwrap() as usize;
        let payload = reader.bytes_at(attribute + 6, length).unwrap().to_vec();
        attributes.push((name, payload));
        attribute += 6 + length;
    }

    Code {
        max_stack: reader.u16_at(offset).unwrap(),
        max_locals: reader.u16_at(offset + 2).unwrap(),
        code,
        handlers,
        attributes,
    }
}

/// Resolve a class constant index found inside an attribute payload
pub fn class_name(bytes: &[u8], index: u16) -> String {
    BytecodeReader::new(bytes).unwrap().read_class(index).unwrap()
}
