use super::{encode_modified_utf8, Utf8ConstantIndex};
use byteorder::{BigEndian, ByteOrder};
use std::io;

/// Growable output buffer for class file fragments
///
/// All multi-byte values are big-endian. Besides appending, the buffer supports patching values
/// at earlier positions, which is how counts and jump offsets that are only known later get
/// filled in.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct ByteVector {
    data: Vec<u8>,
}

/// Position of a 2-byte value to be filled in later with [`ByteVector::patch_u16`]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Placeholder(usize);

impl ByteVector {
    pub fn new() -> ByteVector {
        ByteVector { data: vec![] }
    }

    pub fn with_capacity(capacity: usize) -> ByteVector {
        ByteVector {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.data.push(value);
        self
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        let mut buf = [0; 2];
        BigEndian::write_u16(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    pub fn put_i16(&mut self, value: i16) -> &mut Self {
        self.put_u16(value as u16)
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        let mut buf = [0; 4];
        BigEndian::write_u32(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.put_u32(value as u32)
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        let mut buf = [0; 8];
        BigEndian::write_i64(&mut buf, value);
        self.data.extend_from_slice(&buf);
        self
    }

    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.put_u32(value.to_bits())
    }

    pub fn put_f64(&mut self, value: f64) -> &mut Self {
        self.put_i64(value.to_bits() as i64)
    }

    /// Length-prefixed modified UTF-8 (the payload of a `Utf8` constant)
    pub fn put_utf8(&mut self, string: &str) -> &mut Self {
        let encoded = encode_modified_utf8(string);
        self.put_u16(encoded.len() as u16).put_bytes(&encoded)
    }

    /// Two bytes (eg. an opcode and a one-byte operand)
    pub fn put11(&mut self, first: u8, second: u8) -> &mut Self {
        self.put_u8(first).put_u8(second)
    }

    /// A byte and a 2-byte value (eg. an opcode and a constant pool index)
    pub fn put12(&mut self, first: u8, second: u16) -> &mut Self {
        self.put_u8(first).put_u16(second)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Reserve room for a 2-byte value (usually a count)
    pub fn reserve_u16(&mut self) -> Placeholder {
        let placeholder = Placeholder(self.data.len());
        self.put_u16(0);
        placeholder
    }

    pub fn patch_u16(&mut self, placeholder: Placeholder, value: u16) {
        self.set_u16(placeholder.0, value);
    }

    /// Overwrite 2 bytes at an earlier position
    pub fn set_u16(&mut self, position: usize, value: u16) {
        BigEndian::write_u16(&mut self.data[position..position + 2], value);
    }

    pub fn set_i16(&mut self, position: usize, value: i16) {
        self.set_u16(position, value as u16);
    }

    /// Overwrite 4 bytes at an earlier position
    pub fn set_i32(&mut self, position: usize, value: i32) {
        BigEndian::write_i32(&mut self.data[position..position + 4], value);
    }

    /// Splice an attribute: name index, 4-byte payload length, then payload
    pub fn put_attribute(&mut self, name_index: Utf8ConstantIndex, payload: &[u8]) -> &mut Self {
        self.put_u16(name_index.0 .0)
            .put_u32(payload.len() as u32)
            .put_bytes(payload)
    }

    /// Pad with zero bytes until the length is a multiple of 4
    pub fn align4(&mut self) -> &mut Self {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        self
    }
}

/// Lets `Serialize` implementations write straight into the buffer
impl io::Write for ByteVector {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{ConstantIndex, Serialize};

    #[test]
    fn typed_writes_are_big_endian() {
        let mut bytes = ByteVector::new();
        bytes
            .put_u8(0xCA)
            .put_u16(0xFEBA)
            .put_i32(-2)
            .put12(0x11, 0x0203)
            .put11(1, 2);
        assert_eq!(
            bytes.as_slice(),
            &[0xCA, 0xFE, 0xBA, 0xFF, 0xFF, 0xFF, 0xFE, 0x11, 0x02, 0x03, 1, 2]
        );
    }

    #[test]
    fn reserved_count_is_patched() {
        let mut bytes = ByteVector::new();
        bytes.put_u8(7);
        let count = bytes.reserve_u16();
        bytes.put_u8(1).put_u8(2).put_u8(3);
        bytes.patch_u16(count, 3);
        assert_eq!(bytes.as_slice(), &[7, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn attribute_has_length_prefix() {
        let mut payload = ByteVector::new();
        42u16.serialize(&mut payload).unwrap();
        let mut bytes = ByteVector::new();
        bytes.put_attribute(Utf8ConstantIndex(ConstantIndex(5)), payload.as_slice());
        assert_eq!(bytes.as_slice(), &[0, 5, 0, 0, 0, 2, 0, 42]);
    }

    #[test]
    fn utf8_is_length_prefixed() {
        let mut bytes = ByteVector::new();
        bytes.put_utf8("a\u{0}");
        assert_eq!(bytes.as_slice(), &[0, 3, b'a', 0xC0, 0x80]);
    }

    #[test]
    fn alignment_padding() {
        let mut bytes = ByteVector::new();
        bytes.put_u8(0xAA).align4();
        assert_eq!(bytes.len(), 4);
        bytes.align4();
        assert_eq!(bytes.len(), 4);
    }
}
