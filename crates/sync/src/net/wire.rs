use glam::{Mat3, Vec3};

use super::protocol::{EntityId, ProtocolError, Transform};

#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    pub fn put_vec3(&mut self, value: Vec3) {
        for component in value.to_array() {
            self.put_f32(component);
        }
    }

    pub fn put_id(&mut self, id: &EntityId) {
        self.buf.extend_from_slice(id.as_bytes());
    }

    pub fn put_transform(&mut self, transform: &Transform) {
        for component in transform.rotation.to_cols_array() {
            self.put_f32(component);
        }
        self.put_vec3(transform.translation);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received datagram. Every read checks the remaining length
/// first, so a short buffer surfaces as `ProtocolError::Truncated` rather
/// than a panic.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.take_array().map(u16::from_be_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.take_array().map(u32::from_be_bytes)
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        self.take_array().map(u64::from_be_bytes)
    }

    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        self.take_array()
            .map(|bytes| f32::from_bits(u32::from_be_bytes(bytes)))
    }

    pub fn vec3(&mut self) -> Result<Vec3, ProtocolError> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    pub fn id(&mut self) -> Result<EntityId, ProtocolError> {
        self.take_array().map(EntityId::from_bytes)
    }

    pub fn transform(&mut self) -> Result<Transform, ProtocolError> {
        let mut cols = [0f32; 9];
        for slot in &mut cols {
            *slot = self.f32()?;
        }
        let translation = self.vec3()?;
        Ok(Transform {
            rotation: Mat3::from_cols_array(&cols),
            translation,
        })
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_layout() {
        let mut writer = WireWriter::default();
        writer.put_u8(0xAB);
        writer.put_u16(0x0102);
        writer.put_u32(0x0304_0506);

        assert_eq!(
            writer.into_bytes(),
            vec![0xAB, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
        );
    }

    #[test]
    fn test_truncated_read() {
        let mut reader = WireReader::new(&[0x00, 0x01]);
        match reader.u32() {
            Err(ProtocolError::Truncated { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_transform_is_48_bytes() {
        let mut writer = WireWriter::default();
        writer.put_transform(&Transform::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(writer.len(), 48);

        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        let decoded = reader.transform().unwrap();
        assert_eq!(decoded.translation, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(decoded.rotation, Mat3::IDENTITY);
        assert!(reader.is_exhausted());
    }
}
