use crate::error::Result;
use crate::image::MemoryImage;

/// Random access to flash contents.
///
/// `read` is the only primitive; the field helpers are built on it.
pub trait ByteSource {
    fn size(&self) -> usize;

    fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>>;

    fn read_u8(&mut self, offset: usize) -> Result<u8> {
        Ok(self.read(offset, 1)?[0])
    }

    fn read_u16_le(&mut self, offset: usize) -> Result<u16> {
        let b = self.read(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32_le(&mut self, offset: usize) -> Result<u32> {
        let b = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl ByteSource for MemoryImage {
    fn size(&self) -> usize {
        MemoryImage::size(self)
    }

    fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>> {
        Ok(self.get(offset, length)?.to_vec())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>> {
        (**self).read(offset, length)
    }
}
