//! Binary update protocol
//!
//! A request blob is a 0x40-byte [`UpdateDataHeader`] followed by the input
//! sections in a fixed order; the response uses the same header layout over
//! the output sections. [`layout`] defines the records, [`request`] builds
//! request blobs and decodes responses for clients and tests.

pub mod layout;
pub mod request;

use bytemuck::Pod;

use crate::error::{RendererError, RendererResult};

pub use layout::*;
pub use request::{MixSection, SplitterSection, UpdateRequest, UpdateResponse};

/// Size of the request/response header
pub const HEADER_SIZE: usize = std::mem::size_of::<UpdateDataHeader>();

/// Round `value` up to a multiple of `align` (a power of two)
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Bounds-checked cursor over an input blob
pub struct SectionReader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> SectionReader<'a> {
    pub fn new(buffer: &'a [u8], offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Take the next `len` bytes
    pub fn bytes(&mut self, len: usize) -> RendererResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| {
                RendererError::invalid(format!(
                    "read of {:#x} bytes at {:#x} overruns input of {:#x}",
                    len,
                    self.offset,
                    self.buffer.len()
                ))
            })?;
        let slice = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Read one record
    pub fn read<T: Pod>(&mut self) -> RendererResult<T> {
        let bytes = self.bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Skip forward to an absolute offset
    pub fn seek(&mut self, offset: usize) -> RendererResult<()> {
        if offset > self.buffer.len() {
            return Err(RendererError::invalid(format!(
                "seek to {:#x} past input of {:#x}",
                offset,
                self.buffer.len()
            )));
        }
        self.offset = offset;
        Ok(())
    }
}

/// Bounds-checked cursor over an output blob
pub struct SectionWriter<'a> {
    buffer: &'a mut [u8],
    offset: usize,
}

impl<'a> SectionWriter<'a> {
    pub fn new(buffer: &'a mut [u8], offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Append one record
    pub fn write<T: Pod>(&mut self, value: &T) -> RendererResult<()> {
        let bytes = bytemuck::bytes_of(value);
        let end = self
            .offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| {
                RendererError::invalid(format!(
                    "write of {:#x} bytes at {:#x} overruns output of {:#x}",
                    bytes.len(),
                    self.offset,
                    self.buffer.len()
                ))
            })?;
        self.buffer[self.offset..end].copy_from_slice(bytes);
        self.offset = end;
        Ok(())
    }

    /// Write a record at an absolute offset without moving the cursor
    pub fn write_at<T: Pod>(&mut self, offset: usize, value: &T) -> RendererResult<()> {
        let saved = self.offset;
        self.offset = offset;
        let result = self.write(value);
        self.offset = saved;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(0x34, 16), 0x40);
    }

    #[test]
    fn test_reader_bounds() {
        let bytes = [1u8, 0, 0, 0, 2, 0];
        let mut reader = SectionReader::new(&bytes, 0);
        assert_eq!(reader.read::<u32>().unwrap(), 1);
        assert!(reader.read::<u32>().is_err());
        assert_eq!(reader.read::<u16>().unwrap(), 2);
        assert_eq!(reader.offset(), 6);
    }

    #[test]
    fn test_writer_bounds() {
        let mut bytes = [0u8; 6];
        let mut writer = SectionWriter::new(&mut bytes, 0);
        writer.write(&7u32).unwrap();
        assert!(writer.write(&7u32).is_err());
        writer.write_at(4, &9u16).unwrap();
        assert_eq!(writer.offset(), 4);
        assert_eq!(bytes, [7, 0, 0, 0, 9, 0]);
    }
}
