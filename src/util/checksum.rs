//! Checksumming readers and writers for the binary file formats.
//!
//! Every byte written through a [`ChecksumWriter`] feeds a running CRC32, so
//! a file can end with a trailer that [`ChecksumReader::verify_trailer`]
//! checks on the way back in.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, RwiError};

/// A writer that tracks position and a CRC32 of everything written.
pub struct ChecksumWriter<W: Write> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: Write> ChecksumWriter<W> {
    /// Create a new checksumming writer.
    pub fn new(writer: W) -> Self {
        ChecksumWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    /// Write a u32 value (big-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    /// Write a u64 value (big-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append the CRC32 of everything written and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let crc = self.hasher.clone().finalize();
        self.writer.write_u32::<BigEndian>(crc)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// A reader that tracks a CRC32 of everything read.
pub struct ChecksumReader<R: Read> {
    reader: R,
    hasher: Hasher,
    position: u64,
}

impl<R: Read> ChecksumReader<R> {
    /// Create a new checksumming reader.
    pub fn new(reader: R) -> Self {
        ChecksumReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a u32 value (big-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a u64 value (big-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Fill `buf` completely.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf)?;
        self.hasher.update(buf);
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the CRC32 trailer and compare it with the running checksum.
    pub fn verify_trailer(mut self) -> Result<()> {
        let expected = self.hasher.clone().finalize();
        let stored = self.reader.read_u32::<BigEndian>()?;
        if stored != expected {
            return Err(RwiError::decode(format!(
                "checksum mismatch: stored {stored:08x}, computed {expected:08x}"
            )));
        }
        Ok(())
    }
}
