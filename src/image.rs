//! Positioned reads into a byte-addressable image.
//!
//! Stands in for the specification's externally-supplied
//! `read(fs, offset, buf, len) -> ssize_t`: any `Read + Seek` source (a
//! `File` opened on a raw device, a partition carved out of one, or an
//! in-memory `Cursor` in tests) can back a filesystem handle.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Byte order detected (or assumed) for a filesystem instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Wraps a `Read + Seek` source with an optional base offset, so all driver
/// code addresses the image in partition-relative bytes.
pub struct ImageReader<R> {
    inner: R,
    base_offset: u64,
}

impl<R: Read + Seek> ImageReader<R> {
    pub fn new(inner: R, base_offset: u64) -> Self {
        Self { inner, base_offset }
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Borrows the underlying source, e.g. to inspect a [`CountingReader`]'s
    /// read count in tests.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Reads exactly `buf.len()` bytes starting at `offset` (relative to
    /// `base_offset`). A short read is reported as [`Error::Io`].
    pub fn read_at(&mut self, context: &str, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner
            .seek(SeekFrom::Start(self.base_offset + offset))
            .map_err(|e| Error::io(context.to_string(), e))?;
        self.inner
            .read_exact(buf)
            .map_err(|e| Error::io(context.to_string(), e))
    }

    /// Total size of the image from `base_offset` to its end, in bytes.
    pub fn len(&mut self, context: &str) -> Result<u64> {
        let end = self
            .inner
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::io(context.to_string(), e))?;
        Ok(end.saturating_sub(self.base_offset))
    }
}

/// Reads a 16-bit integer out of `bytes` (must hold at least 2 bytes) in the
/// given byte order.
pub fn getu16(endian: Endian, bytes: &[u8]) -> u16 {
    match endian {
        Endian::Little => LittleEndian::read_u16(bytes),
        Endian::Big => BigEndian::read_u16(bytes),
    }
}

/// Reads a 32-bit integer out of `bytes` (must hold at least 4 bytes).
pub fn getu32(endian: Endian, bytes: &[u8]) -> u32 {
    match endian {
        Endian::Little => LittleEndian::read_u32(bytes),
        Endian::Big => BigEndian::read_u32(bytes),
    }
}

/// Reads a 48-bit integer (the width of an NTFS MFT record number) out of
/// `bytes` (must hold at least 6 bytes), zero-extended to `u64`.
pub fn getu48(endian: Endian, bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    match endian {
        Endian::Little => {
            buf[..6].copy_from_slice(&bytes[..6]);
            u64::from_le_bytes(buf)
        }
        Endian::Big => {
            buf[2..].copy_from_slice(&bytes[..6]);
            u64::from_be_bytes(buf)
        }
    }
}

/// Reads a 64-bit integer out of `bytes` (must hold at least 8 bytes).
pub fn getu64(endian: Endian, bytes: &[u8]) -> u64 {
    match endian {
        Endian::Little => LittleEndian::read_u64(bytes),
        Endian::Big => BigEndian::read_u64(bytes),
    }
}

/// A reader that counts how many times [`ImageReader::read_at`] actually hit
/// the underlying source — used by cache tests to prove that a second lookup
/// for the same tag is a cache hit rather than a second disk read.
pub struct CountingReader<R> {
    inner: R,
    pub reads: usize,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, reads: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
