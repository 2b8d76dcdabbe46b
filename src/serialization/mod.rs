// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Big-endian, length-prefixed encoding used by the published-share format,
//! the common-state stream and the state transfer wire.
//!
//! Integers are fixed width. A byte string is `i32 length || bytes`, with
//! `-1` standing for an absent value.

use crate::{
    errors::{InternalError, Result},
    parameters::MAX_WIRE_FIELD_LENGTH,
};
use std::io::Read;

/// Appends values to a growing buffer.
#[derive(Debug, Default, Clone)]
pub(crate) struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub(crate) fn bool(&mut self, value: bool) -> &mut Self {
        self.u8(u8::from(value))
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub(crate) fn i32(&mut self, value: i32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub(crate) fn i64(&mut self, value: i64) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// A collection size. Fails if it does not fit the wire's `i32`.
    pub(crate) fn count(&mut self, value: usize) -> Result<&mut Self> {
        let value = i32::try_from(value).map_err(|_| InternalError::Serialization)?;
        Ok(self.i32(value))
    }

    pub(crate) fn bytes(&mut self, value: &[u8]) -> Result<&mut Self> {
        self.count(value.len())?;
        self.buffer.extend_from_slice(value);
        Ok(self)
    }

    pub(crate) fn optional_bytes(&mut self, value: Option<&[u8]>) -> Result<&mut Self> {
        match value {
            Some(bytes) => self.bytes(bytes),
            None => Ok(self.i32(-1)),
        }
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Consumes values from a byte slice written by [`WireWriter`].
#[derive(Debug, Clone)]
pub(crate) struct WireReader<'a> {
    input: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.input.len() {
            return Err(InternalError::Serialization);
        }
        let (head, tail) = self.input.split_at(len);
        self.input = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(InternalError::Serialization),
        }
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub(crate) fn count(&mut self) -> Result<usize> {
        let value = self.i32()?;
        let value = usize::try_from(value).map_err(|_| InternalError::Serialization)?;
        if value > MAX_WIRE_FIELD_LENGTH {
            return Err(InternalError::Serialization);
        }
        Ok(value)
    }

    pub(crate) fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.count()?;
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn optional_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len).map_err(|_| InternalError::Serialization)?;
        if len > MAX_WIRE_FIELD_LENGTH {
            return Err(InternalError::Serialization);
        }
        Ok(Some(self.take(len)?.to_vec()))
    }

    /// Fail unless every byte was consumed.
    pub(crate) fn finish(self) -> Result<()> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(InternalError::Serialization)
        }
    }
}

/// Blocking counterpart of [`WireReader`] over a socket.
#[derive(Debug)]
pub(crate) struct StreamReader<R: Read> {
    inner: R,
}

impl<R: Read> StreamReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.inner.read_exact(&mut out)?;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub(crate) fn count(&mut self) -> Result<usize> {
        let value = usize::try_from(self.i32()?).map_err(|_| InternalError::Serialization)?;
        if value > MAX_WIRE_FIELD_LENGTH {
            return Err(InternalError::Serialization);
        }
        Ok(value)
    }

    /// Read `len` bytes. The buffer grows with what actually arrives, not
    /// with the declared length.
    pub(crate) fn exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let _ = (&mut self.inner).take(len as u64).read_to_end(&mut out)?;
        if out.len() != len {
            return Err(InternalError::Transport(format!(
                "stream ended after {} of {} bytes",
                out.len(),
                len
            )));
        }
        Ok(out)
    }

    pub(crate) fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.count()?;
        self.exact(len)
    }

    /// Read `len` bytes in chunks, handing each chunk to `sink` as it
    /// arrives.
    pub(crate) fn chunked(
        &mut self,
        len: usize,
        chunk: usize,
        mut sink: impl FnMut(&[u8]),
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buffer = vec![0u8; chunk.max(1).min(len)];
        while out.len() < len {
            let want = (len - out.len()).min(buffer.len());
            self.inner.read_exact(&mut buffer[..want])?;
            sink(&buffer[..want]);
            out.extend_from_slice(&buffer[..want]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_consumes_what_the_writer_wrote() -> Result<()> {
        let mut writer = WireWriter::new();
        writer.u8(7).bool(true).u32(9).i64(-3);
        writer.bytes(b"abc")?.optional_bytes(None)?.optional_bytes(Some(b""))?;
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.u8()?, 7);
        assert!(reader.bool()?);
        assert_eq!(reader.u32()?, 9);
        assert_eq!(reader.i64()?, -3);
        assert_eq!(reader.bytes()?, b"abc".to_vec());
        assert_eq!(reader.optional_bytes()?, None);
        assert_eq!(reader.optional_bytes()?, Some(Vec::new()));
        reader.finish()
    }

    #[test]
    fn truncated_and_oversized_fields_are_rejected() {
        let mut writer = WireWriter::new();
        writer.i32(10);
        let mut bytes = writer.into_bytes();
        bytes.extend_from_slice(b"short");
        assert!(WireReader::new(&bytes).bytes().is_err());

        let mut writer = WireWriter::new();
        writer.i32(-2);
        let bytes = writer.into_bytes();
        assert!(WireReader::new(&bytes).optional_bytes().is_err());
        assert!(WireReader::new(&[2u8]).bool().is_err());
        assert!(WireReader::new(&[0u8, 1]).finish().is_err());
    }

    #[test]
    fn stream_reader_reports_chunks() -> Result<()> {
        let mut writer = WireWriter::new();
        writer.bytes(&[5u8; 10])?;
        let bytes = writer.into_bytes();
        let mut reader = StreamReader::new(bytes.as_slice());
        let len = reader.count()?;
        let mut seen = 0;
        let data = reader.chunked(len, 4, |c| seen += c.len())?;
        assert_eq!(data, vec![5u8; 10]);
        assert_eq!(seen, 10);
        Ok(())
    }

    #[test]
    fn declared_lengths_beyond_the_stream_fail() -> Result<()> {
        let mut writer = WireWriter::new();
        writer.count(MAX_WIRE_FIELD_LENGTH)?;
        writer.u8(1).u8(2).u8(3);
        let bytes = writer.into_bytes();

        let mut reader = StreamReader::new(bytes.as_slice());
        assert!(matches!(reader.bytes(), Err(InternalError::Transport(_))));

        let mut reader = StreamReader::new(bytes.as_slice());
        let len = reader.count()?;
        let mut seen = 0;
        assert!(reader.chunked(len, 1 << 16, |c| seen += c.len()).is_err());
        assert_eq!(seen, 0);
        Ok(())
    }
}
