//! Framed reading and writing of the scalar and byte-string encodings used
//! on the command channel.
//!
//! Integers travel in the variable-length encoding historically used by the
//! host: values in `[-112, 127]` occupy a single byte; anything else is a
//! length-prefix byte followed by 1-8 big-endian magnitude bytes, with
//! negative values stored as their one's complement. Strings and byte blobs
//! are a varint byte-count followed by the payload.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use errors::*;

/// A buffered-by-caller source of framed values.
pub struct InStream<R: Read> {
    inner: R,
}

impl<R: Read> InStream<R> {
    pub fn new(inner: R) -> InStream<R> {
        InStream { inner: inner }
    }

    /// Reads a variable-length encoded i64.
    pub fn read_vlong(&mut self) -> Result<i64> {
        let first = self.inner.read_u8()? as i8;
        self.finish_vlong(first)
    }

    /// Reads a variable-length encoded i32, rejecting out-of-range values.
    pub fn read_vint(&mut self) -> Result<i32> {
        let value = self.read_vlong()?;
        if value < i32::min_value() as i64 || value > i32::max_value() as i64 {
            bail!(ErrorKind::Protocol(
                format!("varint {} out of 32-bit range", value),
            ));
        }
        Ok(value as i32)
    }

    /// Like `read_vint`, but returns `None` on a clean end of stream at a
    /// frame boundary. Truncation inside a frame is still an error.
    pub fn try_read_vint(&mut self) -> Result<Option<i32>> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(ref err) if err.kind() == ::std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        let value = self.finish_vlong(buf[0] as i8)?;
        if value < i32::min_value() as i64 || value > i32::max_value() as i64 {
            bail!(ErrorKind::Protocol(
                format!("varint {} out of 32-bit range", value),
            ));
        }
        Ok(Some(value as i32))
    }

    fn finish_vlong(&mut self, first: i8) -> Result<i64> {
        let len = vint_size(first);
        if len == 1 {
            return Ok(first as i64);
        }
        let mut value: i64 = 0;
        for _ in 0..(len - 1) {
            let byte = self.inner.read_u8()?;
            value = (value << 8) | i64::from(byte);
        }
        if vint_negative(first) {
            Ok(!value)
        } else {
            Ok(value)
        }
    }

    /// Reads a fixed-width 8-byte big-endian i64.
    pub fn read_long(&mut self) -> Result<i64> {
        Ok(self.inner.read_i64::<BigEndian>()?)
    }

    /// Reads a 4-byte big-endian IEEE 754 float.
    pub fn read_float(&mut self) -> Result<f32> {
        Ok(self.inner.read_f32::<BigEndian>()?)
    }

    /// Reads a varint byte-count followed by that many raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let count = self.read_vint()?;
        if count < 0 {
            bail!(ErrorKind::Protocol(
                format!("negative byte-string length {}", count),
            ));
        }
        let mut buf = vec![0u8; count as usize];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).chain_err(|| "string field is not valid UTF-8")
    }
}

/// A sink of framed values. Writes are buffered by the underlying writer;
/// `flush` pushes them down to the channel.
pub struct OutStream<W: Write> {
    inner: W,
}

impl<W: Write> OutStream<W> {
    pub fn new(inner: W) -> OutStream<W> {
        OutStream { inner: inner }
    }

    pub fn write_vlong(&mut self, value: i64) -> Result<()> {
        if value >= -112 && value <= 127 {
            self.inner.write_u8(value as i8 as u8)?;
            return Ok(());
        }
        let mut len: i32 = -112;
        let mut magnitude = value;
        if magnitude < 0 {
            magnitude = !magnitude;
            len = -120;
        }
        let mut tmp = magnitude;
        while tmp != 0 {
            tmp >>= 8;
            len -= 1;
        }
        self.inner.write_u8(len as i8 as u8)?;
        let count = if len < -120 { -(len + 120) } else { -(len + 112) };
        let mut idx = count;
        while idx != 0 {
            let shift = (idx - 1) * 8;
            self.inner.write_u8(((magnitude >> shift) & 0xff) as u8)?;
            idx -= 1;
        }
        Ok(())
    }

    pub fn write_vint(&mut self, value: i32) -> Result<()> {
        self.write_vlong(i64::from(value))
    }

    pub fn write_long(&mut self, value: i64) -> Result<()> {
        Ok(self.inner.write_i64::<BigEndian>(value)?)
    }

    pub fn write_float(&mut self, value: f32) -> Result<()> {
        Ok(self.inner.write_f32::<BigEndian>(value)?)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > i32::max_value() as usize {
            bail!(ErrorKind::Protocol(
                format!("byte string of {} bytes exceeds frame limit", bytes.len()),
            ));
        }
        self.write_vint(bytes.len() as i32)?;
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.inner.flush()?)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn vint_size(first: i8) -> i32 {
    if first >= -112 {
        1
    } else if first < -120 {
        -119 - i32::from(first)
    } else {
        -111 - i32::from(first)
    }
}

fn vint_negative(first: i8) -> bool {
    first < -120 || (first >= -112 && first < 0)
}
