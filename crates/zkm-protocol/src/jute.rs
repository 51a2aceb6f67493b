//! Jute primitive encoding.
//!
//! All integers are big-endian. Buffers, strings and vectors carry an `int`
//! length prefix where `-1` encodes null.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use zkm_types::{Acl, Id, Perms};

use crate::error::{ProtocolError, ProtocolResult};

/// A record with a fixed jute layout.
pub trait JuteRecord: Sized {
    fn write(&self, w: &mut JuteWriter);
    fn read(r: &mut JuteReader) -> ProtocolResult<Self>;
}

#[derive(Debug, Default)]
pub struct JuteWriter {
    buf: BytesMut,
}

impl JuteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_int(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_long(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn write_buffer(&mut self, v: Option<&[u8]>) {
        match v {
            Some(bytes) => {
                self.write_int(bytes.len() as i32);
                self.buf.put_slice(bytes);
            }
            None => self.write_int(-1),
        }
    }

    pub fn write_string(&mut self, v: &str) {
        self.write_buffer(Some(v.as_bytes()));
    }

    pub fn write_vec<T>(&mut self, items: &[T], mut each: impl FnMut(&mut Self, &T)) {
        self.write_int(items.len() as i32);
        for item in items {
            each(self, item);
        }
    }

    pub fn write_record<T: JuteRecord>(&mut self, record: &T) {
        record.write(self);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

#[derive(Debug)]
pub struct JuteReader {
    buf: Bytes,
}

impl JuteReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> ProtocolResult<()> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_int(&mut self) -> ProtocolResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_long(&mut self) -> ProtocolResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_bool(&mut self) -> ProtocolResult<bool> {
        self.need(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn read_buffer(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        let len = self.read_int()?;
        match len {
            -1 => Ok(None),
            n if n < 0 => Err(ProtocolError::InvalidLength(n)),
            n => {
                self.need(n as usize)?;
                Ok(Some(self.buf.split_to(n as usize).to_vec()))
            }
        }
    }

    /// Read a string; null reads as empty.
    pub fn read_string(&mut self) -> ProtocolResult<String> {
        let bytes = self.read_buffer()?.unwrap_or_default();
        String::from_utf8(bytes).map_err(|e| ProtocolError::InvalidField {
            field: "string",
            reason: e.to_string(),
        })
    }

    /// Read a vector; null reads as empty.
    pub fn read_vec<T>(
        &mut self,
        mut each: impl FnMut(&mut Self) -> ProtocolResult<T>,
    ) -> ProtocolResult<Vec<T>> {
        let count = self.read_int()?;
        match count {
            -1 => Ok(Vec::new()),
            n if n < 0 => Err(ProtocolError::InvalidLength(n)),
            n => {
                // Every element is at least one byte.
                self.need(n as usize)?;
                (0..n).map(|_| each(self)).collect()
            }
        }
    }

    pub fn read_record<T: JuteRecord>(&mut self) -> ProtocolResult<T> {
        T::read(self)
    }
}

impl JuteRecord for Acl {
    fn write(&self, w: &mut JuteWriter) {
        w.write_int(self.perms.bits() as i32);
        w.write_string(&self.id.scheme);
        w.write_string(&self.id.id);
    }

    fn read(r: &mut JuteReader) -> ProtocolResult<Self> {
        let bits = r.read_int()?;
        let perms = Perms::from_bits(bits as u32).map_err(|e| ProtocolError::InvalidField {
            field: "perms",
            reason: e.to_string(),
        })?;
        let scheme = r.read_string()?;
        let id = r.read_string()?;
        Ok(Acl::new(perms, Id::new(scheme, id)))
    }
}

pub fn write_acl(w: &mut JuteWriter, acl: &[Acl]) {
    w.write_vec(acl, |w, entry| entry.write(w));
}

pub fn read_acl(r: &mut JuteReader) -> ProtocolResult<Vec<Acl>> {
    r.read_vec(Acl::read)
}
