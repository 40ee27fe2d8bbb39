//! Minimal XDR encoder for the transaction subset this protocol signs.
//!
//! Only encoding is implemented: the engine hashes locally-built
//! transactions for signing and never parses ledger bytes (the driver
//! hands it structured envelopes). Values are big-endian and padded to
//! four-byte boundaries per the XDR rules.

/// Accumulates the XDR byte form of nested structures.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u32(v as u32);
    }

    /// Fixed-length opaque data: raw bytes, zero-padded to 4.
    pub fn put_opaque_fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.pad();
    }

    /// Variable-length opaque data: length prefix, bytes, padding.
    pub fn put_opaque(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put_opaque_fixed(bytes);
    }

    pub fn put_string(&mut self, s: &str) {
        self.put_opaque(s.as_bytes());
    }

    /// XDR optional: presence flag followed by the value if present.
    pub fn put_option<T, F>(&mut self, value: Option<&T>, encode: F)
    where
        F: FnOnce(&mut Writer, &T),
    {
        match value {
            Some(v) => {
                self.put_bool(true);
                encode(self, v);
            }
            None => self.put_bool(false),
        }
    }

    fn pad(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }
}

/// Types with a canonical XDR byte form.
pub trait XdrEncode {
    fn encode(&self, w: &mut Writer);

    fn to_xdr(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }
}
