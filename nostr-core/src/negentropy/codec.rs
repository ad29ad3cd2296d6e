//! Varint encoding and a bounds-checked message reader.

use super::error::{NegentropyError, Result};

/// Append `value` as a varint.
///
/// Varints are base-128 digits, most significant digit first. Bit 7 is set
/// on every byte except the last.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    let mut digits = [0u8; 10];
    let mut len = 0;
    loop {
        digits[len] = (value & 0x7f) as u8;
        len += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }

    for i in (0..len).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(digits[i] | continuation);
    }
}

/// Cursor over an inbound message.
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes left.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// Nothing left to read.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read one byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        let (&byte, rest) = self.data.split_first().ok_or(NegentropyError::Truncated)?;
        self.data = rest;
        Ok(byte)
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.data.len() {
            return Err(NegentropyError::Truncated);
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    /// Read one varint.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        loop {
            let byte = self.read_byte()?;
            if value > (u64::MAX >> 7) {
                return Err(NegentropyError::VarintOverflow);
            }
            value = (value << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }
}
