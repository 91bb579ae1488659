//! Bounds-checked byte helpers shared by the trie and command decoders

use crate::diagnostics::Diagnostics;

/// Forward-only reader over a byte slice
///
/// Every read checks the slice bounds. Failed variable-length reads record a
/// diagnostic and return `None`; they never panic.
pub struct ByteCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn new_at(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub fn is_at_end(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let value = *self.data.get(self.offset)?;
        self.offset += 1;
        Some(value)
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    /// Decode an unsigned LEB128 value
    pub fn read_uleb128(&mut self, diag: &mut Diagnostics) -> Option<u64> {
        let mut result = 0u64;
        let mut bit = 0u32;
        loop {
            let Some(byte) = self.peek_u8() else {
                diag.error("malformed uleb128");
                return None;
            };
            if bit > 63 {
                diag.error("uleb128 too big for uint64");
                return None;
            }
            result |= u64::from(byte & 0x7f) << bit;
            bit += 7;
            self.offset += 1;
            if byte & 0x80 == 0 {
                return Some(result);
            }
        }
    }

    /// Step over a LEB128 value without decoding it.
    /// Returns false if the value runs past the end of the data.
    pub fn skip_leb128(&mut self) -> bool {
        while let Some(byte) = self.read_u8() {
            if byte & 0x80 == 0 {
                return true;
            }
        }
        false
    }

    /// Read a NUL-terminated byte string, consuming the terminator
    pub fn read_cstr(&mut self) -> Option<&'a [u8]> {
        let rest = self.data.get(self.offset..)?;
        let len = rest.iter().position(|&b| b == 0)?;
        self.offset += len + 1;
        Some(&rest[..len])
    }
}

/// NUL-terminated UTF-8 string starting at `offset` inside `bytes`
pub fn c_str_at(bytes: &[u8], offset: usize) -> Option<&str> {
    let rest = bytes.get(offset..)?;
    let len = rest.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&rest[..len]).ok()
}

/// Name stored in a fixed 16-byte field, which is not terminated when full
pub fn fixed_name(raw: &[u8; 16]) -> &str {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..len]).unwrap_or("")
}
