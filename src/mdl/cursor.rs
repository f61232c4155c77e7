//! Byte cursor over a model description, with position tracking for
//! parse diagnostics.

use crate::errors::DendriteError;

/// Longest accepted name or argument token.
pub const TOKEN_MAX: usize = 64;

pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    pub fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn bump(&mut self) -> Option<u8> {
        let byte = self.peek();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    pub fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r' | 0x08)) {
            self.pos += 1;
        }
    }

    pub fn expect(&mut self, byte: u8) -> Result<(), DendriteError> {
        self.skip_whitespace();
        match self.bump() {
            Some(found) if found == byte => Ok(()),
            Some(found) => Err(self.error(format!(
                "expected '{}', found '{}'",
                byte as char, found as char
            ))),
            None => Err(self.error(format!(
                "expected '{}', found end of description",
                byte as char
            ))),
        }
    }

    /// Reads a token terminated by whitespace, a delimiter byte, or the end
    /// of the description. The terminator is left in place.
    pub fn token(&mut self, delimiters: &[u8]) -> Result<String, DendriteError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if delimiters.contains(&byte)
                || matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x08)
            {
                break;
            }
            self.pos += 1;
        }
        let raw = &self.bytes[start..self.pos];
        if raw.is_empty() {
            return Err(self.error("expected a token".to_string()));
        }
        if raw.len() > TOKEN_MAX {
            return Err(self.error(format!("token exceeds {TOKEN_MAX} bytes")));
        }
        String::from_utf8(raw.to_vec())
            .map_err(|_| self.error("token is not valid UTF-8".to_string()))
    }

    pub fn error(&self, message: String) -> DendriteError {
        DendriteError::Parse {
            position: self.pos,
            message,
        }
    }
}
