//! Row Codec
//!
//! A row travels (and is stored on disk) as
//! `key SP (column SP length SP value SP)*`, terminated by a newline or by
//! the end of the input. `length` is the decimal byte length of `value`, so
//! values may hold arbitrary bytes, including spaces and newlines. Keys and
//! column names are delimited by spaces and must not contain spaces or
//! newlines themselves.
//!
//! A scan response is a sequence of records, each followed by `\n`, closed
//! by an empty line.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

const SP: u8 = b' ';
const NL: u8 = b'\n';

/// Longest key, column name or length field accepted by the decoder.
const MAX_TOKEN_LEN: usize = 16 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowCodecError {
    #[error("value for column '{column}' declares {declared} bytes but only {available} are available")]
    LengthMismatch {
        column: String,
        declared: usize,
        available: usize,
    },

    #[error("expected a space after the value of column '{column}'")]
    MissingSeparator { column: String },

    #[error("invalid length field '{0}'")]
    InvalidLength(String),

    #[error("record ends in the middle of a field")]
    Truncated,

    #[error("field exceeds {MAX_TOKEN_LEN} bytes")]
    FieldTooLong,

    #[error("key or column name is not valid UTF-8")]
    InvalidUtf8,
}

/// A single record: a key plus a set of named byte columns.
///
/// Columns are kept sorted by name, which makes column iteration order
/// (and therefore every per-row fold) deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    key: String,
    columns: BTreeMap<String, Vec<u8>>,
}

impl Row {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Replaces the whole value stored under `column`.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.columns.insert(column.into(), value.into());
    }

    pub fn get_bytes(&self, column: &str) -> Option<&[u8]> {
        self.columns.get(column).map(Vec::as_slice)
    }

    /// Column value as text; invalid UTF-8 is replaced, not rejected.
    pub fn get(&self, column: &str) -> Option<String> {
        self.get_bytes(column)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Iterates `(column, value)` in column order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.columns
            .iter()
            .map(|(column, value)| (column.as_str(), value.as_slice()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.key.len()
                + 1
                + self
                    .columns
                    .iter()
                    .map(|(c, v)| c.len() + v.len() + 24)
                    .sum::<usize>(),
        );
        out.extend_from_slice(self.key.as_bytes());
        out.push(SP);
        for (column, value) in &self.columns {
            out.extend_from_slice(column.as_bytes());
            out.push(SP);
            out.extend_from_slice(value.len().to_string().as_bytes());
            out.push(SP);
            out.extend_from_slice(value);
            out.push(SP);
        }
        out
    }

    /// Decodes exactly one record from `bytes`. `Ok(None)` means the input
    /// held no record (empty, or an end-of-stream blank line).
    pub fn decode(bytes: &[u8]) -> Result<Option<Row>, RowCodecError> {
        match decode_prefix(bytes, true)? {
            Decoded::Row(row, _) => Ok(Some(row)),
            Decoded::End(_) | Decoded::Incomplete => Ok(None),
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.key)?;
        for (i, (column, value)) in self.columns.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}: {}", sep, column, String::from_utf8_lossy(value))?;
        }
        write!(f, " }}")
    }
}

/// Result of decoding from the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete row and the number of bytes it consumed.
    Row(Row, usize),
    /// End of stream: an empty line (consumed bytes given) or exhausted input.
    End(usize),
    /// More bytes are needed; only returned when `eof` is false.
    Incomplete,
}

enum Token<'a> {
    Word(&'a [u8], usize),
    LineEnd(usize),
    Exhausted,
    Incomplete,
}

fn next_token(buf: &[u8], pos: usize, eof: bool) -> Result<Token<'_>, RowCodecError> {
    let rest = &buf[pos..];
    match rest.iter().position(|&b| b == SP || b == NL) {
        Some(i) if i > MAX_TOKEN_LEN => Err(RowCodecError::FieldTooLong),
        Some(i) if rest[i] == SP => Ok(Token::Word(&rest[..i], pos + i + 1)),
        Some(i) if i == 0 => Ok(Token::LineEnd(pos + 1)),
        // a newline in the middle of a field
        Some(_) => Err(RowCodecError::Truncated),
        None if rest.len() > MAX_TOKEN_LEN => Err(RowCodecError::FieldTooLong),
        None if !eof => Ok(Token::Incomplete),
        None if rest.is_empty() => Ok(Token::Exhausted),
        None => Err(RowCodecError::Truncated),
    }
}

fn utf8(bytes: &[u8]) -> Result<String, RowCodecError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| RowCodecError::InvalidUtf8)
}

/// Decodes one record from the front of `buf`.
///
/// `eof` tells the decoder whether more bytes may still arrive; with
/// `eof == false` a record cut short yields [`Decoded::Incomplete`], with
/// `eof == true` it is an error.
pub fn decode_prefix(buf: &[u8], eof: bool) -> Result<Decoded, RowCodecError> {
    let (key, mut pos) = match next_token(buf, 0, eof)? {
        Token::Word(key, next) => (utf8(key)?, next),
        Token::LineEnd(next) => return Ok(Decoded::End(next)),
        Token::Exhausted => return Ok(Decoded::End(0)),
        Token::Incomplete => return Ok(Decoded::Incomplete),
    };

    let mut row = Row::new(key);
    loop {
        let (column, next) = match next_token(buf, pos, eof)? {
            Token::Word(column, next) => (utf8(column)?, next),
            Token::LineEnd(next) => return Ok(Decoded::Row(row, next)),
            Token::Exhausted => return Ok(Decoded::Row(row, pos)),
            Token::Incomplete => return Ok(Decoded::Incomplete),
        };

        let (len, next) = match next_token(buf, next, eof)? {
            Token::Word(len, next) => {
                let text = String::from_utf8_lossy(len);
                let len = text
                    .parse::<usize>()
                    .map_err(|_| RowCodecError::InvalidLength(text.to_string()))?;
                (len, next)
            }
            Token::Incomplete => return Ok(Decoded::Incomplete),
            Token::LineEnd(_) | Token::Exhausted => return Err(RowCodecError::Truncated),
        };

        let available = buf.len() - next;
        if available < len + 1 {
            if !eof {
                return Ok(Decoded::Incomplete);
            }
            return Err(RowCodecError::LengthMismatch {
                column,
                declared: len,
                available,
            });
        }
        if buf[next + len] != SP {
            return Err(RowCodecError::MissingSeparator { column });
        }

        row.put(column, &buf[next..next + len]);
        pos = next + len + 1;
    }
}

/// Decodes every record in `bytes` (a bulk-insert body or a buffered scan).
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Row>, RowCodecError> {
    let mut rows = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        match decode_prefix(&bytes[pos..], true)? {
            Decoded::Row(row, used) => {
                rows.push(row);
                pos += used;
            }
            // blank separators between concatenated records are skipped
            Decoded::End(used) if used > 0 => pos += used,
            Decoded::End(_) | Decoded::Incomplete => break,
        }
    }
    Ok(rows)
}
