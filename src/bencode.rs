//! Minimal bencode codec used by tracker responses and the metadata extension.

use std::collections::BTreeMap;
use thiserror::Error;

/// Nesting limit for lists and dictionaries
const MAX_DEPTH: usize = 64;

/// A decoded bencode value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// `i<digits>e`
    Int(i64),
    /// `<len>:<bytes>`
    Bytes(Vec<u8>),
    /// `l...e`
    List(Vec<Value>),
    /// `d...e`, keys kept in sorted order
    Dict(BTreeMap<Vec<u8>, Value>),
}

/// Bencode decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BencodeError {
    /// Input ended in the middle of a value
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),
    /// A byte that cannot start or continue a value
    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte {
        /// Offending byte
        byte: u8,
        /// Position in the input
        offset: usize,
    },
    /// Integer or length is malformed or out of range
    #[error("invalid number at offset {0}")]
    InvalidNumber(usize),
    /// Dictionary key was not a byte string
    #[error("dictionary key at offset {0} is not a byte string")]
    InvalidKey(usize),
    /// Lists or dictionaries nested too deeply
    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
    /// Bytes left over after a complete value
    #[error("{0} trailing bytes after value")]
    TrailingData(usize),
}

impl Value {
    /// Byte-string value from anything byte-like
    pub fn bytes(value: impl AsRef<[u8]>) -> Self {
        Value::Bytes(value.as_ref().to_vec())
    }

    /// Dictionary from `(key, value)` pairs
    pub fn dict<K: AsRef<[u8]>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_vec(), v))
                .collect(),
        )
    }

    /// Look up a dictionary key; `None` for missing keys or non-dictionaries
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(map) => map.get(key.as_bytes()),
            _ => None,
        }
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Byte-string payload
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte-string payload as UTF-8 text
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// List payload
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary payload
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }
}

/// Encode a value to its canonical byte form
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(b) => {
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(map) => {
            out.push(b'd');
            for (key, item) in map {
                out.extend_from_slice(key.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(key);
                encode_into(item, out);
            }
            out.push(b'e');
        }
    }
}

/// Decode exactly one value spanning the whole input
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_prefix(input)?;
    if consumed != input.len() {
        return Err(BencodeError::TrailingData(input.len() - consumed));
    }
    Ok(value)
}

/// Decode one value from the front of the input
///
/// Returns the value and the number of bytes it occupied; anything after
/// that is left to the caller (metadata data messages append raw bytes).
pub fn decode_prefix(input: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut decoder = Decoder { input, pos: 0 };
    let value = decoder.value(0)?;
    Ok((value, decoder.pos))
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof(self.pos))
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::TooDeep);
        }
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let n = self.integer(b'e')?;
                Ok(Value::Int(n))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut map = BTreeMap::new();
                while self.peek()? != b'e' {
                    let key_offset = self.pos;
                    if !self.peek()?.is_ascii_digit() {
                        return Err(BencodeError::InvalidKey(key_offset));
                    }
                    let key = self.byte_string()?;
                    let item = self.value(depth + 1)?;
                    map.insert(key, item);
                }
                self.pos += 1;
                Ok(Value::Dict(map))
            }
            b'0'..=b'9' => Ok(Value::Bytes(self.byte_string()?)),
            byte => Err(BencodeError::UnexpectedByte {
                byte,
                offset: self.pos,
            }),
        }
    }

    fn byte_string(&mut self) -> Result<Vec<u8>, BencodeError> {
        let start = self.pos;
        let len = self.integer(b':')?;
        let len = usize::try_from(len).map_err(|_| BencodeError::InvalidNumber(start))?;
        let end = self
            .pos
            .checked_add(len)
            .ok_or(BencodeError::InvalidNumber(start))?;
        if end > self.input.len() {
            return Err(BencodeError::UnexpectedEof(self.input.len()));
        }
        let bytes = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    /// Parse a decimal number terminated by `terminator`, consuming the terminator
    fn integer(&mut self, terminator: u8) -> Result<i64, BencodeError> {
        let start = self.pos;
        let rest = &self.input[start..];
        let len = rest
            .iter()
            .position(|&b| b == terminator)
            .ok_or(BencodeError::UnexpectedEof(self.input.len()))?;
        let digits = &rest[..len];

        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        let canonical = !unsigned.is_empty()
            && unsigned.iter().all(u8::is_ascii_digit)
            && !(unsigned.len() > 1 && unsigned[0] == b'0')
            && !(digits[0] == b'-' && unsigned == b"0");
        if !canonical {
            return Err(BencodeError::InvalidNumber(start));
        }

        let n = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(BencodeError::InvalidNumber(start))?;
        self.pos = start + len + 1;
        Ok(n)
    }
}
