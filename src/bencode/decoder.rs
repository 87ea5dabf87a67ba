use super::BencodeValue;
use crate::error::{BittorrentError, Result};
use std::collections::BTreeMap;

/// Nesting limit for lists and dictionaries.
const MAX_DEPTH: usize = 64;

/// Decode a complete bencoded document. Trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.value(0)?;
    if decoder.pos != data.len() {
        return Err(err(format!(
            "{} trailing bytes after value",
            data.len() - decoder.pos
        )));
    }
    Ok(value)
}

fn err(msg: impl Into<String>) -> BittorrentError {
    BittorrentError::BencodeError(msg.into())
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| err("Unexpected end of input"))
    }

    fn value(&mut self, depth: usize) -> Result<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(err("Nesting too deep"));
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.bytes().map(BencodeValue::Bytes),
            c => Err(err(format!("Invalid bencode token: {}", c as char))),
        }
    }

    /// Consume up to (and including) `delim`, returning the bytes before it.
    fn until(&mut self, delim: u8) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == delim)
            .ok_or_else(|| err(format!("Missing '{}' terminator", delim as char)))?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn integer(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'i'
        let digits = self.until(b'e')?;
        let text = std::str::from_utf8(digits).map_err(|_| err("Invalid integer"))?;
        if text.is_empty() || text == "-0" || (text.len() > 1 && text.starts_with('0')) {
            return Err(err(format!("Non-canonical integer: {:?}", text)));
        }
        let num = text
            .parse::<i64>()
            .map_err(|_| err(format!("Invalid integer: {:?}", text)))?;
        Ok(BencodeValue::Integer(num))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len_digits = self.until(b':')?;
        let len = std::str::from_utf8(len_digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| err("Invalid string length"))?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| err("String length exceeds data"))?;
        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<BencodeValue> {
        self.pos += 1; // 'l'
        let mut list = Vec::new();
        while self.peek()? != b'e' {
            list.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(BencodeValue::List(list))
    }

    fn dict(&mut self, depth: usize) -> Result<BencodeValue> {
        self.pos += 1; // 'd'
        let mut dict = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(err("Dictionary key must be a string"));
            }
            let key = self.bytes()?;
            let value = self.value(depth + 1)?;
            dict.insert(key, value);
        }
        self.pos += 1;
        Ok(BencodeValue::Dict(dict))
    }
}
