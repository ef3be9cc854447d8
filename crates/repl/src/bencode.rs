//! Bencode: the nREPL wire encoding.
//!
//! Four shapes: integers `i…e`, byte strings `len:bytes`, lists `l…e` and
//! dictionaries `d…e` with sorted string keys. Strings are UTF-8 here;
//! nREPL payloads are text.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bencode {
    Int(i64),
    Str(String),
    List(Vec<Bencode>),
    Dict(BTreeMap<String, Bencode>),
}

impl Bencode {
    pub fn str(s: impl Into<String>) -> Bencode {
        Bencode::Str(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bencode::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn dict_get(&self, key: &str) -> Option<&Bencode> {
        match self {
            Bencode::Dict(d) => d.get(key),
            _ => None,
        }
    }

    pub fn encode(&self, out: &mut impl Write) -> io::Result<()> {
        match self {
            Bencode::Int(i) => write!(out, "i{}e", i),
            Bencode::Str(s) => {
                write!(out, "{}:", s.len())?;
                out.write_all(s.as_bytes())
            }
            Bencode::List(items) => {
                out.write_all(b"l")?;
                for item in items {
                    item.encode(out)?;
                }
                out.write_all(b"e")
            }
            Bencode::Dict(entries) => {
                out.write_all(b"d")?;
                for (k, v) in entries {
                    write!(out, "{}:", k.len())?;
                    out.write_all(k.as_bytes())?;
                    v.encode(out)?;
                }
                out.write_all(b"e")
            }
        }
    }
}

/// Build a response dict from string pairs.
pub fn dict(entries: &[(&str, Bencode)]) -> Bencode {
    Bencode::Dict(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

pub struct Decoder<R> {
    input: R,
}

impl<R: BufRead> Decoder<R> {
    pub fn new(input: R) -> Self {
        Decoder { input }
    }

    /// Decode one value; `Ok(None)` on a clean EOF at a value boundary.
    pub fn decode(&mut self) -> io::Result<Option<Bencode>> {
        match self.peek_byte()? {
            None => Ok(None),
            Some(_) => Ok(Some(self.decode_value()?)),
        }
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        let buf = self.input.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn next_byte(&mut self) -> io::Result<u8> {
        let b = self
            .peek_byte()?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "bencode: eof"))?;
        self.input.consume(1);
        Ok(b)
    }

    fn decode_value(&mut self) -> io::Result<Bencode> {
        match self.next_byte()? {
            b'i' => {
                let text = self.read_until(b'e')?;
                let i = text.parse::<i64>().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "bencode: bad integer")
                })?;
                Ok(Bencode::Int(i))
            }
            b'l' => {
                let mut items = Vec::new();
                loop {
                    if self.peek_byte()? == Some(b'e') {
                        self.input.consume(1);
                        return Ok(Bencode::List(items));
                    }
                    items.push(self.decode_value()?);
                }
            }
            b'd' => {
                let mut entries = BTreeMap::new();
                loop {
                    if self.peek_byte()? == Some(b'e') {
                        self.input.consume(1);
                        return Ok(Bencode::Dict(entries));
                    }
                    let key = match self.decode_value()? {
                        Bencode::Str(s) => s,
                        _ => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "bencode: dict key must be a string",
                            ));
                        }
                    };
                    entries.insert(key, self.decode_value()?);
                }
            }
            digit @ b'0'..=b'9' => {
                let mut len_text = String::new();
                len_text.push(digit as char);
                loop {
                    let b = self.next_byte()?;
                    if b == b':' {
                        break;
                    }
                    len_text.push(b as char);
                }
                let len = len_text.parse::<usize>().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "bencode: bad length")
                })?;
                let mut bytes = vec![0u8; len];
                self.input.read_exact(&mut bytes)?;
                let s = String::from_utf8(bytes).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "bencode: non-utf8 string")
                })?;
                Ok(Bencode::Str(s))
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bencode: unexpected byte {:#x}", other),
            )),
        }
    }

    fn read_until(&mut self, end: u8) -> io::Result<String> {
        let mut out = String::new();
        loop {
            let b = self.next_byte()?;
            if b == end {
                return Ok(out);
            }
            out.push(b as char);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: &Bencode) -> Bencode {
        let mut bytes = Vec::new();
        v.encode(&mut bytes).unwrap();
        Decoder::new(&bytes[..]).decode().unwrap().unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(round_trip(&Bencode::Int(-42)), Bencode::Int(-42));
        assert_eq!(round_trip(&Bencode::str("héllo")), Bencode::str("héllo"));
    }

    #[test]
    fn test_nested_dict() {
        let msg = dict(&[
            ("op", Bencode::str("eval")),
            ("code", Bencode::str("(+ 1 2)")),
            ("ids", Bencode::List(vec![Bencode::Int(1), Bencode::Int(2)])),
        ]);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_encoding_shape() {
        let mut bytes = Vec::new();
        dict(&[("op", Bencode::str("clone"))])
            .encode(&mut bytes)
            .unwrap();
        assert_eq!(&bytes, b"d2:op5:clonee");
    }

    #[test]
    fn test_eof_at_boundary() {
        let mut d = Decoder::new(&b""[..]);
        assert_eq!(d.decode().unwrap(), None);
    }
}
