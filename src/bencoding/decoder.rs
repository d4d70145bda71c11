use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::bencoding::value::Value;
use crate::codec::ReadFrom;

const BUFFER_SIZE: usize = 1024 * 8;
/// Upper bound for eagerly reserved string capacity, declared lengths can be bogus.
const MAX_PREALLOCATION: usize = 1024 * 64;
/// Metadata comes from untrusted peers, real torrents nest a handful of levels at most.
const MAX_DEPTH: usize = 64;

impl ReadFrom for Value {
    /// Reads until the end of the stream, which must hold exactly one value.
    async fn read_from<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let mut parser = Parser::default();
        let mut buf = [0; BUFFER_SIZE];
        loop {
            let read = stream.read(&mut buf).await?;
            if read == 0 {
                return parser.finish();
            }
            parser.feed(&buf[..read])?;
        }
    }
}

impl Value {
    /// Decodes a complete value. Trailing whitespace is tolerated, anything else is an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut parser = Parser::default();
        parser.feed(bytes)?;
        parser.finish()
    }

    /// Decodes the value at the start of `bytes`, returning it along with the number of bytes it
    /// occupied. Whatever follows is left untouched, as with `ut_metadata` data messages.
    pub fn from_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut parser = Parser::default();
        for (index, byte) in bytes.iter().enumerate() {
            parser.push(*byte)?;
            if let Some(value) = parser.done.take() {
                return Ok((value, index + 1));
            }
        }
        Err(Error::new(ErrorKind::UnexpectedEof, "incomplete value"))
    }
}

#[derive(Debug, Default)]
enum Token {
    #[default]
    Start,
    /// Digits so far and sign.
    Integer(Option<i64>, i64),
    /// `i0`, only `e` may follow.
    Zero,
    StringLength(usize),
    StringBytes(Vec<u8>, usize),
}

#[derive(Debug)]
enum Container {
    List(Vec<Value>),
    /// Pending key and entries so far.
    Dictionary(Option<String>, BTreeMap<String, Value>),
}

/// Push parser, fed one byte at a time so it can stop right after a value.
#[derive(Debug, Default)]
struct Parser {
    token: Token,
    open: Vec<Container>,
    done: Option<Value>,
    finished: bool,
    position: usize,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, message.into())
}

fn digit(byte: u8) -> usize {
    usize::from(byte - b'0')
}

impl Parser {
    fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        bytes.iter().try_for_each(|byte| self.push(*byte))
    }

    fn push(&mut self, byte: u8) -> Result<()> {
        if self.finished {
            return match byte {
                b'\n' | b'\r' | b' ' => Ok(()),
                _ => Err(invalid(format!(
                    "trailing data at position {}",
                    self.position
                ))),
            };
        }
        match (&mut self.token, byte) {
            (Token::Start, b'i') => self.token = Token::Integer(None, 1),
            (Token::Integer(None, sign @ 1), b'-') => *sign = -1,
            (&mut Token::Integer(None, sign), b'0') => {
                if sign < 0 {
                    return Err(invalid("negative zero"));
                }
                self.token = Token::Zero;
            }
            (Token::Zero, b'e') => self.close(Value::Integer(0))?,
            (Token::Zero, b'0'..=b'9') => return Err(invalid("leading zero")),
            (Token::Integer(integer, sign), b'0'..=b'9') => {
                let next = integer
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|value| value.checked_add(*sign * digit(byte) as i64))
                    .ok_or_else(|| invalid("integer overflow"))?;
                *integer = Some(next);
            }
            (&mut Token::Integer(Some(integer), _), b'e') => self.close(Value::Integer(integer))?,

            (Token::Start, b'0'..=b'9') => self.token = Token::StringLength(digit(byte)),
            (Token::StringLength(length), b'0'..=b'9') => {
                *length = length
                    .checked_mul(10)
                    .and_then(|value| value.checked_add(digit(byte)))
                    .ok_or_else(|| invalid("string length overflow"))?;
            }
            (&mut Token::StringLength(0), b':') => self.close(Value::String(Vec::new()))?,
            (&mut Token::StringLength(length), b':') => {
                let bytes = Vec::with_capacity(length.min(MAX_PREALLOCATION));
                self.token = Token::StringBytes(bytes, length);
            }
            (Token::StringBytes(bytes, length), _) => {
                bytes.push(byte);
                if bytes.len() == *length {
                    let bytes = std::mem::take(bytes);
                    self.close(Value::String(bytes))?;
                }
            }

            (Token::Start, b'l' | b'd') => {
                if self.open.len() == MAX_DEPTH {
                    return Err(invalid("nested too deeply"));
                }
                self.open.push(match byte {
                    b'l' => Container::List(Vec::new()),
                    _ => Container::Dictionary(None, BTreeMap::new()),
                });
            }
            (Token::Start, b'e') => match self.open.pop() {
                Some(Container::List(values)) => self.close(Value::List(values))?,
                Some(Container::Dictionary(None, entries)) => {
                    self.close(Value::Dictionary(entries))?
                }
                Some(Container::Dictionary(Some(key), _)) => {
                    return Err(invalid(format!("missing value for key '{}'", key)));
                }
                None => return Err(invalid("nothing to close")),
            },

            _ => {
                return Err(invalid(format!(
                    "unexpected byte 0x{:02x} at position {}",
                    byte, self.position
                )));
            }
        }
        self.position += 1;
        Ok(())
    }

    /// Hands a complete value to the enclosing container, or finishes the top level one.
    fn close(&mut self, value: Value) -> Result<()> {
        self.token = Token::Start;
        match self.open.last_mut() {
            Some(Container::List(values)) => values.push(value),
            Some(Container::Dictionary(key, entries)) => match (key.take(), value) {
                (Some(key), value) => {
                    entries.insert(key, value);
                }
                (None, Value::String(string)) => {
                    let string = String::from_utf8(string)
                        .map_err(|_| invalid("dictionary key is not utf-8"))?;
                    *key = Some(string);
                }
                (None, _) => return Err(invalid("dictionary key is not a string")),
            },
            None => {
                self.done = Some(value);
                self.finished = true;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Value> {
        self.done
            .ok_or_else(|| Error::new(ErrorKind::UnexpectedEof, "incomplete value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted() {
        let nested = Value::dictionary()
            .with_entry(
                "foo",
                Value::dictionary().with_entry("bar", Value::list().with_value(Value::string("baz"))),
            )
            .with_entry("qux", Value::Integer(42));
        let cases: [(&[u8], Value); 11] = [
            (b"3:foo", Value::string("foo")),
            (b"0:", Value::string("")),
            (b"4:ei:e", Value::string("ei:e")),
            (b"i0e", Value::Integer(0)),
            (b"i-1e", Value::Integer(-1)),
            (b"i4294967296e", Value::Integer(4_294_967_296)),
            (b"i42e \r\n", Value::Integer(42)),
            (b"le", Value::list()),
            (
                b"li1eli2eee",
                Value::list()
                    .with_value(Value::Integer(1))
                    .with_value(Value::list().with_value(Value::Integer(2))),
            ),
            (
                b"d3:cow3:moo4:spam4:eggse",
                Value::dictionary()
                    .with_entry("cow", Value::string("moo"))
                    .with_entry("spam", Value::string("eggs")),
            ),
            (b"d3:food3:barl3:bazee3:quxi42ee", nested),
        ];
        for (input, expected) in cases {
            let value = Value::from_bytes(input);
            assert_eq!(value.unwrap(), expected, "{}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn rejected() {
        let cases: [&[u8]; 11] = [
            b"foo",
            b"i-0e",
            b"i03e",
            b"ie",
            b"i99999999999999999999e",
            b"di1ei2ee",
            b"d3:fooe",
            b"li1e",
            b"i42ei43e",
            b"5:abc",
            b"e",
        ];
        for input in cases {
            assert!(
                Value::from_bytes(input).is_err(),
                "{}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn depth_is_limited() {
        let mut input = vec![b'l'; MAX_DEPTH + 1];
        input.extend(vec![b'e'; MAX_DEPTH + 1]);
        assert!(Value::from_bytes(&input).is_err());

        let input = [vec![b'l'; MAX_DEPTH], vec![b'e'; MAX_DEPTH]].concat();
        assert!(Value::from_bytes(&input).is_ok());
    }

    #[test]
    fn prefix_leaves_remainder() {
        let bytes = b"d8:msg_typei1e5:piecei0eeraw metadata";

        let (value, consumed) = Value::from_prefix(bytes).unwrap();

        assert_eq!(
            value,
            Value::dictionary()
                .with_entry("msg_type", Value::Integer(1))
                .with_entry("piece", Value::Integer(0))
        );
        assert_eq!(&bytes[consumed..], b"raw metadata");
        assert!(Value::from_prefix(b"d3:foo").is_err());
    }

    #[tokio::test]
    async fn read_from_stream() {
        let (mut client, mut server) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"d4:spaml1:a1:bee").await.unwrap();
        });

        let value = Value::read_from(&mut server).await.unwrap();

        writer.await.unwrap();
        assert_eq!(
            value,
            Value::dictionary().with_entry(
                "spam",
                Value::list()
                    .with_value(Value::string("a"))
                    .with_value(Value::string("b"))
            )
        );
    }
}
