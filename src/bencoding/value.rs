use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Value {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<Value>),
    Dictionary(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(string: &str) -> Self {
        Self::String(string.as_bytes().to_vec())
    }

    pub fn list() -> Self {
        Self::List(Vec::new())
    }

    pub fn dictionary() -> Self {
        Self::Dictionary(BTreeMap::new())
    }

    pub fn with_value(mut self, value: Value) -> Self {
        if let Self::List(values) = &mut self {
            values.push(value);
        }
        self
    }

    pub fn with_entry(mut self, key: &str, value: Value) -> Self {
        if let Self::Dictionary(entries) = &mut self {
            entries.insert(key.to_string(), value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dictionary(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Removes a required entry from a dictionary.
    pub fn remove_entry(&mut self, key: &str) -> Result<Value> {
        self.try_remove_entry(key)?
            .ok_or_else(|| anyhow!("missing entry '{}'", key))
    }

    /// Removes an optional entry from a dictionary. Fails only if `self` is not a dictionary.
    pub fn try_remove_entry(&mut self, key: &str) -> Result<Option<Value>> {
        match self {
            Self::Dictionary(entries) => Ok(entries.remove(key)),
            other => Err(anyhow!("expected a dictionary, got {}", other.kind())),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::List(_) => "list",
            Self::Dictionary(_) => "dictionary",
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(bytes) => Ok(bytes),
            other => Err(anyhow!("expected a string, got {}", other.kind())),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let bytes: Vec<u8> = value.try_into()?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Integer(integer) => Ok(integer),
            other => Err(anyhow!("expected an integer, got {}", other.kind())),
        }
    }
}

macro_rules! unsigned_from_value {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = Error;

                fn try_from(value: Value) -> Result<Self> {
                    let integer: i64 = value.try_into()?;
                    <$ty>::try_from(integer)
                        .map_err(|_| anyhow!("integer {} out of range", integer))
                }
            }
        )*
    };
}

unsigned_from_value!(u16, u32, u64, usize);

impl TryFrom<Value> for Duration {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let seconds: u64 = value.try_into()?;
        Ok(Duration::from_secs(seconds))
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::List(values) => Ok(values),
            other => Err(anyhow!("expected a list, got {}", other.kind())),
        }
    }
}

impl TryFrom<Value> for BTreeMap<String, Value> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Dictionary(entries) => Ok(entries),
            other => Err(anyhow!("expected a dictionary, got {}", other.kind())),
        }
    }
}
