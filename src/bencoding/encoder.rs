use crate::bencoding::value::Value;

impl Value {
    /// Appends the canonical encoding: dictionary keys come out sorted because entries are kept
    /// in a `BTreeMap`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::String(bytes) => encode_string(bytes, out),
            Self::Integer(integer) => encode_integer(*integer, out),
            Self::List(values) => {
                out.push(b'l');
                values.iter().for_each(|value| value.encode_into(out));
                out.push(b'e');
            }
            Self::Dictionary(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    encode_string(key.as_bytes(), out);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

pub fn encode_string(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

pub fn encode_integer(integer: i64, out: &mut Vec<u8>) {
    out.push(b'i');
    out.extend_from_slice(integer.to_string().as_bytes());
    out.push(b'e');
}
