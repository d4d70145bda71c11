mod decoder;
mod encoder;
mod value;

pub use encoder::encode_string;
pub use value::Value;
