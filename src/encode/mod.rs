//! TypedBytes: self-describing binary records.

pub mod fallback;
pub mod stream;
pub mod typedbytes;
pub mod value;

pub use stream::{RecordSink, TypedBytesReader, TypedBytesWriter};
pub use typedbytes::{decode, decode_pair, encode, encode_pair};
pub use value::{BigInt, Value};
