//! Type decoding for text-format results.
mod decode;
mod map;
mod value;

pub use decode::{Decoder, KNOWN_BASE_TYPES};
pub use map::{TypeDecodeMap, TypeMapInitializer, TypeRow};
pub use value::{RangeValue, TypedValue};
