//! Encoding module for SpanJoin keys
//!
//! This module provides the lexicographically sortable text encoding of point,
//! range and spanning keys, plus the address text forms those keys are built
//! from.

pub mod address;
pub mod key;

// Re-export key types and functions for convenience
pub use address::{
    ADDRESS_HEX_LEN,
    format_dotted,
    format_hex,
    parse_address,
    parse_dotted_address,
    parse_hex_address,
};
pub use key::{
    CodecError,
    DecodedKey,
    KeyCodec,
    RangeKey,
    SpanningKey,
    DEFAULT_POINT_SUFFIX,
    DEFAULT_RANGE_SEPARATOR,
    validate_separators,
};
