//! Point, range and spanning keys and their canonical text form
//!
//! Every address is written as 8 zero-padded hex digits. A range key joins
//! `begin` and `end` with the range separator, a point key appends the point
//! suffix, and a spanning key joins four addresses (clipped bounds, then real
//! bounds) with the range separator. Because the range separator sorts before
//! the point suffix, the point key for address `A` sorts after every range key
//! beginning at `A` and before any range key beginning after `A`.

use std::fmt;

use thiserror::Error;

use crate::Address;
use crate::encoding::address::{ADDRESS_HEX_LEN, parse_address, push_hex, unpack_hex};
use crate::observability::log_debug;

/// Default character joining the fields of range and spanning keys
pub const DEFAULT_RANGE_SEPARATOR: char = ':';

/// Default character appended to point keys
pub const DEFAULT_POINT_SUFFIX: char = ';';

/// Longest raw key text carried inside an error
const MAX_RAW_DISPLAY_LEN: usize = 64;

/// Errors raised by the key codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The raw bytes do not form any recognized key shape
    #[error("cannot decode key [{raw}]: {reason}")]
    Decode {
        /// The offending key, lossily converted and truncated
        raw: String,
        /// Why the key was rejected
        reason: &'static str,
    },
    /// An address lies outside the 32-bit address space
    #[error("address [{text}] is outside the 32-bit address space (value {value})")]
    Bounds {
        /// The address text as it appeared in the key
        text: String,
        /// The value it assembled to, saturated at `u64::MAX`
        value: u64,
    },
    /// The separator characters are unusable
    #[error("invalid key separators: {0}")]
    Config(String),
}

impl CodecError {
    fn decode(raw: &[u8], reason: &'static str) -> Self {
        let text = String::from_utf8_lossy(raw);
        let raw = if text.len() > MAX_RAW_DISPLAY_LEN {
            let mut cut = MAX_RAW_DISPLAY_LEN;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &text[..cut])
        } else {
            text.into_owned()
        };
        CodecError::Decode { raw, reason }
    }
}

/// An inclusive address interval `[begin, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RangeKey {
    /// First address in the range
    pub begin: Address,
    /// Last address in the range
    pub end: Address,
}

impl RangeKey {
    /// Create a range, rejecting `begin > end`
    pub fn new(begin: Address, end: Address) -> Result<Self, CodecError> {
        if begin > end {
            return Err(CodecError::Decode {
                raw: format!("{:08x}-{:08x}", begin, end),
                reason: "range begin is greater than range end",
            });
        }
        Ok(Self { begin, end })
    }

    /// Whether `addr` lies inside the range
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.begin && addr <= self.end
    }

    /// Number of addresses covered
    pub fn size(&self) -> u64 {
        self.end as u64 - self.begin as u64 + 1
    }
}

/// A range clipped to one partition, remembering the range it was cut from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpanningKey {
    /// First address of the fragment
    pub clipped_begin: Address,
    /// Last address of the fragment
    pub clipped_end: Address,
    /// First address of the original range
    pub real_begin: Address,
    /// Last address of the original range
    pub real_end: Address,
}

impl SpanningKey {
    /// Create a spanning key. The clipped bounds must be ordered and lie
    /// inside the ordered real bounds.
    pub fn new(
        clipped_begin: Address,
        clipped_end: Address,
        real_begin: Address,
        real_end: Address,
    ) -> Result<Self, CodecError> {
        let key = Self {
            clipped_begin,
            clipped_end,
            real_begin,
            real_end,
        };
        if !key.is_well_formed() {
            return Err(CodecError::Decode {
                raw: format!(
                    "{:08x}-{:08x}/{:08x}-{:08x}",
                    clipped_begin, clipped_end, real_begin, real_end
                ),
                reason: "spanning key bounds are not nested",
            });
        }
        Ok(key)
    }

    /// A spanning key covering the whole of `range`
    pub fn whole(range: RangeKey) -> Self {
        Self {
            clipped_begin: range.begin,
            clipped_end: range.end,
            real_begin: range.begin,
            real_end: range.end,
        }
    }

    fn is_well_formed(&self) -> bool {
        self.real_begin <= self.clipped_begin
            && self.clipped_begin <= self.clipped_end
            && self.clipped_end <= self.real_end
    }

    /// The fragment's own bounds
    pub fn clipped(&self) -> RangeKey {
        RangeKey {
            begin: self.clipped_begin,
            end: self.clipped_end,
        }
    }

    /// The bounds of the range this fragment was cut from
    pub fn real(&self) -> RangeKey {
        RangeKey {
            begin: self.real_begin,
            end: self.real_end,
        }
    }
}

/// A decoded key of any shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodedKey {
    /// A single address to look up
    Point(Address),
    /// An address range
    Range(RangeKey),
    /// A range fragment clipped to one partition
    Spanning(SpanningKey),
}

impl DecodedKey {
    /// The address that decides which partition the key belongs to:
    /// the point itself, or the (clipped) begin of a range
    pub fn partition_address(&self) -> Address {
        match self {
            DecodedKey::Point(addr) => *addr,
            DecodedKey::Range(range) => range.begin,
            DecodedKey::Spanning(span) => span.clipped_begin,
        }
    }

    /// Whether this is a point key
    pub fn is_point(&self) -> bool {
        matches!(self, DecodedKey::Point(_))
    }

    /// The range carried by a range key, or the real range of a spanning key
    pub fn real_range(&self) -> Option<RangeKey> {
        match self {
            DecodedKey::Point(_) => None,
            DecodedKey::Range(range) => Some(*range),
            DecodedKey::Spanning(span) => Some(span.real()),
        }
    }
}

/// Check that neither separator is a hex digit and that the range separator
/// sorts strictly before the point suffix
pub fn validate_separators(range_separator: char, point_suffix: char) -> Result<(), CodecError> {
    if range_separator.is_ascii_hexdigit() {
        return Err(CodecError::Config(format!(
            "range separator [{}] must not be a hex digit",
            range_separator
        )));
    }
    if point_suffix.is_ascii_hexdigit() {
        return Err(CodecError::Config(format!(
            "point suffix [{}] must not be a hex digit",
            point_suffix
        )));
    }
    // UTF-8 preserves code point order, so char order is byte order
    if range_separator >= point_suffix {
        return Err(CodecError::Config(format!(
            "range separator [{}] is not less than point suffix [{}]",
            range_separator, point_suffix
        )));
    }
    Ok(())
}

/// Separator character stored with its UTF-8 bytes
#[derive(Clone, Copy, PartialEq, Eq)]
struct Separator {
    ch: char,
    bytes: [u8; 4],
    len: usize,
}

impl Separator {
    fn new(ch: char) -> Self {
        let mut bytes = [0u8; 4];
        let len = ch.encode_utf8(&mut bytes).len();
        Self { ch, bytes, len }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    fn matches_at(&self, raw: &[u8], offset: usize) -> bool {
        raw.get(offset..offset + self.len) == Some(self.as_bytes())
    }
}

impl fmt::Debug for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.ch)
    }
}

/// Encodes and decodes keys with a fixed pair of separators.
///
/// The separators are validated once at construction and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCodec {
    range_separator: Separator,
    point_suffix: Separator,
    resolve_hostnames: bool,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self {
            range_separator: Separator::new(DEFAULT_RANGE_SEPARATOR),
            point_suffix: Separator::new(DEFAULT_POINT_SUFFIX),
            resolve_hostnames: false,
        }
    }
}

impl KeyCodec {
    /// Create a codec, validating the separator pair
    pub fn new(range_separator: char, point_suffix: char) -> Result<Self, CodecError> {
        validate_separators(range_separator, point_suffix)?;
        Ok(Self {
            range_separator: Separator::new(range_separator),
            point_suffix: Separator::new(point_suffix),
            resolve_hostnames: false,
        })
    }

    /// Create a codec from a join configuration
    pub fn from_config(config: &crate::JoinConfig) -> Result<Self, CodecError> {
        Ok(Self::new(config.range_separator, config.point_suffix)?
            .with_host_resolution(config.resolve_hostnames))
    }

    /// Allow lenient parsing to resolve hostnames
    pub fn with_host_resolution(mut self, resolve: bool) -> Self {
        self.resolve_hostnames = resolve;
        self
    }

    /// Whether lenient parsing may resolve hostnames
    pub fn resolves_hostnames(&self) -> bool {
        self.resolve_hostnames
    }

    /// The character joining range fields
    pub fn range_separator(&self) -> char {
        self.range_separator.ch
    }

    /// The character appended to point keys
    pub fn point_suffix(&self) -> char {
        self.point_suffix.ch
    }

    /// Encoded length of a point key
    pub fn point_len(&self) -> usize {
        ADDRESS_HEX_LEN + self.point_suffix.len
    }

    /// Encoded length of a range key
    pub fn range_len(&self) -> usize {
        2 * ADDRESS_HEX_LEN + self.range_separator.len
    }

    /// Encoded length of a spanning key
    pub fn spanning_len(&self) -> usize {
        4 * ADDRESS_HEX_LEN + 3 * self.range_separator.len
    }

    /// Encode any key shape
    pub fn encode(&self, key: &DecodedKey) -> String {
        let mut buf = String::with_capacity(self.spanning_len());
        self.encode_into(key, &mut buf);
        buf
    }

    /// Encode a key, replacing the contents of `buf`
    pub fn encode_into(&self, key: &DecodedKey, buf: &mut String) {
        buf.clear();
        match key {
            DecodedKey::Point(addr) => {
                push_hex(buf, *addr);
                buf.push(self.point_suffix.ch);
            }
            DecodedKey::Range(range) => {
                push_hex(buf, range.begin);
                buf.push(self.range_separator.ch);
                push_hex(buf, range.end);
            }
            DecodedKey::Spanning(span) => {
                let sep = self.range_separator.ch;
                push_hex(buf, span.clipped_begin);
                buf.push(sep);
                push_hex(buf, span.clipped_end);
                buf.push(sep);
                push_hex(buf, span.real_begin);
                buf.push(sep);
                push_hex(buf, span.real_end);
            }
        }
    }

    /// Encode a point key
    pub fn encode_point(&self, addr: Address) -> String {
        self.encode(&DecodedKey::Point(addr))
    }

    /// Encode a range key
    pub fn encode_range(&self, range: RangeKey) -> String {
        self.encode(&DecodedKey::Range(range))
    }

    /// Encode a spanning key
    pub fn encode_spanning(&self, span: SpanningKey) -> String {
        self.encode(&DecodedKey::Spanning(span))
    }

    /// Decode raw key bytes.
    ///
    /// The canonical shapes are recognized by exact length and separator
    /// position; anything else falls back to a lenient parse that splits on
    /// the range separator and accepts one or two hex or dotted fields.
    pub fn decode(&self, raw: &[u8]) -> Result<DecodedKey, CodecError> {
        let sep = &self.range_separator;

        if raw.len() == self.point_len() && self.point_suffix.matches_at(raw, ADDRESS_HEX_LEN) {
            let addr = self.field(raw, &raw[..ADDRESS_HEX_LEN])?;
            return Ok(DecodedKey::Point(addr));
        }

        if raw.len() == self.range_len() && sep.matches_at(raw, ADDRESS_HEX_LEN) {
            let begin = self.field(raw, &raw[..ADDRESS_HEX_LEN])?;
            let end = self.field(raw, &raw[ADDRESS_HEX_LEN + sep.len..])?;
            return self.range(raw, begin, end);
        }

        if raw.len() == self.spanning_len() {
            let stride = ADDRESS_HEX_LEN + sep.len;
            if (1..4).all(|i| sep.matches_at(raw, i * stride - sep.len)) {
                let mut fields = [0 as Address; 4];
                for (i, field) in fields.iter_mut().enumerate() {
                    let start = i * stride;
                    *field = unpack_hex(&raw[start..start + ADDRESS_HEX_LEN])
                        .ok_or_else(|| CodecError::decode(raw, "spanning key field is not hex"))?;
                }
                let span = SpanningKey {
                    clipped_begin: fields[0],
                    clipped_end: fields[1],
                    real_begin: fields[2],
                    real_end: fields[3],
                };
                if !span.is_well_formed() {
                    return Err(CodecError::decode(raw, "spanning key bounds are not nested"));
                }
                return Ok(DecodedKey::Spanning(span));
            }
        }

        self.decode_lenient(raw)
    }

    fn decode_lenient(&self, raw: &[u8]) -> Result<DecodedKey, CodecError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| CodecError::decode(raw, "key is not valid UTF-8"))?;
        let mut parts = text.split(self.range_separator.ch);
        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        if parts.next().is_some() {
            return Err(CodecError::decode(raw, "too many address fields"));
        }

        let begin = self.lenient_field(raw, first)?;
        match second {
            None => Ok(DecodedKey::Point(begin)),
            Some(second) => {
                let end = self.lenient_field(raw, second)?;
                self.range(raw, begin, end)
            }
        }
    }

    fn field(&self, raw: &[u8], field: &[u8]) -> Result<Address, CodecError> {
        if let Some(addr) = unpack_hex(field) {
            return Ok(addr);
        }
        let text = std::str::from_utf8(field)
            .map_err(|_| CodecError::decode(raw, "address field is not valid UTF-8"))?;
        self.lenient_field(raw, text)
    }

    fn lenient_field(&self, raw: &[u8], field: &str) -> Result<Address, CodecError> {
        if field.is_empty() {
            return Err(CodecError::decode(raw, "empty address field"));
        }
        match parse_address(field, self.resolve_hostnames)? {
            Some(addr) => Ok(addr),
            None => {
                log_debug!(
                    component = "codec",
                    event = "unparsable_address",
                    field = %field,
                );
                Err(CodecError::decode(raw, "address field is neither hex nor dotted"))
            }
        }
    }

    fn range(&self, raw: &[u8], begin: Address, end: Address) -> Result<DecodedKey, CodecError> {
        if begin > end {
            return Err(CodecError::decode(raw, "range begin is greater than range end"));
        }
        Ok(DecodedKey::Range(RangeKey { begin, end }))
    }
}
