//! Order-preserving tuple encoding for record keys and values.
//!
//! For any two tuples `a` and `b` of the same schema, `a < b` under field-wise
//! comparison exactly when `encode(&a) < encode(&b)` byte-wise. Grouping by a
//! key prefix therefore reduces to comparing raw byte prefixes.
//!
//! ## Wire format
//!
//! - `i64`: eight bytes big-endian with the sign bit flipped, so negative values
//!   sort before positive ones.
//! - strings: the UTF-8 bytes with every `0x00` written as `0x00 0xFF`, followed
//!   by the terminator `0x00 0x01`. The escape keeps the encoding prefix-free, so
//!   `"a"` sorts before `"ab"` and before `"a\0"`.
//! - tuples: the concatenation of their fields.
//!
//! ```rust
//! use fleetlog::codec::{decode, encode};
//!
//! let key = encode(&("uptime", "OW0123456789AB", 1_372_716_041i64));
//! let (kind, node, ts): (String, String, i64) = decode(&key).unwrap();
//! assert_eq!((kind.as_str(), node.as_str(), ts), ("uptime", "OW0123456789AB", 1_372_716_041));
//! ```

use std::fmt;

use crate::error::{FleetError, Result};

const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;
const SIGN_BIT: u64 = 1 << 63;

/// A type that can be written into an order-preserving key.
pub trait KeyEncode {
    /// Appends the encoding of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>);
}

/// A type that can be read back out of an order-preserving key.
pub trait KeyDecode: Sized {
    /// Decodes one value from the front of `input`, advancing it past the
    /// consumed bytes.
    fn decode_from(input: &mut &[u8]) -> Result<Self>;
}

/// Encodes a value (usually a tuple) into a fresh byte vector.
pub fn encode<T: KeyEncode + ?Sized>(value: &T) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    value.encode_to(&mut buf);
    buf
}

/// Decodes a value that must span the whole input.
pub fn decode<T: KeyDecode>(bytes: &[u8]) -> Result<T> {
    let (value, rest) = decode_prefix::<T>(bytes)?;
    if !rest.is_empty() {
        return Err(FleetError::malformed_key(
            bytes,
            format!("{} trailing bytes after decode", rest.len()),
        ));
    }
    Ok(value)
}

/// Decodes a value from the front of `bytes` and returns the unconsumed rest.
pub fn decode_prefix<T: KeyDecode>(bytes: &[u8]) -> Result<(T, &[u8])> {
    let mut input = bytes;
    let value = T::decode_from(&mut input).map_err(|err| match err {
        FleetError::MalformedKey { message, .. } => FleetError::malformed_key(bytes, message),
        other => other,
    })?;
    Ok((value, input))
}

/// Returns the number of leading bytes of `bytes` occupied by a `T`.
pub fn prefix_len<T: KeyDecode>(bytes: &[u8]) -> Result<usize> {
    let (_, rest) = decode_prefix::<T>(bytes)?;
    Ok(bytes.len() - rest.len())
}

impl KeyEncode for i64 {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&((*self as u64) ^ SIGN_BIT).to_be_bytes());
    }
}

impl KeyDecode for i64 {
    fn decode_from(input: &mut &[u8]) -> Result<Self> {
        if input.len() < 8 {
            return Err(FleetError::malformed_key(
                input,
                format!("integer needs 8 bytes, {} left", input.len()),
            ));
        }
        let (head, tail) = input.split_at(8);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(head);
        *input = tail;
        Ok((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64)
    }
}

impl KeyEncode for str {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        for &byte in self.as_bytes() {
            buf.push(byte);
            if byte == ESCAPE {
                buf.push(ESCAPED_NUL);
            }
        }
        buf.push(ESCAPE);
        buf.push(TERMINATOR);
    }
}

impl KeyEncode for String {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.as_str().encode_to(buf);
    }
}

impl KeyDecode for String {
    fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let bytes = *input;
        let mut out = Vec::new();
        let mut i = 0;
        loop {
            match bytes.get(i) {
                None => {
                    return Err(FleetError::malformed_key(bytes, "unterminated string"));
                }
                Some(&ESCAPE) => match bytes.get(i + 1) {
                    Some(&TERMINATOR) => {
                        i += 2;
                        break;
                    }
                    Some(&ESCAPED_NUL) => {
                        out.push(0);
                        i += 2;
                    }
                    _ => {
                        return Err(FleetError::malformed_key(bytes, "invalid string escape"));
                    }
                },
                Some(&byte) => {
                    out.push(byte);
                    i += 1;
                }
            }
        }
        let text = String::from_utf8(out)
            .map_err(|_| FleetError::malformed_key(bytes, "string is not valid UTF-8"))?;
        *input = &bytes[i..];
        Ok(text)
    }
}

impl<T: KeyEncode + ?Sized> KeyEncode for &T {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        (**self).encode_to(buf);
    }
}

impl KeyEncode for () {
    fn encode_to(&self, _buf: &mut Vec<u8>) {}
}

impl KeyDecode for () {
    fn decode_from(_input: &mut &[u8]) -> Result<Self> {
        Ok(())
    }
}

macro_rules! tuple_codec {
    ($($name:ident),+) => {
        impl<$($name: KeyEncode),+> KeyEncode for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode_to(&self, buf: &mut Vec<u8>) {
                let ($($name,)+) = self;
                $($name.encode_to(buf);)+
            }
        }

        impl<$($name: KeyDecode),+> KeyDecode for ($($name,)+) {
            fn decode_from(input: &mut &[u8]) -> Result<Self> {
                Ok(($($name::decode_from(input)?,)+))
            }
        }
    };
}

tuple_codec!(A);
tuple_codec!(A, B);
tuple_codec!(A, B, C);
tuple_codec!(A, B, C, D);
tuple_codec!(A, B, C, D, E);

impl KeyEncode for [i64] {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        for value in self {
            value.encode_to(buf);
        }
    }
}

impl KeyEncode for Vec<i64> {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.as_slice().encode_to(buf);
    }
}

/// Decodes a value made only of integers, such as a list of quantiles.
pub fn decode_ints(bytes: &[u8]) -> Result<Vec<i64>> {
    if bytes.len() % 8 != 0 {
        return Err(FleetError::malformed_key(
            bytes,
            "integer list length is not a multiple of 8",
        ));
    }
    let mut input = bytes;
    let mut values = Vec::with_capacity(bytes.len() / 8);
    while !input.is_empty() {
        values.push(i64::decode_from(&mut input)?);
    }
    Ok(values)
}

/// The type of one column in a dynamically described key or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    Str(String),
    Int(i64),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Str(s) => f.write_str(s),
            Field::Int(i) => write!(f, "{i}"),
        }
    }
}

impl KeyEncode for Field {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        match self {
            Field::Str(s) => s.encode_to(buf),
            Field::Int(i) => i.encode_to(buf),
        }
    }
}

/// Decodes `bytes` against a column schema. The schema must consume every byte.
pub fn decode_fields(bytes: &[u8], kinds: &[FieldKind]) -> Result<Vec<Field>> {
    let mut input = bytes;
    let mut fields = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let field = match kind {
            FieldKind::Str => String::decode_from(&mut input).map(Field::Str),
            FieldKind::Int => i64::decode_from(&mut input).map(Field::Int),
        }
        .map_err(|err| match err {
            FleetError::MalformedKey { message, .. } => FleetError::malformed_key(bytes, message),
            other => other,
        })?;
        fields.push(field);
    }
    if !input.is_empty() {
        return Err(FleetError::malformed_key(
            bytes,
            format!("{} bytes left over after {} fields", input.len(), kinds.len()),
        ));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_order_crosses_zero() {
        let values = [i64::MIN, -100, -1, 0, 1, 50, i64::MAX];
        for pair in values.windows(2) {
            assert!(encode(&pair[0]) < encode(&pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_string_prefixes_sort_first() {
        assert!(encode("a") < encode("ab"));
        assert!(encode("a") < encode("a\0"));
        assert!(encode("a\0") < encode("a\u{1}"));
        assert!(encode("") < encode("\0"));
    }

    #[test]
    fn test_tuple_round_trip_with_embedded_nul() {
        let key = encode(&("df", "/dev\0root", -5i64));
        let decoded: (String, String, i64) = decode(&key).unwrap();
        assert_eq!(decoded, ("df".to_string(), "/dev\0root".to_string(), -5));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let key = encode(&("node", 1i64));
        let err = decode::<(String,)>(&key).unwrap_err();
        assert!(matches!(err, FleetError::MalformedKey { .. }));
    }

    #[test]
    fn test_decode_rejects_truncated_integer() {
        let mut key = encode(&7i64);
        key.pop();
        assert!(matches!(
            decode::<i64>(&key),
            Err(FleetError::MalformedKey { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unterminated_string() {
        let mut key = encode("node");
        key.truncate(key.len() - 1);
        assert!(decode::<String>(&key).is_err());
    }

    #[test]
    fn test_decode_prefix_returns_rest() {
        let key = encode(&("a", 1i64, "rest"));
        let ((first, second), rest): ((String, i64), &[u8]) = decode_prefix(&key).unwrap();
        assert_eq!(first, "a");
        assert_eq!(second, 1);
        assert_eq!(decode::<String>(rest).unwrap(), "rest");
        assert_eq!(prefix_len::<(String, i64)>(&key).unwrap(), key.len() - rest.len());
    }

    #[test]
    fn test_decode_fields() {
        let key = encode(&("/tmp", "node", 61i64));
        let fields = decode_fields(&key, &[FieldKind::Str, FieldKind::Str, FieldKind::Int]).unwrap();
        assert_eq!(
            fields,
            vec![
                Field::Str("/tmp".into()),
                Field::Str("node".into()),
                Field::Int(61)
            ]
        );
        assert!(decode_fields(&key, &[FieldKind::Str]).is_err());
    }

    #[test]
    fn test_int_lists() {
        let bytes = encode(&vec![3i64, -1, 7]);
        assert_eq!(decode_ints(&bytes).unwrap(), vec![3, -1, 7]);
        assert!(decode_ints(&bytes[..5]).is_err());
        assert!(decode_ints(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_unit_is_empty() {
        assert!(encode(&()).is_empty());
        decode::<()>(&[]).unwrap();
    }
}
