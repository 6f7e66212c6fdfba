// Wire encoding of domain parameters and raw key material.
//
// Parameter message, delimited form (default):
//
//   <p decimal> DELIM <q decimal> DELIM <g decimal>
//
// Parameter message, length-prefixed form:
//
//   u32 BE body_len | ( u32 BE field_len | field bytes (big-endian) ) x 3
//
// Keys are raw big-endian bytes, left zero-padded to a length both sides
// derive from the agreed group. They carry no framing of their own.

use num_bigint::BigUint;

use crate::crypto::group::DomainParameters;
use crate::error::{KexError, Result};

/// Separator used by deployed relays.
pub const DEFAULT_DELIMITER: u8 = b'.';

/// Size of the body-length header in the length-prefixed form.
pub const FRAME_HEADER_LEN: usize = 4;

const FIELD_NAMES: [&str; 3] = ["p", "q", "g"];

/// A parameter-field separator that cannot occur inside a decimal numeral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiter(u8);

impl Delimiter {
    pub fn new(byte: u8) -> Result<Self> {
        if byte.is_ascii_digit() {
            return Err(KexError::InvalidDelimiter(byte));
        }
        Ok(Self(byte))
    }

    pub fn byte(self) -> u8 {
        self.0
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Self(DEFAULT_DELIMITER)
    }
}

/// How the parameter message is laid out on the wire. Both ends of a
/// deployment must agree on this out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterEncoding {
    /// Decimal fields separated by a single delimiter byte, unframed.
    Delimited(Delimiter),
    /// Binary fields, each length-prefixed, inside a length-prefixed body.
    LengthPrefixed,
}

impl Default for ParameterEncoding {
    fn default() -> Self {
        ParameterEncoding::Delimited(Delimiter::default())
    }
}

impl ParameterEncoding {
    pub fn encode(&self, params: &DomainParameters) -> Vec<u8> {
        match self {
            ParameterEncoding::Delimited(delimiter) => {
                encode_parameters(params.p(), params.q(), params.g(), *delimiter)
            }
            ParameterEncoding::LengthPrefixed => encode_framed(params),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<DomainParameters> {
        match self {
            ParameterEncoding::Delimited(delimiter) => decode_parameters(bytes, *delimiter),
            ParameterEncoding::LengthPrefixed => decode_framed(bytes),
        }
    }

    pub fn is_framed(&self) -> bool {
        matches!(self, ParameterEncoding::LengthPrefixed)
    }
}

// ── Delimited form ───────────────────────────────────────────────────────

/// Encode `p`, `q`, `g` as decimal separated by `delimiter`, with no
/// trailing delimiter.
pub fn encode_parameters(p: &BigUint, q: &BigUint, g: &BigUint, delimiter: Delimiter) -> Vec<u8> {
    let sep = char::from(delimiter.byte());
    format!("{p}{sep}{q}{sep}{g}").into_bytes()
}

/// Split a delimited parameter message into its three fields.
///
/// Exactly three non-empty, all-digit fields are accepted. Group properties
/// are not checked here.
pub fn decode_parameters(bytes: &[u8], delimiter: Delimiter) -> Result<DomainParameters> {
    let fields: Vec<&[u8]> = bytes.split(|b| *b == delimiter.byte()).collect();
    if fields.len() != FIELD_NAMES.len() {
        return Err(KexError::MalformedParameters(format!(
            "expected {} fields separated by {:?}, found {}",
            FIELD_NAMES.len(),
            char::from(delimiter.byte()),
            fields.len()
        )));
    }
    let p = parse_decimal(FIELD_NAMES[0], fields[0])?;
    let q = parse_decimal(FIELD_NAMES[1], fields[1])?;
    let g = parse_decimal(FIELD_NAMES[2], fields[2])?;
    Ok(DomainParameters::new(p, q, g))
}

fn parse_decimal(name: &str, field: &[u8]) -> Result<BigUint> {
    if field.is_empty() {
        return Err(KexError::MalformedParameters(format!("field {name} is empty")));
    }
    if let Some(offset) = field.iter().position(|b| !b.is_ascii_digit()) {
        return Err(KexError::MalformedParameters(format!(
            "field {name} has non-digit byte 0x{:02x} at offset {offset}",
            field[offset]
        )));
    }
    BigUint::parse_bytes(field, 10)
        .ok_or_else(|| KexError::MalformedParameters(format!("field {name} is not a decimal integer")))
}

// ── Length-prefixed form ─────────────────────────────────────────────────

fn encode_framed(params: &DomainParameters) -> Vec<u8> {
    let fields = [
        params.p().to_bytes_be(),
        params.q().to_bytes_be(),
        params.g().to_bytes_be(),
    ];
    let body_len: usize = fields.iter().map(|f| 4 + f.len()).sum();

    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body_len);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    for field in &fields {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Body length declared by a length-prefixed header.
pub fn framed_body_len(header: &[u8]) -> Result<usize> {
    let header: [u8; FRAME_HEADER_LEN] = header.try_into().map_err(|_| {
        KexError::MalformedParameters(format!(
            "frame header is {} bytes, expected {FRAME_HEADER_LEN}",
            header.len()
        ))
    })?;
    Ok(u32::from_be_bytes(header) as usize)
}

fn decode_framed(bytes: &[u8]) -> Result<DomainParameters> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(KexError::MalformedParameters(format!(
            "frame too short: {} bytes",
            bytes.len()
        )));
    }
    let (header, body) = bytes.split_at(FRAME_HEADER_LEN);
    let declared = framed_body_len(header)?;
    if declared != body.len() {
        return Err(KexError::MalformedParameters(format!(
            "declared body length {declared} but {} bytes present",
            body.len()
        )));
    }

    let mut rest = body;
    let mut values = Vec::with_capacity(FIELD_NAMES.len());
    for name in FIELD_NAMES {
        if rest.len() < 4 {
            return Err(KexError::MalformedParameters(format!(
                "field {name} is truncated"
            )));
        }
        let (len_bytes, tail) = rest.split_at(4);
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if len == 0 {
            return Err(KexError::MalformedParameters(format!("field {name} is empty")));
        }
        if tail.len() < len {
            return Err(KexError::MalformedParameters(format!(
                "field {name} declares {len} bytes but {} remain",
                tail.len()
            )));
        }
        let (value, tail) = tail.split_at(len);
        values.push(BigUint::from_bytes_be(value));
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(KexError::MalformedParameters(format!(
            "{} trailing bytes after field g",
            rest.len()
        )));
    }

    let g = values.pop();
    let q = values.pop();
    let p = values.pop();
    match (p, q, g) {
        (Some(p), Some(q), Some(g)) => Ok(DomainParameters::new(p, q, g)),
        _ => Err(KexError::MalformedParameters("missing fields".into())),
    }
}

// ── Key material ─────────────────────────────────────────────────────────

/// Encode `value` big-endian, left zero-padded to exactly `len` bytes.
pub fn encode_key(value: &BigUint, len: usize) -> Result<Vec<u8>> {
    let raw = value.to_bytes_be();
    // BigUint encodes zero as a single 0x00 byte.
    let raw: &[u8] = if raw == [0] { &[] } else { &raw };
    if raw.len() > len {
        return Err(KexError::InvalidKeyLength {
            expected: len,
            actual: raw.len(),
        });
    }
    let mut out = vec![0u8; len];
    out[len - raw.len()..].copy_from_slice(raw);
    Ok(out)
}

/// Interpret big-endian key bytes as an integer.
pub fn decode_key(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}
