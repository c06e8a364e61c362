//! Text-format value decoders.
//!
//! Catalog and simple-query results arrive as text, so every decoder here
//! parses the PostgreSQL text representation of its type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use super::value::{RangeValue, TypedValue};
use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Decoder {
    Bool,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytea,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    /// Enum labels decode to text; the type name is kept for display.
    Enum(String),
    Array {
        element: Box<Decoder>,
        delimiter: char,
    },
    Range(Box<Decoder>),
}

/// Base type names recognised without looking at anything but `typname`.
pub const KNOWN_BASE_TYPES: &[&str] = &[
    "bool",
    "int2",
    "int4",
    "int8",
    "oid",
    "float4",
    "float8",
    "numeric",
    "text",
    "varchar",
    "bpchar",
    "char",
    "name",
    "uuid",
    "interval",
    "xml",
    "bytea",
    "date",
    "time",
    "timestamp",
    "timestamptz",
    "json",
    "jsonb",
];

impl Decoder {
    pub fn for_base_type(name: &str) -> Option<Decoder> {
        let decoder = match name {
            "bool" => Decoder::Bool,
            "int2" => Decoder::Int2,
            "int4" => Decoder::Int4,
            "int8" => Decoder::Int8,
            "oid" => Decoder::Oid,
            "float4" => Decoder::Float4,
            "float8" => Decoder::Float8,
            "numeric" => Decoder::Numeric,
            "text" | "varchar" | "bpchar" | "char" | "name" | "uuid" | "interval" | "xml" => {
                Decoder::Text
            }
            "bytea" => Decoder::Bytea,
            "date" => Decoder::Date,
            "time" => Decoder::Time,
            "timestamp" => Decoder::Timestamp,
            "timestamptz" => Decoder::TimestampTz,
            "json" | "jsonb" => Decoder::Json,
            _ => return None,
        };
        Some(decoder)
    }

    pub fn name(&self) -> String {
        match self {
            Decoder::Bool => "bool".into(),
            Decoder::Int2 => "int2".into(),
            Decoder::Int4 => "int4".into(),
            Decoder::Int8 => "int8".into(),
            Decoder::Oid => "oid".into(),
            Decoder::Float4 => "float4".into(),
            Decoder::Float8 => "float8".into(),
            Decoder::Numeric => "numeric".into(),
            Decoder::Text => "text".into(),
            Decoder::Bytea => "bytea".into(),
            Decoder::Date => "date".into(),
            Decoder::Time => "time".into(),
            Decoder::Timestamp => "timestamp".into(),
            Decoder::TimestampTz => "timestamptz".into(),
            Decoder::Json => "json".into(),
            Decoder::Enum(name) => format!("enum {}", name),
            Decoder::Array { element, .. } => format!("{}[]", element.name()),
            Decoder::Range(element) => format!("range<{}>", element.name()),
        }
    }

    /// Decode one non-NULL value in text format.
    pub fn decode(&self, oid: u32, raw: &str) -> Result<TypedValue> {
        let value = match self {
            Decoder::Bool => match raw.to_ascii_lowercase().as_str() {
                "t" | "true" => TypedValue::Bool(true),
                "f" | "false" => TypedValue::Bool(false),
                other => return Err(AdapterError::decode(oid, format!("not a boolean: {other}"))),
            },
            Decoder::Int2 => TypedValue::Int16(parse_num(oid, raw)?),
            Decoder::Int4 => TypedValue::Int32(parse_num(oid, raw)?),
            Decoder::Int8 => TypedValue::Int64(parse_num(oid, raw)?),
            Decoder::Oid => TypedValue::Int64(parse_num::<u32>(oid, raw)? as i64),
            Decoder::Float4 => TypedValue::Float32(parse_num(oid, raw)?),
            Decoder::Float8 => TypedValue::Float64(parse_num(oid, raw)?),
            Decoder::Numeric => TypedValue::Numeric(raw.to_string()),
            Decoder::Text | Decoder::Enum(_) => TypedValue::Text(raw.to_string()),
            Decoder::Bytea => TypedValue::Bytes(decode_bytea(oid, raw)?),
            Decoder::Date => {
                if is_infinity(raw) {
                    return Ok(TypedValue::Unknown(raw.to_string()));
                }
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map(TypedValue::Date)
                    .map_err(|e| AdapterError::decode(oid, e.to_string()))?
            }
            Decoder::Time => NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
                .map(TypedValue::Time)
                .map_err(|e| AdapterError::decode(oid, e.to_string()))?,
            Decoder::Timestamp => {
                if is_infinity(raw) {
                    return Ok(TypedValue::Unknown(raw.to_string()));
                }
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                    .map(TypedValue::DateTime)
                    .map_err(|e| AdapterError::decode(oid, e.to_string()))?
            }
            Decoder::TimestampTz => {
                if is_infinity(raw) {
                    return Ok(TypedValue::Unknown(raw.to_string()));
                }
                DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z")
                    .map(|dt| TypedValue::TimestampTz(dt.with_timezone(&Utc)))
                    .map_err(|e| AdapterError::decode(oid, e.to_string()))?
            }
            Decoder::Json => serde_json::from_str(raw)
                .map(TypedValue::Json)
                .map_err(|e| AdapterError::decode(oid, e.to_string()))?,
            Decoder::Array { element, delimiter } => parse_array(element, *delimiter, oid, raw)?,
            Decoder::Range(element) => parse_range(element, oid, raw)?,
        };
        Ok(value)
    }
}

fn parse_num<N: std::str::FromStr>(oid: u32, raw: &str) -> Result<N>
where
    N::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<N>()
        .map_err(|e| AdapterError::decode(oid, format!("{e}: {raw:?}")))
}

fn is_infinity(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("infinity") || raw.eq_ignore_ascii_case("-infinity")
}

fn decode_bytea(oid: u32, raw: &str) -> Result<Vec<u8>> {
    if let Some(hex) = raw.strip_prefix("\\x") {
        if hex.len() % 2 != 0 {
            return Err(AdapterError::decode(oid, "odd number of hex digits"));
        }
        return hex
            .as_bytes()
            .chunks(2)
            .map(|pair| match (hex_digit(pair[0]), hex_digit(pair[1])) {
                (Some(high), Some(low)) => Ok(high << 4 | low),
                _ => Err(AdapterError::decode(
                    oid,
                    format!("invalid hex digits {:?}", String::from_utf8_lossy(pair)),
                )),
            })
            .collect();
    }

    // Escape format: `\\` is a backslash, `\ooo` an octal byte.
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
        } else if bytes.get(i + 1) == Some(&b'\\') {
            out.push(b'\\');
            i += 2;
        } else {
            let octal = raw
                .get(i + 1..i + 4)
                .ok_or_else(|| AdapterError::decode(oid, "truncated escape sequence"))?;
            let byte = u8::from_str_radix(octal, 8)
                .map_err(|e| AdapterError::decode(oid, e.to_string()))?;
            out.push(byte);
            i += 4;
        }
    }
    Ok(out)
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

fn parse_array(element: &Decoder, delimiter: char, oid: u32, raw: &str) -> Result<TypedValue> {
    let mut text = raw.trim();
    // Arrays with non-default lower bounds carry a `[1:3]=` prefix.
    if text.starts_with('[') {
        if let Some(eq) = text.find('=') {
            text = &text[eq + 1..];
        }
    }
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    let value = ArrayParser {
        element,
        delimiter,
        oid,
        chars: &chars,
    }
    .parse_level(&mut pos)?;
    skip_whitespace(&chars, &mut pos);
    if pos != chars.len() {
        return Err(AdapterError::decode(oid, "trailing characters after array"));
    }
    Ok(value)
}

struct ArrayParser<'a> {
    element: &'a Decoder,
    delimiter: char,
    oid: u32,
    chars: &'a [char],
}

impl ArrayParser<'_> {
    fn parse_level(&self, pos: &mut usize) -> Result<TypedValue> {
        skip_whitespace(self.chars, pos);
        if self.chars.get(*pos) != Some(&'{') {
            return Err(AdapterError::decode(self.oid, "array must start with '{'"));
        }
        *pos += 1;

        let mut items = Vec::new();
        skip_whitespace(self.chars, pos);
        if self.chars.get(*pos) == Some(&'}') {
            *pos += 1;
            return Ok(TypedValue::Array(items));
        }

        loop {
            skip_whitespace(self.chars, pos);
            let item = match self.chars.get(*pos) {
                None => return Err(AdapterError::decode(self.oid, "unterminated array")),
                Some('{') => self.parse_level(pos)?,
                Some('"') => {
                    let text = read_quoted(self.chars, pos)
                        .ok_or_else(|| AdapterError::decode(self.oid, "unterminated quoted element"))?;
                    self.element.decode(self.oid, &text)?
                }
                Some(_) => {
                    let text = self.read_unquoted(pos);
                    if text.eq_ignore_ascii_case("NULL") {
                        TypedValue::Null
                    } else {
                        self.element.decode(self.oid, &text)?
                    }
                }
            };
            items.push(item);

            skip_whitespace(self.chars, pos);
            match self.chars.get(*pos) {
                Some(c) if *c == self.delimiter => *pos += 1,
                Some('}') => {
                    *pos += 1;
                    return Ok(TypedValue::Array(items));
                }
                _ => return Err(AdapterError::decode(self.oid, "expected delimiter or '}'")),
            }
        }
    }

    fn read_unquoted(&self, pos: &mut usize) -> String {
        let mut text = String::new();
        while let Some(&c) = self.chars.get(*pos) {
            if c == self.delimiter || c == '}' {
                break;
            }
            if c == '\\' {
                if let Some(&next) = self.chars.get(*pos + 1) {
                    text.push(next);
                    *pos += 2;
                    continue;
                }
            }
            text.push(c);
            *pos += 1;
        }
        text.trim().to_string()
    }
}

fn skip_whitespace(chars: &[char], pos: &mut usize) {
    while chars.get(*pos).is_some_and(|c| c.is_whitespace()) {
        *pos += 1;
    }
}

/// Read a double-quoted token starting at `pos`. Handles `\x` escapes and,
/// for range bounds, doubled `""`.
fn read_quoted(chars: &[char], pos: &mut usize) -> Option<String> {
    *pos += 1;
    let mut text = String::new();
    loop {
        match chars.get(*pos)? {
            '\\' => {
                text.push(*chars.get(*pos + 1)?);
                *pos += 2;
            }
            '"' if chars.get(*pos + 1) == Some(&'"') => {
                text.push('"');
                *pos += 2;
            }
            '"' => {
                *pos += 1;
                return Some(text);
            }
            c => {
                text.push(*c);
                *pos += 1;
            }
        }
    }
}

fn parse_range(element: &Decoder, oid: u32, raw: &str) -> Result<TypedValue> {
    let text = raw.trim();
    if text.eq_ignore_ascii_case("empty") {
        return Ok(TypedValue::Range(RangeValue::empty()));
    }

    let chars: Vec<char> = text.chars().collect();
    let lower_inclusive = match chars.first() {
        Some('[') => true,
        Some('(') => false,
        _ => return Err(AdapterError::decode(oid, "range must start with '[' or '('")),
    };
    let upper_inclusive = match chars.last() {
        Some(']') if chars.len() > 1 => true,
        Some(')') if chars.len() > 1 => false,
        _ => return Err(AdapterError::decode(oid, "range must end with ']' or ')'")),
    };

    let mut pos = 1;
    let end = chars.len() - 1;
    let lower = read_range_bound(&chars, &mut pos, end, oid)?;
    if chars.get(pos) != Some(&',') {
        return Err(AdapterError::decode(oid, "range bounds must be separated by ','"));
    }
    pos += 1;
    let upper = read_range_bound(&chars, &mut pos, end, oid)?;
    if pos != end {
        return Err(AdapterError::decode(oid, "trailing characters in range"));
    }

    let decode_bound = |bound: Option<String>| -> Result<Option<Box<TypedValue>>> {
        bound
            .map(|b| element.decode(oid, &b).map(Box::new))
            .transpose()
    };

    Ok(TypedValue::Range(RangeValue {
        lower: decode_bound(lower)?,
        upper: decode_bound(upper)?,
        lower_inclusive,
        upper_inclusive,
        empty: false,
    }))
}

/// An empty bound (nothing between the bracket and the comma) is infinite.
fn read_range_bound(chars: &[char], pos: &mut usize, end: usize, oid: u32) -> Result<Option<String>> {
    if chars.get(*pos) == Some(&'"') {
        return read_quoted(chars, pos)
            .map(Some)
            .ok_or_else(|| AdapterError::decode(oid, "unterminated quoted range bound"));
    }
    let start = *pos;
    while *pos < end && chars[*pos] != ',' {
        *pos += 1;
    }
    if *pos == start {
        return Ok(None);
    }
    Ok(Some(chars[start..*pos].iter().collect()))
}
