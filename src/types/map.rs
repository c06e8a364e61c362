use std::collections::BTreeMap;

use tracing::warn;

use super::decode::{Decoder, KNOWN_BASE_TYPES};
use super::value::TypedValue;
use crate::db::RowSet;
use crate::error::Result;

/// OID → decoder associations owned by a single connection.
#[derive(Debug, Clone, Default)]
pub struct TypeDecodeMap {
    decoders: BTreeMap<u32, Decoder>,
}

impl TypeDecodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, oid: u32, decoder: Decoder) {
        self.decoders.insert(oid, decoder);
    }

    pub fn get(&self, oid: u32) -> Option<&Decoder> {
        self.decoders.get(&oid)
    }

    pub fn contains(&self, oid: u32) -> bool {
        self.decoders.contains_key(&oid)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn oids(&self) -> impl Iterator<Item = u32> + '_ {
        self.decoders.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Decoder)> {
        self.decoders.iter().map(|(oid, d)| (*oid, d))
    }

    /// Decode a raw text value. Unregistered OIDs fall back to lossy text.
    pub fn decode(&self, oid: u32, raw: Option<&[u8]>) -> Result<TypedValue> {
        let Some(bytes) = raw else {
            return Ok(TypedValue::Null);
        };
        let text = String::from_utf8_lossy(bytes);
        match self.decoders.get(&oid) {
            Some(decoder) => decoder.decode(oid, &text),
            None => Ok(TypedValue::Unknown(text.into_owned())),
        }
    }
}

/// One `pg_type` row as returned by the type-discovery query.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRow {
    pub oid: u32,
    pub typname: String,
    pub typelem: u32,
    pub typdelim: char,
    pub typinput: String,
    pub typtype: char,
    pub typbasetype: u32,
    /// Absent when the backend has no range catalog.
    pub rngsubtype: Option<u32>,
}

impl TypeRow {
    /// Read row `idx` of `rows`. Rows without a parsable `oid` or `typname`
    /// are skipped; every other column is optional.
    pub fn from_row_set(rows: &RowSet, idx: usize) -> Option<Self> {
        let oid = rows.get(idx, "oid")?.parse().ok()?;
        let typname = rows.get(idx, "typname")?.to_string();
        let parse_oid = |column: &str| -> Option<u32> {
            rows.get(idx, column).and_then(|v| v.parse().ok())
        };
        Some(TypeRow {
            oid,
            typname,
            typelem: parse_oid("typelem").unwrap_or(0),
            typdelim: rows
                .get(idx, "typdelim")
                .and_then(|v| v.chars().next())
                .unwrap_or(','),
            typinput: rows.get(idx, "typinput").unwrap_or_default().to_string(),
            typtype: rows
                .get(idx, "typtype")
                .and_then(|v| v.chars().next())
                .unwrap_or('b'),
            typbasetype: parse_oid("typbasetype").unwrap_or(0),
            rngsubtype: parse_oid("rngsubtype").filter(|oid| *oid != 0),
        })
    }
}

/// Builds decoder associations from catalog rows.
///
/// Rows are registered in dependency order: known base types, then ranges,
/// enums, domains and finally arrays, so that every composite decoder can
/// find the decoder of the type it wraps.
#[derive(Debug, Clone, Copy)]
pub struct TypeMapInitializer {
    ranges: bool,
}

impl TypeMapInitializer {
    pub fn new(ranges: bool) -> Self {
        Self { ranges }
    }

    pub fn register(&self, map: &mut TypeDecodeMap, rows: &[TypeRow]) {
        let (known, rest): (Vec<&TypeRow>, Vec<&TypeRow>) = rows
            .iter()
            .partition(|row| KNOWN_BASE_TYPES.contains(&row.typname.as_str()));

        for row in &known {
            if let Some(decoder) = Decoder::for_base_type(&row.typname) {
                map.insert(row.oid, decoder);
            }
        }

        let mut ranges = Vec::new();
        let mut enums = Vec::new();
        let mut domains = Vec::new();
        let mut arrays = Vec::new();
        for row in rest {
            match row.typtype {
                'r' => ranges.push(row),
                'e' => enums.push(row),
                'd' => domains.push(row),
                _ if row.typinput == "array_in" => arrays.push(row),
                // Fixed-length element types such as point or int2vector.
                _ if row.typelem != 0 => {
                    warn!(oid = row.oid, typname = %row.typname, "element type without array_in, skipping")
                }
                _ => {}
            }
        }

        if self.ranges {
            for row in ranges {
                let Some(subtype) = row.rngsubtype else {
                    continue;
                };
                match map.get(subtype).cloned() {
                    Some(element) => map.insert(row.oid, Decoder::Range(Box::new(element))),
                    None => warn!(oid = row.oid, subtype, "range subtype has no decoder"),
                }
            }
        }

        for row in enums {
            map.insert(row.oid, Decoder::Enum(row.typname.clone()));
        }

        for row in domains {
            match map.get(row.typbasetype).cloned() {
                Some(base) => map.insert(row.oid, base),
                None => warn!(oid = row.oid, base = row.typbasetype, "domain base type has no decoder"),
            }
        }

        for row in arrays {
            match map.get(row.typelem).cloned() {
                Some(element) => map.insert(
                    row.oid,
                    Decoder::Array {
                        element: Box::new(element),
                        delimiter: row.typdelim,
                    },
                ),
                None => warn!(oid = row.oid, element = row.typelem, "array element type has no decoder"),
            }
        }
    }
}
