use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Arbitrary-precision numbers are kept in their textual form.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<TypedValue>),
    Range(RangeValue),
    Unknown(String),
}

/// A range literal such as `[1,10)`. `None` bounds are infinite.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    pub lower: Option<Box<TypedValue>>,
    pub upper: Option<Box<TypedValue>>,
    pub lower_inclusive: bool,
    pub upper_inclusive: bool,
    pub empty: bool,
}

impl RangeValue {
    pub fn empty() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_inclusive: false,
            upper_inclusive: false,
            empty: true,
        }
    }
}

impl TypedValue {
    pub fn display(&self) -> String {
        match self {
            TypedValue::Null => "NULL".to_string(),
            TypedValue::Bool(b) => b.to_string(),
            TypedValue::Int16(i) => i.to_string(),
            TypedValue::Int32(i) => i.to_string(),
            TypedValue::Int64(i) => i.to_string(),
            TypedValue::Float32(f) => f.to_string(),
            TypedValue::Float64(f) => f.to_string(),
            TypedValue::Numeric(n) => n.clone(),
            TypedValue::Text(s) => s.clone(),
            TypedValue::Bytes(b) => format!("[{} bytes]", b.len()),
            TypedValue::Date(d) => d.to_string(),
            TypedValue::Time(t) => t.to_string(),
            TypedValue::DateTime(dt) => dt.to_string(),
            TypedValue::TimestampTz(dt) => dt.to_string(),
            TypedValue::Json(j) => j.to_string(),
            TypedValue::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| v.display()).collect();
                format!("{{{}}}", items.join(", "))
            }
            TypedValue::Range(r) => {
                if r.empty {
                    return "empty".to_string();
                }
                let lower = r.lower.as_ref().map(|v| v.display()).unwrap_or_default();
                let upper = r.upper.as_ref().map(|v| v.display()).unwrap_or_default();
                format!(
                    "{}{},{}{}",
                    if r.lower_inclusive { '[' } else { '(' },
                    lower,
                    upper,
                    if r.upper_inclusive { ']' } else { ')' }
                )
            }
            TypedValue::Unknown(s) => s.clone(),
        }
    }

    pub fn display_width(&self) -> usize {
        unicode_width::UnicodeWidthStr::width(self.display().as_str())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }
}
