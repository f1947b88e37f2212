//! Closed value model for note properties.
//!
//! Frontmatter is untyped at the source. Every raw YAML or JSON value is
//! classified exactly once into [`PropertyValue`] (`Absent`, `Scalar`, or
//! `List`), and the rest of the crate only ever branches on that enum.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde_yaml::Value as YamlValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(f64),
    Boolean(bool),
}

impl Scalar {
    pub fn as_display(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Number(n) => format_number(*n),
            Scalar::Boolean(b) => b.to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) if n.is_finite() => Some(*n),
            Scalar::Number(_) => None,
            other => parse_number(&other.as_display()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

/// A property value as read from a record.
///
/// List elements keep their position; a `None` element is a null entry in
/// the source list.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PropertyValue {
    #[default]
    Absent,
    Scalar(Scalar),
    List(Vec<Option<Scalar>>),
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Scalar(Scalar::Text(value.into()))
    }

    pub fn number(value: f64) -> Self {
        PropertyValue::Scalar(Scalar::Number(value))
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        PropertyValue::List(items.into_iter().map(|s| Some(s.into())).collect())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, PropertyValue::Absent)
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, PropertyValue::List(_))
    }

    /// The scalar that stands in for this value when only one is wanted:
    /// the scalar itself, or the first list element.
    pub fn first(&self) -> Option<&Scalar> {
        match self {
            PropertyValue::Absent => None,
            PropertyValue::Scalar(s) => Some(s),
            PropertyValue::List(items) => items.first().and_then(|item| item.as_ref()),
        }
    }

    /// Canonical string form of the whole value, lists joined with `", "`.
    pub fn as_display(&self) -> Option<String> {
        match self {
            PropertyValue::Absent => None,
            PropertyValue::Scalar(s) => Some(s.as_display()),
            PropertyValue::List(items) => Some(
                items
                    .iter()
                    .map(|item| item.as_ref().map(Scalar::as_display).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        }
    }
}

impl From<&YamlValue> for PropertyValue {
    fn from(value: &YamlValue) -> Self {
        match value {
            YamlValue::Null => PropertyValue::Absent,
            YamlValue::Sequence(items) => {
                PropertyValue::List(items.iter().map(yaml_element).collect())
            }
            YamlValue::Tagged(tagged) => PropertyValue::from(&tagged.value),
            other => match yaml_element(other) {
                Some(scalar) => PropertyValue::Scalar(scalar),
                None => PropertyValue::Absent,
            },
        }
    }
}

impl From<&serde_json::Value> for PropertyValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PropertyValue::Absent,
            serde_json::Value::Array(items) => {
                PropertyValue::List(items.iter().map(json_element).collect())
            }
            other => match json_element(other) {
                Some(scalar) => PropertyValue::Scalar(scalar),
                None => PropertyValue::Absent,
            },
        }
    }
}

fn yaml_element(value: &YamlValue) -> Option<Scalar> {
    match value {
        YamlValue::Null => None,
        YamlValue::Bool(b) => Some(Scalar::Boolean(*b)),
        YamlValue::Number(n) => match n.as_f64() {
            Some(f) => Some(Scalar::Number(f)),
            None => Some(Scalar::Text(n.to_string())),
        },
        YamlValue::String(s) => Some(Scalar::Text(s.clone())),
        YamlValue::Tagged(tagged) => yaml_element(&tagged.value),
        nested => serde_json::to_string(nested).ok().map(Scalar::Text),
    }
}

fn json_element(value: &serde_json::Value) -> Option<Scalar> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Scalar::Boolean(*b)),
        serde_json::Value::Number(n) => n.as_f64().map(Scalar::Number),
        serde_json::Value::String(s) => Some(Scalar::Text(s.clone())),
        nested => Some(Scalar::Text(nested.to_string())),
    }
}

pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Strict numeric parse: trimmed, non-empty, finite.
pub fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parses `YYYY-MM-DD` or a strict ISO-8601 timestamp and returns its
/// calendar day. Zoned timestamps are converted to local time first.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(zoned) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(zoned.with_timezone(&Local).date_naive());
    }
    const ISO_LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];
    ISO_LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|dt| dt.date())
}

/// Looser date parse used only for ordering labels and cell entries.
pub fn parse_sortable_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(zoned) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(zoned.naive_utc());
    }
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(parsed);
        }
    }
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
