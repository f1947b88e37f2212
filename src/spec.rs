use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::INVALID_KEY;
use crate::value::{format_number, parse_number};

pub const MIN_QUANTILES: u32 = 2;
pub const MAX_QUANTILES: u32 = 10;
pub const DEFAULT_QUANTILES: u32 = 4;

/// Rejections raised while a bucket spec is being edited.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SpecError {
    #[error("Bad min in: {line}")]
    BadMin { line: String },
    #[error("Bad max in: {line}")]
    BadMax { line: String },
    #[error("Range #{index} has an empty label")]
    EmptyLabel { index: usize },
    #[error("Range '{label}' has a non-finite bound")]
    NonFiniteBound { label: String },
    #[error("Range '{label}' is empty: min {min} is not below max {max}")]
    InvertedRange { label: String, min: String, max: String },
    #[error("Quantile count must be between 2 and 10, got {0}")]
    QuantileCount(u32),
    #[error("Invalid-value label must not be blank")]
    BlankInvalidLabel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateRelativeMode {
    #[default]
    #[serde(rename = "overdue-today-week-nextweek-month-later")]
    RelativeWindows,
}

/// A labelled half-open interval `[min, max)`; a missing bound is unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberRange {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl NumberRange {
    pub fn new(label: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            label: label.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let min_ok = self.min.is_none_or(|min| value >= min);
        let max_ok = self.max.is_none_or(|max| value < max);
        min_ok && max_ok
    }
}

/// How one axis maps property values to bucket keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BucketSpec {
    #[default]
    Categorical,
    DateRelative {
        #[serde(default)]
        mode: DateRelativeMode,
    },
    NumberRanges {
        #[serde(default)]
        ranges: Vec<NumberRange>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invalid_label: Option<String>,
    },
    NumberQuantiles {
        k: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invalid_label: Option<String>,
    },
}

impl BucketSpec {
    pub fn date_relative() -> Self {
        BucketSpec::DateRelative {
            mode: DateRelativeMode::default(),
        }
    }

    pub fn number_ranges(ranges: Vec<NumberRange>) -> Result<Self, SpecError> {
        let spec = BucketSpec::NumberRanges {
            ranges,
            invalid_label: None,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn number_quantiles(k: u32) -> Result<Self, SpecError> {
        let spec = BucketSpec::NumberQuantiles {
            k,
            invalid_label: None,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_invalid_label(self, label: impl Into<String>) -> Result<Self, SpecError> {
        let label = label.into();
        let spec = match self {
            BucketSpec::NumberRanges { ranges, .. } => BucketSpec::NumberRanges {
                ranges,
                invalid_label: Some(label),
            },
            BucketSpec::NumberQuantiles { k, .. } => BucketSpec::NumberQuantiles {
                k,
                invalid_label: Some(label),
            },
            other => other,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            BucketSpec::Categorical => "categorical",
            BucketSpec::DateRelative { .. } => "dateRelative",
            BucketSpec::NumberRanges { .. } => "numberRanges",
            BucketSpec::NumberQuantiles { .. } => "numberQuantiles",
        }
    }

    /// Key used for values that cannot be parsed under this spec.
    pub fn invalid_label(&self) -> &str {
        match self {
            BucketSpec::NumberRanges {
                invalid_label: Some(label),
                ..
            }
            | BucketSpec::NumberQuantiles {
                invalid_label: Some(label),
                ..
            } => label,
            _ => INVALID_KEY,
        }
    }

    /// Only categorical keys map back to exactly one concrete value.
    pub fn is_reversible(&self) -> bool {
        matches!(self, BucketSpec::Categorical)
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        match self {
            BucketSpec::Categorical | BucketSpec::DateRelative { .. } => Ok(()),
            BucketSpec::NumberRanges {
                ranges,
                invalid_label,
            } => {
                validate_invalid_label(invalid_label.as_deref())?;
                for (index, range) in ranges.iter().enumerate() {
                    validate_range(index, range)?;
                }
                Ok(())
            }
            BucketSpec::NumberQuantiles { k, invalid_label } => {
                validate_invalid_label(invalid_label.as_deref())?;
                if !(MIN_QUANTILES..=MAX_QUANTILES).contains(k) {
                    return Err(SpecError::QuantileCount(*k));
                }
                Ok(())
            }
        }
    }
}

fn validate_invalid_label(label: Option<&str>) -> Result<(), SpecError> {
    match label {
        Some(label) if label.trim().is_empty() => Err(SpecError::BlankInvalidLabel),
        _ => Ok(()),
    }
}

fn validate_range(index: usize, range: &NumberRange) -> Result<(), SpecError> {
    if range.label.trim().is_empty() {
        return Err(SpecError::EmptyLabel { index });
    }
    let finite = |bound: Option<f64>| bound.is_none_or(f64::is_finite);
    if !finite(range.min) || !finite(range.max) {
        return Err(SpecError::NonFiniteBound {
            label: range.label.clone(),
        });
    }
    if let (Some(min), Some(max)) = (range.min, range.max)
        && min >= max
    {
        return Err(SpecError::InvertedRange {
            label: range.label.clone(),
            min: format_number(min),
            max: format_number(max),
        });
    }
    Ok(())
}

/// Parses the line-oriented range editor format `label|min|max`.
///
/// Blank lines and lines without a label are skipped; an empty bound means
/// unbounded on that side.
pub fn parse_ranges(text: &str) -> Result<Vec<NumberRange>, SpecError> {
    let mut ranges = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut parts = line.split('|').map(str::trim);
        let label = parts.next().unwrap_or_default();
        if label.is_empty() {
            continue;
        }
        let min_raw = parts.next().unwrap_or_default();
        let max_raw = parts.next().unwrap_or_default();
        let min = parse_bound(min_raw).map_err(|_| SpecError::BadMin {
            line: line.to_string(),
        })?;
        let max = parse_bound(max_raw).map_err(|_| SpecError::BadMax {
            line: line.to_string(),
        })?;
        let range = NumberRange::new(label, min, max);
        validate_range(ranges.len(), &range)?;
        ranges.push(range);
    }
    Ok(ranges)
}

fn parse_bound(raw: &str) -> Result<Option<f64>, ()> {
    if raw.is_empty() {
        return Ok(None);
    }
    parse_number(raw).map(Some).ok_or(())
}

pub fn serialize_ranges(ranges: &[NumberRange]) -> String {
    ranges
        .iter()
        .map(|r| {
            format!(
                "{}|{}|{}",
                r.label,
                r.min.map(format_number).unwrap_or_default(),
                r.max.map(format_number).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
