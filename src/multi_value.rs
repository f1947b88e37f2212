use std::fmt;
use std::str::FromStr;

use anyhow::{Error, anyhow};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::codec::EMPTY_KEY;
use crate::engine::{DateAnchor, bucket_scalar_value, numeric_value};
use crate::spec::BucketSpec;
use crate::value::{PropertyValue, Scalar};

/// How a list-valued property is placed on an axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiValueMode {
    /// The whole list is one opaque value.
    #[default]
    Disallow,
    /// One bucket per element.
    Explode,
    /// First element only.
    Primary,
}

impl MultiValueMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MultiValueMode::Disallow => "disallow",
            MultiValueMode::Explode => "explode",
            MultiValueMode::Primary => "primary",
        }
    }
}

impl fmt::Display for MultiValueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MultiValueMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disallow" => Ok(MultiValueMode::Disallow),
            "explode" => Ok(MultiValueMode::Explode),
            "primary" => Ok(MultiValueMode::Primary),
            other => Err(anyhow!("Unknown multi-value mode '{other}'")),
        }
    }
}

/// The values that get bucketed for one record on one axis.
pub fn select_values(value: &PropertyValue, mode: MultiValueMode) -> Vec<PropertyValue> {
    let PropertyValue::List(items) = value else {
        return vec![value.clone()];
    };
    let element = |item: &Option<Scalar>| match item {
        Some(scalar) => PropertyValue::Scalar(scalar.clone()),
        None => PropertyValue::Absent,
    };
    match mode {
        MultiValueMode::Explode if items.is_empty() => vec![PropertyValue::Absent],
        MultiValueMode::Explode => items.iter().map(element).collect(),
        MultiValueMode::Primary => vec![items.first().map(element).unwrap_or_default()],
        MultiValueMode::Disallow => vec![value.clone()],
    }
}

/// Unique bucket keys for a value, in first-seen order.
pub fn bucket_keys_for(
    value: &PropertyValue,
    mode: MultiValueMode,
    spec: &BucketSpec,
    anchor: &DateAnchor,
    quantile_edges: &[f64],
) -> Vec<String> {
    if value.is_absent() {
        return vec![EMPTY_KEY.to_string()];
    }
    select_values(value, mode)
        .iter()
        .map(|v| bucket_scalar_value(v, spec, anchor).resolve(quantile_edges))
        .unique()
        .collect()
}

/// Numbers a record contributes to an axis' quantile sample.
pub fn numeric_samples(value: &PropertyValue, mode: MultiValueMode) -> Vec<f64> {
    select_values(value, mode)
        .iter()
        .filter_map(numeric_value)
        .collect()
}
