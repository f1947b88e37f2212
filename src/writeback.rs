//! Turning bucket moves back into frontmatter edits.
//!
//! [`writeback_status`] decides whether moves are allowed at all for the
//! current axes, [`bucket_key_to_writable_value`] maps a target key to the
//! value that would be written, and [`write_axis_move`] performs the edit on
//! a frontmatter mapping. [`apply_move`] and [`bulk_assign`] drive edits
//! through a [`FrontmatterEditor`].

use anyhow::{Result, bail};
use async_trait::async_trait;
use itertools::Itertools;
use log::{debug, warn};
use serde::Serialize;
use serde_yaml::{Mapping, Value as YamlValue};

use crate::axis_state::AxisId;
use crate::codec::{EMPTY_KEY, INVALID_KEY};
use crate::matrix::{AxisPlan, Record};
use crate::multi_value::MultiValueMode;
use crate::property::PropertyId;
use crate::spec::BucketSpec;
use crate::value::PropertyValue;

/// Why a bucket key cannot be written back as a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotWritable {
    /// Moving into the empty bucket clears the property instead.
    Empty,
    Invalid,
    DerivedNotSupported,
}

impl NotWritable {
    /// Reason text; `None` for the empty bucket, which is not an error.
    pub fn reason(self) -> Option<&'static str> {
        match self {
            NotWritable::Empty => None,
            NotWritable::Invalid => Some("invalid"),
            NotWritable::DerivedNotSupported => Some("derived-not-supported"),
        }
    }
}

pub fn bucket_key_to_writable_value(spec: &BucketSpec, key: &str) -> Result<String, NotWritable> {
    if key == EMPTY_KEY {
        return Err(NotWritable::Empty);
    }
    if key == INVALID_KEY {
        return Err(NotWritable::Invalid);
    }
    match spec {
        BucketSpec::Categorical => Ok(key.to_string()),
        _ => Err(NotWritable::DerivedNotSupported),
    }
}

/// Writeback diagnostics for one axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisWriteback {
    #[serde(skip)]
    pub axis: AxisId,
    pub property: String,
    pub mode: MultiValueMode,
    pub multi_value_count: usize,
    pub reversible: bool,
    pub writable: bool,
}

impl AxisWriteback {
    fn blocked_by_multi_values(&self) -> bool {
        self.multi_value_count > 0 && self.mode == MultiValueMode::Disallow
    }

    pub fn multi_value_reason(&self) -> Option<String> {
        if !self.blocked_by_multi_values() {
            return None;
        }
        let label = self.axis.label();
        Some(format!(
            "{label} has multi-values in {} note(s) (set {label} multi-value to Explode/Primary).",
            self.multi_value_count
        ))
    }

    pub fn allowed(&self) -> bool {
        self.reversible && self.writable && !self.blocked_by_multi_values()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WritebackStatus {
    pub enable_drag: bool,
    pub rows: AxisWriteback,
    pub cols: AxisWriteback,
}

impl WritebackStatus {
    /// Multi-value diagnostics across both axes.
    pub fn reasons(&self) -> Vec<String> {
        [&self.rows, &self.cols]
            .into_iter()
            .filter_map(AxisWriteback::multi_value_reason)
            .collect()
    }

    /// Data-level gate: no blocking multi-values and both specs reversible.
    pub fn writeback_allowed(&self) -> bool {
        self.reasons().is_empty() && self.rows.reversible && self.cols.reversible
    }

    /// Full gate, including property writability and the drag option.
    pub fn allowed(&self) -> bool {
        self.enable_drag && self.rows.allowed() && self.cols.allowed()
    }

    pub fn describe(&self) -> String {
        if !self.enable_drag {
            return "Drag & drop is off (enable it in configure view).".to_string();
        }
        if !self.rows.writable || !self.cols.writable {
            return "Drag disabled: only note.* properties are writable.".to_string();
        }
        if !self.writeback_allowed() {
            let mut reasons = self.reasons();
            if !self.rows.reversible || !self.cols.reversible {
                reasons.push("bucketing is non-reversible (Date/Number).".to_string());
            }
            return format!("Drag disabled: {}", reasons.join(" "));
        }
        "Drag enabled.".to_string()
    }
}

fn axis_writeback<R: Record>(records: &[R], axis: AxisId, plan: &AxisPlan) -> AxisWriteback {
    let multi_value_count = records
        .iter()
        .filter(|record| record.value(&plan.property).is_multi())
        .count();
    AxisWriteback {
        axis,
        property: plan.property.to_string(),
        mode: plan.mode,
        multi_value_count,
        reversible: plan.spec.is_reversible(),
        writable: plan.property.is_writable(),
    }
}

pub fn writeback_status<R: Record>(
    records: &[R],
    rows: &AxisPlan,
    cols: &AxisPlan,
    enable_drag: bool,
) -> WritebackStatus {
    let status = WritebackStatus {
        enable_drag,
        rows: axis_writeback(records, AxisId::Rows, rows),
        cols: axis_writeback(records, AxisId::Cols, cols),
    };
    debug!(
        "Writeback gate: rows {} ({}, reversible={}, multi={}), cols {} ({}, reversible={}, multi={}), drag={} -> allowed={}",
        rows.property,
        rows.spec.type_name(),
        status.rows.reversible,
        status.rows.multi_value_count,
        cols.property,
        cols.spec.type_name(),
        status.cols.reversible,
        status.cols.multi_value_count,
        enable_drag,
        status.allowed()
    );
    status
}

/// Same text the element buckets under, so `3.0` matches key `3`.
fn yaml_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::Sequence(_) | YamlValue::Mapping(_) => None,
        other => match PropertyValue::from(other) {
            PropertyValue::Scalar(scalar) => Some(scalar.as_display()),
            _ => None,
        },
    }
}

fn current_as_list(value: Option<&YamlValue>) -> Vec<String> {
    match value {
        Some(YamlValue::Sequence(items)) => items
            .iter()
            .filter_map(yaml_text)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(other) => yaml_text(other)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .into_iter()
            .collect(),
        None => Vec::new(),
    }
}

/// Rewrites `name` in `frontmatter` so the record moves from bucket `from`
/// to bucket `to` under the given multi-value mode.
pub fn write_axis_move(frontmatter: &mut Mapping, name: &str, from: &str, to: &str, mode: MultiValueMode) {
    let key = YamlValue::String(name.to_string());
    if to == EMPTY_KEY {
        frontmatter.shift_remove(&key);
        return;
    }

    match mode {
        MultiValueMode::Explode => {
            let mut items = current_as_list(frontmatter.get(&key));
            if from != EMPTY_KEY {
                items.retain(|item| item != from);
            }
            items.push(to.to_string());
            let mut items = items.into_iter().unique().collect::<Vec<_>>();
            match items.len() {
                0 => {
                    frontmatter.shift_remove(&key);
                }
                1 => {
                    let only = items.remove(0);
                    frontmatter.insert(key, YamlValue::String(only));
                }
                _ => {
                    let list = items.into_iter().map(YamlValue::String).collect();
                    frontmatter.insert(key, YamlValue::Sequence(list));
                }
            }
        }
        MultiValueMode::Primary => {
            let next = match frontmatter.get(&key) {
                Some(YamlValue::Sequence(items)) => {
                    let mut items = items.clone();
                    match items.first_mut() {
                        Some(first) => *first = YamlValue::String(to.to_string()),
                        None => items.push(YamlValue::String(to.to_string())),
                    }
                    YamlValue::Sequence(items)
                }
                _ => YamlValue::String(to.to_string()),
            };
            frontmatter.insert(key, next);
        }
        MultiValueMode::Disallow => {
            frontmatter.insert(key, YamlValue::String(to.to_string()));
        }
    }
}

pub type FrontmatterMutator<'a> = Box<dyn FnOnce(&mut Mapping) + Send + 'a>;

/// Applies a mutation to one note's frontmatter as a single scoped edit.
#[async_trait]
pub trait FrontmatterEditor: Send + Sync {
    async fn process_front_matter(&self, path: &str, mutator: FrontmatterMutator<'_>) -> Result<()>;
}

/// The property an axis writes to and how lists are edited.
#[derive(Debug, Clone)]
pub struct AxisTarget {
    pub property: PropertyId,
    pub spec: BucketSpec,
    pub mode: MultiValueMode,
}

impl From<&AxisPlan> for AxisTarget {
    fn from(plan: &AxisPlan) -> Self {
        Self {
            property: plan.property.clone(),
            spec: plan.spec.clone(),
            mode: plan.mode,
        }
    }
}

impl AxisTarget {
    fn check_target(&self, key: &str) -> Result<()> {
        if !self.property.is_writable() {
            bail!("Property '{}' is not writable", self.property);
        }
        match bucket_key_to_writable_value(&self.spec, key) {
            Ok(_) | Err(NotWritable::Empty) => Ok(()),
            Err(other) => bail!(
                "Cannot write bucket '{key}' to '{}': {}",
                self.property,
                other.reason().unwrap_or_default()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub path: String,
    pub from_row: String,
    pub from_col: String,
    pub to_row: String,
    pub to_col: String,
}

/// Moves one note into a new cell. Both axis edits happen inside one
/// editor call.
pub async fn apply_move(
    editor: &dyn FrontmatterEditor,
    rows: &AxisTarget,
    cols: &AxisTarget,
    request: &MoveRequest,
) -> Result<()> {
    rows.check_target(&request.to_row)?;
    cols.check_target(&request.to_col)?;
    let row_name = rows.property.name().to_string();
    let col_name = cols.property.name().to_string();
    let (rows_mode, cols_mode) = (rows.mode, cols.mode);
    editor
        .process_front_matter(
            &request.path,
            Box::new(move |fm: &mut Mapping| {
                write_axis_move(fm, &row_name, &request.from_row, &request.to_row, rows_mode);
                write_axis_move(fm, &col_name, &request.from_col, &request.to_col, cols_mode);
            }),
        )
        .await
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl BulkReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sets every note in `paths` into the target cell. Each note is edited on
/// its own; a failure is recorded and the rest still run.
pub async fn bulk_assign(
    editor: &dyn FrontmatterEditor,
    rows: &AxisTarget,
    cols: &AxisTarget,
    paths: &[String],
    to_row: &str,
    to_col: &str,
) -> Result<BulkReport> {
    rows.check_target(to_row)?;
    cols.check_target(to_col)?;

    let mut report = BulkReport::default();
    for path in paths {
        let request = MoveRequest {
            path: path.clone(),
            from_row: EMPTY_KEY.to_string(),
            from_col: EMPTY_KEY.to_string(),
            to_row: to_row.to_string(),
            to_col: to_col.to_string(),
        };
        match apply_move(editor, rows, cols, &request).await {
            Ok(()) => report.succeeded.push(path.clone()),
            Err(err) => {
                warn!("Failed to update '{path}': {err:#}");
                report.failed.push((path.clone(), format!("{err:#}")));
            }
        }
    }
    Ok(report)
}
