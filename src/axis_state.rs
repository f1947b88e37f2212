//! Per-view configuration: the key-value store, the versioned per-axis
//! state, and the flat view options.
//!
//! Reads never fail. Missing, legacy, or malformed entries fall back to
//! defaults; only writes report errors.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::engine::WeekStart;
use crate::matrix::{CellSummaryMode, HeatmapMode, HeatmapScale, SortDirection};
use crate::multi_value::MultiValueMode;
use crate::property::PropertyId;
use crate::spec::BucketSpec;

pub const AXIS_STATE_VERSION: u64 = 1;
pub const DEFAULT_HEATMAP_STRENGTH: u8 = 35;
pub const MAX_HEATMAP_STRENGTH: u8 = 60;

pub trait ConfigStore {
    fn get(&self, key: &str) -> Option<JsonValue>;
    fn set(&mut self, key: &str, value: JsonValue);
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    values: BTreeMap<String, JsonValue>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfig {
    fn get(&self, key: &str) -> Option<JsonValue> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: JsonValue) {
        self.values.insert(key.to_string(), value);
    }
}

/// A config store persisted as one JSON object on disk.
#[derive(Debug, Clone)]
pub struct JsonFileConfig {
    path: PathBuf,
    values: Map<String, JsonValue>,
}

impl JsonFileConfig {
    /// Opens `path`; a missing or unreadable file starts from an empty store.
    pub fn open(path: &Path) -> Self {
        let values = match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<JsonValue>(&raw) {
                Ok(JsonValue::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!("Ignoring malformed view config {path:?}; using defaults");
                    Map::new()
                }
            },
            Err(_) => {
                debug!("No view config at {path:?}; using defaults");
                Map::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            values,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating config directory {parent:?}"))?;
        }
        let rendered = serde_json::to_string_pretty(&self.values).context("Serializing view config")?;
        fs::write(&self.path, rendered)
            .with_context(|| format!("Writing view config {:?}", self.path))
    }
}

impl ConfigStore for JsonFileConfig {
    fn get(&self, key: &str) -> Option<JsonValue> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: JsonValue) {
        self.values.insert(key.to_string(), value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisId {
    Rows,
    Cols,
}

impl AxisId {
    pub fn config_key(self) -> &'static str {
        match self {
            AxisId::Rows => "rowsAxisState",
            AxisId::Cols => "colsAxisState",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AxisId::Rows => "Rows",
            AxisId::Cols => "Columns",
        }
    }
}

/// Persisted per-axis state, schema version 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisState {
    pub v: u64,
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub bucket_spec: BucketSpec,
}

impl Default for AxisState {
    fn default() -> Self {
        Self {
            v: AXIS_STATE_VERSION,
            order: Vec::new(),
            aliases: BTreeMap::new(),
            bucket_spec: BucketSpec::default(),
        }
    }
}

pub fn get_axis_state(store: &dyn ConfigStore, axis: AxisId) -> AxisState {
    let decoded = match store.get(axis.config_key()) {
        Some(JsonValue::Object(map)) => decode_axis_state(&map),
        Some(JsonValue::String(raw)) if !raw.trim().is_empty() => {
            match serde_json::from_str::<JsonValue>(&raw) {
                Ok(JsonValue::Object(map)) => decode_axis_state(&map),
                _ => None,
            }
        }
        _ => None,
    };
    decoded.unwrap_or_default()
}

fn decode_axis_state(map: &Map<String, JsonValue>) -> Option<AxisState> {
    if map.get("v").and_then(JsonValue::as_u64) != Some(AXIS_STATE_VERSION) {
        return None;
    }
    let order = match map.get("order") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    let aliases = match map.get("aliases") {
        Some(JsonValue::Object(entries)) => entries
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|alias| (k.clone(), alias.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    };
    let bucket_spec = map
        .get("bucketSpec")
        .and_then(|raw| serde_json::from_value::<BucketSpec>(raw.clone()).ok())
        .filter(|spec| spec.validate().is_ok())
        .unwrap_or_default();
    Some(AxisState {
        v: AXIS_STATE_VERSION,
        order,
        aliases,
        bucket_spec,
    })
}

pub fn set_axis_state(store: &mut dyn ConfigStore, axis: AxisId, state: &AxisState) -> Result<()> {
    let value = serde_json::to_value(state)
        .with_context(|| format!("Serializing {} axis state", axis.label()))?;
    store.set(axis.config_key(), value);
    Ok(())
}

/// Sets or clears (blank/`None`) the display alias of one bucket key.
pub fn set_alias(
    store: &mut dyn ConfigStore,
    axis: AxisId,
    bucket_key: &str,
    alias: Option<&str>,
) -> Result<()> {
    let mut state = get_axis_state(store, axis);
    match alias.map(str::trim).filter(|a| !a.is_empty()) {
        Some(alias) => {
            state.aliases.insert(bucket_key.to_string(), alias.to_string());
        }
        None => {
            state.aliases.remove(bucket_key);
        }
    }
    set_axis_state(store, axis, &state)
}

pub fn set_order(store: &mut dyn ConfigStore, axis: AxisId, order: Vec<String>) -> Result<()> {
    let mut state = get_axis_state(store, axis);
    state.order = order;
    set_axis_state(store, axis, &state)
}

/// Replaces the axis spec after validating it; prior-variant parameters
/// are discarded with the old spec.
pub fn set_bucket_spec(store: &mut dyn ConfigStore, axis: AxisId, spec: BucketSpec) -> Result<()> {
    spec.validate()
        .with_context(|| format!("Rejecting {} bucket spec", axis.label()))?;
    let mut state = get_axis_state(store, axis);
    state.bucket_spec = spec;
    set_axis_state(store, axis, &state)
}

pub fn reset_axis_state(store: &mut dyn ConfigStore, axis: AxisId) -> Result<()> {
    set_axis_state(store, axis, &AxisState::default())
}

/// Flat view options with their defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewOptions {
    pub rows_prop: Option<PropertyId>,
    pub cols_prop: Option<PropertyId>,
    pub rows_multi_mode: MultiValueMode,
    pub cols_multi_mode: MultiValueMode,
    pub include_empty: bool,
    pub enable_drag: bool,
    pub cell_sort_by: Option<PropertyId>,
    pub cell_sort_dir: SortDirection,
    pub cell_summary_mode: CellSummaryMode,
    pub cell_summary_field: Option<PropertyId>,
    pub heatmap_mode: HeatmapMode,
    pub heatmap_scale: HeatmapScale,
    pub heatmap_strength: u8,
    pub week_start: WeekStart,
    pub create_note_template: Option<String>,
    pub last_create_folder: Option<String>,
    pub last_create_template: Option<String>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            rows_prop: None,
            cols_prop: None,
            rows_multi_mode: MultiValueMode::Disallow,
            cols_multi_mode: MultiValueMode::Disallow,
            include_empty: true,
            enable_drag: true,
            cell_sort_by: None,
            cell_sort_dir: SortDirection::Asc,
            cell_summary_mode: CellSummaryMode::Count,
            cell_summary_field: None,
            heatmap_mode: HeatmapMode::Off,
            heatmap_scale: HeatmapScale::Linear,
            heatmap_strength: DEFAULT_HEATMAP_STRENGTH,
            week_start: WeekStart::Monday,
            create_note_template: None,
            last_create_folder: None,
            last_create_template: None,
        }
    }
}

impl ViewOptions {
    pub fn load(store: &dyn ConfigStore) -> Self {
        let defaults = Self::default();
        Self {
            rows_prop: read_property(store, "rowsProp"),
            cols_prop: read_property(store, "colsProp"),
            rows_multi_mode: read_enum(store, "rowsMultiMode").unwrap_or(defaults.rows_multi_mode),
            cols_multi_mode: read_enum(store, "colsMultiMode").unwrap_or(defaults.cols_multi_mode),
            include_empty: read_bool(store, "includeEmpty").unwrap_or(defaults.include_empty),
            enable_drag: read_bool(store, "enableDrag").unwrap_or(defaults.enable_drag),
            cell_sort_by: read_property(store, "cellSortBy"),
            cell_sort_dir: read_enum(store, "cellSortDir").unwrap_or(defaults.cell_sort_dir),
            cell_summary_mode: read_enum(store, "cellSummaryMode")
                .unwrap_or(defaults.cell_summary_mode),
            cell_summary_field: read_property(store, "cellSummaryField"),
            heatmap_mode: read_enum(store, "heatmapMode").unwrap_or(defaults.heatmap_mode),
            heatmap_scale: read_enum(store, "heatmapScale").unwrap_or(defaults.heatmap_scale),
            heatmap_strength: read_strength(store).unwrap_or(defaults.heatmap_strength),
            week_start: read_enum(store, "weekStart").unwrap_or(defaults.week_start),
            create_note_template: read_string(store, "createNoteTemplatePath"),
            last_create_folder: read_string(store, "lastCreateNoteFolder"),
            last_create_template: read_string(store, "lastCreateNoteTemplatePath"),
        }
    }

    /// Writes every option back under its flat key.
    pub fn store(&self, store: &mut dyn ConfigStore) -> Result<()> {
        let prop = |p: &Option<PropertyId>| {
            JsonValue::String(p.as_ref().map(ToString::to_string).unwrap_or_default())
        };
        let text = |s: &Option<String>| JsonValue::String(s.clone().unwrap_or_default());
        store.set("rowsProp", prop(&self.rows_prop));
        store.set("colsProp", prop(&self.cols_prop));
        store.set("rowsMultiMode", serde_json::to_value(self.rows_multi_mode)?);
        store.set("colsMultiMode", serde_json::to_value(self.cols_multi_mode)?);
        store.set("includeEmpty", JsonValue::Bool(self.include_empty));
        store.set("enableDrag", JsonValue::Bool(self.enable_drag));
        store.set("cellSortBy", prop(&self.cell_sort_by));
        store.set("cellSortDir", serde_json::to_value(self.cell_sort_dir)?);
        store.set("cellSummaryMode", serde_json::to_value(self.cell_summary_mode)?);
        store.set("cellSummaryField", prop(&self.cell_summary_field));
        store.set("heatmapMode", serde_json::to_value(self.heatmap_mode)?);
        store.set("heatmapScale", serde_json::to_value(self.heatmap_scale)?);
        store.set("heatmapStrength", JsonValue::from(self.heatmap_strength));
        store.set("weekStart", serde_json::to_value(self.week_start)?);
        store.set("createNoteTemplatePath", text(&self.create_note_template));
        store.set("lastCreateNoteFolder", text(&self.last_create_folder));
        store.set("lastCreateNoteTemplatePath", text(&self.last_create_template));
        Ok(())
    }

    /// Fills in defaults for keys that are missing or null, leaving the
    /// rest untouched.
    pub fn ensure_defaults(store: &mut dyn ConfigStore) -> Result<()> {
        let mut defaults = MemoryConfig::new();
        Self::default().store(&mut defaults)?;
        for (key, value) in defaults.values {
            if matches!(store.get(&key), None | Some(JsonValue::Null)) {
                store.set(&key, value);
            }
        }
        Ok(())
    }
}

fn read_string(store: &dyn ConfigStore, key: &str) -> Option<String> {
    match store.get(key) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn read_property(store: &dyn ConfigStore, key: &str) -> Option<PropertyId> {
    read_string(store, key).and_then(|raw| PropertyId::parse(&raw))
}

fn read_bool(store: &dyn ConfigStore, key: &str) -> Option<bool> {
    match store.get(key) {
        Some(JsonValue::Bool(b)) => Some(b),
        Some(JsonValue::String(s)) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn read_enum<T: DeserializeOwned>(store: &dyn ConfigStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    let normalized = match raw {
        JsonValue::String(s) => JsonValue::String(s.trim().to_ascii_lowercase()),
        other => other,
    };
    serde_json::from_value(normalized).ok()
}

fn read_strength(store: &dyn ConfigStore) -> Option<u8> {
    let raw = store.get("heatmapStrength")?;
    let n = match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if !n.is_finite() {
        return None;
    }
    Some(n.clamp(0.0, f64::from(MAX_HEATMAP_STRENGTH)) as u8)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::spec::NumberRange;

    #[test]
    fn missing_state_reads_as_defaults() {
        let store = MemoryConfig::new();
        assert_eq!(get_axis_state(&store, AxisId::Rows), AxisState::default());
    }

    #[test]
    fn malformed_state_falls_back_silently() {
        let mut store = MemoryConfig::new();
        store.set("rowsAxisState", json!("{not json"));
        store.set("colsAxisState", json!({"v": 2, "order": ["a"]}));
        assert_eq!(get_axis_state(&store, AxisId::Rows), AxisState::default());
        assert_eq!(get_axis_state(&store, AxisId::Cols), AxisState::default());
    }

    #[test]
    fn partially_valid_state_keeps_good_fields() {
        let mut store = MemoryConfig::new();
        store.set(
            "rowsAxisState",
            json!({
                "v": 1,
                "order": ["b", 3, "a"],
                "aliases": {"a": "Alpha", "b": 7},
                "bucketSpec": {"type": "numberQuantiles", "k": 99}
            }),
        );
        let state = get_axis_state(&store, AxisId::Rows);
        assert_eq!(state.order, vec!["b", "a"]);
        assert_eq!(state.aliases.get("a").map(String::as_str), Some("Alpha"));
        assert!(!state.aliases.contains_key("b"));
        assert_eq!(state.bucket_spec, BucketSpec::Categorical);
    }

    #[test]
    fn json_string_state_is_decoded() {
        let mut store = MemoryConfig::new();
        store.set(
            "colsAxisState",
            json!(r#"{"v":1,"order":["x"],"bucketSpec":{"type":"dateRelative"}}"#),
        );
        let state = get_axis_state(&store, AxisId::Cols);
        assert_eq!(state.order, vec!["x"]);
        assert_eq!(state.bucket_spec, BucketSpec::date_relative());
    }

    #[test]
    fn mutators_round_trip_through_store() {
        let mut store = MemoryConfig::new();
        set_alias(&mut store, AxisId::Rows, "todo", Some("  To do ")).unwrap();
        set_order(&mut store, AxisId::Rows, vec!["done".into(), "todo".into()]).unwrap();
        let spec = BucketSpec::number_ranges(vec![NumberRange::new("Low", None, Some(3.0))]).unwrap();
        set_bucket_spec(&mut store, AxisId::Rows, spec.clone()).unwrap();

        let state = get_axis_state(&store, AxisId::Rows);
        assert_eq!(state.aliases.get("todo").map(String::as_str), Some("To do"));
        assert_eq!(state.order, vec!["done", "todo"]);
        assert_eq!(state.bucket_spec, spec);

        let raw = store.get("rowsAxisState").unwrap();
        assert_eq!(raw["v"], json!(1));
        assert_eq!(raw["bucketSpec"]["type"], json!("numberRanges"));

        set_alias(&mut store, AxisId::Rows, "todo", Some("   ")).unwrap();
        assert!(get_axis_state(&store, AxisId::Rows).aliases.is_empty());
    }

    #[test]
    fn invalid_spec_is_rejected_at_edit_time() {
        let mut store = MemoryConfig::new();
        let bad = BucketSpec::NumberQuantiles {
            k: 0,
            invalid_label: None,
        };
        let err = set_bucket_spec(&mut store, AxisId::Cols, bad).unwrap_err();
        assert!(format!("{err:#}").contains("between 2 and 10"));
        assert!(store.get("colsAxisState").is_none());
    }

    #[test]
    fn view_options_apply_defaults_and_tolerate_junk() {
        let mut store = MemoryConfig::new();
        store.set("rowsProp", json!("status"));
        store.set("colsProp", json!("file.folder"));
        store.set("rowsMultiMode", json!("Explode"));
        store.set("colsMultiMode", json!(42));
        store.set("includeEmpty", json!(false));
        store.set("heatmapStrength", json!(500));

        let options = ViewOptions::load(&store);
        assert_eq!(options.rows_prop, Some(PropertyId::note("status")));
        assert_eq!(options.cols_prop, Some(PropertyId::file("folder")));
        assert_eq!(options.rows_multi_mode, MultiValueMode::Explode);
        assert_eq!(options.cols_multi_mode, MultiValueMode::Disallow);
        assert!(!options.include_empty);
        assert!(options.enable_drag);
        assert_eq!(options.heatmap_strength, MAX_HEATMAP_STRENGTH);
        assert_eq!(options.week_start, WeekStart::Monday);
    }

    #[test]
    fn ensure_defaults_only_fills_gaps() {
        let mut store = MemoryConfig::new();
        store.set("includeEmpty", json!(false));
        store.set("cellSortDir", JsonValue::Null);
        ViewOptions::ensure_defaults(&mut store).unwrap();
        assert_eq!(store.get("includeEmpty"), Some(json!(false)));
        assert_eq!(store.get("cellSortDir"), Some(json!("asc")));
        assert_eq!(store.get("heatmapStrength"), Some(json!(35)));
    }

    #[test]
    fn json_file_config_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("view.json");
        let mut store = JsonFileConfig::open(&path);
        set_order(&mut store, AxisId::Cols, vec!["b".into()]).unwrap();
        store.save().unwrap();

        let reopened = JsonFileConfig::open(&path);
        assert_eq!(get_axis_state(&reopened, AxisId::Cols).order, vec!["b"]);
    }
}
