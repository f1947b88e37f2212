use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::axis_state::AxisId;
use crate::codec::{EMPTY_KEY, INVALID_KEY};
use crate::engine::WeekStart;
use crate::matrix::{CellSummaryMode, HeatmapMode, HeatmapScale, SortDirection};
use crate::multi_value::MultiValueMode;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Pivot markdown notes into a matrix of bucketed frontmatter properties",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Aggregate notes into a row x column matrix
    Matrix(MatrixArgs),
    /// Inspect or edit the persisted state of one axis
    Axis(AxisArgs),
    /// Persist view options
    Options(OptionsArgs),
    /// Move one note from one cell to another by editing its frontmatter
    Move(MoveArgs),
    /// Assign several notes into one cell
    Assign(AssignArgs),
    /// Create a note pre-filled with a cell's property values
    Create(CreateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct VaultArgs {
    /// Folder of markdown notes
    #[arg(long)]
    pub vault: PathBuf,
    /// View configuration file (defaults to <vault>/.bucket-matrix.json)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Per-run overrides of the stored axis selection.
#[derive(Debug, Clone, Default, Args)]
pub struct AxisOverrides {
    /// Row property, e.g. `status` or `note.status` or `file.folder`
    #[arg(long)]
    pub rows: Option<String>,
    /// Column property
    #[arg(long)]
    pub cols: Option<String>,
    /// How list values are placed on the row axis
    #[arg(long = "rows-mode", value_enum)]
    pub rows_mode: Option<MultiModeArg>,
    /// How list values are placed on the column axis
    #[arg(long = "cols-mode", value_enum)]
    pub cols_mode: Option<MultiModeArg>,
    /// Date used as "today" for date buckets (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub struct MatrixArgs {
    #[command(flatten)]
    pub vault: VaultArgs,
    #[command(flatten)]
    pub axes: AxisOverrides,
    /// Drop cells whose row or column bucket is (empty)
    #[arg(long = "no-empty")]
    pub no_empty: bool,
    /// Value shown per cell
    #[arg(long, value_enum)]
    pub summary: Option<SummaryArg>,
    /// Numeric property summarised by sum/avg/min/max
    #[arg(long = "summary-field")]
    pub summary_field: Option<String>,
    /// Property used to order notes inside each cell
    #[arg(long = "sort-by")]
    pub sort_by: Option<String>,
    /// Direction for --sort-by
    #[arg(long = "sort-dir", value_enum)]
    pub sort_dir: Option<SortDirArg>,
    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct AxisArgs {
    #[command(subcommand)]
    pub command: AxisCommand,
}

#[derive(Debug, Subcommand)]
pub enum AxisCommand {
    /// Print the stored state of an axis
    Show(AxisTargetArgs),
    /// Replace the bucketing strategy of an axis
    Spec(AxisSpecArgs),
    /// Set or clear the display alias of a bucket
    Alias(AxisAliasArgs),
    /// Set the manual bucket order of an axis
    Order(AxisOrderArgs),
    /// Restore the default state of an axis
    Reset(AxisTargetArgs),
}

#[derive(Debug, Args)]
pub struct AxisTargetArgs {
    #[command(flatten)]
    pub vault: VaultArgs,
    /// Axis to act on
    #[arg(value_enum)]
    pub axis: AxisArg,
}

#[derive(Debug, Args)]
pub struct AxisSpecArgs {
    #[command(flatten)]
    pub target: AxisTargetArgs,
    /// Bucketing strategy
    #[arg(long = "type", value_enum)]
    pub kind: SpecKind,
    /// Range line `label|min|max` for number-ranges (repeatable)
    #[arg(long = "range", action = clap::ArgAction::Append)]
    pub ranges: Vec<String>,
    /// Bucket count for number-quantiles (2-10)
    #[arg(long)]
    pub k: Option<u32>,
    /// Label for values that do not parse as numbers
    #[arg(long = "invalid-label")]
    pub invalid_label: Option<String>,
}

#[derive(Debug, Args)]
pub struct AxisAliasArgs {
    #[command(flatten)]
    pub target: AxisTargetArgs,
    /// Bucket key to alias; `(empty)` names the empty bucket
    #[arg(long, value_parser = parse_bucket_key)]
    pub key: String,
    /// Display label; omit to clear the alias
    #[arg(long)]
    pub alias: Option<String>,
}

#[derive(Debug, Args)]
pub struct AxisOrderArgs {
    #[command(flatten)]
    pub target: AxisTargetArgs,
    /// Comma-separated bucket keys in display order; omit to clear
    #[arg(long, value_delimiter = ',', value_parser = parse_bucket_key)]
    pub keys: Vec<String>,
}

#[derive(Debug, Args)]
pub struct OptionsArgs {
    #[command(flatten)]
    pub vault: VaultArgs,
    /// Row property
    #[arg(long)]
    pub rows: Option<String>,
    /// Column property
    #[arg(long)]
    pub cols: Option<String>,
    #[arg(long = "rows-mode", value_enum)]
    pub rows_mode: Option<MultiModeArg>,
    #[arg(long = "cols-mode", value_enum)]
    pub cols_mode: Option<MultiModeArg>,
    /// Keep the (empty) bucket visible
    #[arg(long = "include-empty")]
    pub include_empty: Option<bool>,
    /// Allow moving notes between cells
    #[arg(long = "enable-drag")]
    pub enable_drag: Option<bool>,
    #[arg(long = "week-start", value_enum)]
    pub week_start: Option<WeekStartArg>,
    #[arg(long = "sort-by")]
    pub sort_by: Option<String>,
    #[arg(long = "sort-dir", value_enum)]
    pub sort_dir: Option<SortDirArg>,
    #[arg(long, value_enum)]
    pub summary: Option<SummaryArg>,
    #[arg(long = "summary-field")]
    pub summary_field: Option<String>,
    #[arg(long, value_enum)]
    pub heatmap: Option<HeatmapArg>,
    #[arg(long = "heatmap-scale", value_enum)]
    pub heatmap_scale: Option<HeatmapScaleArg>,
    /// Heatmap strength (0-60)
    #[arg(long = "heatmap-strength", value_parser = clap::value_parser!(u8).range(0..=60))]
    pub heatmap_strength: Option<u8>,
    /// Default template for `create`
    #[arg(long)]
    pub template: Option<String>,
}

#[derive(Debug, Args)]
pub struct MoveArgs {
    #[command(flatten)]
    pub vault: VaultArgs,
    #[command(flatten)]
    pub axes: AxisOverrides,
    /// Vault-relative path of the note to move
    #[arg(long)]
    pub file: String,
    #[arg(long = "from-row", value_parser = parse_bucket_key)]
    pub from_row: String,
    #[arg(long = "from-col", value_parser = parse_bucket_key)]
    pub from_col: String,
    #[arg(long = "to-row", value_parser = parse_bucket_key)]
    pub to_row: String,
    #[arg(long = "to-col", value_parser = parse_bucket_key)]
    pub to_col: String,
}

#[derive(Debug, Args)]
pub struct AssignArgs {
    #[command(flatten)]
    pub vault: VaultArgs,
    #[command(flatten)]
    pub axes: AxisOverrides,
    /// Vault-relative note paths (repeatable)
    #[arg(long = "file", required = true, action = clap::ArgAction::Append)]
    pub files: Vec<String>,
    #[arg(long = "to-row", value_parser = parse_bucket_key)]
    pub to_row: String,
    #[arg(long = "to-col", value_parser = parse_bucket_key)]
    pub to_col: String,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    #[command(flatten)]
    pub vault: VaultArgs,
    #[command(flatten)]
    pub axes: AxisOverrides,
    /// Row bucket of the target cell
    #[arg(long, value_parser = parse_bucket_key)]
    pub row: String,
    /// Column bucket of the target cell
    #[arg(long, value_parser = parse_bucket_key)]
    pub col: String,
    /// Note title
    #[arg(long)]
    pub title: String,
    /// Folder for the new note (defaults to the last one used)
    #[arg(long)]
    pub folder: Option<String>,
    /// Template note whose frontmatter and body are copied
    #[arg(long)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum AxisArg {
    Rows,
    Cols,
}

impl From<AxisArg> for AxisId {
    fn from(value: AxisArg) -> Self {
        match value {
            AxisArg::Rows => AxisId::Rows,
            AxisArg::Cols => AxisId::Cols,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum SpecKind {
    Categorical,
    DateRelative,
    NumberRanges,
    NumberQuantiles,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum MultiModeArg {
    Disallow,
    Explode,
    Primary,
}

impl From<MultiModeArg> for MultiValueMode {
    fn from(value: MultiModeArg) -> Self {
        match value {
            MultiModeArg::Disallow => MultiValueMode::Disallow,
            MultiModeArg::Explode => MultiValueMode::Explode,
            MultiModeArg::Primary => MultiValueMode::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SummaryArg {
    Off,
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl From<SummaryArg> for CellSummaryMode {
    fn from(value: SummaryArg) -> Self {
        match value {
            SummaryArg::Off => CellSummaryMode::Off,
            SummaryArg::Count => CellSummaryMode::Count,
            SummaryArg::Sum => CellSummaryMode::Sum,
            SummaryArg::Avg => CellSummaryMode::Avg,
            SummaryArg::Min => CellSummaryMode::Min,
            SummaryArg::Max => CellSummaryMode::Max,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SortDirArg {
    Asc,
    Desc,
}

impl From<SortDirArg> for SortDirection {
    fn from(value: SortDirArg) -> Self {
        match value {
            SortDirArg::Asc => SortDirection::Asc,
            SortDirArg::Desc => SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum HeatmapArg {
    Off,
    Count,
}

impl From<HeatmapArg> for HeatmapMode {
    fn from(value: HeatmapArg) -> Self {
        match value {
            HeatmapArg::Off => HeatmapMode::Off,
            HeatmapArg::Count => HeatmapMode::Count,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum HeatmapScaleArg {
    Linear,
    Log,
}

impl From<HeatmapScaleArg> for HeatmapScale {
    fn from(value: HeatmapScaleArg) -> Self {
        match value {
            HeatmapScaleArg::Linear => HeatmapScale::Linear,
            HeatmapScaleArg::Log => HeatmapScale::Log,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum WeekStartArg {
    Monday,
    Sunday,
}

impl From<WeekStartArg> for WeekStart {
    fn from(value: WeekStartArg) -> Self {
        match value {
            WeekStartArg::Monday => WeekStart::Monday,
            WeekStartArg::Sunday => WeekStart::Sunday,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|err| format!("Expected YYYY-MM-DD, got '{value}': {err}"))
}

/// Accepts the display names of the sentinel buckets as well as raw keys.
pub fn parse_bucket_key(value: &str) -> Result<String, String> {
    match value {
        "" => Err("Bucket key cannot be empty".to_string()),
        "(empty)" => Ok(EMPTY_KEY.to_string()),
        "(invalid)" => Ok(INVALID_KEY.to_string()),
        other => Ok(other.to_string()),
    }
}
