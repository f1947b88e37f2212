pub mod axis_state;
pub mod cli;
pub mod codec;
pub mod engine;
pub mod frontmatter;
pub mod matrix;
pub mod multi_value;
pub mod property;
pub mod spec;
pub mod table;
pub mod value;
pub mod vault;
pub mod writeback;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::axis_state::{
    AxisId, AxisState, ConfigStore, JsonFileConfig, ViewOptions, get_axis_state, reset_axis_state,
    set_alias, set_bucket_spec, set_order,
};
use crate::cli::{Cli, Commands, OutputFormat, SpecKind};
use crate::codec::display_for_bucket_key;
use crate::engine::DateAnchor;
use crate::matrix::{
    AggregateOptions, AxisPlan, CellSummary, CellSummaryMode, HeatmapMode, Matrix, aggregate,
    heat_intensity, summarize_cell,
};
use crate::property::PropertyId;
use crate::spec::{BucketSpec, DEFAULT_QUANTILES, parse_ranges, serialize_ranges};
use crate::vault::{CreateNoteRequest, NoteRecord, Vault};
use crate::writeback::{
    AxisTarget, MoveRequest, WritebackStatus, apply_move, bulk_assign, writeback_status,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("bucket_matrix", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Matrix(args) => handle_matrix(&args),
        Commands::Axis(args) => handle_axis(args.command),
        Commands::Options(args) => handle_options(&args),
        Commands::Move(args) => handle_move(&args),
        Commands::Assign(args) => handle_assign(&args),
        Commands::Create(args) => handle_create(&args),
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    Ok(runtime.block_on(future))
}

struct Session {
    vault: Vault,
    config: JsonFileConfig,
}

impl Session {
    fn open(args: &cli::VaultArgs) -> Result<Self> {
        let vault = Vault::open(&args.vault)
            .with_context(|| format!("Opening vault {:?}", args.vault))?;
        let config_path = args
            .config
            .clone()
            .unwrap_or_else(|| vault.default_config_path());
        let config = JsonFileConfig::open(&config_path);
        Ok(Self { vault, config })
    }
}

/// Notes plus both axis plans, with stored options overridden by flags.
struct View {
    notes: Vec<NoteRecord>,
    options: ViewOptions,
    rows_state: AxisState,
    cols_state: AxisState,
    rows: AxisPlan,
    cols: AxisPlan,
    anchor: DateAnchor,
}

impl View {
    fn prepare(session: &Session, overrides: &cli::AxisOverrides) -> Result<Self> {
        let mut options = ViewOptions::load(&session.config);
        if let Some(raw) = &overrides.rows {
            options.rows_prop = Some(parse_property(raw)?);
        }
        if let Some(raw) = &overrides.cols {
            options.cols_prop = Some(parse_property(raw)?);
        }
        if let Some(mode) = overrides.rows_mode {
            options.rows_multi_mode = mode.into();
        }
        if let Some(mode) = overrides.cols_mode {
            options.cols_multi_mode = mode.into();
        }
        let rows_prop = options
            .rows_prop
            .clone()
            .context("No row property configured; pass --rows or run `options --rows`")?;
        let cols_prop = options
            .cols_prop
            .clone()
            .context("No column property configured; pass --cols or run `options --cols`")?;

        let notes = session.vault.load_notes()?;
        let rows_state = get_axis_state(&session.config, AxisId::Rows);
        let cols_state = get_axis_state(&session.config, AxisId::Cols);
        let rows = AxisPlan::prepare(&notes, rows_prop, &rows_state, options.rows_multi_mode);
        let cols = AxisPlan::prepare(&notes, cols_prop, &cols_state, options.cols_multi_mode);
        let anchor = overrides
            .today
            .map(DateAnchor::new)
            .unwrap_or_else(DateAnchor::now)
            .with_week_start(options.week_start);
        debug!(
            "Rows {} ({}, {}), cols {} ({}, {})",
            rows.property,
            rows.spec.type_name(),
            rows.mode,
            cols.property,
            cols.spec.type_name(),
            cols.mode
        );
        Ok(Self {
            notes,
            options,
            rows_state,
            cols_state,
            rows,
            cols,
            anchor,
        })
    }

    fn aggregate(&self) -> Matrix<'_, NoteRecord> {
        aggregate(
            &self.notes,
            &self.rows,
            &self.cols,
            &AggregateOptions {
                include_empty: self.options.include_empty,
                anchor: self.anchor,
            },
        )
    }

    fn writeback(&self) -> WritebackStatus {
        writeback_status(&self.notes, &self.rows, &self.cols, self.options.enable_drag)
    }

    fn require_writeback(&self) -> Result<()> {
        let status = self.writeback();
        ensure!(status.allowed(), "{}", status.describe());
        Ok(())
    }
}

fn parse_property(raw: &str) -> Result<PropertyId> {
    PropertyId::parse(raw).with_context(|| format!("Invalid property '{raw}'"))
}

#[derive(Debug, Serialize)]
struct BucketReport {
    key: String,
    label: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CellReport<'a> {
    row: &'a str,
    col: &'a str,
    count: usize,
    paths: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<CellSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heat: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatrixReport<'a> {
    rows_property: String,
    cols_property: String,
    rows: Vec<BucketReport>,
    cols: Vec<BucketReport>,
    cells: Vec<CellReport<'a>>,
    writeback: WritebackStatus,
    writeback_allowed: bool,
    status: String,
}

fn bucket_reports(keys: &[String], state: &AxisState) -> Vec<BucketReport> {
    keys.iter()
        .map(|key| BucketReport {
            key: key.clone(),
            label: display_for_bucket_key(key, &state.aliases),
        })
        .collect()
}

fn handle_matrix(args: &cli::MatrixArgs) -> Result<()> {
    let session = Session::open(&args.vault)?;
    let mut view = View::prepare(&session, &args.axes)?;
    if args.no_empty {
        view.options.include_empty = false;
    }
    if let Some(mode) = args.summary {
        view.options.cell_summary_mode = mode.into();
    }
    if let Some(raw) = &args.summary_field {
        view.options.cell_summary_field = Some(parse_property(raw)?);
    }
    if let Some(raw) = &args.sort_by {
        view.options.cell_sort_by = Some(parse_property(raw)?);
    }
    if let Some(direction) = args.sort_dir {
        view.options.cell_sort_dir = direction.into();
    }

    let mut matrix = view.aggregate();
    if let Some(field) = &view.options.cell_sort_by {
        matrix.sort_cells(field, view.options.cell_sort_dir);
    }
    let status = view.writeback();
    let options = &view.options;
    let max_count = matrix.max_cell_count();
    let summary_mode = options.cell_summary_mode;
    let summarize = |row: &str, col: &str| {
        summarize_cell(matrix.cell(row, col), summary_mode, options.cell_summary_field.as_ref())
    };
    let heat = |count: usize| {
        (options.heatmap_mode == HeatmapMode::Count)
            .then(|| heat_intensity(count, max_count, options.heatmap_scale))
    };

    match args.format {
        OutputFormat::Json => {
            let mut cells = Vec::new();
            for row in &matrix.row_keys {
                for col in &matrix.col_keys {
                    let count = matrix.cell(row, col).len();
                    if count == 0 {
                        continue;
                    }
                    cells.push(CellReport {
                        row,
                        col,
                        count,
                        paths: matrix.cell_paths(row, col),
                        summary: matches!(
                            summary_mode,
                            CellSummaryMode::Sum
                                | CellSummaryMode::Avg
                                | CellSummaryMode::Min
                                | CellSummaryMode::Max
                        )
                        .then(|| summarize(row, col)),
                        heat: heat(count),
                    });
                }
            }
            let report = MatrixReport {
                rows_property: view.rows.property.to_string(),
                cols_property: view.cols.property.to_string(),
                rows: bucket_reports(&matrix.row_keys, &view.rows_state),
                cols: bucket_reports(&matrix.col_keys, &view.cols_state),
                cells,
                writeback_allowed: status.allowed(),
                status: status.describe(),
                writeback: status.clone(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            let mut headers = vec![format!("{} \\ {}", view.rows.property, view.cols.property)];
            headers.extend(
                matrix
                    .col_keys
                    .iter()
                    .map(|key| display_for_bucket_key(key, &view.cols_state.aliases)),
            );
            let rows = matrix
                .row_keys
                .iter()
                .map(|row| {
                    let mut line = vec![display_for_bucket_key(row, &view.rows_state.aliases)];
                    line.extend(matrix.col_keys.iter().map(|col| {
                        let summary = summarize(row, col);
                        let shade = heat(summary.count)
                            .map(|t| table::heat_glyph(t, options.heatmap_strength))
                            .unwrap_or_default();
                        format!("{}{shade}", summary.display(summary_mode))
                    }));
                    line
                })
                .collect::<Vec<_>>();
            table::print_table(&headers, &rows);
            println!();
            println!("{}", status.describe());
        }
    }
    info!(
        "Aggregated {} note(s) into {} row(s) x {} column(s)",
        view.notes.len(),
        matrix.row_keys.len(),
        matrix.col_keys.len()
    );
    Ok(())
}

fn open_axis(target: &cli::AxisTargetArgs) -> Result<(JsonFileConfig, AxisId)> {
    let session = Session::open(&target.vault)?;
    Ok((session.config, target.axis.into()))
}

fn handle_axis(command: cli::AxisCommand) -> Result<()> {
    use cli::AxisCommand;

    match command {
        AxisCommand::Show(target) => {
            let (config, axis) = open_axis(&target)?;
            let state = get_axis_state(&config, axis);
            println!("{}", serde_json::to_string_pretty(&state)?);
            if let BucketSpec::NumberRanges { ranges, .. } = &state.bucket_spec {
                println!("{}", serialize_ranges(ranges));
            }
            Ok(())
        }
        AxisCommand::Spec(args) => {
            let spec = build_spec(&args)?;
            let (mut config, axis) = open_axis(&args.target)?;
            let kind = spec.type_name();
            set_bucket_spec(&mut config, axis, spec)?;
            config.save()?;
            info!("{} axis now uses {kind} bucketing", axis.label());
            Ok(())
        }
        AxisCommand::Alias(args) => {
            let (mut config, axis) = open_axis(&args.target)?;
            set_alias(&mut config, axis, &args.key, args.alias.as_deref())?;
            config.save()?;
            info!("Updated alias of '{}' on the {} axis", args.key, axis.label());
            Ok(())
        }
        AxisCommand::Order(args) => {
            let (mut config, axis) = open_axis(&args.target)?;
            let count = args.keys.len();
            set_order(&mut config, axis, args.keys)?;
            config.save()?;
            info!("Stored order of {count} bucket(s) on the {} axis", axis.label());
            Ok(())
        }
        AxisCommand::Reset(target) => {
            let (mut config, axis) = open_axis(&target)?;
            reset_axis_state(&mut config, axis)?;
            config.save()?;
            info!("Reset the {} axis", axis.label());
            Ok(())
        }
    }
}

fn build_spec(args: &cli::AxisSpecArgs) -> Result<BucketSpec> {
    let spec = match args.kind {
        SpecKind::Categorical => BucketSpec::Categorical,
        SpecKind::DateRelative => BucketSpec::date_relative(),
        SpecKind::NumberRanges => {
            let ranges = parse_ranges(&args.ranges.join("\n"))?;
            ensure!(!ranges.is_empty(), "number-ranges needs at least one --range");
            BucketSpec::number_ranges(ranges)?
        }
        SpecKind::NumberQuantiles => {
            BucketSpec::number_quantiles(args.k.unwrap_or(DEFAULT_QUANTILES))?
        }
    };
    match &args.invalid_label {
        Some(label) => Ok(spec.with_invalid_label(label.as_str())?),
        None => Ok(spec),
    }
}

fn handle_options(args: &cli::OptionsArgs) -> Result<()> {
    let session = Session::open(&args.vault)?;
    let mut config = session.config;
    ViewOptions::ensure_defaults(&mut config)?;
    let mut options = ViewOptions::load(&config);

    if let Some(raw) = &args.rows {
        options.rows_prop = Some(parse_property(raw)?);
    }
    if let Some(raw) = &args.cols {
        options.cols_prop = Some(parse_property(raw)?);
    }
    if let Some(mode) = args.rows_mode {
        options.rows_multi_mode = mode.into();
    }
    if let Some(mode) = args.cols_mode {
        options.cols_multi_mode = mode.into();
    }
    if let Some(value) = args.include_empty {
        options.include_empty = value;
    }
    if let Some(value) = args.enable_drag {
        options.enable_drag = value;
    }
    if let Some(value) = args.week_start {
        options.week_start = value.into();
    }
    if let Some(raw) = &args.sort_by {
        options.cell_sort_by = PropertyId::parse(raw);
    }
    if let Some(value) = args.sort_dir {
        options.cell_sort_dir = value.into();
    }
    if let Some(value) = args.summary {
        options.cell_summary_mode = value.into();
    }
    if let Some(raw) = &args.summary_field {
        options.cell_summary_field = PropertyId::parse(raw);
    }
    if let Some(value) = args.heatmap {
        options.heatmap_mode = value.into();
    }
    if let Some(value) = args.heatmap_scale {
        options.heatmap_scale = value.into();
    }
    if let Some(value) = args.heatmap_strength {
        options.heatmap_strength = value;
    }
    if let Some(value) = &args.template {
        options.create_note_template = Some(value.clone()).filter(|t| !t.trim().is_empty());
    }

    options.store(&mut config)?;
    config.save()?;

    let mut keys = [
        "rowsProp",
        "colsProp",
        "rowsMultiMode",
        "colsMultiMode",
        "includeEmpty",
        "enableDrag",
        "weekStart",
        "cellSortBy",
        "cellSortDir",
        "cellSummaryMode",
        "cellSummaryField",
        "heatmapMode",
        "heatmapScale",
        "heatmapStrength",
        "createNoteTemplatePath",
    ];
    keys.sort_unstable();
    let rows = keys
        .iter()
        .map(|key| {
            let value = match config.get(key) {
                Some(JsonValue::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            vec![key.to_string(), value]
        })
        .collect::<Vec<_>>();
    table::print_table(&["option".to_string(), "value".to_string()], &rows);
    info!("Saved view options to {:?}", config.path());
    Ok(())
}

fn handle_move(args: &cli::MoveArgs) -> Result<()> {
    let session = Session::open(&args.vault)?;
    let view = View::prepare(&session, &args.axes)?;
    view.require_writeback()
        .context("Move refused")?;

    let request = MoveRequest {
        path: args.file.clone(),
        from_row: args.from_row.clone(),
        from_col: args.from_col.clone(),
        to_row: args.to_row.clone(),
        to_col: args.to_col.clone(),
    };
    let rows = AxisTarget::from(&view.rows);
    let cols = AxisTarget::from(&view.cols);
    block_on(apply_move(&session.vault, &rows, &cols, &request))?
        .with_context(|| format!("Moving {}", args.file))?;
    println!("Updated properties of {}", args.file);
    info!(
        "Moved {} from ({}, {}) to ({}, {})",
        args.file, args.from_row, args.from_col, args.to_row, args.to_col
    );
    Ok(())
}

fn handle_assign(args: &cli::AssignArgs) -> Result<()> {
    let session = Session::open(&args.vault)?;
    let view = View::prepare(&session, &args.axes)?;
    view.require_writeback()
        .context("Bulk assign refused")?;

    let rows = AxisTarget::from(&view.rows);
    let cols = AxisTarget::from(&view.cols);
    let report = block_on(bulk_assign(
        &session.vault,
        &rows,
        &cols,
        &args.files,
        &args.to_row,
        &args.to_col,
    ))??;

    println!("Updated {} file(s)", report.succeeded.len());
    for (path, reason) in &report.failed {
        println!("Failed {path}: {reason}");
    }
    info!(
        "Bulk assign into ({}, {}): {} succeeded, {} failed",
        args.to_row,
        args.to_col,
        report.succeeded.len(),
        report.failed.len()
    );
    if !report.is_complete() {
        bail!(
            "{} of {} note(s) failed to update",
            report.failed.len(),
            args.files.len()
        );
    }
    Ok(())
}

fn handle_create(args: &cli::CreateArgs) -> Result<()> {
    let session = Session::open(&args.vault)?;
    let view = View::prepare(&session, &args.axes)?;
    let options = &view.options;

    let folder = args
        .folder
        .clone()
        .or_else(|| options.last_create_folder.clone())
        .unwrap_or_default();
    let template = args
        .template
        .clone()
        .or_else(|| options.last_create_template.clone())
        .or_else(|| options.create_note_template.clone());

    let request = CreateNoteRequest {
        title: args.title.clone(),
        folder: folder.clone(),
        template: template.clone(),
        rows: AxisTarget::from(&view.rows),
        cols: AxisTarget::from(&view.cols),
        row_key: args.row.clone(),
        col_key: args.col.clone(),
    };
    let created = block_on(session.vault.create_note_for_cell(&request))??;

    let mut config = session.config;
    config.set("lastCreateNoteFolder", JsonValue::String(folder));
    config.set(
        "lastCreateNoteTemplatePath",
        JsonValue::String(template.unwrap_or_default()),
    );
    if let Err(err) = config.save() {
        warn!("Could not remember note creation defaults: {err:#}");
    }
    println!("Created note: {created}");
    Ok(())
}
