use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::axis_state::AxisState;
use crate::codec::{EMPTY_KEY, apply_manual_order, locale_compare};
use crate::engine::{
    DateAnchor, QuantileBuckets, compute_quantile_buckets, default_order_for_spec, scalar_numeric,
};
use crate::multi_value::{MultiValueMode, bucket_keys_for, numeric_samples};
use crate::property::PropertyId;
use crate::spec::BucketSpec;
use crate::value::{PropertyValue, Scalar, parse_sortable_datetime};

/// What the engine needs from a record: a stable identity and property
/// lookup. Records are owned elsewhere and only read here.
pub trait Record {
    fn path(&self) -> &str;
    fn value(&self, property: &PropertyId) -> PropertyValue;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellSummaryMode {
    Off,
    #[default]
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatmapMode {
    #[default]
    Off,
    Count,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatmapScale {
    #[default]
    Linear,
    Log,
}

/// Everything needed to bucket one axis for a single aggregation pass.
#[derive(Debug, Clone)]
pub struct AxisPlan {
    pub property: PropertyId,
    pub spec: BucketSpec,
    pub mode: MultiValueMode,
    pub order: Vec<String>,
    pub quantiles: QuantileBuckets,
}

impl AxisPlan {
    /// Builds the plan from the axis state, computing quantile edges from
    /// the current records when the bucket spec asks for them.
    pub fn prepare<R: Record>(
        records: &[R],
        property: PropertyId,
        state: &AxisState,
        mode: MultiValueMode,
    ) -> Self {
        let quantiles = match &state.bucket_spec {
            BucketSpec::NumberQuantiles { k, .. } => {
                let sample = records
                    .iter()
                    .flat_map(|record| numeric_samples(&record.value(&property), mode))
                    .collect::<Vec<_>>();
                let buckets = compute_quantile_buckets(&sample, *k as usize);
                debug!(
                    "Quantile edges for {property}: {:?} from {} sample(s)",
                    buckets.edges,
                    sample.len()
                );
                buckets
            }
            _ => QuantileBuckets::default(),
        };
        Self {
            property,
            spec: state.bucket_spec.clone(),
            mode,
            order: state.order.clone(),
            quantiles,
        }
    }

    pub fn keys_for<R: Record>(&self, record: &R, anchor: &DateAnchor) -> Vec<String> {
        bucket_keys_for(
            &record.value(&self.property),
            self.mode,
            &self.spec,
            anchor,
            &self.quantiles.edges,
        )
    }

    /// Fixed spec order when there is one, else manual order + smart sort.
    pub fn order_keys(&self, observed: &[String]) -> Vec<String> {
        match default_order_for_spec(&self.spec) {
            Some(fixed) => apply_manual_order(observed, &fixed),
            None => apply_manual_order(observed, &self.order),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    pub include_empty: bool,
    pub anchor: DateAnchor,
}

pub type CellKey = (String, String);

#[derive(Debug)]
pub struct Matrix<'a, R> {
    pub row_keys: Vec<String>,
    pub col_keys: Vec<String>,
    cells: HashMap<CellKey, Vec<&'a R>>,
}

impl<'a, R: Record> Matrix<'a, R> {
    pub fn cell(&self, row_key: &str, col_key: &str) -> &[&'a R] {
        self.cells
            .get(&(row_key.to_string(), col_key.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn cell_paths(&self, row_key: &str, col_key: &str) -> Vec<&str> {
        self.cell(row_key, col_key).iter().map(|r| r.path()).collect()
    }

    pub fn max_cell_count(&self) -> usize {
        self.cells.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn sort_cells(&mut self, field: &PropertyId, direction: SortDirection) {
        for records in self.cells.values_mut() {
            sort_cell_records(records, field, direction);
        }
    }
}

/// Groups records into a row x column grid.
///
/// A record lands in every cell of its row keys x column keys, at most once
/// per cell. With `include_empty` off, pairs touching `EMPTY_KEY` are
/// dropped entirely.
pub fn aggregate<'a, R: Record>(
    records: &'a [R],
    rows: &AxisPlan,
    cols: &AxisPlan,
    options: &AggregateOptions,
) -> Matrix<'a, R> {
    let mut row_seen = HashSet::new();
    let mut col_seen = HashSet::new();
    let mut observed_rows = Vec::new();
    let mut observed_cols = Vec::new();
    let mut cells: HashMap<CellKey, Vec<&'a R>> = HashMap::new();
    let mut members: HashMap<CellKey, HashSet<&'a str>> = HashMap::new();

    for record in records {
        let row_keys = rows.keys_for(record, &options.anchor);
        let col_keys = cols.keys_for(record, &options.anchor);

        for row_key in &row_keys {
            for col_key in &col_keys {
                if !options.include_empty && (row_key == EMPTY_KEY || col_key == EMPTY_KEY) {
                    continue;
                }
                if row_seen.insert(row_key.clone()) {
                    observed_rows.push(row_key.clone());
                }
                if col_seen.insert(col_key.clone()) {
                    observed_cols.push(col_key.clone());
                }

                let cell = (row_key.clone(), col_key.clone());
                if !members.entry(cell.clone()).or_default().insert(record.path()) {
                    continue;
                }
                cells.entry(cell).or_default().push(record);
            }
        }
    }

    Matrix {
        row_keys: rows.order_keys(&observed_rows),
        col_keys: cols.order_keys(&observed_cols),
        cells,
    }
}

fn sort_scalar(record: &impl Record, field: &PropertyId) -> Option<Scalar> {
    record
        .value(field)
        .first()
        .filter(|s| !s.as_display().trim().is_empty())
        .cloned()
}

/// Orders records inside one cell. Missing values always sort last;
/// otherwise numbers, then dates, then case-insensitive text.
pub fn sort_cell_records<R: Record>(records: &mut [&R], field: &PropertyId, direction: SortDirection) {
    records.sort_by_cached_key(|record| SortKey(sort_scalar(*record, field), direction));
}

struct SortKey(Option<Scalar>, SortDirection);

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = match (&self.0, &other.0) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Less,
            (Some(a), Some(b)) => (a, b),
        };
        let ordering = compare_scalars(a, b);
        match self.1 {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

fn compare_scalars(a: &Scalar, b: &Scalar) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x.total_cmp(&y);
    }
    let (a_text, b_text) = (a.as_display(), b.as_display());
    if let (Some(x), Some(y)) = (
        parse_sortable_datetime(&a_text),
        parse_sortable_datetime(&b_text),
    ) {
        return x.cmp(&y);
    }
    locale_compare(&a_text.to_lowercase(), &b_text.to_lowercase())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSummary {
    pub count: usize,
    pub numeric_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl CellSummary {
    /// Short text for a grid cell under the given summary mode, e.g.
    /// `SUM(3): 12.50`.
    pub fn display(&self, mode: CellSummaryMode) -> String {
        let (label, picked) = match mode {
            CellSummaryMode::Off | CellSummaryMode::Count => return self.count.to_string(),
            CellSummaryMode::Sum => ("SUM", self.sum),
            CellSummaryMode::Avg => ("AVG", self.avg),
            CellSummaryMode::Min => ("MIN", self.min),
            CellSummaryMode::Max => ("MAX", self.max),
        };
        let value = picked.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
        format!("{label}({}): {value}", self.numeric_count)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Count plus, for numeric modes, sum/avg/min/max of `field` over the
/// records that carry a number there.
pub fn summarize_cell<R: Record>(
    records: &[&R],
    mode: CellSummaryMode,
    field: Option<&PropertyId>,
) -> CellSummary {
    let count = records.len();
    let field = match (mode, field) {
        (CellSummaryMode::Off | CellSummaryMode::Count, _) | (_, None) => {
            return CellSummary {
                count,
                ..CellSummary::default()
            };
        }
        (_, Some(field)) => field,
    };

    let numbers = records
        .iter()
        .filter_map(|record| scalar_numeric(record.value(field).first()))
        .collect::<Vec<_>>();
    if numbers.is_empty() {
        return CellSummary {
            count,
            ..CellSummary::default()
        };
    }

    let sum = numbers.iter().sum::<f64>();
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    CellSummary {
        count,
        numeric_count: numbers.len(),
        sum: Some(round2(sum)),
        avg: Some(round2(sum / numbers.len() as f64)),
        min: Some(round2(min)),
        max: Some(round2(max)),
    }
}

/// Relative heat in `[0, 1]` for a cell holding `count` records.
pub fn heat_intensity(count: usize, max_count: usize, scale: HeatmapScale) -> f64 {
    if max_count == 0 {
        return 0.0;
    }
    let t = match scale {
        HeatmapScale::Linear => count as f64 / max_count as f64,
        HeatmapScale::Log => (1.0 + count as f64).ln() / (1.0 + max_count as f64).ln(),
    };
    t.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::codec::INVALID_KEY;

    #[derive(Debug)]
    struct Note {
        path: String,
        props: BTreeMap<String, PropertyValue>,
    }

    impl Note {
        fn new(path: &str, props: &[(&str, PropertyValue)]) -> Self {
            Self {
                path: path.to_string(),
                props: props
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            }
        }
    }

    impl Record for Note {
        fn path(&self) -> &str {
            &self.path
        }

        fn value(&self, property: &PropertyId) -> PropertyValue {
            self.props.get(property.name()).cloned().unwrap_or_default()
        }
    }

    fn options(include_empty: bool) -> AggregateOptions {
        AggregateOptions {
            include_empty,
            anchor: DateAnchor::new(NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()),
        }
    }

    fn plan(records: &[Note], name: &str, spec: BucketSpec, mode: MultiValueMode) -> AxisPlan {
        let state = AxisState {
            bucket_spec: spec,
            ..AxisState::default()
        };
        AxisPlan::prepare(records, PropertyId::note(name), &state, mode)
    }

    fn sample() -> Vec<Note> {
        vec![
            Note::new(
                "a.md",
                &[
                    ("status", PropertyValue::text("todo")),
                    ("tags", PropertyValue::list(["x", "y", "x"])),
                ],
            ),
            Note::new(
                "b.md",
                &[
                    ("status", PropertyValue::text("done")),
                    ("tags", PropertyValue::text("y")),
                ],
            ),
            Note::new("c.md", &[("tags", PropertyValue::text("x"))]),
        ]
    }

    #[test]
    fn explode_places_record_in_each_bucket_once() {
        let notes = sample();
        let rows = plan(&notes, "status", BucketSpec::Categorical, MultiValueMode::Disallow);
        let cols = plan(&notes, "tags", BucketSpec::Categorical, MultiValueMode::Explode);
        let matrix = aggregate(&notes, &rows, &cols, &options(true));

        assert_eq!(matrix.row_keys, vec!["done", "todo", EMPTY_KEY]);
        assert_eq!(matrix.col_keys, vec!["x", "y"]);
        assert_eq!(matrix.cell_paths("todo", "x"), vec!["a.md"]);
        assert_eq!(matrix.cell_paths("todo", "y"), vec!["a.md"]);
        assert_eq!(matrix.cell_paths(EMPTY_KEY, "x"), vec!["c.md"]);
        assert!(matrix.cell("done", "x").is_empty());
        assert_eq!(matrix.max_cell_count(), 1);
    }

    #[test]
    fn duplicate_paths_never_repeat_within_a_cell() {
        let notes = vec![
            Note::new("same.md", &[("status", PropertyValue::text("todo"))]),
            Note::new("same.md", &[("status", PropertyValue::text("todo"))]),
        ];
        let rows = plan(&notes, "status", BucketSpec::Categorical, MultiValueMode::Disallow);
        let cols = plan(&notes, "none", BucketSpec::Categorical, MultiValueMode::Disallow);
        let matrix = aggregate(&notes, &rows, &cols, &options(true));
        assert_eq!(matrix.cell("todo", EMPTY_KEY).len(), 1);
    }

    #[test]
    fn include_empty_off_drops_empty_pairs() {
        let notes = sample();
        let rows = plan(&notes, "status", BucketSpec::Categorical, MultiValueMode::Disallow);
        let cols = plan(&notes, "tags", BucketSpec::Categorical, MultiValueMode::Explode);
        let matrix = aggregate(&notes, &rows, &cols, &options(false));
        assert_eq!(matrix.row_keys, vec!["done", "todo"]);
        assert!(matrix.cell(EMPTY_KEY, "x").is_empty());
    }

    #[test]
    fn aggregation_is_idempotent() {
        let notes = sample();
        let rows = plan(&notes, "status", BucketSpec::Categorical, MultiValueMode::Disallow);
        let cols = plan(&notes, "tags", BucketSpec::Categorical, MultiValueMode::Explode);
        let first = aggregate(&notes, &rows, &cols, &options(true));
        let second = aggregate(&notes, &rows, &cols, &options(true));
        assert_eq!(first.row_keys, second.row_keys);
        assert_eq!(first.col_keys, second.col_keys);
        for r in &first.row_keys {
            for c in &first.col_keys {
                assert_eq!(first.cell_paths(r, c), second.cell_paths(r, c));
            }
        }
    }

    #[test]
    fn quantile_axis_uses_sample_edges() {
        let notes = (1..=8)
            .map(|i| Note::new(&format!("n{i}.md"), &[("score", PropertyValue::number(f64::from(i)))]))
            .chain([Note::new("bad.md", &[("score", PropertyValue::text("n/a"))])])
            .collect::<Vec<_>>();
        let rows = plan(
            &notes,
            "score",
            BucketSpec::number_quantiles(2).unwrap(),
            MultiValueMode::Disallow,
        );
        assert_eq!(rows.quantiles.edges, vec![4.0]);
        let cols = plan(&notes, "none", BucketSpec::Categorical, MultiValueMode::Disallow);
        let matrix = aggregate(&notes, &rows, &cols, &options(true));
        assert_eq!(matrix.row_keys, vec!["Q1", "Q2", INVALID_KEY]);
        assert_eq!(matrix.cell("Q1", EMPTY_KEY).len(), 4);
        assert_eq!(matrix.cell("Q2", EMPTY_KEY).len(), 4);
    }

    #[test]
    fn date_axis_ignores_manual_order() {
        let notes = vec![
            Note::new("late.md", &[("due", PropertyValue::text("2024-09-01"))]),
            Note::new("now.md", &[("due", PropertyValue::text("2024-06-12"))]),
            Note::new("old.md", &[("due", PropertyValue::text("2024-01-01"))]),
        ];
        let state = AxisState {
            order: vec!["Later".into(), "Today".into()],
            bucket_spec: BucketSpec::date_relative(),
            ..AxisState::default()
        };
        let rows = AxisPlan::prepare(&notes, PropertyId::note("due"), &state, MultiValueMode::Disallow);
        let cols = plan(&notes, "none", BucketSpec::Categorical, MultiValueMode::Disallow);
        let matrix = aggregate(&notes, &rows, &cols, &options(true));
        assert_eq!(matrix.row_keys, vec!["Overdue", "Today", "Later"]);
    }

    #[test]
    fn cell_sorting_puts_missing_last_in_both_directions() {
        let notes = vec![
            Note::new("a.md", &[("rank", PropertyValue::text("10"))]),
            Note::new("b.md", &[]),
            Note::new("c.md", &[("rank", PropertyValue::number(2.0))]),
        ];
        let field = PropertyId::note("rank");
        let mut refs = notes.iter().collect::<Vec<_>>();
        sort_cell_records(&mut refs, &field, SortDirection::Asc);
        assert_eq!(refs.iter().map(|n| n.path()).collect::<Vec<_>>(), vec!["c.md", "a.md", "b.md"]);
        sort_cell_records(&mut refs, &field, SortDirection::Desc);
        assert_eq!(refs.iter().map(|n| n.path()).collect::<Vec<_>>(), vec!["a.md", "c.md", "b.md"]);
    }

    #[test]
    fn summaries_use_first_numeric_value() {
        let notes = vec![
            Note::new("a.md", &[("pts", PropertyValue::number(1.254))]),
            Note::new("b.md", &[("pts", PropertyValue::list(["3", "100"]))]),
            Note::new("c.md", &[("pts", PropertyValue::text("none"))]),
        ];
        let refs = notes.iter().collect::<Vec<_>>();
        let field = PropertyId::note("pts");

        let summary = summarize_cell(&refs, CellSummaryMode::Sum, Some(&field));
        assert_eq!(summary.count, 3);
        assert_eq!(summary.numeric_count, 2);
        assert_eq!(summary.sum, Some(4.25));
        assert_eq!(summary.min, Some(1.25));
        assert_eq!(summary.max, Some(3.0));
        assert_eq!(summary.display(CellSummaryMode::Max), "MAX(2): 3.00");
        assert_eq!(summary.display(CellSummaryMode::Count), "3");

        let counted = summarize_cell(&refs, CellSummaryMode::Count, Some(&field));
        assert_eq!(counted, CellSummary { count: 3, ..CellSummary::default() });
        assert_eq!(
            summarize_cell(&refs, CellSummaryMode::Avg, Some(&PropertyId::note("missing")))
                .display(CellSummaryMode::Avg),
            "AVG(0): -"
        );
        assert_eq!(summarize_cell(&refs, CellSummaryMode::Avg, None).numeric_count, 0);
    }

    #[test]
    fn heat_intensity_scales() {
        assert_eq!(heat_intensity(0, 0, HeatmapScale::Linear), 0.0);
        assert_eq!(heat_intensity(2, 4, HeatmapScale::Linear), 0.5);
        assert_eq!(heat_intensity(4, 4, HeatmapScale::Log), 1.0);
        assert!(heat_intensity(1, 4, HeatmapScale::Log) > 0.25);
    }
}
