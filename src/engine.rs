//! Per-type scalar bucketing.
//!
//! Quantile bucketing is two-phase: [`bucket_scalar_value`] classifies a
//! value into either a final key or [`ScalarBucket::PendingQuantile`], and
//! [`ScalarBucket::resolve`] maps the pending number to `Q1..Qk` once the
//! sample-wide edges from [`compute_quantile_buckets`] are known.

use chrono::{Datelike, Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::codec::{EMPTY_KEY, INVALID_KEY, value_to_bucket_key};
use crate::spec::BucketSpec;
use crate::value::{PropertyValue, Scalar, parse_iso_date, parse_number};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    #[default]
    Monday,
    Sunday,
}

impl WeekStart {
    fn days_into_week(self, date: NaiveDate) -> u32 {
        match self {
            WeekStart::Monday => date.weekday().num_days_from_monday(),
            WeekStart::Sunday => date.weekday().num_days_from_sunday(),
        }
    }
}

/// The "today" that date-relative buckets are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateAnchor {
    pub today: NaiveDate,
    pub week_start: WeekStart,
}

impl DateAnchor {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            week_start: WeekStart::default(),
        }
    }

    pub fn now() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn with_week_start(mut self, week_start: WeekStart) -> Self {
        self.week_start = week_start;
        self
    }

    fn end_of_week(&self) -> NaiveDate {
        let remaining = 6 - self.week_start.days_into_week(self.today);
        self.today
            .checked_add_days(Days::new(u64::from(remaining)))
            .unwrap_or(NaiveDate::MAX)
    }

    fn end_of_month(&self) -> NaiveDate {
        let (year, month) = if self.today.month() == 12 {
            (self.today.year() + 1, 1)
        } else {
            (self.today.year(), self.today.month() + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|first| first.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn classify(&self, day: NaiveDate) -> RelativeWindow {
        if day < self.today {
            return RelativeWindow::Overdue;
        }
        if day == self.today {
            return RelativeWindow::Today;
        }
        let end_this_week = self.end_of_week();
        if day <= end_this_week {
            return RelativeWindow::ThisWeek;
        }
        let end_next_week = end_this_week
            .checked_add_days(Days::new(7))
            .unwrap_or(NaiveDate::MAX);
        if day <= end_next_week {
            return RelativeWindow::NextWeek;
        }
        if day <= self.end_of_month() {
            return RelativeWindow::ThisMonth;
        }
        RelativeWindow::Later
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelativeWindow {
    Overdue,
    Today,
    ThisWeek,
    NextWeek,
    ThisMonth,
    Later,
}

impl RelativeWindow {
    pub const ALL: [RelativeWindow; 6] = [
        RelativeWindow::Overdue,
        RelativeWindow::Today,
        RelativeWindow::ThisWeek,
        RelativeWindow::NextWeek,
        RelativeWindow::ThisMonth,
        RelativeWindow::Later,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RelativeWindow::Overdue => "Overdue",
            RelativeWindow::Today => "Today",
            RelativeWindow::ThisWeek => "This Week",
            RelativeWindow::NextWeek => "Next Week",
            RelativeWindow::ThisMonth => "This Month",
            RelativeWindow::Later => "Later",
        }
    }
}

/// Phase-one result of bucketing a single value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarBucket {
    Key {
        key: String,
        reversible_value: Option<String>,
    },
    PendingQuantile(f64),
}

impl ScalarBucket {
    fn key(key: impl Into<String>) -> Self {
        ScalarBucket::Key {
            key: key.into(),
            reversible_value: None,
        }
    }

    /// Phase two: resolve a pending quantile against the axis edges.
    pub fn resolve(self, edges: &[f64]) -> String {
        match self {
            ScalarBucket::Key { key, .. } => key,
            ScalarBucket::PendingQuantile(n) => quantile_label_for(n, edges),
        }
    }

    pub fn reversible_value(&self) -> Option<&str> {
        match self {
            ScalarBucket::Key {
                reversible_value, ..
            } => reversible_value.as_deref(),
            ScalarBucket::PendingQuantile(_) => None,
        }
    }
}

/// Buckets one value under `spec`. Absent input is always `EMPTY_KEY`;
/// a list reaching this function is treated as one opaque scalar.
pub fn bucket_scalar_value(
    value: &PropertyValue,
    spec: &BucketSpec,
    anchor: &DateAnchor,
) -> ScalarBucket {
    if value.is_absent() {
        return ScalarBucket::key(EMPTY_KEY);
    }

    match spec {
        BucketSpec::Categorical => {
            let key = value_to_bucket_key(value);
            if key == EMPTY_KEY {
                ScalarBucket::key(EMPTY_KEY)
            } else {
                ScalarBucket::Key {
                    reversible_value: Some(key.clone()),
                    key,
                }
            }
        }
        BucketSpec::NumberRanges { ranges, .. } => {
            let Some(n) = numeric_value(value) else {
                return ScalarBucket::key(spec.invalid_label());
            };
            ranges
                .iter()
                .find(|range| range.contains(n))
                .map(|range| ScalarBucket::key(range.label.as_str()))
                .unwrap_or_else(|| ScalarBucket::key(spec.invalid_label()))
        }
        BucketSpec::NumberQuantiles { .. } => match numeric_value(value) {
            Some(n) => ScalarBucket::PendingQuantile(n),
            None => ScalarBucket::key(spec.invalid_label()),
        },
        BucketSpec::DateRelative { .. } => {
            let parsed = value.as_display().and_then(|s| parse_iso_date(&s));
            match parsed {
                Some(day) => ScalarBucket::key(anchor.classify(day).label()),
                None => ScalarBucket::key(INVALID_KEY),
            }
        }
    }
}

pub(crate) fn numeric_value(value: &PropertyValue) -> Option<f64> {
    match value {
        PropertyValue::Absent => None,
        PropertyValue::Scalar(scalar) => scalar.as_number(),
        list => list.as_display().and_then(|s| parse_number(&s)),
    }
}

pub(crate) fn scalar_numeric(value: Option<&Scalar>) -> Option<f64> {
    value.and_then(Scalar::as_number)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuantileBuckets {
    pub edges: Vec<f64>,
    pub labels: Vec<String>,
}

impl QuantileBuckets {
    pub fn is_available(&self) -> bool {
        !self.labels.is_empty()
    }
}

/// Nearest-rank quantile edges over the finite values of `values`.
///
/// Returns `k - 1` edges and labels `Q1..Qk`; both are empty when the
/// sample is empty or `k <= 1`.
pub fn compute_quantile_buckets(values: &[f64], k: usize) -> QuantileBuckets {
    let mut clean = values.iter().copied().filter(|v| v.is_finite()).collect::<Vec<_>>();
    clean.sort_by(f64::total_cmp);
    let n = clean.len();
    if n == 0 || k <= 1 {
        return QuantileBuckets::default();
    }

    let edges = (1..k)
        .map(|i| clean[(i * (n - 1)) / k])
        .collect::<Vec<_>>();
    let labels = (1..=k).map(|i| format!("Q{i}")).collect();
    QuantileBuckets { edges, labels }
}

/// `Qi` for the first edge `n` does not exceed, else the last bucket.
pub fn quantile_label_for(n: f64, edges: &[f64]) -> String {
    let index = edges
        .iter()
        .position(|edge| n <= *edge)
        .unwrap_or(edges.len());
    format!("Q{}", index + 1)
}

/// Fixed display order for specs whose buckets are not user-reorderable.
pub fn default_order_for_spec(spec: &BucketSpec) -> Option<Vec<String>> {
    match spec {
        BucketSpec::DateRelative { .. } => Some(
            RelativeWindow::ALL
                .iter()
                .map(|w| w.label().to_string())
                .chain([EMPTY_KEY.to_string(), INVALID_KEY.to_string()])
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::NumberRange;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn key_of(bucket: ScalarBucket) -> String {
        bucket.resolve(&[])
    }

    fn ranges_spec() -> BucketSpec {
        BucketSpec::number_ranges(vec![
            NumberRange::new("Low", None, Some(3.0)),
            NumberRange::new("Med", Some(3.0), Some(7.0)),
            NumberRange::new("High", Some(7.0), None),
        ])
        .unwrap()
    }

    #[test]
    fn absent_is_empty_for_every_spec() {
        let anchor = DateAnchor::new(ymd(2024, 6, 12));
        for spec in [
            BucketSpec::Categorical,
            BucketSpec::date_relative(),
            ranges_spec(),
            BucketSpec::number_quantiles(4).unwrap(),
        ] {
            let bucket = bucket_scalar_value(&PropertyValue::Absent, &spec, &anchor);
            assert_eq!(key_of(bucket), EMPTY_KEY, "spec {}", spec.type_name());
        }
    }

    #[test]
    fn categorical_key_is_its_own_reversible_value() {
        let anchor = DateAnchor::new(ymd(2024, 6, 12));
        let bucket = bucket_scalar_value(&PropertyValue::text("Doing"), &BucketSpec::Categorical, &anchor);
        assert_eq!(bucket.reversible_value(), Some("Doing"));
        assert_eq!(key_of(bucket), "Doing");

        let blank = bucket_scalar_value(&PropertyValue::text(" "), &BucketSpec::Categorical, &anchor);
        assert_eq!(blank.reversible_value(), None);
    }

    #[test]
    fn ranges_are_half_open() {
        let anchor = DateAnchor::new(ymd(2024, 6, 12));
        let spec = ranges_spec();
        let key = |v: PropertyValue| key_of(bucket_scalar_value(&v, &spec, &anchor));
        assert_eq!(key(PropertyValue::number(3.0)), "Med");
        assert_eq!(key(PropertyValue::number(2.999)), "Low");
        assert_eq!(key(PropertyValue::number(7.0)), "High");
        assert_eq!(key(PropertyValue::text(" 5 ")), "Med");
        assert_eq!(key(PropertyValue::text("abc")), INVALID_KEY);
    }

    #[test]
    fn ranges_without_match_use_custom_invalid_label() {
        let anchor = DateAnchor::new(ymd(2024, 6, 12));
        let spec = BucketSpec::number_ranges(vec![NumberRange::new("Small", Some(0.0), Some(10.0))])
            .unwrap()
            .with_invalid_label("Other")
            .unwrap();
        let bucket = bucket_scalar_value(&PropertyValue::number(50.0), &spec, &anchor);
        assert_eq!(key_of(bucket), "Other");
    }

    #[test]
    fn date_relative_windows_follow_monday_weeks() {
        let anchor = DateAnchor::new(ymd(2024, 6, 12));
        let spec = BucketSpec::date_relative();
        let key = |s: &str| key_of(bucket_scalar_value(&PropertyValue::text(s), &spec, &anchor));
        assert_eq!(key("2024-06-10"), "Overdue");
        assert_eq!(key("2024-06-12"), "Today");
        assert_eq!(key("2024-06-16"), "This Week");
        assert_eq!(key("2024-06-23"), "Next Week");
        assert_eq!(key("2024-06-30"), "This Month");
        assert_eq!(key("2024-08-01"), "Later");
        assert_eq!(key("2024-06-12T18:00:00"), "Today");
        assert_eq!(key("next tuesday"), INVALID_KEY);
    }

    #[test]
    fn sunday_weeks_end_on_saturday() {
        let anchor = DateAnchor::new(ymd(2024, 6, 12)).with_week_start(WeekStart::Sunday);
        assert_eq!(anchor.classify(ymd(2024, 6, 15)), RelativeWindow::ThisWeek);
        assert_eq!(anchor.classify(ymd(2024, 6, 16)), RelativeWindow::NextWeek);
        assert_eq!(anchor.classify(ymd(2024, 6, 23)), RelativeWindow::ThisMonth);
    }

    #[test]
    fn december_month_end_rolls_year() {
        let anchor = DateAnchor::new(ymd(2024, 12, 2));
        assert_eq!(anchor.classify(ymd(2024, 12, 31)), RelativeWindow::ThisMonth);
        assert_eq!(anchor.classify(ymd(2025, 1, 1)), RelativeWindow::Later);
    }

    #[test]
    fn quantiles_partition_ten_values_into_four_buckets() {
        let values = (1..=10).map(f64::from).collect::<Vec<_>>();
        let buckets = compute_quantile_buckets(&values, 4);
        assert_eq!(buckets.edges, vec![3.0, 5.0, 7.0]);
        assert_eq!(buckets.labels, vec!["Q1", "Q2", "Q3", "Q4"]);

        let labels = values
            .iter()
            .map(|v| quantile_label_for(*v, &buckets.edges))
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec!["Q1", "Q1", "Q1", "Q2", "Q2", "Q3", "Q3", "Q4", "Q4", "Q4"]
        );
    }

    #[test]
    fn quantiles_degenerate_inputs_yield_nothing() {
        assert!(!compute_quantile_buckets(&[], 4).is_available());
        assert!(!compute_quantile_buckets(&[1.0, 2.0], 1).is_available());
        assert!(!compute_quantile_buckets(&[f64::NAN], 3).is_available());
        assert_eq!(quantile_label_for(42.0, &[]), "Q1");
    }

    #[test]
    fn quantile_placeholder_resolves_in_phase_two() {
        let anchor = DateAnchor::new(ymd(2024, 6, 12));
        let spec = BucketSpec::number_quantiles(4).unwrap();
        let pending = bucket_scalar_value(&PropertyValue::text("6"), &spec, &anchor);
        assert_eq!(pending, ScalarBucket::PendingQuantile(6.0));
        assert_eq!(pending.resolve(&[3.0, 5.0, 7.0]), "Q3");

        let invalid = bucket_scalar_value(&PropertyValue::text("n/a"), &spec, &anchor);
        assert_eq!(invalid.resolve(&[3.0]), INVALID_KEY);
    }

    #[test]
    fn only_date_relative_has_fixed_order() {
        let order = default_order_for_spec(&BucketSpec::date_relative()).unwrap();
        assert_eq!(order.first().map(String::as_str), Some("Overdue"));
        assert_eq!(&order[6..], &[EMPTY_KEY.to_string(), INVALID_KEY.to_string()]);
        assert!(default_order_for_spec(&BucketSpec::Categorical).is_none());
    }
}
