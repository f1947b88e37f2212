use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;

use crate::value::{PropertyValue, parse_number, parse_sortable_datetime};

/// Bucket for absent, blank, or null-like values.
pub const EMPTY_KEY: &str = "__EMPTY__";
/// Bucket for values that do not parse under the axis spec.
pub const INVALID_KEY: &str = "__INVALID__";

const EMPTY_DISPLAY: &str = "(empty)";

fn is_nullish(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("undefined")
}

fn key_from_display(display: String) -> String {
    if is_nullish(&display) {
        EMPTY_KEY.to_string()
    } else {
        display
    }
}

/// Canonical bucket key for a value; the key is the value's string form,
/// unmodified, unless it is absent or null-like.
pub fn value_to_bucket_key(value: &PropertyValue) -> String {
    match value.as_display() {
        Some(display) => key_from_display(display),
        None => EMPTY_KEY.to_string(),
    }
}

pub fn display_for_bucket_key(key: &str, aliases: &BTreeMap<String, String>) -> String {
    if let Some(alias) = aliases.get(key).filter(|a| !a.is_empty()) {
        return alias.clone();
    }
    if key == EMPTY_KEY {
        return EMPTY_DISPLAY.to_string();
    }
    key.to_string()
}

/// Orders keys for display: entries of `order` that are present come
/// first in that sequence, the rest follow in smart default order, then
/// `INVALID_KEY` and `EMPTY_KEY`.
pub fn apply_manual_order<S: AsRef<str>>(keys: &[String], order: &[S]) -> Vec<String> {
    let mut remaining: HashSet<&str> = keys.iter().map(String::as_str).collect();
    let mut out = Vec::with_capacity(remaining.len());

    for entry in order {
        let entry = entry.as_ref();
        if remaining.remove(entry) {
            out.push(entry.to_string());
        }
    }

    let has_invalid = remaining.remove(INVALID_KEY);
    let has_empty = remaining.remove(EMPTY_KEY);

    let rest = keys
        .iter()
        .map(String::as_str)
        .filter(|k| remaining.contains(k))
        .unique()
        .collect::<Vec<_>>();
    out.extend(smart_sort(rest).into_iter().map(str::to_string));

    if has_invalid {
        out.push(INVALID_KEY.to_string());
    }
    if has_empty {
        out.push(EMPTY_KEY.to_string());
    }
    out
}

fn smart_sort(mut keys: Vec<&str>) -> Vec<&str> {
    if keys.is_empty() {
        return keys;
    }

    let numbers = keys.iter().map(|k| parse_number(k)).collect::<Option<Vec<_>>>();
    if let Some(numbers) = numbers {
        let mut paired = keys.into_iter().zip(numbers).collect::<Vec<_>>();
        paired.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| locale_compare(a.0, b.0)));
        return paired.into_iter().map(|(k, _)| k).collect();
    }

    let dates = keys
        .iter()
        .map(|k| parse_sortable_datetime(k))
        .collect::<Option<Vec<_>>>();
    if let Some(dates) = dates {
        let mut paired = keys.into_iter().zip(dates).collect::<Vec<_>>();
        paired.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| locale_compare(a.0, b.0)));
        return paired.into_iter().map(|(k, _)| k).collect();
    }

    keys.sort_by(|a, b| locale_compare(a, b));
    keys
}

/// Case-folded comparison with lowercase ahead of uppercase on ties.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| b.cmp(a))
}
