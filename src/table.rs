use std::borrow::Cow;
use std::fmt::Write as _;

use crate::axis_state::MAX_HEATMAP_STRENGTH;

const HEAT_SHADES: [&str; 5] = ["", " ░", " ▒", " ▓", " █"];

/// Renders a grid whose first column is a left-aligned row label and whose
/// remaining columns are right-aligned cell values.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));

    let separator_cells = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator_cells, &widths));

    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }

    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

/// Shade suffix for a heat intensity in `[0, 1]`, scaled by the configured
/// strength.
pub fn heat_glyph(intensity: f64, strength: u8) -> &'static str {
    let scaled = intensity.clamp(0.0, 1.0) * f64::from(strength.min(MAX_HEATMAP_STRENGTH))
        / f64::from(MAX_HEATMAP_STRENGTH);
    let last = HEAT_SHADES.len() - 1;
    let index = (scaled * last as f64).round() as usize;
    HEAT_SHADES[index.min(last)]
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate().take(widths.len()) {
        let sanitized = sanitize_cell(value);
        let padding = " ".repeat(widths[idx].saturating_sub(display_width(&sanitized)));
        if idx == 0 {
            cells.push(format!("{sanitized}{padding}"));
        } else {
            cells.push(format!("{padding}{sanitized}"));
        }
    }
    cells.join("  ").trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
