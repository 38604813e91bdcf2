//! Chart Synthesizer
//!
//! Builds a [`ChartSpec`] from a result set. Values are copied out of the
//! rows unchanged so a spec always serializes back to exactly the numbers
//! and labels the store returned.

use super::temporal::{find_temporal_column, is_numeric_column, is_string_column, numeric_columns};
use super::ChartFamily;
use crate::error::{EngineError, Result};
use crate::models::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Largest row count rendered as a pie.
pub const PIE_MAX_ROWS: usize = 10;
const MIN_HEIGHT: u32 = 400;
const BAR_HEIGHT_PER_ROW: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Vertical,
    Horizontal,
}

/// One data series: `labels[i]` pairs with `values[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub labels: Vec<Value>,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartStyle {
    pub template: String,
    pub font_family: String,
    pub font_size: u32,
    pub height: u32,
    pub margin: u32,
    pub grid_color: String,
    pub show_legend: bool,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            template: "plotly_white".to_string(),
            font_family: "Inter, sans-serif".to_string(),
            font_size: 12,
            height: MIN_HEIGHT,
            margin: 50,
            grid_color: "rgba(0,0,0,0.1)".to_string(),
            show_legend: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub family: ChartFamily,
    pub title: String,
    pub series: Vec<Series>,
    /// Title of the axis carrying `labels`.
    pub category_axis_title: String,
    /// Title of the axis carrying `values`.
    pub value_axis_title: String,
    pub orientation: Orientation,
    pub style: ChartStyle,
}

impl ChartSpec {
    pub fn empty(family: ChartFamily) -> Self {
        Self {
            family,
            title: String::new(),
            series: Vec::new(),
            category_axis_title: String::new(),
            value_axis_title: String::new(),
            orientation: Orientation::Vertical,
            style: ChartStyle::default(),
        }
    }
}

/// Pick a concrete family for a two-column result.
///
/// A temporal column gives a line, two numeric columns a scatter, and a
/// category with ratio-like values over at most [`PIE_MAX_ROWS`] rows a pie.
/// Everything else is a bar.
pub fn resolve_family(rows: &[Row], columns: &[String]) -> ChartFamily {
    if find_temporal_column(rows, columns).is_some() {
        return ChartFamily::Line;
    }
    let numeric = numeric_columns(rows, columns);
    if numeric.len() >= 2 {
        return ChartFamily::Scatter;
    }
    if columns.len() == 2
        && rows.len() <= PIE_MAX_ROWS
        && is_string_column(rows, &columns[0])
        && is_numeric_column(rows, &columns[1])
        && is_ratio_column(rows, &columns[1])
    {
        return ChartFamily::Pie;
    }
    ChartFamily::Bar
}

/// Values all fall in 0..=1, or all in 0..=100 with at least one fraction.
fn is_ratio_column(rows: &[Row], column: &str) -> bool {
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.get(column).and_then(Value::as_f64))
        .collect();
    if values.is_empty() || values.iter().any(|v| *v < 0.0) {
        return false;
    }
    let unit = values.iter().all(|v| *v <= 1.0);
    let percent = values.iter().all(|v| *v <= 100.0) && values.iter().any(|v| v.fract() != 0.0);
    unit || percent
}

/// Build a chart of `family` from the rows. `Auto` is resolved first; a
/// family the data cannot support falls back to a bar chart.
pub fn synthesize(family: ChartFamily, rows: &[Row], columns: &[String]) -> Result<ChartSpec> {
    if rows.is_empty() || columns.is_empty() {
        return Err(EngineError::Parse("Cannot chart an empty result".to_string()));
    }
    let family = match family {
        ChartFamily::Auto => resolve_family(rows, columns),
        other => other,
    };

    let spec = match family {
        ChartFamily::Line => line(rows, columns),
        ChartFamily::Scatter => scatter(rows, columns),
        ChartFamily::Pie => pie(rows, columns),
        ChartFamily::GroupedBar => grouped_bar(rows, columns),
        ChartFamily::Bar | ChartFamily::Auto => None,
    };
    match spec {
        Some(spec) => Ok(spec),
        None => bar(rows, columns),
    }
}

/// "churn_rate" -> "Churn Rate"
pub fn axis_title(column: &str) -> String {
    column
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn column_values(rows: &[Row], column: &str) -> Vec<Value> {
    rows.iter()
        .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}

fn compare_numeric(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn bar_height(points: usize) -> u32 {
    MIN_HEIGHT.max(points as u32 * BAR_HEIGHT_PER_ROW)
}

fn bar(rows: &[Row], columns: &[String]) -> Result<ChartSpec> {
    let (pairs, category_title, value_title, name) = if rows.len() == 1 {
        // A single pivoted row: each numeric column becomes a bar.
        let row = &rows[0];
        let pairs: Vec<(Value, Value)> = columns
            .iter()
            .filter_map(|c| match row.get(c.as_str()) {
                Some(value @ Value::Number(_)) => Some((Value::String(c.clone()), value.clone())),
                _ => None,
            })
            .collect();
        (pairs, "Category".to_string(), "Value".to_string(), "Value".to_string())
    } else {
        let value_column = columns
            .iter()
            .find(|c| is_numeric_column(rows, c))
            .ok_or_else(|| EngineError::Parse("No numeric column to chart".to_string()))?;
        let category_column = columns
            .iter()
            .find(|c| *c != value_column && !is_numeric_column(rows, c))
            .or_else(|| columns.iter().find(|c| *c != value_column))
            .ok_or_else(|| EngineError::Parse("No category column to chart".to_string()))?;
        let pairs: Vec<(Value, Value)> = column_values(rows, category_column)
            .into_iter()
            .zip(column_values(rows, value_column))
            .collect();
        (
            pairs,
            axis_title(category_column),
            axis_title(value_column),
            value_column.clone(),
        )
    };
    if pairs.is_empty() {
        return Err(EngineError::Parse("No numeric column to chart".to_string()));
    }
    let (labels, values) = sorted_pairs(pairs);

    let mut style = ChartStyle::default();
    style.height = bar_height(labels.len());
    Ok(ChartSpec {
        family: ChartFamily::Bar,
        title: format!("{} by {}", value_title, category_title),
        series: vec![Series { name, labels, values }],
        category_axis_title: category_title,
        value_axis_title: value_title,
        orientation: Orientation::Horizontal,
        style,
    })
}

/// Sort (label, value) pairs by ascending value; ties keep row order.
fn sorted_pairs(mut pairs: Vec<(Value, Value)>) -> (Vec<Value>, Vec<Value>) {
    pairs.sort_by(|a, b| compare_numeric(&a.1, &b.1));
    pairs.into_iter().unzip()
}

fn grouped_bar(rows: &[Row], columns: &[String]) -> Option<ChartSpec> {
    let category = columns.first()?;
    let metrics: Vec<&String> = columns[1..]
        .iter()
        .filter(|c| is_numeric_column(rows, c))
        .collect();
    if metrics.is_empty() {
        return None;
    }
    let labels = column_values(rows, category);
    let series = metrics
        .iter()
        .map(|metric| Series {
            name: axis_title(metric),
            labels: labels.clone(),
            values: column_values(rows, metric),
        })
        .collect();

    let mut style = ChartStyle::default();
    style.show_legend = true;
    Some(ChartSpec {
        family: ChartFamily::GroupedBar,
        title: format!("Metrics by {}", axis_title(category)),
        series,
        category_axis_title: axis_title(category),
        value_axis_title: "Value".to_string(),
        orientation: Orientation::Vertical,
        style,
    })
}

fn line(rows: &[Row], columns: &[String]) -> Option<ChartSpec> {
    let x = find_temporal_column(rows, columns)?;
    let metrics: Vec<&String> = columns
        .iter()
        .filter(|c| *c != x && is_numeric_column(rows, c))
        .collect();
    if metrics.is_empty() {
        return None;
    }
    let labels = column_values(rows, x);
    let series: Vec<Series> = metrics
        .iter()
        .map(|metric| Series {
            name: axis_title(metric),
            labels: labels.clone(),
            values: column_values(rows, metric),
        })
        .collect();

    let value_title = if metrics.len() == 1 {
        axis_title(metrics[0])
    } else {
        "Value".to_string()
    };
    let mut style = ChartStyle::default();
    style.show_legend = series.len() > 1;
    Some(ChartSpec {
        family: ChartFamily::Line,
        title: format!("{} over {}", value_title, axis_title(x)),
        series,
        category_axis_title: axis_title(x),
        value_axis_title: value_title,
        orientation: Orientation::Vertical,
        style,
    })
}

fn pie(rows: &[Row], columns: &[String]) -> Option<ChartSpec> {
    if columns.len() < 2 || !is_numeric_column(rows, &columns[1]) {
        return None;
    }
    let mut style = ChartStyle::default();
    style.show_legend = true;
    Some(ChartSpec {
        family: ChartFamily::Pie,
        title: format!("{} by {}", axis_title(&columns[1]), axis_title(&columns[0])),
        series: vec![Series {
            name: columns[1].clone(),
            labels: column_values(rows, &columns[0]),
            values: column_values(rows, &columns[1]),
        }],
        category_axis_title: axis_title(&columns[0]),
        value_axis_title: axis_title(&columns[1]),
        orientation: Orientation::Vertical,
        style,
    })
}

fn scatter(rows: &[Row], columns: &[String]) -> Option<ChartSpec> {
    let numeric = numeric_columns(rows, columns);
    let (x, y) = match numeric.as_slice() {
        [x, y, ..] => (*x, *y),
        _ => return None,
    };
    Some(ChartSpec {
        family: ChartFamily::Scatter,
        title: format!("{} vs {}", axis_title(y), axis_title(x)),
        series: vec![Series {
            name: y.clone(),
            labels: column_values(rows, x),
            values: column_values(rows, y),
        }],
        category_axis_title: axis_title(x),
        value_axis_title: axis_title(y),
        orientation: Orientation::Vertical,
        style: ChartStyle::default(),
    })
}
