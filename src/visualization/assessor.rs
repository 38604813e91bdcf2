use super::temporal::{
    find_temporal_column, is_category_like_name, is_numeric_column, is_string_column,
};
use super::{ChartFamily, VisualizationVerdict};
use crate::models::Row;
use serde_json::Value;

/// Minimum number of pivot-like columns for a single row to be charted.
const MIN_PIVOT_COLUMNS: usize = 2;

/// Decide whether a result set should be charted.
///
/// Rules are evaluated in order and the first match wins. The function is
/// pure: the same rows and columns always produce the same verdict.
pub fn assess(rows: &[Row], columns: &[String]) -> VisualizationVerdict {
    let row_count = rows.len();
    let column_count = columns.len();

    if row_count == 0 {
        return VisualizationVerdict::skip("No data returned from query");
    }

    if row_count == 1 && column_count == 1 {
        return VisualizationVerdict::scalar("Single value result, better displayed as text");
    }

    if row_count == 1 && column_count >= 2 {
        let pivot_columns = pivot_columns(&rows[0], columns);
        if pivot_columns >= MIN_PIVOT_COLUMNS {
            return VisualizationVerdict::chart(
                ChartFamily::Bar,
                format!("Single row with {} comparable category columns", pivot_columns),
            );
        }
        return VisualizationVerdict::table("Single row with multiple metrics, better as a table");
    }

    if column_count == 2 {
        return VisualizationVerdict::chart(
            ChartFamily::Auto,
            format!("Two-column result with {} rows", row_count),
        );
    }

    if column_count >= 3 {
        if let Some(temporal) = find_temporal_column(rows, columns) {
            return VisualizationVerdict::chart(
                ChartFamily::Line,
                format!("Time series over column '{}'", temporal),
            );
        }
        let first_is_category = is_string_column(rows, &columns[0]);
        let has_metric = columns[1..].iter().any(|c| is_numeric_column(rows, c));
        if first_is_category && has_metric {
            return VisualizationVerdict::chart(
                ChartFamily::GroupedBar,
                "Categories with multiple metrics",
            );
        }
        return VisualizationVerdict::table("No chartable column layout, better as a table");
    }

    VisualizationVerdict::skip("Result shape is not suitable for a chart")
}

/// Columns of a single-row result that read as cross-tab headers: the name
/// looks like a period or dimension member and the value is numeric.
fn pivot_columns(row: &Row, columns: &[String]) -> usize {
    columns
        .iter()
        .filter(|c| is_category_like_name(c))
        .filter(|c| matches!(row.get(c.as_str()), Some(Value::Number(_))))
        .count()
}
