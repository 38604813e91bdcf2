use super::chart::{ChartSpec, Orientation, Series};
use super::ChartFamily;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Render capability: turns a chart specification into a displayable
/// artifact. The engine never inspects the artifact.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, spec: &ChartSpec) -> Result<Value>;
}

/// Renders Plotly figure JSON (`{"data": [...], "layout": {...}}`).
#[derive(Debug, Clone, Default)]
pub struct PlotlyRenderer;

#[async_trait]
impl ChartRenderer for PlotlyRenderer {
    async fn render(&self, spec: &ChartSpec) -> Result<Value> {
        let data: Vec<Value> = spec.series.iter().map(|s| trace(spec, s)).collect();
        Ok(json!({ "data": data, "layout": layout(spec) }))
    }
}

fn trace(spec: &ChartSpec, series: &Series) -> Value {
    match spec.family {
        ChartFamily::Pie => json!({
            "type": "pie",
            "name": series.name,
            "labels": series.labels,
            "values": series.values,
            "textinfo": "label+percent",
            "hole": 0.0
        }),
        ChartFamily::Line => json!({
            "type": "scatter",
            "mode": "lines+markers",
            "name": series.name,
            "x": series.labels,
            "y": series.values,
            "line": {"width": 2},
            "marker": {"size": 6}
        }),
        ChartFamily::Scatter => json!({
            "type": "scatter",
            "mode": "markers",
            "name": series.name,
            "x": series.labels,
            "y": series.values,
            "marker": {"size": 8, "opacity": 0.7}
        }),
        ChartFamily::Bar | ChartFamily::GroupedBar | ChartFamily::Auto => {
            let text = value_labels(&series.values);
            if spec.orientation == Orientation::Horizontal {
                json!({
                    "type": "bar",
                    "orientation": "h",
                    "name": series.name,
                    "x": series.values,
                    "y": series.labels,
                    "text": text,
                    "textposition": "outside"
                })
            } else {
                json!({
                    "type": "bar",
                    "name": series.name,
                    "x": series.labels,
                    "y": series.values,
                    "text": text,
                    "textposition": "auto"
                })
            }
        }
    }
}

fn layout(spec: &ChartSpec) -> Value {
    let style = &spec.style;
    let grid = json!({"showgrid": true, "gridcolor": style.grid_color});
    let (x_title, y_title) = match spec.orientation {
        Orientation::Horizontal => (&spec.value_axis_title, &spec.category_axis_title),
        Orientation::Vertical => (&spec.category_axis_title, &spec.value_axis_title),
    };

    let mut layout = json!({
        "title": {"text": spec.title},
        "template": style.template,
        "font": {"family": style.font_family, "size": style.font_size},
        "height": style.height,
        "margin": {"l": style.margin, "r": style.margin, "t": style.margin, "b": style.margin},
        "showlegend": style.show_legend,
        "plot_bgcolor": "white",
        "paper_bgcolor": "white"
    });
    if spec.family != ChartFamily::Pie {
        let mut xaxis = grid.clone();
        xaxis["title"] = json!({"text": x_title});
        let mut yaxis = grid;
        yaxis["title"] = json!({"text": y_title});
        layout["xaxis"] = xaxis;
        layout["yaxis"] = yaxis;
    }
    if spec.family == ChartFamily::GroupedBar {
        layout["barmode"] = json!("group");
    }
    layout
}

/// Bar text labels: integers with thousands separators when every value is
/// whole, otherwise two decimals.
fn value_labels(values: &[Value]) -> Vec<String> {
    let whole = values
        .iter()
        .filter_map(Value::as_f64)
        .all(|v| v.fract() == 0.0);
    values
        .iter()
        .map(|v| match v.as_f64() {
            Some(n) if whole => group_thousands(&format!("{:.0}", n)),
            Some(n) => group_thousands(&format!("{:.2}", n)),
            None => String::new(),
        })
        .collect()
}

/// "1234567.50" -> "1,234,567.50"
fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visualization::chart::synthesize;
    use crate::models::{columns_of, Row};

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands("1234567"), "1,234,567");
        assert_eq!(group_thousands("-1234.50"), "-1,234.50");
        assert_eq!(group_thousands("999"), "999");
    }

    #[test]
    fn test_value_labels() {
        assert_eq!(value_labels(&[json!(1200), json!(35)]), vec!["1,200", "35"]);
        assert_eq!(value_labels(&[json!(1200.5), json!(3)]), vec!["1,200.50", "3.00"]);
    }

    #[tokio::test]
    async fn test_horizontal_bar_figure() {
        let data = rows(json!([
            {"country": "USA", "customers": 4000},
            {"country": "UK", "customers": 1200}
        ]));
        let spec = synthesize(ChartFamily::Bar, &data, &columns_of(&data)).unwrap();
        let figure = PlotlyRenderer.render(&spec).await.unwrap();
        assert_eq!(figure["data"][0]["orientation"], "h");
        assert_eq!(figure["data"][0]["y"], json!(["UK", "USA"]));
        assert_eq!(figure["data"][0]["text"], json!(["1,200", "4,000"]));
        assert_eq!(figure["layout"]["xaxis"]["title"]["text"], "Customers");
        assert_eq!(figure["layout"]["template"], "plotly_white");
    }

    #[tokio::test]
    async fn test_line_figure_has_markers() {
        let data = rows(json!([
            {"month": "2024-01", "revenue": 1000, "refunds": 20},
            {"month": "2024-02", "revenue": 1200, "refunds": 35}
        ]));
        let spec = synthesize(ChartFamily::Line, &data, &columns_of(&data)).unwrap();
        let figure = PlotlyRenderer.render(&spec).await.unwrap();
        assert_eq!(figure["data"].as_array().unwrap().len(), 2);
        assert_eq!(figure["data"][0]["mode"], "lines+markers");
        assert_eq!(figure["layout"]["showlegend"], true);
    }
}
