//! Visualization
//!
//! Shape-driven decision of whether a result set should be charted, the chart
//! specification built from it, and the render capability that turns a
//! specification into a displayable figure.

pub mod assessor;
pub mod chart;
pub mod render;
pub mod temporal;

use serde::{Deserialize, Serialize};

pub use assessor::assess;
pub use chart::{resolve_family, synthesize, ChartSpec, ChartStyle, Orientation, Series};
pub use render::{ChartRenderer, PlotlyRenderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartFamily {
    /// Left to the chart synthesizer's shape-driven detection.
    Auto,
    Bar,
    GroupedBar,
    Line,
    Pie,
    Scatter,
}

impl ChartFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartFamily::Auto => "auto",
            ChartFamily::Bar => "bar",
            ChartFamily::GroupedBar => "grouped_bar",
            ChartFamily::Line => "line",
            ChartFamily::Pie => "pie",
            ChartFamily::Scatter => "scatter",
        }
    }
}

/// How a result that is not charted should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayHint {
    Scalar,
    Table,
    Chart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationVerdict {
    pub should_visualize: bool,
    pub reason: String,
    pub chart_family: Option<ChartFamily>,
    pub display_hint: Option<DisplayHint>,
}

impl VisualizationVerdict {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_visualize: false,
            reason: reason.into(),
            chart_family: None,
            display_hint: None,
        }
    }

    pub fn scalar(reason: impl Into<String>) -> Self {
        Self {
            display_hint: Some(DisplayHint::Scalar),
            ..Self::skip(reason)
        }
    }

    pub fn table(reason: impl Into<String>) -> Self {
        Self {
            display_hint: Some(DisplayHint::Table),
            ..Self::skip(reason)
        }
    }

    pub fn chart(family: ChartFamily, reason: impl Into<String>) -> Self {
        Self {
            should_visualize: true,
            reason: reason.into(),
            chart_family: Some(family),
            display_hint: Some(DisplayHint::Chart),
        }
    }
}
