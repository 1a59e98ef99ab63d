//! Chart generation tool.
//!
//! The backend calls `generate_chart` when the user asks to plot or
//! visualize data. This module parses and validates the chart spec the
//! model produced; turning a validated spec into pixels is delegated
//! to a [`ChartRenderer`] so the engine stays free of plotting
//! dependencies.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docshelf_core::error::ToolError;
use docshelf_core::tool::{Tool, ToolResult};

/// The chart shapes the model may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
    Scatter,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
        }
    }
}

impl std::str::FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "line" => Ok(ChartKind::Line),
            "bar" => Ok(ChartKind::Bar),
            "pie" => Ok(ChartKind::Pie),
            "scatter" => Ok(ChartKind::Scatter),
            other => Err(format!(
                "chart_type must be one of line/bar/pie/scatter, got: {other}"
            )),
        }
    }
}

/// One named series in a multi-series chart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub values: Vec<f64>,
    #[serde(default)]
    pub x: Vec<f64>,
    #[serde(default)]
    pub y: Vec<f64>,
}

/// Data payload of a chart call. Three shapes are accepted:
/// `labels`+`values`, `x`+`y`, or `series`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartData {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub values: Vec<f64>,
    #[serde(default)]
    pub x: Vec<f64>,
    #[serde(default)]
    pub y: Vec<f64>,
    #[serde(default)]
    pub series: Vec<Series>,
}

impl ChartData {
    fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.values.is_empty()
            && self.x.is_empty()
            && self.y.is_empty()
            && self.series.is_empty()
    }

    /// Total number of data points across all shapes.
    pub fn point_count(&self) -> usize {
        if !self.series.is_empty() {
            self.series
                .iter()
                .map(|s| s.values.len().max(s.y.len()))
                .sum()
        } else if !self.values.is_empty() {
            self.values.len()
        } else {
            self.y.len()
        }
    }
}

/// A validated chart request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartKind,
    pub title: String,
    #[serde(default)]
    pub x_label: String,
    #[serde(default)]
    pub y_label: String,
    pub data: ChartData,
}

impl ChartSpec {
    /// Parse and validate the raw function-call arguments.
    pub fn parse(args: &serde_json::Value) -> std::result::Result<Self, ToolError> {
        let kind_str = args
            .get("chart_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing required field: chart_type".into()))?;
        let chart_type: ChartKind = kind_str.parse().map_err(ToolError::InvalidArguments)?;

        let title = args
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing required field: title".into()))?
            .to_string();

        let data_value = args
            .get("data")
            .ok_or_else(|| ToolError::InvalidArguments("Missing required field: data".into()))?;
        let data: ChartData = serde_json::from_value(data_value.clone())
            .map_err(|e| ToolError::InvalidArguments(format!("Malformed data: {e}")))?;

        let spec = Self {
            chart_type,
            title,
            x_label: args
                .get("x_label")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            y_label: args
                .get("y_label")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            data,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> std::result::Result<(), ToolError> {
        if self.data.is_empty() {
            return Err(ToolError::InvalidArguments("Chart data is empty".into()));
        }

        match self.chart_type {
            ChartKind::Pie => {
                if self.data.labels.is_empty() || self.data.values.is_empty() {
                    return Err(ToolError::InvalidArguments(
                        "Pie charts require labels and values".into(),
                    ));
                }
                if self.data.labels.len() != self.data.values.len() {
                    return Err(ToolError::InvalidArguments(format!(
                        "Pie chart has {} labels but {} values",
                        self.data.labels.len(),
                        self.data.values.len()
                    )));
                }
            }
            ChartKind::Scatter => {
                if self.data.series.is_empty() {
                    if self.data.x.is_empty() || self.data.y.is_empty() {
                        return Err(ToolError::InvalidArguments(
                            "Scatter charts require x and y coordinates".into(),
                        ));
                    }
                    if self.data.x.len() != self.data.y.len() {
                        return Err(ToolError::InvalidArguments(format!(
                            "Scatter chart has {} x values but {} y values",
                            self.data.x.len(),
                            self.data.y.len()
                        )));
                    }
                } else if self.data.series.iter().any(|s| s.x.len() != s.y.len()) {
                    return Err(ToolError::InvalidArguments(
                        "Scatter series must have matching x and y lengths".into(),
                    ));
                }
            }
            ChartKind::Bar | ChartKind::Line => {
                let labelled = !self.data.labels.is_empty() && !self.data.values.is_empty();
                let coords = !self.data.x.is_empty() && !self.data.y.is_empty();
                let series = !self.data.series.is_empty();
                if !labelled && !coords && !series {
                    return Err(ToolError::InvalidArguments(
                        "Bar/line charts require labels+values, x+y, or series".into(),
                    ));
                }
                if labelled && self.data.labels.len() != self.data.values.len() {
                    return Err(ToolError::InvalidArguments(format!(
                        "Chart has {} labels but {} values",
                        self.data.labels.len(),
                        self.data.values.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A rendered chart image.
#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub png_base64: String,
}

/// Turns a validated [`ChartSpec`] into an image. Implemented by the
/// presentation layer; the engine only validates and forwards.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, spec: &ChartSpec) -> std::result::Result<RenderedChart, String>;
}

/// The `generate_chart` tool.
pub struct ChartTool {
    renderer: Option<Arc<dyn ChartRenderer>>,
}

impl ChartTool {
    /// A chart tool that validates specs but produces no pixels.
    pub fn new() -> Self {
        Self { renderer: None }
    }

    /// Attach a renderer so validated specs become images.
    pub fn with_renderer(renderer: Arc<dyn ChartRenderer>) -> Self {
        Self {
            renderer: Some(renderer),
        }
    }
}

impl Default for ChartTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ChartTool {
    fn name(&self) -> &str {
        "generate_chart"
    }

    fn description(&self) -> &str {
        "Generate a chart/graph to visualize data. Use this when the user asks to plot, chart, graph, or visualize data."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "chart_type": {
                    "type": "string",
                    "enum": ["line", "bar", "pie", "scatter"],
                    "description": "Type of chart to generate"
                },
                "title": {
                    "type": "string",
                    "description": "Chart title"
                },
                "x_label": {
                    "type": "string",
                    "description": "X-axis label (optional)"
                },
                "y_label": {
                    "type": "string",
                    "description": "Y-axis label (optional)"
                },
                "data": {
                    "type": "object",
                    "description": "Chart data with labels and values",
                    "properties": {
                        "labels": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Data labels (for bar/line/pie)"
                        },
                        "values": {
                            "type": "array",
                            "items": { "type": "number" },
                            "description": "Data values (for single series)"
                        },
                        "x": {
                            "type": "array",
                            "items": { "type": "number" },
                            "description": "X coordinates (for scatter/line)"
                        },
                        "y": {
                            "type": "array",
                            "items": { "type": "number" },
                            "description": "Y coordinates (for scatter/line)"
                        },
                        "series": {
                            "type": "array",
                            "description": "Multiple data series",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": { "type": "string" },
                                    "values": { "type": "array", "items": { "type": "number" } },
                                    "x": { "type": "array", "items": { "type": "number" } },
                                    "y": { "type": "array", "items": { "type": "number" } }
                                }
                            }
                        }
                    }
                }
            },
            "required": ["chart_type", "title", "data"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
        let spec = match ChartSpec::parse(&arguments) {
            Ok(spec) => spec,
            Err(ToolError::InvalidArguments(reason)) => {
                // Malformed chart calls fold back into the turn so the
                // model can correct itself.
                return Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!("Invalid chart request: {reason}"),
                    data: None,
                });
            }
            Err(e) => return Err(e),
        };

        let points = spec.data.point_count();
        match &self.renderer {
            Some(renderer) => match renderer.render(&spec) {
                Ok(rendered) => Ok(ToolResult {
                    call_id: String::new(),
                    success: true,
                    output: format!(
                        "Rendered {} chart \"{}\" with {points} data points",
                        spec.chart_type.as_str(),
                        spec.title
                    ),
                    data: Some(serde_json::json!({
                        "status": "success",
                        "chart_type": spec.chart_type.as_str(),
                        "title": spec.title,
                        "image_png_base64": rendered.png_base64,
                    })),
                }),
                Err(reason) => Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!("Chart rendering failed: {reason}"),
                    data: None,
                }),
            },
            None => Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: format!(
                    "Validated {} chart \"{}\" with {points} data points",
                    spec.chart_type.as_str(),
                    spec.title
                ),
                data: Some(serde_json::json!({
                    "status": "success",
                    "chart_type": spec.chart_type.as_str(),
                    "title": spec.title,
                })),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_args() -> serde_json::Value {
        serde_json::json!({
            "chart_type": "bar",
            "title": "Quarterly Revenue",
            "data": { "labels": ["Q1", "Q2"], "values": [10.0, 12.5] }
        })
    }

    #[test]
    fn parses_valid_bar_chart() {
        let spec = ChartSpec::parse(&bar_args()).unwrap();
        assert_eq!(spec.chart_type, ChartKind::Bar);
        assert_eq!(spec.title, "Quarterly Revenue");
        assert_eq!(spec.data.point_count(), 2);
    }

    #[test]
    fn missing_chart_type_rejected() {
        let args = serde_json::json!({ "title": "T", "data": { "values": [1.0] } });
        let err = ChartSpec::parse(&args).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn unknown_chart_type_rejected() {
        let mut args = bar_args();
        args["chart_type"] = serde_json::json!("histogram");
        assert!(ChartSpec::parse(&args).is_err());
    }

    #[test]
    fn missing_title_rejected() {
        let args = serde_json::json!({
            "chart_type": "bar",
            "data": { "labels": ["a"], "values": [1.0] }
        });
        assert!(ChartSpec::parse(&args).is_err());
    }

    #[test]
    fn blank_title_rejected() {
        let mut args = bar_args();
        args["title"] = serde_json::json!("   ");
        assert!(ChartSpec::parse(&args).is_err());
    }

    #[test]
    fn pie_requires_matching_labels_and_values() {
        let args = serde_json::json!({
            "chart_type": "pie",
            "title": "Share",
            "data": { "labels": ["a", "b", "c"], "values": [1.0, 2.0] }
        });
        assert!(ChartSpec::parse(&args).is_err());
    }

    #[test]
    fn scatter_requires_coordinates() {
        let args = serde_json::json!({
            "chart_type": "scatter",
            "title": "Points",
            "data": { "labels": ["a"], "values": [1.0] }
        });
        assert!(ChartSpec::parse(&args).is_err());

        let ok = serde_json::json!({
            "chart_type": "scatter",
            "title": "Points",
            "data": { "x": [1.0, 2.0], "y": [3.0, 4.0] }
        });
        assert!(ChartSpec::parse(&ok).is_ok());
    }

    #[test]
    fn multi_series_line_accepted() {
        let args = serde_json::json!({
            "chart_type": "line",
            "title": "Trends",
            "data": {
                "labels": ["Jan", "Feb"],
                "series": [
                    { "name": "A", "values": [1.0, 2.0] },
                    { "name": "B", "values": [3.0, 4.0] }
                ]
            }
        });
        let spec = ChartSpec::parse(&args).unwrap();
        assert_eq!(spec.data.series.len(), 2);
        assert_eq!(spec.data.point_count(), 4);
    }

    #[tokio::test]
    async fn tool_reports_invalid_args_as_failed_result() {
        let tool = ChartTool::new();
        let result = tool
            .execute(serde_json::json!({ "chart_type": "bar" }))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Invalid chart request"));
    }

    #[tokio::test]
    async fn tool_validates_without_renderer() {
        let tool = ChartTool::new();
        let result = tool.execute(bar_args()).await.unwrap();
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["status"], "success");
        assert_eq!(data["chart_type"], "bar");
    }

    struct StubRenderer;
    impl ChartRenderer for StubRenderer {
        fn render(&self, _spec: &ChartSpec) -> std::result::Result<RenderedChart, String> {
            Ok(RenderedChart {
                png_base64: "aGVsbG8=".into(),
            })
        }
    }

    #[tokio::test]
    async fn tool_attaches_rendered_image() {
        let tool = ChartTool::with_renderer(Arc::new(StubRenderer));
        let result = tool.execute(bar_args()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap()["image_png_base64"], "aGVsbG8=");
    }

    #[test]
    fn schema_declares_required_fields() {
        let tool = ChartTool::new();
        let schema = tool.parameters_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, vec!["chart_type", "title", "data"]);
    }
}
