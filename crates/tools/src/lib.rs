//! Built-in tool implementations for DocShelf.
//!
//! Tools are local capabilities the backend can invoke mid-turn.
//! Currently there is one: `generate_chart`, which validates chart
//! specs produced by the model and hands them to a renderer.

pub mod chart;

pub use chart::{ChartKind, ChartRenderer, ChartSpec, ChartTool, RenderedChart};

use docshelf_core::tool::ToolRegistry;

/// Create the default tool registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ChartTool::new()));
    registry
}
