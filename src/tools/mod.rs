//! Tool layer: declarations, dispatch, result caching and the built-in
//! content tools.

pub mod builtin;
pub mod cache;
pub mod errors;
pub mod executor;
pub mod registry;
pub mod types;

pub use builtin::{register_builtin_tools, register_handler};
pub use cache::ResultCache;
pub use errors::ToolError;
pub use executor::{ToolExecutor, ToolHandler};
pub use registry::ToolRegistry;
pub use types::{ParamType, Tool, ToolExecutionResult, ToolParameter};
