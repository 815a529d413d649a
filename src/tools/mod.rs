pub mod handler;
pub mod registry;

pub use handler::{handler_fn, FnHandler, ToolContext, ToolDefinition, ToolFlags, ToolHandler, ToolSupplier};
pub use registry::ToolRegistry;
