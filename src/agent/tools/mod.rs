pub mod base;
pub mod clock;
pub mod invoker;
pub mod mcp;
pub mod message;
pub mod registry;
pub mod remember;
pub mod setup;
pub mod shell;

pub use base::{CallContext, ContextField, ExecutionContext, Tool, ToolResponse, ToolResult, ToolStatus};
pub use invoker::ToolInvoker;
pub use registry::{RegisteredTool, ToolRegistry};
pub use setup::{ToolBuildContext, register_builtin_tools};
