//! Tool surface for the agent loop: the [`Tool`] trait, closure-backed
//! function tools, toolkits with shared instructions, and the registry
//! that executes calls with a timeout off the event loop.

pub mod function;
pub mod registry;
pub mod toolkit;

pub use function::{FunctionTool, Tool};
pub use registry::{ToolRegistry, TOOL_TIMEOUT};
pub use toolkit::Toolkit;
