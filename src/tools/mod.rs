//! 动作层：Tool trait 与注册表、动作目录、内置动作、执行器

pub mod artifacts;
pub mod catalog;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod todos;

pub use catalog::{ActionCatalog, ActionDescriptor, ActionKind, BuiltinAction, DISPATCH_ACTION};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
