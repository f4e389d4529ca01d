pub mod invocation;
pub mod models;
pub mod parser;

pub use models::ToolConfig;
pub use parser::{parse_line, ToolEvent};
