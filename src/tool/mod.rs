// ABOUTME: Tool module - defines tools, schemas, the frozen registry,
// ABOUTME: and per-agent toolboxes. Core abstraction for agent capabilities.

mod registry;
mod result;
mod schema;
mod toolbox;
mod traits;

pub use registry::*;
pub use result::*;
pub use schema::*;
pub use toolbox::*;
pub use traits::*;
