// ABOUTME: Dispatch module - agent specs, the dispatcher that owns the run
// ABOUTME: tree, and the proxy tool that turns agent calls into nested runs.

mod dispatcher;
mod proxy;
mod spec;

pub use dispatcher::*;
pub use proxy::*;
pub use spec::*;
