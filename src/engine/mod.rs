// ABOUTME: Step engine module - run state, step records, history rendering,
// ABOUTME: prompt templating, and the bounded decide/act loop.

mod context;
mod engine;
mod prompt;
mod state;
mod step;

pub use context::build_history;
pub use engine::*;
pub use prompt::render_system_prompt;
pub use state::*;
pub use step::*;
