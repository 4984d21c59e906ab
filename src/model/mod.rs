// ABOUTME: Model module - the decision backend seam, chat client abstraction,
// ABOUTME: OpenAI-compatible provider, and retry policy.

mod backend;
mod client;
mod openai;
mod retry;
mod types;

pub use backend::*;
pub use client::*;
pub use openai::*;
pub use retry::*;
pub use types::*;
