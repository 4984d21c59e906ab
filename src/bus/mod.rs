// ABOUTME: Observability bus module - run events and their broadcaster.
// ABOUTME: Purely observational; nothing read from the bus feeds back into runs.

mod broadcaster;
mod event;

pub use broadcaster::*;
pub use event::*;
