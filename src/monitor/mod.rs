// ABOUTME: Monitoring feed - a transport-agnostic session layer over the
// ABOUTME: dispatcher and observability bus for external clients.

mod protocol;
mod session;

pub use protocol::*;
pub use session::*;

#[cfg(test)]
mod monitor_test;
