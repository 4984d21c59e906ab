// ABOUTME: Root module for canopy - orchestration core for trees of
// ABOUTME: tool-using agents. Re-exports the public surface of each subsystem.

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod model;
pub mod monitor;
pub mod prelude;
pub mod sandbox;
pub mod tool;
pub mod tools;

pub use error::CanopyError;
