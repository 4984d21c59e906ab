// ABOUTME: Sandbox module - isolated, resource-bounded code execution with
// ABOUTME: import/attribute restrictions, exposed to agents as a tool.

mod executor;
mod policy;
mod tool;

pub use executor::*;
pub use policy::*;
pub use tool::*;

#[cfg(test)]
mod executor_test;
