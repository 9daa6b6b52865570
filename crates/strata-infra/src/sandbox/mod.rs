//! Process-isolated sandbox supervisor.
//!
//! Code snippets execute in a worker subprocess (a Deno runtime started
//! with its deny-all default permission set), so the snippet has no
//! filesystem or network access beyond the tool-call surface the
//! supervisor bridges over stdio.

pub mod protocol;
pub mod worker;

pub use worker::ProcessSandbox;
