//! Shared domain types for Strata.
//!
//! This crate contains the core domain types used across the Strata engine:
//! the task DAG wire format, task results and workflow state, decision
//! commands, execution events, permission policy, sandbox types, and the
//! executor configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod command;
pub mod config;
pub mod dag;
pub mod event;
pub mod permission;
pub mod sandbox;
pub mod state;
