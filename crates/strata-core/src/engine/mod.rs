//! The execution engine: stratification, command queue, dependency
//! resolution, task routing, decision gates, and the controlled executor.

pub mod dag;
pub mod decision;
pub mod deps;
pub mod executor;
pub mod queue;
pub mod router;
