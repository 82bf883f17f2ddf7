// src/graph/mod.rs

//! The task graph: nodes, statuses, and construction from a request.

pub mod build;
pub mod node;
pub mod relation;
pub mod status;

pub use build::{BuiltGraph, build_from_request};
pub use node::{NodeSpec, TaskNode};
pub use relation::RelationGraph;
pub use status::{NodeStatus, SkipReason};
