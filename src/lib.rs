//! Waymark: a memory-augmented agentic execution loop.
//!
//! The reusable pieces live in the workspace crates (`agent-core`,
//! `memory-center`, `waymark-core-types`); this crate wires them into a
//! session service, a model-service client and the `waymark` CLI.

pub mod actuation;
pub mod archive;
pub mod cli;
pub mod llm;
pub mod sessions;
pub mod settings;

pub use actuation::DryRunActuator;
pub use archive::{ArchiveEntry, WorkflowArchive};
pub use sessions::{GoalReport, SessionService};
pub use settings::Config;
