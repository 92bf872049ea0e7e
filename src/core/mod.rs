//! Core batch logic: configuration, planning, gating, fan-out, orchestration.

pub mod artifacts;
pub mod error;
pub mod executor;
pub mod gate;
pub mod hasher;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod runlog;
pub mod template;
pub mod types;
