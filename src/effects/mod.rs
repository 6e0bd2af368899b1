//! Effects-as-data for git operations.
//!
//! The synchronizer describes what it wants git to do as [`GitEffect`] values
//! and hands them to a [`GitInterpreter`]. This enables:
//! - A state machine that can be tested against a scripted interpreter
//! - Logging of intended operations before they run
//! - Credential handling confined to the interpreter

pub mod git;
pub mod interpreter;

pub use git::{GitEffect, GitResponse};
pub use interpreter::GitInterpreter;
