//! Core domain types shared across the synchronizer, scheduler and webhook layers.

pub mod ids;

pub use ids::{BranchSpec, RepoId, Sha};
