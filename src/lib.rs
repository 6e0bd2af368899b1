//! gitsync - keeps local working copies of git repositories in sync with their remotes.
//!
//! Repositories are refreshed by periodic polling or by webhooks from the
//! hosting provider, optionally followed by post-sync commands. Each
//! repository can expose its sync status over HTTP and websockets.

pub mod config;
pub mod effects;
pub mod git;
pub mod process;
pub mod repo;
pub mod scheduler;
pub mod server;
pub mod status;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod test_utils;
