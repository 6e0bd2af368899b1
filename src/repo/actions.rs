//! Post-sync actions.
//!
//! After a sync that changed the checked-out commit, every configured action
//! runs once, in order. A failing action never stops the ones after it; all
//! failures are collected into one [`ActionsError`].

use std::path::Path;

use thiserror::Error;
use tracing::{error, info};

use crate::config::ActionConfig;
use crate::process::{self, BackgroundCommand, CommandSpec, ProcessError, RestartPolicy};

/// One or more post-sync actions failed.
///
/// Displays as the individual error messages joined by newlines.
#[derive(Debug, Error)]
#[error("{}", join_messages(.failures))]
pub struct ActionsError {
    /// Every failure, in action order.
    pub failures: Vec<ProcessError>,
}

fn join_messages(failures: &[ProcessError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A command executed after a content-changing sync.
pub enum PostSyncAction {
    /// Run to completion.
    Foreground(CommandSpec),
    /// Start under supervision and return immediately.
    Background(BackgroundCommand),
}

impl PostSyncAction {
    /// Builds an action from its configuration with the default restart
    /// policy.
    pub fn from_config(config: &ActionConfig) -> Self {
        Self::from_config_with_policy(config, RestartPolicy::DEFAULT)
    }

    pub fn from_config_with_policy(config: &ActionConfig, policy: RestartPolicy) -> Self {
        let spec = CommandSpec::new(config.command.clone(), config.args.clone());
        if config.background {
            PostSyncAction::Background(BackgroundCommand::with_policy(spec, policy))
        } else {
            PostSyncAction::Foreground(spec)
        }
    }

    /// The command this action runs.
    pub fn spec(&self) -> &CommandSpec {
        match self {
            PostSyncAction::Foreground(spec) => spec,
            PostSyncAction::Background(cmd) => cmd.spec(),
        }
    }

    /// Executes the action in `dir`.
    pub async fn exec(&self, dir: &Path) -> Result<(), ProcessError> {
        match self {
            PostSyncAction::Foreground(spec) => process::run(spec, Some(dir)).await,
            PostSyncAction::Background(cmd) => cmd.exec(Some(dir.to_path_buf())).await,
        }
    }

    /// Halts a background action. Foreground actions have nothing to halt.
    pub async fn halt(&self) {
        if let PostSyncAction::Background(cmd) = self {
            cmd.halt().await;
        }
    }
}

/// Runs every action once, in order, and aggregates the failures.
pub async fn run_actions(actions: &[PostSyncAction], dir: &Path) -> Result<(), ActionsError> {
    let mut failures = Vec::new();
    for action in actions {
        match action.exec(dir).await {
            Ok(()) => info!("Command '{}' successful.", action.spec()),
            Err(e) => {
                error!(error = %e, "Command '{}' failed", action.spec());
                failures.push(e);
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ActionsError { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn shell_action(script: &str) -> PostSyncAction {
        PostSyncAction::from_config(&ActionConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            background: false,
        })
    }

    #[tokio::test]
    async fn all_actions_run_even_after_failures() {
        let dir = tempdir().unwrap();
        let actions = vec![
            shell_action("echo 1 >> ran; exit 1"),
            shell_action("echo 2 >> ran"),
            shell_action("echo 3 >> ran; exit 2"),
        ];

        let err = run_actions(&actions, dir.path()).await.unwrap_err();

        let ran = std::fs::read_to_string(dir.path().join("ran")).unwrap();
        assert_eq!(ran, "1\n2\n3\n");
        assert_eq!(err.failures.len(), 2);
        let message = err.to_string();
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("exit 1"));
        assert!(lines[1].contains("exit 2"));
    }

    #[tokio::test]
    async fn no_actions_is_success() {
        let dir = tempdir().unwrap();
        run_actions(&[], dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn background_action_returns_once_started() {
        let dir = tempdir().unwrap();
        let action = PostSyncAction::from_config(&ActionConfig {
            command: "sleep".into(),
            args: vec!["30".into()],
            background: true,
        });

        run_actions(std::slice::from_ref(&action), dir.path())
            .await
            .unwrap();
        match &action {
            PostSyncAction::Background(cmd) => assert!(cmd.is_running().await),
            PostSyncAction::Foreground(_) => panic!("expected a background action"),
        }
        action.halt().await;
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn aggregate_fails_iff_any_action_fails(outcomes in prop::collection::vec(any::<bool>(), 0..6)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let dir = tempdir().unwrap();
            let actions: Vec<PostSyncAction> = outcomes
                .iter()
                .map(|ok| shell_action(if *ok { "echo x >> ran" } else { "echo x >> ran; exit 1" }))
                .collect();

            let result = runtime.block_on(run_actions(&actions, dir.path()));

            let failing = outcomes.iter().filter(|ok| !**ok).count();
            let ran = std::fs::read_to_string(dir.path().join("ran")).unwrap_or_default();
            prop_assert_eq!(ran.lines().count(), outcomes.len());
            match result {
                Ok(()) => prop_assert_eq!(failing, 0),
                Err(e) => prop_assert_eq!(e.failures.len(), failing),
            }
        }
    }
}
