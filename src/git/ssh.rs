//! Key-authenticated git invocations.
//!
//! For repositories configured with an SSH private key, remote git commands
//! run through two generated scripts:
//!
//! - a wrapper that points `GIT_SSH_COMMAND` at the key and then execs git
//! - an invocation script that records the host key in `~/.ssh/known_hosts`
//!   and calls the wrapper with the git arguments
//!
//! Both scripts are ephemeral temp files. They are deleted when the
//! [`SshScripts`] value is dropped, which covers success, failure and
//! cancellation alike.

use std::io::Write;
use std::path::Path;

use tempfile::TempPath;

use super::{GitEnvironment, GitError};
use crate::process::CommandSpec;

/// The two generated scripts for one key-authenticated git command.
pub struct SshScripts {
    wrapper: TempPath,
    invocation: TempPath,
}

impl SshScripts {
    /// Writes both scripts for running `git <args>` with `key` against `host`.
    pub fn write(
        env: &GitEnvironment,
        host: &str,
        key: &Path,
        args: &[String],
    ) -> Result<Self, GitError> {
        let wrapper = write_script(&wrapper_script(env))?;
        let invocation = write_script(&invocation_script(env, &wrapper, host, key, args))?;
        Ok(SshScripts {
            wrapper,
            invocation,
        })
    }

    /// The command that runs the invocation script.
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(self.invocation.to_string_lossy(), Vec::<String>::new())
    }

    /// Path of the wrapper script.
    pub fn wrapper_path(&self) -> &Path {
        &self.wrapper
    }

    /// Path of the invocation script.
    pub fn invocation_path(&self) -> &Path {
        &self.invocation
    }
}

/// Writes an executable (0755) temp file and closes it.
fn write_script(content: &str) -> Result<TempPath, GitError> {
    let mut file = tempfile::Builder::new()
        .prefix("gitsync-")
        .suffix(".sh")
        .tempfile()
        .map_err(GitError::Script)?;
    file.write_all(content.as_bytes())
        .map_err(GitError::Script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o755))
            .map_err(GitError::Script)?;
    }

    // Closing the handle before execution avoids ETXTBSY.
    Ok(file.into_temp_path())
}

fn wrapper_script(env: &GitEnvironment) -> String {
    format!(
        r#"#!{shell}
# usage: <wrapper> [-i ssh-key-file] git-arguments...
if [ "$1" = "-i" ]; then
    GIT_SSH_COMMAND="ssh -i '$2' -o IdentitiesOnly=yes"
    export GIT_SSH_COMMAND
    shift 2
fi
[ "$1" = "git" ] && shift
exec {git} "$@"
"#,
        shell = env.shell.display(),
        git = shell_quote(&env.git.to_string_lossy()),
    )
}

fn invocation_script(
    env: &GitEnvironment,
    wrapper: &Path,
    host: &str,
    key: &Path,
    args: &[String],
) -> String {
    let params: Vec<String> = args.iter().map(|a| shell_quote(a)).collect();
    format!(
        r#"#!{shell}
mkdir -p "$HOME/.ssh"
touch "$HOME/.ssh/known_hosts"
ssh-keyscan {host} 2>/dev/null | sort -u - "$HOME/.ssh/known_hosts" > "$HOME/.ssh/known_hosts.gitsync"
mv "$HOME/.ssh/known_hosts.gitsync" "$HOME/.ssh/known_hosts"
{wrapper} -i {key} {params}
"#,
        shell = env.shell.display(),
        host = shell_quote(host),
        wrapper = shell_quote(&wrapper.to_string_lossy()),
        key = shell_quote(&key.to_string_lossy()),
        params = params.join(" "),
    )
}

/// Quotes a string for POSIX `sh`.
///
/// Plain words are left alone; anything else is wrapped in single quotes
/// with embedded single quotes escaped.
pub(crate) fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@%+=,".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
