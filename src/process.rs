//! Launching delegated tools attached to the current terminal.

use std::{
    env,
    ffi::OsString,
    future::Future,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use tokio::process::Command;

use crate::error::{Error, Result};

/// A fully assembled external command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Launch {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment on top of the inherited one. Values may be secret
    /// and are never logged.
    pub env: Vec<(String, String)>,
    /// Messages for the user before the tool starts.
    pub notices: Vec<String>,
    /// Explanations for specific non-zero exit codes.
    pub exit_hints: Vec<(i32, String)>,
}

impl Launch {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn hint_for(&self, code: i32) -> Option<&str> {
        self.exit_hints
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, hint)| hint.as_str())
    }

    /// The command line for display, with every env value masked.
    pub fn display(&self) -> String {
        let env = self.env.iter().map(|(k, _)| format!("{k}=***"));
        let words = std::iter::once(self.program.clone()).chain(self.args.iter().cloned());
        env.chain(words).collect::<Vec<_>>().join(" ")
    }
}

/// Finds helper executables.
pub trait ToolLocator {
    fn find(&self, name: &str) -> Option<PathBuf>;
}

/// Looks tools up on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPath;

impl ToolLocator for SystemPath {
    fn find(&self, name: &str) -> Option<PathBuf> {
        let paths = env::var_os("PATH")?;
        find_in(&paths, name)
    }
}

fn find_in(paths: &OsString, name: &str) -> Option<PathBuf> {
    env::split_paths(paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Runs `launch` with the terminal's stdin, stdout and stderr and waits for
/// it to exit.
///
/// When `cancel` completes first the child is killed and
/// [`Error::Cancelled`] is returned. A non-zero exit is [`Error::Exited`]
/// carrying the tool's own code.
pub async fn run_attached<F>(launch: &Launch, cancel: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tracing::debug!(program = %launch.program, args = launch.args.len(), "launching");

    let mut child = Command::new(&launch.program)
        .args(&launch.args)
        .envs(launch.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            program: launch.program.clone(),
            source,
        })?;

    tokio::select! {
        status = child.wait() => check_status(&launch.program, status?),
        _ = cancel => {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "child already gone");
            }
            Err(Error::Cancelled)
        }
    }
}

fn check_status(program: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(Error::Exited {
            program: program.to_string(),
            code,
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(Error::Signaled {
                program: program.to_string(),
                signal,
            });
        }
    }
    Err(Error::Exited {
        program: program.to_string(),
        code: 1,
    })
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use super::*;

    fn sh(script: &str) -> Launch {
        let mut launch = Launch::new("sh");
        launch.args(["-c", script]);
        launch
    }

    #[tokio::test]
    async fn success_is_ok() {
        run_attached(&sh("exit 0"), pending()).await.unwrap();
    }

    #[tokio::test]
    async fn exit_code_is_preserved() {
        let err = run_attached(&sh("exit 7"), pending()).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(7));
    }

    #[tokio::test]
    async fn env_reaches_the_child() {
        let mut launch = sh("test \"$SSHELF_PROBE\" = yes");
        launch.env("SSHELF_PROBE", "yes");
        run_attached(&launch, pending()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let launch = Launch::new("sshelf-definitely-not-installed");
        assert!(matches!(
            run_attached(&launch, pending()).await,
            Err(Error::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_is_distinguished() {
        let err = run_attached(&sh("sleep 10"), async {}).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn display_masks_env_values() {
        let mut launch = Launch::new("sshpass");
        launch.env("SSHPASS", "hunter2").args(["-e", "ssh", "host"]);
        assert_eq!(launch.display(), "SSHPASS=*** sshpass -e ssh host");
    }

    #[cfg(unix)]
    #[test]
    fn finds_only_executables_on_path() {
        use std::{fs, os::unix::fs::PermissionsExt};

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("sshpass");
        fs::write(&tool, "").unwrap();
        let paths = env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_in(&paths, "sshpass"), None);

        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_in(&paths, "sshpass"), Some(tool));
    }
}
