use std::{
    path::PathBuf,
    process::{Command, Output, Stdio},
};

use serde::Deserialize;

use super::{require_name, Backend, BackendKind};
use crate::error::{Error, Result};

const NAME: &str = "1password";
const ITEM_PREFIX: &str = "sshelf - ";

/// Secrets kept as 1Password items through the `op` CLI, one item per
/// profile titled `sshelf - <profile>`.
pub struct OnePasswordBackend {
    program: PathBuf,
    leading_args: Vec<String>,
    vault: Option<String>,
}

#[derive(Deserialize)]
struct Field {
    #[serde(default)]
    value: String,
}

impl OnePasswordBackend {
    pub fn new() -> Self {
        Self::with_program("op")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            vault: None,
        }
    }

    /// Runs `program leading_args... <op args>`, e.g. an interpreter and a script.
    pub fn with_command(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            leading_args,
            ..Self::with_program(program)
        }
    }

    pub fn vault(mut self, vault: impl Into<String>) -> Self {
        self.vault = Some(vault.into());
        self
    }

    fn item_title(profile: &str) -> String {
        format!("{ITEM_PREFIX}{profile}")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).stdin(Stdio::null());
        cmd
    }

    fn op(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = self.command();
        cmd.args(args);
        if let Some(vault) = &self.vault {
            cmd.args(["--vault", vault]);
        }
        cmd.output().map_err(|source| Error::Spawn {
            program: self.program.display().to_string(),
            source,
        })
    }

    fn failure(output: &Output) -> Error {
        Error::Backend {
            backend: NAME,
            msg: format!(
                "op exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }

    fn item_exists(&self, title: &str) -> Result<bool> {
        Ok(self.op(&["item", "get", title])?.status.success())
    }
}

impl Default for OnePasswordBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(output: &Output) -> bool {
    [&output.stdout, &output.stderr].into_iter().any(|stream| {
        let text = String::from_utf8_lossy(stream);
        text.contains("isn't in") || text.contains("not found") || text.contains("No item found")
    })
}

impl Backend for OnePasswordBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OnePassword
    }

    fn probe(&self) -> Result<()> {
        let unavailable = |reason: &str| Error::BackendUnavailable {
            backend: NAME,
            reason: reason.to_string(),
        };
        let installed = self
            .command()
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success());
        if !installed {
            return Err(unavailable("op CLI not installed"));
        }
        let accounts = self
            .command()
            .args(["account", "list"])
            .output()
            .map_err(|e| unavailable(&e.to_string()))?;
        if !accounts.status.success() || String::from_utf8_lossy(&accounts.stdout).trim().is_empty()
        {
            return Err(unavailable("not signed in (run: op signin)"));
        }
        Ok(())
    }

    fn set_password(&self, profile: &str, password: &str) -> Result<()> {
        require_name(NAME, profile)?;
        let title = Self::item_title(profile);
        let field = format!("password={password}");

        let output = if self.item_exists(&title)? {
            self.op(&["item", "edit", &title, &field])?
        } else {
            let notes = format!("notesPlain=Connection profile: {profile}\n\nManaged by sshelf");
            self.op(&[
                "item",
                "create",
                "--category",
                "password",
                "--title",
                &title,
                &field,
                &notes,
            ])?
        };
        if !output.status.success() {
            return Err(Self::failure(&output));
        }
        Ok(())
    }

    fn get_password(&self, profile: &str) -> Result<String> {
        require_name(NAME, profile)?;
        let title = Self::item_title(profile);
        let output = self.op(&["item", "get", &title, "--fields", "label=password", "--reveal"])?;
        if !output.status.success() {
            if not_found(&output) {
                return Ok(String::new());
            }
            return Err(Self::failure(&output));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<Field>(&stdout) {
            Ok(field) => Ok(field.value.trim().to_string()),
            Err(_) => Ok(stdout.trim().to_string()),
        }
    }

    fn delete_password(&self, profile: &str) -> Result<()> {
        require_name(NAME, profile)?;
        let output = self.op(&["item", "delete", &Self::item_title(profile)])?;
        if !output.status.success() && !not_found(&output) {
            return Err(Self::failure(&output));
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, path::Path};

    use super::*;

    // A stand-in `op` that knows one item, "sshelf - web".
    const FAKE_OP: &str = r#"#!/bin/sh
case "$1 $2" in
  "--version ") echo 2.30.0 ;;
  "account list") echo "URL EMAIL USER ID"; echo "my.1password.com me@example.com ABC" ;;
  "item get")
    if [ "$3" = "sshelf - web" ]; then echo "s3cret"; exit 0; fi
    echo "[ERROR] \"$3\" isn't an item. Specify the item with its UUID, name, or domain." >&2
    echo "\"$3\" isn't in any vault" >&2
    exit 1 ;;
  *) exit 1 ;;
esac
"#;

    // Run through `sh` so the script never needs to be executable.
    fn install(dir: &Path, script: &str) -> OnePasswordBackend {
        let path = dir.join("op.sh");
        fs::write(&path, script).unwrap();
        OnePasswordBackend::with_command("sh", vec![path.display().to_string()])
    }

    #[test]
    fn signed_in_cli_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let op = install(dir.path(), FAKE_OP);
        op.probe().unwrap();
    }

    #[test]
    fn missing_cli_is_unavailable() {
        let op = OnePasswordBackend::with_program("/nonexistent/sshelf-op");
        assert!(matches!(
            op.probe(),
            Err(Error::BackendUnavailable { backend: "1password", .. })
        ));
    }

    #[test]
    fn signed_out_cli_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let script = "#!/bin/sh\n[ \"$1\" = \"--version\" ] && echo 2.30.0 && exit 0\nexit 0\n";
        let op = install(dir.path(), script);
        let err = op.probe().unwrap_err();
        assert!(err.to_string().contains("not signed in"));
    }

    #[test]
    fn reads_plain_text_value() {
        let dir = tempfile::tempdir().unwrap();
        let op = install(dir.path(), FAKE_OP);
        assert_eq!(op.get_password("web").unwrap(), "s3cret");
    }

    #[test]
    fn unknown_item_is_empty_secret() {
        let dir = tempfile::tempdir().unwrap();
        let op = install(dir.path(), FAKE_OP);
        assert_eq!(op.get_password("db").unwrap(), "");
    }
}
