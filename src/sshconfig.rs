use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context;
use ssh2_config::{ParseRule, SshConfig};

use crate::profile::{Profile, Protocol};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub group: String,
    pub prefix: String,
}

/// Parses an OpenSSH client config, `~/.ssh/config` when `path` is `None`.
pub fn read_ssh_config(path: Option<&Path>) -> anyhow::Result<SshConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => dirs::home_dir()
            .context("home directory not found")?
            .join(".ssh")
            .join("config"),
    };
    let file = File::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
    let config = SshConfig::default()
        .parse(&mut BufReader::new(file), ParseRule::ALLOW_UNKNOWN_FIELDS)
        .with_context(|| format!("cannot parse {}", path.display()))?;
    Ok(config)
}

/// One ssh profile per concrete host alias. Wildcard and negated patterns
/// only carry defaults for other hosts and are skipped.
pub fn import_profiles(config: &SshConfig, options: &ImportOptions) -> Vec<Profile> {
    let mut profiles = Vec::new();
    for host in config.get_hosts() {
        for clause in host.pattern.iter() {
            let alias = clause.pattern.as_str();
            if clause.negated || alias.contains(['*', '?', ' ']) {
                continue;
            }

            let params = config.query(alias);
            let mut profile = Profile::new(
                format!("{}{}", options.prefix, alias),
                Protocol::Ssh,
                params.host_name.clone().unwrap_or_else(|| alias.to_string()),
            );
            profile.port = params.port.unwrap_or(0);
            profile.username = params.user.clone().unwrap_or_default();
            if let Some(identity) = params.identity_file.as_ref().and_then(|files| files.first()) {
                profile.identity_file = expand_tilde(identity).display().to_string();
            }
            profile.group = options.group.clone();
            profile.description = "imported from ssh config".to_string();
            profiles.push(profile);
        }
    }
    profiles
}

fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Host web
    HostName web.example.com
    User deploy
    Port 2222
    IdentityFile /keys/web

Host db db-replica
    HostName 10.0.0.5

Host *.internal !skip
    User ops
";

    fn parse(text: &str) -> SshConfig {
        SshConfig::default()
            .parse(&mut text.as_bytes(), ParseRule::ALLOW_UNKNOWN_FIELDS)
            .unwrap()
    }

    #[test]
    fn imports_concrete_aliases_only() {
        let options = ImportOptions {
            group: "imported".into(),
            prefix: "ssh-".into(),
        };
        let mut profiles = import_profiles(&parse(SAMPLE), &options);
        profiles.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["ssh-db", "ssh-db-replica", "ssh-web"]);

        let web = &profiles[2];
        assert_eq!(web.host, "web.example.com");
        assert_eq!(web.username, "deploy");
        assert_eq!(web.port, 2222);
        assert_eq!(web.identity_file, "/keys/web");
        assert_eq!(web.group, "imported");
        assert_eq!(web.protocol, Some(Protocol::Ssh.into()));

        let db = &profiles[0];
        assert_eq!(db.host, "10.0.0.5");
        assert_eq!(db.port, 0);
        assert!(db.username.is_empty());
    }

    #[test]
    fn tilde_is_expanded() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.ssh/id")), home.join(".ssh/id"));
        }
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
