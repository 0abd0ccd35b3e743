use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    credentials::BackendKind,
    error::{Error, Result},
    inherit,
    profile::Profile,
};

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
const CONFIG_FILE: &str = "config.yaml";

/// The persisted profile store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<BackendKind>,
}

/// `$XDG_CONFIG_HOME/sshelf`, or `~/.config/sshelf`.
pub fn config_dir() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))?
            .join(".config"),
    };
    Ok(base.join(CRATE_NAME))
}

pub fn default_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

impl Config {
    /// Reads the store; a missing file is an empty store.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = match fs::read_to_string(path.as_ref()) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        write_atomic(path.as_ref(), data.as_bytes())
    }

    pub fn upsert_profile(&mut self, profile: Profile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn delete_profile(&mut self, name: &str) -> bool {
        self.profiles.remove(name).is_some()
    }

    /// The profile as stored, `extends` untouched.
    pub fn raw_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// The effective profile with its inheritance chain flattened.
    pub fn get_profile(&self, name: &str) -> Result<Profile> {
        inherit::resolve(&self.profiles, name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    /// Stored profiles ordered by group, then name.
    pub fn list_profiles(&self) -> Vec<&Profile> {
        let mut list: Vec<_> = self.profiles.values().collect();
        list.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));
        list
    }

    /// Bumps usage statistics on the stored profile.
    pub fn record_use(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let profile = self
            .profiles
            .get_mut(name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;
        profile.last_used = Some(now);
        profile.use_count += 1;
        Ok(())
    }
}

/// Writes `<path>.tmp` and renames it over `path`, so readers never see a
/// partial file. Concurrent writers still race: the last rename wins.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_private_dir(dir)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
