use keyring::Entry;

use super::{require_name, Backend, BackendKind};
use crate::error::{Error, Result};

const SERVICE_NAME: &str = "sshelf";
const PROBE_ACCOUNT: &str = "__sshelf_probe__";
const NAME: &str = "keyring";

/// The platform secret store: macOS Keychain, Secret Service, Windows
/// Credential Manager.
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, profile: &str) -> Result<Entry> {
        Ok(Entry::new(&self.service, &format!("{profile}:password"))?)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for KeyringBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Keyring
    }

    // Opening an entry succeeds even without a reachable secret service,
    // so availability is a throwaway write and delete.
    fn probe(&self) -> Result<()> {
        let unavailable = |e: keyring::Error| Error::BackendUnavailable {
            backend: NAME,
            reason: e.to_string(),
        };
        let entry = Entry::new(&self.service, PROBE_ACCOUNT).map_err(unavailable)?;
        entry.set_password("probe").map_err(unavailable)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn set_password(&self, profile: &str, password: &str) -> Result<()> {
        require_name(NAME, profile)?;
        Ok(self.entry(profile)?.set_password(password)?)
    }

    fn get_password(&self, profile: &str) -> Result<String> {
        require_name(NAME, profile)?;
        match self.entry(profile)?.get_password() {
            Ok(secret) => Ok(secret),
            Err(keyring::Error::NoEntry) => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_password(&self, profile: &str) -> Result<()> {
        require_name(NAME, profile)?;
        match self.entry(profile)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
