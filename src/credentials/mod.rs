//! Secret storage backends and the selection of the active one.

mod file;
mod keychain;
mod onepassword;

use std::{
    fmt,
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use self::file::FileBackend;
pub use self::keychain::KeyringBackend;
pub use self::onepassword::OnePasswordBackend;

/// Environment variable that forces a backend, overriding the config file.
pub const BACKEND_ENV: &str = "SSHELF_CREDENTIALS_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "1password")]
    OnePassword,
    #[serde(rename = "keyring")]
    Keyring,
    #[serde(rename = "file")]
    File,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Auto,
        BackendKind::OnePassword,
        BackendKind::Keyring,
        BackendKind::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Auto => "auto",
            BackendKind::OnePassword => "1password",
            BackendKind::Keyring => "keyring",
            BackendKind::File => "file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BackendKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidBackend(s.to_string()))
    }
}

/// A secret store keyed by profile name.
///
/// `get_password` returns an empty string when nothing is stored; errors
/// are reserved for a store that cannot be reached.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// `Ok` when the store can be used right now, otherwise the reason.
    fn probe(&self) -> Result<()>;

    fn set_password(&self, profile: &str, password: &str) -> Result<()>;
    fn get_password(&self, profile: &str) -> Result<String>;
    fn delete_password(&self, profile: &str) -> Result<()>;
}

pub(crate) fn require_name(backend: &'static str, profile: &str) -> Result<()> {
    if profile.is_empty() {
        return Err(Error::Backend {
            backend,
            msg: "profile name required".into(),
        });
    }
    Ok(())
}

/// The concrete stores the resolver chooses from.
#[derive(Clone)]
pub struct Backends {
    pub password_manager: Arc<dyn Backend>,
    pub os_store: Arc<dyn Backend>,
    pub file: Arc<dyn Backend>,
}

impl Backends {
    /// The real 1Password CLI, OS keyring and encrypted file under `config_dir`.
    pub fn system(config_dir: &Path) -> Result<Self> {
        Ok(Self {
            password_manager: Arc::new(OnePasswordBackend::new()),
            os_store: Arc::new(KeyringBackend::new()),
            file: Arc::new(FileBackend::for_user(config_dir)?),
        })
    }

    fn get(&self, kind: BackendKind) -> Option<&Arc<dyn Backend>> {
        match kind {
            BackendKind::Auto => None,
            BackendKind::OnePassword => Some(&self.password_manager),
            BackendKind::Keyring => Some(&self.os_store),
            BackendKind::File => Some(&self.file),
        }
    }
}

struct Selection {
    forced: Option<BackendKind>,
    configured: Option<BackendKind>,
    active: Option<Arc<dyn Backend>>,
}

/// Picks the active backend once and caches it until the selection changes.
///
/// Priority: forced (environment) > configured default > auto-detection.
/// A forced or configured backend that is unavailable is an error; only
/// auto mode falls back, ending at the always-available file store.
pub struct CredentialResolver {
    backends: Backends,
    selection: Mutex<Selection>,
}

impl CredentialResolver {
    pub fn new(
        backends: Backends,
        forced: Option<BackendKind>,
        configured: Option<BackendKind>,
    ) -> Self {
        Self {
            backends,
            selection: Mutex::new(Selection {
                forced,
                configured,
                active: None,
            }),
        }
    }

    /// Like [`CredentialResolver::new`], with the forced backend read from
    /// [`BACKEND_ENV`].
    pub fn from_env(backends: Backends, configured: Option<BackendKind>) -> Result<Self> {
        let forced = match std::env::var(BACKEND_ENV) {
            Ok(value) if !value.trim().is_empty() => Some(value.parse()?),
            _ => None,
        };
        Ok(Self::new(backends, forced, configured))
    }

    pub fn forced(&self) -> Option<BackendKind> {
        self.lock().forced
    }

    pub fn configured(&self) -> Option<BackendKind> {
        self.lock().configured
    }

    /// The active backend, resolving it on first use.
    pub fn active(&self) -> Result<Arc<dyn Backend>> {
        let mut selection = self.lock();
        if let Some(active) = &selection.active {
            return Ok(active.clone());
        }
        let active = self.select(selection.forced, selection.configured)?;
        tracing::debug!(backend = %active.kind(), "credential backend selected");
        selection.active = Some(active.clone());
        Ok(active)
    }

    /// Changes the configured default and drops the cached backend.
    pub fn set_configured(&self, kind: Option<BackendKind>) {
        let mut selection = self.lock();
        selection.configured = kind;
        selection.active = None;
    }

    pub fn set_forced(&self, kind: Option<BackendKind>) {
        let mut selection = self.lock();
        selection.forced = kind;
        selection.active = None;
    }

    pub fn reset(&self) {
        self.lock().active = None;
    }

    /// Probes every concrete backend, leaving the cache alone.
    pub fn availability(&self) -> Vec<(BackendKind, Result<()>)> {
        [
            &self.backends.password_manager,
            &self.backends.os_store,
            &self.backends.file,
        ]
        .into_iter()
        .map(|b| (b.kind(), b.probe()))
        .collect()
    }

    pub fn get_password(&self, profile: &str) -> Result<String> {
        self.active()?.get_password(profile)
    }

    pub fn set_password(&self, profile: &str, password: &str) -> Result<()> {
        self.active()?.set_password(profile, password)
    }

    pub fn delete_password(&self, profile: &str) -> Result<()> {
        self.active()?.delete_password(profile)
    }

    fn select(
        &self,
        forced: Option<BackendKind>,
        configured: Option<BackendKind>,
    ) -> Result<Arc<dyn Backend>> {
        let (kind, origin) = match (forced, configured) {
            (Some(kind), _) => (kind, BACKEND_ENV),
            (None, Some(kind)) => (kind, "config default"),
            (None, None) => (BackendKind::Auto, "auto"),
        };

        let Some(backend) = self.backends.get(kind) else {
            return Ok(self.detect());
        };

        match backend.probe() {
            Ok(()) => Ok(backend.clone()),
            Err(Error::BackendUnavailable { backend, reason }) => Err(Error::BackendUnavailable {
                backend,
                reason: format!("{reason} (selected by {origin})"),
            }),
            Err(e) => Err(Error::BackendUnavailable {
                backend: kind.as_str(),
                reason: format!("{e} (selected by {origin})"),
            }),
        }
    }

    fn detect(&self) -> Arc<dyn Backend> {
        for backend in [&self.backends.password_manager, &self.backends.os_store] {
            match backend.probe() {
                Ok(()) => return backend.clone(),
                Err(e) => tracing::debug!(backend = %backend.kind(), error = %e, "skipping backend"),
            }
        }
        self.backends.file.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Selection> {
        // A poisoned selection is still a valid selection.
        self.selection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::*;

    /// In-memory backend with a switchable availability and a probe counter.
    pub struct FakeBackend {
        kind: BackendKind,
        available: bool,
        pub probes: AtomicUsize,
        secrets: Mutex<HashMap<String, String>>,
    }

    impl FakeBackend {
        pub fn new(kind: BackendKind, available: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                available,
                probes: AtomicUsize::new(0),
                secrets: Mutex::new(HashMap::new()),
            })
        }

        pub fn probe_count(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    impl Backend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn probe(&self) -> Result<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.available {
                Ok(())
            } else {
                Err(Error::BackendUnavailable {
                    backend: self.kind.as_str(),
                    reason: "offline".into(),
                })
            }
        }

        fn set_password(&self, profile: &str, password: &str) -> Result<()> {
            self.secrets
                .lock()
                .unwrap()
                .insert(profile.to_string(), password.to_string());
            Ok(())
        }

        fn get_password(&self, profile: &str) -> Result<String> {
            Ok(self
                .secrets
                .lock()
                .unwrap()
                .get(profile)
                .cloned()
                .unwrap_or_default())
        }

        fn delete_password(&self, profile: &str) -> Result<()> {
            self.secrets.lock().unwrap().remove(profile);
            Ok(())
        }
    }

    pub fn backends(pm: bool, os: bool) -> (Backends, [Arc<FakeBackend>; 3]) {
        let pm = FakeBackend::new(BackendKind::OnePassword, pm);
        let os = FakeBackend::new(BackendKind::Keyring, os);
        let file = FakeBackend::new(BackendKind::File, true);
        (
            Backends {
                password_manager: pm.clone(),
                os_store: os.clone(),
                file: file.clone(),
            },
            [pm, os, file],
        )
    }
}
