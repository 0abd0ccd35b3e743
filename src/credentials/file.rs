use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use sha2::{Digest, Sha256};

use super::{require_name, Backend, BackendKind};
use crate::{
    config::write_atomic,
    error::{Error, Result},
};

const PASSWORD_FILE: &str = "passwords.enc";
const KEY_SALT: &[u8] = b"sshelf-password-encryption-salt-v1";
const NONCE_LEN: usize = 12;
const NAME: &str = "file";

/// All secrets in one AES-256-GCM sealed JSON map.
///
/// The key is derived from the home directory path, so the file needs no
/// passphrase and opens only for the same user path. Always available.
pub struct FileBackend {
    path: PathBuf,
    key: Key<Aes256Gcm>,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(path: P, home: &Path) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            key: derive_key(home),
        }
    }

    /// `<config_dir>/passwords.enc`, keyed to the current user's home.
    pub fn for_user(config_dir: &Path) -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))?;
        Ok(Self::new(config_dir.join(PASSWORD_FILE), &home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng); // 96-bits; unique per message
        let cipher = Aes256Gcm::new(&self.key);
        let ciphertext = cipher
            .encrypt(&nonce, data)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        let mut encrypted = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        encrypted.extend_from_slice(&nonce);
        encrypted.extend_from_slice(&ciphertext);
        Ok(encrypted)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto(format!("cannot decrypt {}", self.path.display())))
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        let plaintext = self.decrypt(&data)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn flush(&self, passwords: &HashMap<String, String>) -> Result<()> {
        let data = serde_json::to_vec(passwords)?;
        write_atomic(&self.path, &self.encrypt(&data)?)
    }
}

fn derive_key(home: &Path) -> Key<Aes256Gcm> {
    let mut hasher = Sha256::new();
    hasher.update(home.to_string_lossy().as_bytes());
    hasher.update(KEY_SALT);
    *Key::<Aes256Gcm>::from_slice(hasher.finalize().as_slice())
}

impl Backend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn set_password(&self, profile: &str, password: &str) -> Result<()> {
        require_name(NAME, profile)?;
        let mut passwords = self.load()?;
        passwords.insert(profile.to_string(), password.to_string());
        self.flush(&passwords)
    }

    fn get_password(&self, profile: &str) -> Result<String> {
        require_name(NAME, profile)?;
        Ok(self.load()?.remove(profile).unwrap_or_default())
    }

    fn delete_password(&self, profile: &str) -> Result<()> {
        require_name(NAME, profile)?;
        let mut passwords = self.load()?;
        if passwords.remove(profile).is_some() {
            self.flush(&passwords)?;
        }
        Ok(())
    }
}
