use std::{
    collections::HashMap,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::Utc;
use tokio::net::TcpStream;

use crate::{
    config::{self, Config},
    connectors::{self, ConnectorRegistry},
    credentials::{BackendKind, Backends, CredentialResolver},
    error::Error,
    inherit,
    process::{run_attached, Launch, SystemPath, ToolLocator},
    profile::Profile,
    select_box::{PickerEntry, SelectBox},
    terminal::Terminal,
};

/// What an ssh config import did, or would do on a dry run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportSummary {
    pub added: Vec<String>,
    pub replaced: Vec<String>,
    pub skipped: Vec<String>,
}

/// Outcome counts of a reachability check.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Field overrides for `edit` and `clone`; `None` leaves a field alone.
#[derive(Debug, Default, Clone)]
pub struct ProfileEdit {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub identity_file: Option<String>,
    pub proxy_jump: Option<String>,
    pub group: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl ProfileEdit {
    fn apply(self, profile: &mut Profile) {
        if let Some(host) = self.host {
            profile.host = host;
        }
        if let Some(port) = self.port {
            profile.port = port;
        }
        if let Some(username) = self.username {
            profile.username = username;
        }
        if let Some(identity_file) = self.identity_file {
            profile.identity_file = identity_file;
        }
        if let Some(proxy_jump) = self.proxy_jump {
            profile.proxy_jump = proxy_jump;
        }
        if let Some(group) = self.group {
            profile.group = group;
        }
        if let Some(description) = self.description {
            profile.description = description;
        }
        if let Some(tags) = self.tags {
            profile.tags = tags;
        }
    }
}

/// Ties the profile store, credential resolver and connector registry
/// together for one invocation.
pub struct App {
    config_path: PathBuf,
    config: Config,
    credentials: CredentialResolver,
    connectors: ConnectorRegistry,
}

impl App {
    pub fn new(
        config_path: PathBuf,
        config: Config,
        credentials: CredentialResolver,
        connectors: ConnectorRegistry,
    ) -> Self {
        App {
            config_path,
            config,
            credentials,
            connectors,
        }
    }

    /// Loads the store at `config_path` (the default location when `None`)
    /// with the system credential backends. The encrypted secrets file
    /// lives next to the store.
    pub fn open(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => config::default_path()?,
        };
        let config = Config::load(&config_path)
            .with_context(|| format!("cannot load {}", config_path.display()))?;
        let dir = match config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let credentials =
            CredentialResolver::from_env(Backends::system(&dir)?, config.default_backend)?;
        Ok(Self::new(
            config_path,
            config,
            credentials,
            ConnectorRegistry::new(),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn save(&self) -> anyhow::Result<()> {
        self.config
            .save(&self.config_path)
            .with_context(|| format!("cannot save {}", self.config_path.display()))
    }

    fn require(&self, name: &str) -> Result<&Profile, Error> {
        self.config
            .raw_profile(name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    /// Interactive picker, then a connection to the chosen profile.
    pub fn run(&mut self) -> anyhow::Result<()> {
        if let Some(name) = self.select()? {
            self.connect(&name, false)?;
        }
        Ok(())
    }

    fn select(&self) -> anyhow::Result<Option<String>> {
        let entries: Vec<_> = self
            .profiles(None)
            .iter()
            .map(PickerEntry::from_profile)
            .collect();
        if entries.is_empty() {
            eprintln!("No profiles yet. Add one with `sshelf add` or `sshelf import-ssh`.");
            return Ok(None);
        }

        // The terminal is restored when it drops, before any tool starts.
        let mut terminal = Terminal::new()?;
        let selected = SelectBox::new(entries).select(&mut terminal)?;
        Ok(selected)
    }

    /// Resolves a profile and its stored secret into the command to run.
    ///
    /// A secret that cannot be read only costs the automatic login: the
    /// tool falls back to its own prompt.
    pub fn prepare(
        &self,
        name: &str,
        no_forward: bool,
        tools: &dyn ToolLocator,
    ) -> anyhow::Result<(Profile, Launch)> {
        let mut profile = self.config.get_profile(name)?;
        if no_forward {
            profile.clear_forwards();
        }

        let secret = self.secret_for(name);
        let launch = self.connectors.command(&profile, &secret, tools)?;
        Ok((profile, launch))
    }

    fn secret_for(&self, name: &str) -> String {
        match self.credentials.get_password(name) {
            Ok(secret) => secret,
            Err(e) => {
                tracing::warn!(profile = name, error = %e, "could not read stored password");
                eprintln!("warning: could not read stored password: {e}");
                String::new()
            }
        }
    }

    /// Connects to `name` and waits for the tool to exit.
    pub fn connect(&mut self, name: &str, no_forward: bool) -> anyhow::Result<()> {
        let (profile, launch) = self.prepare(name, no_forward, &SystemPath)?;
        tracing::info!(profile = %profile.name, command = %launch.display(), "connecting");
        launch_attached(&launch)?;
        self.record_use(name);
        Ok(())
    }

    /// The ssh command that runs `command` once on the host of `name`.
    pub fn prepare_exec(
        &self,
        name: &str,
        command: &[String],
        tty: bool,
        tools: &dyn ToolLocator,
    ) -> anyhow::Result<Launch> {
        let profile = self.config.get_profile(name)?;
        let secret = self.secret_for(name);
        Ok(connectors::remote_exec(&profile, command, tty, &secret, tools)?)
    }

    /// Runs `command` on the host of `name` instead of a login shell.
    pub fn exec(&self, name: &str, command: &[String], tty: bool) -> anyhow::Result<()> {
        let launch = self.prepare_exec(name, command, tty, &SystemPath)?;
        tracing::info!(profile = name, command = %launch.display(), "running");
        launch_attached(&launch)
    }

    // Another invocation may have saved since this one loaded, so the
    // store is re-read right before the update.
    fn record_use(&mut self, name: &str) {
        let result = Config::load(&self.config_path).and_then(|mut fresh| {
            fresh.record_use(name, Utc::now())?;
            fresh.save(&self.config_path)?;
            Ok(fresh)
        });
        match result {
            Ok(fresh) => self.config = fresh,
            Err(e) => tracing::warn!(profile = name, error = %e, "failed to record usage"),
        }
    }

    /// Effective profiles ordered by group and name, optionally restricted
    /// to one group. Groups inherited from a template count.
    pub fn profiles(&self, group: Option<&str>) -> Vec<Profile> {
        let mut profiles: Vec<_> = self
            .config
            .list_profiles()
            .into_iter()
            .map(|raw| self.config.get_profile(&raw.name).unwrap_or_else(|_| raw.clone()))
            .filter(|p| group.map_or(true, |g| p.group == g))
            .collect();
        profiles.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));
        profiles
    }

    pub fn list(&self, out: &mut impl Write, group: Option<&str>, json: bool) -> anyhow::Result<()> {
        let profiles = self.profiles(group);
        if json {
            serde_json::to_writer_pretty(&mut *out, &profiles)?;
            writeln!(out)?;
            return Ok(());
        }

        let width = profiles.iter().map(|p| p.name.len()).max().unwrap_or(0);
        for p in &profiles {
            let mark = if p.favorite { '*' } else { ' ' };
            let protocol = p.protocol.as_ref().map_or("-", |p| p.as_str());
            let mut line = format!("{mark} {:<width$}  {protocol:<6}  {}", p.name, p.target());
            if p.port != 0 {
                line.push_str(&format!(":{}", p.port));
            }
            if !p.group.is_empty() {
                line.push_str(&format!("  [{}]", p.group));
            }
            writeln!(out, "{}", line.trim_end())?;
        }
        Ok(())
    }

    /// YAML dump of the effective profile, or of the stored one with `raw`.
    pub fn show(&self, out: &mut impl Write, name: &str, raw: bool) -> anyhow::Result<()> {
        let profile = if raw {
            self.require(name)?.clone()
        } else {
            self.config.get_profile(name)?
        };
        out.write_all(serde_yaml::to_string(&profile)?.as_bytes())?;
        Ok(())
    }

    /// Stores a new profile, and its password when one is given.
    pub fn add(&mut self, mut profile: Profile, password: Option<&str>) -> anyhow::Result<()> {
        if self.config.raw_profile(&profile.name).is_some() {
            return Err(Error::Validation(format!(
                "profile {:?} already exists; remove it first",
                profile.name
            ))
            .into());
        }

        check_profile(&self.config.profiles, &mut profile)?;

        let name = profile.name.clone();
        self.config.upsert_profile(profile);
        self.save()?;
        tracing::info!(profile = %name, "profile added");

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.credentials
                .set_password(&name, password)
                .with_context(|| format!("profile {name:?} saved, but storing its password failed"))?;
        }
        Ok(())
    }

    /// Overlays `changes` on the stored profile. Usage statistics, the
    /// `extends` link and the stored password are kept.
    pub fn edit(
        &mut self,
        name: &str,
        changes: ProfileEdit,
        password: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut profile = self.require(name)?.clone();
        changes.apply(&mut profile);
        check_profile(&self.config.profiles, &mut profile)?;

        self.config.upsert_profile(profile);
        self.save()?;
        tracing::info!(profile = name, "profile updated");

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.credentials.set_password(name, password)?;
        }
        Ok(())
    }

    /// Copies a stored profile under a new name with fresh usage
    /// statistics. The password is not copied.
    pub fn clone_profile(
        &mut self,
        source: &str,
        name: &str,
        changes: ProfileEdit,
    ) -> anyhow::Result<()> {
        if self.config.raw_profile(name).is_some() {
            return Err(Error::Validation(format!("profile {name:?} already exists")).into());
        }
        let mut profile = self.require(source)?.clone();
        profile.name = name.to_string();
        profile.use_count = 0;
        profile.last_used = None;
        profile.favorite = false;
        changes.apply(&mut profile);
        check_profile(&self.config.profiles, &mut profile)?;

        self.config.upsert_profile(profile);
        self.save()?;
        tracing::info!(profile = name, source, "profile cloned");
        Ok(())
    }

    /// Deletes a profile, and with `delete_password` its stored password.
    /// A password that cannot be removed is only a warning once the profile
    /// is gone.
    pub fn remove(&mut self, name: &str, delete_password: bool) -> anyhow::Result<()> {
        if !self.config.delete_profile(name) {
            return Err(Error::ProfileNotFound(name.to_string()).into());
        }
        self.save()?;

        if delete_password {
            if let Err(e) = self.credentials.delete_password(name) {
                tracing::warn!(profile = name, error = %e, "failed to delete stored password");
                eprintln!("warning: stored password not deleted: {e}");
            }
        }
        Ok(())
    }

    pub fn set_password(&self, name: &str, password: &str) -> anyhow::Result<()> {
        self.require(name)?;
        if password.is_empty() {
            return Err(Error::Validation("password is empty".into()).into());
        }
        self.credentials.set_password(name, password)?;
        Ok(())
    }

    pub fn delete_password(&self, name: &str) -> anyhow::Result<()> {
        self.require(name)?;
        self.credentials.delete_password(name)?;
        Ok(())
    }

    /// Flips the favorite flag and returns the new value.
    pub fn toggle_favorite(&mut self, name: &str) -> anyhow::Result<bool> {
        let profile = self
            .config
            .profiles
            .get_mut(name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;
        profile.favorite = !profile.favorite;
        let favorite = profile.favorite;
        self.save()?;
        Ok(favorite)
    }

    /// Persists the default backend; `auto` clears it.
    pub fn set_backend(&mut self, kind: BackendKind) -> anyhow::Result<()> {
        let configured = (kind != BackendKind::Auto).then_some(kind);
        self.config.default_backend = configured;
        self.save()?;
        self.credentials.set_configured(configured);
        if let Some(forced) = self.credentials.forced() {
            eprintln!(
                "note: {} is set to {forced}, which takes precedence",
                crate::credentials::BACKEND_ENV
            );
        }
        Ok(())
    }

    /// Availability of every backend and the one currently selected.
    pub fn backends(&self, out: &mut impl Write) -> anyhow::Result<()> {
        for (kind, status) in self.credentials.availability() {
            match status {
                Ok(()) => writeln!(out, "{kind:<10} available")?,
                Err(e) => writeln!(out, "{kind:<10} unavailable ({e})")?,
            }
        }

        let origin = match (self.credentials.forced(), self.credentials.configured()) {
            (Some(_), _) => "environment",
            (None, Some(_)) => "config default",
            (None, None) => "auto",
        };
        match self.credentials.active() {
            Ok(active) => writeln!(out, "active: {} ({origin})", active.kind())?,
            Err(e) => writeln!(out, "active: none ({e})")?,
        }
        Ok(())
    }

    /// Merges imported profiles into the store. Existing names are kept
    /// unless `overwrite` is set; nothing is written on a dry run.
    pub fn import(
        &mut self,
        profiles: Vec<Profile>,
        overwrite: bool,
        dry_run: bool,
    ) -> anyhow::Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut config = self.config.clone();
        let mut incoming = Vec::new();
        for profile in profiles {
            let exists = config.raw_profile(&profile.name).is_some();
            if exists && !overwrite {
                summary.skipped.push(profile.name);
                continue;
            }
            incoming.push((profile.name.clone(), exists));
            config.upsert_profile(profile);
        }

        // Checked once everything is in, so a template may arrive after
        // the profiles that extend it.
        for (name, exists) in incoming {
            let Some(mut profile) = config.raw_profile(&name).cloned() else {
                continue;
            };
            if let Err(e) = check_profile(&config.profiles, &mut profile) {
                tracing::warn!(profile = %name, error = %e, "skipping profile");
                match self.config.raw_profile(&name) {
                    Some(previous) => config.upsert_profile(previous.clone()),
                    None => {
                        config.delete_profile(&name);
                    }
                }
                summary.skipped.push(name);
                continue;
            }
            config.upsert_profile(profile);
            if exists {
                summary.replaced.push(name);
            } else {
                summary.added.push(name);
            }
        }

        if !dry_run {
            self.config = config;
            self.save()?;
        }
        Ok(summary)
    }

    /// Writes every stored profile to `path` as YAML. Passwords and the
    /// default backend stay behind.
    pub fn export(&self, path: &Path) -> anyhow::Result<usize> {
        let exported = Config {
            profiles: self.config.profiles.clone(),
            default_backend: None,
        };
        exported
            .save(path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        Ok(exported.profiles.len())
    }

    /// Profiles from a file written by [`App::export`], ordered by name.
    pub fn read_export(path: &Path) -> anyhow::Result<Vec<Profile>> {
        let data =
            fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        let incoming: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("cannot parse {}", path.display()))?;
        let mut profiles: Vec<_> = incoming.profiles.into_values().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    /// Opens a TCP connection to the host and port of `name`, or of every
    /// profile when `name` is `None`. Unreachable hosts are reported, not
    /// returned as errors.
    pub fn test(
        &self,
        out: &mut impl Write,
        name: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<TestReport> {
        let profiles = match name {
            Some(name) => vec![self.config.get_profile(name)?],
            None => self.profiles(None),
        };
        let mut report = TestReport::default();
        if profiles.is_empty() {
            writeln!(out, "No profiles found.")?;
            return Ok(report);
        }

        let rt = tokio::runtime::Runtime::new()?;
        for p in &profiles {
            let Some(port) = tcp_port(p) else {
                let protocol = p.protocol.as_ref().map_or("-", |p| p.as_str());
                writeln!(out, "Skipping {} ({protocol} has no direct TCP endpoint)", p.name)?;
                report.skipped += 1;
                continue;
            };
            let addr = if p.host.contains(':') {
                format!("[{}]:{port}", p.host)
            } else {
                format!("{}:{port}", p.host)
            };
            write!(out, "Testing {} ({addr})... ", p.name)?;
            match rt.block_on(reach(&p.host, port, timeout)) {
                Ok(elapsed) => {
                    writeln!(out, "OK ({}ms)", elapsed.as_millis())?;
                    report.passed += 1;
                }
                Err(e) => {
                    writeln!(out, "FAILED ({e})")?;
                    report.failed += 1;
                }
            }
        }

        if profiles.len() > 1 {
            writeln!(
                out,
                "\nResults: {} passed, {} failed, {} skipped, {} total",
                report.passed,
                report.failed,
                report.skipped,
                profiles.len()
            )?;
        }
        Ok(report)
    }
}

/// Validates `profile` before it is stored. A profile that extends a
/// template is checked in resolved form but stored as given, so its unset
/// fields keep following the template.
fn check_profile(profiles: &HashMap<String, Profile>, profile: &mut Profile) -> Result<(), Error> {
    if profile.extends.is_empty() {
        return profile.validate();
    }
    let mut profiles = profiles.clone();
    profiles.insert(profile.name.clone(), profile.clone());
    let mut effective = inherit::resolve(&profiles, &profile.name)
        .ok_or_else(|| Error::ProfileNotFound(profile.name.clone()))?;
    effective.validate()
}

/// Runs a tool on the terminal until it exits or Ctrl-C, explaining the
/// exit codes it documents.
fn launch_attached(launch: &Launch) -> anyhow::Result<()> {
    for notice in &launch.notices {
        eprintln!("{notice}");
    }
    let rt = tokio::runtime::Runtime::new()?;
    if let Err(e) = rt.block_on(run_attached(launch, interrupted())) {
        if let Some(hint) = e.exit_code().and_then(|code| launch.hint_for(code)) {
            eprintln!("{hint}");
        }
        return Err(e.into());
    }
    Ok(())
}

// None for protocols reached through a cloud API. Unknown protocols get
// the ssh port.
fn tcp_port(profile: &Profile) -> Option<u16> {
    let default = match profile.protocol.as_ref().and_then(|name| name.known()) {
        Some(protocol) => protocol.default_port()?,
        None => 22,
    };
    Some(if profile.port != 0 { profile.port } else { default })
}

async fn reach(host: &str, port: u16, limit: Duration) -> io::Result<Duration> {
    let start = Instant::now();
    match tokio::time::timeout(limit, TcpStream::connect((host, port))).await {
        Ok(stream) => {
            stream?;
            Ok(start.elapsed())
        }
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
    }
}

/// Completes on Ctrl-C. If the handler cannot be installed it never does.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
