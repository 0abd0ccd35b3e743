//! Per-protocol translation of an effective profile into a tool invocation.

mod gcloud;
mod mosh;
mod sftp;
mod ssh;
mod ssm;
mod telnet;

use std::collections::HashMap;

use crate::{
    error::{Error, Result},
    process::{Launch, ToolLocator},
    profile::{Profile, Protocol, ProtocolName},
};

pub use self::gcloud::GcloudConnector;
pub use self::mosh::MoshConnector;
pub use self::sftp::SftpConnector;
pub use self::ssh::{remote_exec, SshConnector};
pub use self::ssm::SsmConnector;
pub use self::telnet::TelnetConnector;

/// Helper that feeds a password to ssh-family tools through `SSHPASS`.
pub const PASSWORD_HELPER: &str = "sshpass";

pub trait Connector: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn name(&self) -> &'static str {
        self.protocol().as_str()
    }

    /// Builds the command for `profile`. `secret` is the stored password,
    /// empty when none is stored.
    fn command(&self, profile: &Profile, secret: &str, tools: &dyn ToolLocator) -> Result<Launch>;
}

/// Connectors keyed by protocol, filled once at startup.
pub struct ConnectorRegistry {
    connectors: HashMap<Protocol, Box<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn empty() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// A registry with every built-in protocol.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(SshConnector));
        registry.register(Box::new(SftpConnector));
        registry.register(Box::new(TelnetConnector));
        registry.register(Box::new(MoshConnector));
        registry.register(Box::new(SsmConnector));
        registry.register(Box::new(GcloudConnector));
        registry
    }

    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors.insert(connector.protocol(), connector);
    }

    pub fn get(&self, protocol: Protocol) -> Result<&dyn Connector> {
        self.connectors
            .get(&protocol)
            .map(|c| c.as_ref())
            .ok_or_else(|| Error::NoConnector(protocol.to_string()))
    }

    /// Looks up the connector for an effective profile and builds its command.
    pub fn command(
        &self,
        profile: &Profile,
        secret: &str,
        tools: &dyn ToolLocator,
    ) -> Result<Launch> {
        match &profile.protocol {
            Some(ProtocolName::Known(protocol)) => self.get(*protocol)?.command(profile, secret, tools),
            Some(ProtocolName::Unknown(name)) => Err(Error::NoConnector(name.clone())),
            None => Err(Error::Validation(format!(
                "profile {:?} has no protocol",
                profile.name
            ))),
        }
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// POSIX single-quoting: the result is one shell word equal to `s`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

/// The command run on the remote side after connecting, or `None`.
///
/// A remote directory becomes `cd '<dir>'`, followed by the remote command,
/// or by a login shell when no command is set. The parts are joined with
/// `&&` so a failed `cd` stops the command.
pub fn remote_command(profile: &Profile) -> Option<String> {
    let mut parts = Vec::new();
    if !profile.remote_dir.is_empty() {
        parts.push(format!("cd {}", shell_quote(&profile.remote_dir)));
    }
    if !profile.remote_command.is_empty() {
        parts.push(profile.remote_command.clone());
    } else if !profile.remote_dir.is_empty() {
        parts.push("exec $SHELL -l".to_string());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" && "))
    }
}

fn push_each(launch: &mut Launch, flag: &str, values: &[String]) {
    for value in values.iter().filter(|v| !v.is_empty()) {
        launch.args([flag, value.as_str()]);
    }
}

/// Tells the user a stored secret goes unused by a tool that cannot take it.
fn unused_secret_notice(launch: &mut Launch, secret: &str, tool: &str) {
    if !secret.is_empty() {
        launch.notices.push(format!(
            "A password is stored for this profile, but {tool} cannot receive it automatically; enter it when prompted."
        ));
    }
}
