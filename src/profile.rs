use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Sftp,
    Telnet,
    Mosh,
    Ssm,
    Gcloud,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Ssh,
        Protocol::Sftp,
        Protocol::Telnet,
        Protocol::Mosh,
        Protocol::Ssm,
        Protocol::Gcloud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Sftp => "sftp",
            Protocol::Telnet => "telnet",
            Protocol::Mosh => "mosh",
            Protocol::Ssm => "ssm",
            Protocol::Gcloud => "gcloud",
        }
    }

    /// Conventional TCP port, `None` for protocols tunnelled through a cloud API.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Protocol::Ssh | Protocol::Sftp | Protocol::Mosh => Some(22),
            Protocol::Telnet => Some(23),
            Protocol::Ssm | Protocol::Gcloud => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::UnsupportedProtocol(s.to_string()))
    }
}

/// The protocol as stored. A name this build has no connector for is kept
/// as written, so one stale entry cannot make the whole store unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolName {
    Known(Protocol),
    Unknown(String),
}

impl ProtocolName {
    pub fn known(&self) -> Option<Protocol> {
        match self {
            ProtocolName::Known(protocol) => Some(*protocol),
            ProtocolName::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProtocolName::Known(protocol) => protocol.as_str(),
            ProtocolName::Unknown(name) => name,
        }
    }
}

impl From<Protocol> for ProtocolName {
    fn from(protocol: Protocol) -> Self {
        ProtocolName::Known(protocol)
    }
}

impl PartialEq<Protocol> for ProtocolName {
    fn eq(&self, other: &Protocol) -> bool {
        self.known() == Some(*other)
    }
}

impl fmt::Display for ProtocolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A named description of how to reach one remote target.
///
/// Empty strings, empty lists and a zero port mean "unset": they are
/// filled from the `extends` parent when the profile is resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolName>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_file: String,
    pub use_agent: bool,
    pub extra_args: Vec<String>,
    pub proxy_jump: String,

    pub local_forwards: Vec<String>,
    pub remote_forwards: Vec<String>,
    pub dynamic_forwards: Vec<String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_command: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_dir: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub set_env: Vec<String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub aws_region: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub aws_profile: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instance_id: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub gcp_project: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gcp_zone: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub gcp_use_tunnel: bool,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub mosh_server: String,

    pub group: String,
    pub description: String,
    pub tags: Vec<String>,
    pub favorite: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub use_count: u64,

    /// Name of the template profile this one inherits from.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub extends: String,
}

impl Profile {
    pub fn new(name: impl Into<String>, protocol: Protocol, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: Some(protocol.into()),
            host: host.into(),
            ..Default::default()
        }
    }

    /// Checks a profile before it is persisted and fills in the
    /// protocol's default port when none is set.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("profile name is required".into()));
        }
        let protocol = match &self.protocol {
            None => return Err(Error::Validation("protocol is required".into())),
            Some(ProtocolName::Unknown(name)) => {
                return Err(Error::UnsupportedProtocol(name.clone()))
            }
            Some(ProtocolName::Known(protocol)) => *protocol,
        };
        if self.host.trim().is_empty() {
            return Err(Error::Validation("host is required".into()));
        }
        if self.port == 0 {
            if let Some(port) = protocol.default_port() {
                self.port = port;
            }
        }
        Ok(())
    }

    /// `user@host`, or just the host when no username is set.
    pub fn target(&self) -> String {
        if self.username.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.username, self.host)
        }
    }

    pub fn clear_forwards(&mut self) {
        self.local_forwards.clear();
        self.remote_forwards.clear();
        self.dynamic_forwards.clear();
    }
}
