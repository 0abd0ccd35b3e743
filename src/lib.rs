mod app;
pub mod config;
pub mod connectors;
pub mod credentials;
mod error;
pub mod inherit;
mod input;
pub mod process;
pub mod profile;
mod select_box;
pub mod sshconfig;
mod terminal;

pub use app::{App, ImportSummary, ProfileEdit, TestReport};
pub use config::Config;
pub use connectors::{Connector, ConnectorRegistry};
pub use credentials::{Backend, BackendKind, CredentialResolver};
pub use error::{Error, Result};
pub use process::Launch;
pub use profile::{Profile, Protocol, ProtocolName};
