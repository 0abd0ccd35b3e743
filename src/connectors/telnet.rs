use super::{unused_secret_notice, Connector};
use crate::{
    error::Result,
    process::{Launch, ToolLocator},
    profile::{Profile, Protocol},
};

pub struct TelnetConnector;

impl Connector for TelnetConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Telnet
    }

    fn command(&self, p: &Profile, secret: &str, _tools: &dyn ToolLocator) -> Result<Launch> {
        let mut telnet = Launch::new("telnet");
        telnet.arg(p.host.clone());
        if p.port > 0 {
            telnet.arg(p.port.to_string());
        }
        unused_secret_notice(&mut telnet, secret, "telnet");
        Ok(telnet)
    }
}
