use super::{
    ssh::{force_password_auth, with_password},
    Connector,
};
use crate::{
    error::Result,
    process::{Launch, ToolLocator},
    profile::{Profile, Protocol},
};

pub struct SftpConnector;

impl Connector for SftpConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    // sftp has no -L/-R/-D/-J flags of its own; everything goes through -o.
    fn command(&self, p: &Profile, secret: &str, tools: &dyn ToolLocator) -> Result<Launch> {
        let mut sftp = Launch::new("sftp");
        if p.port > 0 {
            sftp.args(["-P".to_string(), p.port.to_string()]);
        }
        if !p.identity_file.is_empty() {
            sftp.args(["-i", p.identity_file.as_str()]);
        }
        if !p.proxy_jump.is_empty() {
            sftp.args(["-o".to_string(), format!("ProxyJump={}", p.proxy_jump)]);
        }
        for (option, values) in [
            ("LocalForward", &p.local_forwards),
            ("RemoteForward", &p.remote_forwards),
            ("DynamicForward", &p.dynamic_forwards),
        ] {
            for value in values.iter().filter(|v| !v.is_empty()) {
                sftp.args(["-o".to_string(), format!("{option}={value}")]);
            }
        }

        let use_password = !secret.is_empty() && p.identity_file.is_empty();
        if use_password {
            force_password_auth(&mut sftp);
        }
        sftp.args(p.extra_args.iter().cloned());
        sftp.arg(p.target());

        if use_password {
            Ok(with_password(sftp, secret, &p.name, tools))
        } else {
            Ok(sftp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::testing::{FakeTools, NO_TOOLS};

    #[test]
    fn uses_sftp_option_syntax() {
        let mut p = Profile::new("files", Protocol::Sftp, "files.example.com");
        p.port = 2022;
        p.username = "ftp".into();
        p.identity_file = "/k".into();
        p.proxy_jump = "bastion".into();
        p.local_forwards = vec!["8080:localhost:80".into()];
        p.dynamic_forwards = vec!["1080".into()];

        let launch = SftpConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.program, "sftp");
        assert_eq!(
            launch.args,
            [
                "-P",
                "2022",
                "-i",
                "/k",
                "-o",
                "ProxyJump=bastion",
                "-o",
                "LocalForward=8080:localhost:80",
                "-o",
                "DynamicForward=1080",
                "ftp@files.example.com",
            ]
        );
    }

    #[test]
    fn stored_password_uses_helper() {
        let p = Profile::new("files", Protocol::Sftp, "files.example.com");
        let launch = SftpConnector
            .command(&p, "pw", &FakeTools(&["sshpass"]))
            .unwrap();
        assert_eq!(launch.program, "/usr/bin/sshpass");
        assert_eq!(launch.args[..2], ["-e", "sftp"]);
        assert_eq!(launch.args.last().unwrap(), "files.example.com");
    }
}
