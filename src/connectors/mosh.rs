use super::{remote_command, shell_quote, unused_secret_notice, Connector};
use crate::{
    error::Result,
    process::{Launch, ToolLocator},
    profile::{Profile, Protocol},
};

pub struct MoshConnector;

impl Connector for MoshConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Mosh
    }

    fn command(&self, p: &Profile, secret: &str, _tools: &dyn ToolLocator) -> Result<Launch> {
        let mut mosh = Launch::new("mosh");

        // mosh re-splits --ssh through a shell, so paths and jump specs are quoted.
        let mut ssh = String::new();
        if p.port > 0 && p.port != 22 {
            ssh.push_str(&format!(" -p {}", p.port));
        }
        if !p.identity_file.is_empty() {
            ssh.push_str(&format!(" -i {}", shell_quote(&p.identity_file)));
        }
        if !p.proxy_jump.is_empty() {
            ssh.push_str(&format!(" -J {}", shell_quote(&p.proxy_jump)));
        }
        if !ssh.is_empty() {
            mosh.arg(format!("--ssh=ssh{ssh}"));
        }
        if !p.mosh_server.is_empty() {
            mosh.arg(format!("--server={}", p.mosh_server));
        }

        mosh.args(p.extra_args.iter().cloned());
        mosh.arg(p.target());

        // mosh-server execs its command directly, so it runs under sh -c.
        if let Some(remote) = remote_command(p) {
            mosh.args(["--".to_string(), "sh".into(), "-c".into(), remote]);
        }

        unused_secret_notice(&mut mosh, secret, "mosh");
        Ok(mosh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::testing::NO_TOOLS;

    #[test]
    fn ssh_options_are_quoted() {
        let mut p = Profile::new("phone", Protocol::Mosh, "m.example.com");
        p.port = 2200;
        p.username = "me".into();
        p.identity_file = "/keys/my key".into();
        p.proxy_jump = "jump@bastion:22".into();
        p.mosh_server = "/opt/bin/mosh-server".into();

        let launch = MoshConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.program, "mosh");
        assert_eq!(
            launch.args,
            [
                "--ssh=ssh -p 2200 -i '/keys/my key' -J 'jump@bastion:22'",
                "--server=/opt/bin/mosh-server",
                "me@m.example.com",
            ]
        );
    }

    #[test]
    fn default_port_is_left_to_ssh() {
        let mut p = Profile::new("phone", Protocol::Mosh, "m.example.com");
        p.port = 22;
        let launch = MoshConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.args, ["m.example.com"]);
    }

    #[test]
    fn remote_command_runs_under_sh() {
        let mut p = Profile::new("phone", Protocol::Mosh, "m.example.com");
        p.remote_dir = "/srv/app".into();
        p.remote_command = "tmux attach || tmux new".into();
        let launch = MoshConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(
            launch.args[1..],
            ["--", "sh", "-c", "cd '/srv/app' && tmux attach || tmux new"]
        );
    }
}
