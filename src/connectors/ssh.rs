use super::{push_each, remote_command, Connector, PASSWORD_HELPER};
use crate::{
    error::{Error, Result},
    process::{Launch, ToolLocator},
    profile::{Profile, Protocol},
};

pub struct SshConnector;

impl Connector for SshConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    fn command(&self, p: &Profile, secret: &str, tools: &dyn ToolLocator) -> Result<Launch> {
        let mut ssh = Launch::new("ssh");
        if p.port > 0 {
            ssh.args(["-p".to_string(), p.port.to_string()]);
        }
        if !p.username.is_empty() {
            ssh.args(["-l", p.username.as_str()]);
        }
        if !p.identity_file.is_empty() {
            ssh.args(["-i", p.identity_file.as_str()]);
        }
        if !p.proxy_jump.is_empty() {
            ssh.args(["-J", p.proxy_jump.as_str()]);
        }
        push_each(&mut ssh, "-L", &p.local_forwards);
        push_each(&mut ssh, "-R", &p.remote_forwards);
        push_each(&mut ssh, "-D", &p.dynamic_forwards);
        for assignment in p.set_env.iter().filter(|e| !e.is_empty()) {
            ssh.args(["-o".to_string(), format!("SetEnv={assignment}")]);
        }

        let use_password = !secret.is_empty() && p.identity_file.is_empty();
        if use_password {
            force_password_auth(&mut ssh);
        }

        ssh.args(p.extra_args.iter().cloned());

        let remote = remote_command(p);
        if remote.is_some() {
            ssh.arg("-t");
        }
        ssh.arg(p.host.clone());
        if let Some(remote) = remote {
            ssh.arg(remote);
        }

        if use_password {
            Ok(with_password(ssh, secret, &p.name, tools))
        } else {
            Ok(ssh)
        }
    }
}

/// One non-interactive ssh command on the profile's host. Forwards, remote
/// environment and the profile's own remote command are left out; `tty`
/// forces a terminal for interactive programs.
pub fn remote_exec(
    p: &Profile,
    command: &[String],
    tty: bool,
    secret: &str,
    tools: &dyn ToolLocator,
) -> Result<Launch> {
    if p.protocol.as_ref().and_then(|name| name.known()) != Some(Protocol::Ssh) {
        let got = p.protocol.as_ref().map_or("none", |name| name.as_str());
        return Err(Error::Validation(format!(
            "run only supports ssh profiles (got {got})"
        )));
    }
    if command.is_empty() {
        return Err(Error::Validation("no command given".into()));
    }

    let mut ssh = Launch::new("ssh");
    if p.port > 0 {
        ssh.args(["-p".to_string(), p.port.to_string()]);
    }
    if !p.username.is_empty() {
        ssh.args(["-l", p.username.as_str()]);
    }
    if !p.identity_file.is_empty() {
        ssh.args(["-i", p.identity_file.as_str()]);
    }
    if !p.proxy_jump.is_empty() {
        ssh.args(["-J", p.proxy_jump.as_str()]);
    }
    if tty {
        ssh.arg("-t");
    }

    let use_password = !secret.is_empty() && p.identity_file.is_empty();
    if use_password {
        force_password_auth(&mut ssh);
    }
    ssh.args(p.extra_args.iter().cloned());
    ssh.arg(p.host.clone());
    ssh.arg(command.join(" "));

    if use_password {
        Ok(with_password(ssh, secret, &p.name, tools))
    } else {
        Ok(ssh)
    }
}

/// Restricts ssh to password authentication so the injected secret is the
/// one consumed. These options must precede the host argument.
pub(super) fn force_password_auth(launch: &mut Launch) {
    for option in [
        "PreferredAuthentications=password",
        "PubkeyAuthentication=no",
        "ChallengeResponseAuthentication=no",
        "ConnectTimeout=10",
    ] {
        launch.args(["-o", option]);
    }
}

/// Wraps an ssh-family command with the password helper when it is
/// installed. The secret travels in the environment, never in argv.
/// Without the helper the tool prompts as usual and the user is told why.
pub(super) fn with_password(
    inner: Launch,
    secret: &str,
    profile: &str,
    tools: &dyn ToolLocator,
) -> Launch {
    let Some(helper) = tools.find(PASSWORD_HELPER) else {
        let mut inner = inner;
        inner.notices.push(format!(
            "A password is stored but '{PASSWORD_HELPER}' is not installed, so it cannot be entered automatically.\n\
             Install it for automatic password entry:\n  \
             macOS:  brew install hudochenkov/sshpass/sshpass\n  \
             Linux:  sudo apt-get install sshpass  (or: sudo dnf install sshpass)\n\
             You will be prompted for the password below."
        ));
        return inner;
    };

    let mut launch = Launch::new(helper.display().to_string());
    launch
        .arg("-e")
        .arg(inner.program)
        .args(inner.args)
        .env("SSHPASS", secret.trim());
    launch.notices = inner.notices;
    launch.exit_hints = vec![
        (
            5,
            format!(
                "Authentication failed; the stored password may be wrong.\n\
                 Update it with: sshelf passwd {profile}"
            ),
        ),
        (6, "Host key verification failed.".to_string()),
    ];
    launch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::testing::{FakeTools, NO_TOOLS};

    fn web() -> Profile {
        let mut p = Profile::new("web", Protocol::Ssh, "web.example.com");
        p.port = 22;
        p
    }

    #[test]
    fn maps_connection_fields_to_flags() {
        let mut p = web();
        p.port = 2222;
        p.username = "deploy".into();
        p.identity_file = "/home/me/.ssh/id_ed25519".into();
        p.proxy_jump = "bastion".into();
        p.local_forwards = vec!["8080:localhost:80".into(), String::new()];
        p.remote_forwards = vec!["9000:localhost:9000".into()];
        p.dynamic_forwards = vec!["1080".into()];
        p.set_env = vec!["LANG=C".into()];
        p.extra_args = vec!["-v".into()];

        let launch = SshConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.program, "ssh");
        assert_eq!(
            launch.args,
            [
                "-p", "2222", "-l", "deploy", "-i", "/home/me/.ssh/id_ed25519", "-J", "bastion",
                "-L", "8080:localhost:80", "-R", "9000:localhost:9000", "-D", "1080", "-o",
                "SetEnv=LANG=C", "-v", "web.example.com",
            ]
        );
        assert!(launch.env.is_empty());
        assert!(launch.notices.is_empty());
    }

    #[test]
    fn remote_dir_requests_tty_and_login_shell() {
        let mut p = web();
        p.remote_dir = "/path/with spaces".into();
        let launch = SshConnector.command(&p, "", &NO_TOOLS).unwrap();
        let tail: Vec<_> = launch.args.iter().rev().take(3).rev().collect();
        assert_eq!(
            tail,
            ["-t", "web.example.com", "cd '/path/with spaces' && exec $SHELL -l"]
        );
    }

    #[test]
    fn remote_dir_and_command() {
        let mut p = web();
        p.remote_dir = "/app".into();
        p.remote_command = "make run".into();
        let launch = SshConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.args.last().unwrap(), "cd '/app' && make run");
    }

    #[test]
    fn password_goes_through_helper_env() {
        let launch = SshConnector
            .command(&web(), "hunter2\n", &FakeTools(&["sshpass"]))
            .unwrap();
        assert_eq!(launch.program, "/usr/bin/sshpass");
        assert_eq!(launch.args[..2], ["-e", "ssh"]);
        assert!(launch.args.contains(&"PreferredAuthentications=password".to_string()));
        assert!(!launch.args.iter().any(|a| a.contains("hunter2")));
        assert_eq!(launch.env, [("SSHPASS".to_string(), "hunter2".to_string())]);
        assert!(launch.hint_for(5).unwrap().contains("sshelf passwd web"));
        assert!(launch.notices.is_empty());
    }

    #[test]
    fn missing_helper_prompts_and_says_why() {
        let launch = SshConnector.command(&web(), "hunter2", &NO_TOOLS).unwrap();
        assert_eq!(launch.program, "ssh");
        assert!(launch.env.is_empty());
        assert_eq!(launch.notices.len(), 1);
        assert!(launch.notices[0].contains("sshpass"));
        assert!(launch.args.contains(&"PreferredAuthentications=password".to_string()));
    }

    #[test]
    fn identity_file_disables_password_injection() {
        let mut p = web();
        p.identity_file = "/k".into();
        let launch = SshConnector
            .command(&p, "hunter2", &FakeTools(&["sshpass"]))
            .unwrap();
        assert_eq!(launch.program, "ssh");
        assert!(launch.env.is_empty());
        assert!(!launch.args.iter().any(|a| a.starts_with("PreferredAuthentications")));
    }

    #[test]
    fn password_options_precede_host() {
        let launch = SshConnector
            .command(&web(), "pw", &FakeTools(&["sshpass"]))
            .unwrap();
        let host = launch.args.iter().position(|a| a == "web.example.com").unwrap();
        let opt = launch
            .args
            .iter()
            .position(|a| a == "ConnectTimeout=10")
            .unwrap();
        assert!(opt < host);
    }

    #[test]
    fn remote_exec_runs_one_command() {
        let mut p = web();
        p.username = "deploy".into();
        p.local_forwards = vec!["8080:localhost:80".into()];
        p.remote_dir = "/srv".into();

        let command = vec!["ls".to_string(), "-la".to_string(), "/var/log".to_string()];
        let launch = remote_exec(&p, &command, false, "", &NO_TOOLS).unwrap();
        assert_eq!(
            launch.args,
            ["-p", "22", "-l", "deploy", "web.example.com", "ls -la /var/log"]
        );

        let launch = remote_exec(&p, &["top".to_string()], true, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.args, ["-p", "22", "-l", "deploy", "-t", "web.example.com", "top"]);
    }

    #[test]
    fn remote_exec_uses_stored_password() {
        let launch = remote_exec(&web(), &["uptime".to_string()], false, "pw", &FakeTools(&["sshpass"]))
            .unwrap();
        assert_eq!(launch.program, "/usr/bin/sshpass");
        assert_eq!(launch.args.last().unwrap(), "uptime");
        assert_eq!(launch.env, [("SSHPASS".to_string(), "pw".to_string())]);
    }

    #[test]
    fn remote_exec_needs_ssh_and_a_command() {
        let telnet = Profile::new("sw", Protocol::Telnet, "switch1");
        assert!(matches!(
            remote_exec(&telnet, &["uptime".to_string()], false, "", &NO_TOOLS),
            Err(Error::Validation(m)) if m.contains("telnet")
        ));
        assert!(remote_exec(&web(), &[], false, "", &NO_TOOLS).is_err());
    }
}
