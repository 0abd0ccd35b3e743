use super::{remote_command, unused_secret_notice, Connector};
use crate::{
    error::Result,
    process::{Launch, ToolLocator},
    profile::{Profile, Protocol},
};

/// `gcloud compute ssh`; the host field holds the instance name.
pub struct GcloudConnector;

impl Connector for GcloudConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Gcloud
    }

    fn command(&self, p: &Profile, secret: &str, _tools: &dyn ToolLocator) -> Result<Launch> {
        let mut gcloud = Launch::new("gcloud");
        gcloud.args(["compute", "ssh"]);
        gcloud.arg(p.target());
        if !p.gcp_project.is_empty() {
            gcloud.args(["--project", p.gcp_project.as_str()]);
        }
        if !p.gcp_zone.is_empty() {
            gcloud.args(["--zone", p.gcp_zone.as_str()]);
        }
        if p.gcp_use_tunnel {
            gcloud.arg("--tunnel-through-iap");
        }
        gcloud.args(p.extra_args.iter().cloned());
        if let Some(remote) = remote_command(p) {
            gcloud.args(["--command".to_string(), remote]);
        }
        unused_secret_notice(&mut gcloud, secret, "gcloud");
        Ok(gcloud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::testing::NO_TOOLS;

    #[test]
    fn project_zone_tunnel_and_command() {
        let mut p = Profile::new("vm", Protocol::Gcloud, "instance-1");
        p.username = "me".into();
        p.gcp_project = "proj".into();
        p.gcp_zone = "us-central1-a".into();
        p.gcp_use_tunnel = true;
        p.remote_dir = "/srv".into();

        let launch = GcloudConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.program, "gcloud");
        assert_eq!(
            launch.args,
            [
                "compute",
                "ssh",
                "me@instance-1",
                "--project",
                "proj",
                "--zone",
                "us-central1-a",
                "--tunnel-through-iap",
                "--command",
                "cd '/srv' && exec $SHELL -l",
            ]
        );
    }

    #[test]
    fn minimal_instance() {
        let p = Profile::new("vm", Protocol::Gcloud, "instance-1");
        let launch = GcloudConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.args, ["compute", "ssh", "instance-1"]);
    }
}
