use super::{unused_secret_notice, Connector};
use crate::{
    error::Result,
    process::{Launch, ToolLocator},
    profile::{Profile, Protocol},
};

/// AWS Session Manager through `aws ssm start-session`.
pub struct SsmConnector;

impl Connector for SsmConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Ssm
    }

    fn command(&self, p: &Profile, secret: &str, _tools: &dyn ToolLocator) -> Result<Launch> {
        let target = if p.instance_id.is_empty() {
            &p.host
        } else {
            &p.instance_id
        };

        let mut aws = Launch::new("aws");
        aws.args(["ssm", "start-session", "--target", target.as_str()]);
        if !p.aws_region.is_empty() {
            aws.args(["--region", p.aws_region.as_str()]);
        }
        aws.args(p.extra_args.iter().cloned());
        if !p.aws_profile.is_empty() {
            aws.env("AWS_PROFILE", p.aws_profile.clone());
        }
        unused_secret_notice(&mut aws, secret, "aws ssm");
        Ok(aws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::testing::NO_TOOLS;

    #[test]
    fn instance_region_and_profile() {
        let mut p = Profile::new("worker", Protocol::Ssm, "worker-1");
        p.instance_id = "i-0abc123".into();
        p.aws_region = "eu-west-1".into();
        p.aws_profile = "prod".into();

        let launch = SsmConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.program, "aws");
        assert_eq!(
            launch.args,
            ["ssm", "start-session", "--target", "i-0abc123", "--region", "eu-west-1"]
        );
        assert_eq!(launch.env, [("AWS_PROFILE".to_string(), "prod".to_string())]);
    }

    #[test]
    fn host_is_the_target_without_instance_id() {
        let p = Profile::new("worker", Protocol::Ssm, "i-0fff");
        let launch = SsmConnector.command(&p, "", &NO_TOOLS).unwrap();
        assert_eq!(launch.args[3], "i-0fff");
        assert!(launch.env.is_empty());
    }
}
