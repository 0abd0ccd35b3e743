use std::{
    io::{self, Read},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sshelf::{
    sshconfig, App, BackendKind, Error, ImportSummary, Profile, ProfileEdit, Protocol,
};

const LOG_ENV: &str = "SSHELF_LOG";
const EXIT_CANCELLED: u8 = 130;

/// sshelf - named connection profiles for ssh, sftp, telnet, mosh, ssm and gcloud
#[derive(Parser)]
#[command(name = "sshelf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Profile store to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a profile
    Connect {
        name: String,

        /// Drop all port forwards for this connection
        #[arg(long)]
        no_forward: bool,
    },

    /// List profiles
    List {
        /// Only show profiles in this group
        #[arg(long)]
        group: Option<String>,

        /// Print the effective profiles as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a profile as YAML
    Show {
        name: String,

        /// Show the stored profile instead of the resolved one
        #[arg(long)]
        raw: bool,
    },

    /// Add a profile
    Add(AddArgs),

    /// Change fields of a stored profile
    Edit {
        name: String,

        #[command(flatten)]
        fields: FieldArgs,

        /// Read a new password from stdin
        #[arg(long)]
        password_stdin: bool,
    },

    /// Copy a profile under a new name
    Clone {
        source: String,
        new_name: String,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Remove a profile
    Remove {
        name: String,

        /// Also delete its stored password
        #[arg(long)]
        delete_password: bool,
    },

    /// Store a profile's password, read from stdin
    Passwd {
        name: String,

        /// Delete the stored password instead
        #[arg(long)]
        delete: bool,
    },

    /// Toggle a profile's favorite flag
    Favorite { name: String },

    /// Persist the default credential backend
    SetBackend {
        /// auto, 1password, keyring or file
        kind: BackendKind,
    },

    /// Show which credential backends are available
    Backends,

    /// Import hosts from an OpenSSH client config
    ImportSsh {
        /// Config file to read (default: ~/.ssh/config)
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Group for the imported profiles
        #[arg(long, default_value = "")]
        group: String,

        /// Prefix for the imported profile names
        #[arg(long, default_value = "")]
        prefix: String,

        /// Replace profiles that already exist
        #[arg(long)]
        overwrite: bool,

        /// Show what would be imported without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Write all profiles to a YAML file, without passwords
    Export {
        #[arg(long, short, value_name = "PATH")]
        file: PathBuf,
    },

    /// Read profiles from a file written by export
    Import {
        #[arg(long, short, value_name = "PATH")]
        file: PathBuf,

        /// Replace profiles that already exist
        #[arg(long)]
        overwrite: bool,

        /// Show what would be imported without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a command on an ssh profile's host
    Run {
        name: String,

        /// Allocate a terminal for interactive commands
        #[arg(long, short)]
        tty: bool,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Check that profiles accept TCP connections
    Test {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,

        /// Test every profile
        #[arg(long)]
        all: bool,

        /// Seconds to wait for each connection
        #[arg(long, default_value_t = 10, value_name = "SECS")]
        timeout: u64,
    },
}

/// Fields `edit` and `clone` can change; unset flags leave a field alone.
#[derive(Args)]
struct FieldArgs {
    #[arg(long)]
    host: Option<String>,

    #[arg(long, short)]
    port: Option<u16>,

    #[arg(long, short)]
    user: Option<String>,

    /// Private key file
    #[arg(long, short)]
    identity: Option<String>,

    #[arg(long, short = 'J')]
    proxy_jump: Option<String>,

    #[arg(long, short)]
    group: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// Replace the tags (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Remove all tags
    #[arg(long, conflicts_with = "tags")]
    clear_tags: bool,
}

impl FieldArgs {
    fn into_edit(self) -> ProfileEdit {
        let tags = if self.clear_tags {
            Some(Vec::new())
        } else {
            Some(self.tags).filter(|tags| !tags.is_empty())
        };
        ProfileEdit {
            host: self.host,
            port: self.port,
            username: self.user,
            identity_file: self.identity,
            proxy_jump: self.proxy_jump,
            group: self.group,
            description: self.description,
            tags,
        }
    }
}

#[derive(Args)]
struct AddArgs {
    name: String,

    /// ssh, sftp, telnet, mosh, ssm or gcloud [default: ssh, or the template's]
    #[arg(long, short = 'P')]
    protocol: Option<Protocol>,

    /// Host name or address (instance name for gcloud)
    #[arg(long, default_value = "")]
    host: String,

    #[arg(long, short, default_value_t = 0)]
    port: u16,

    #[arg(long, short)]
    user: Option<String>,

    /// Private key file
    #[arg(long, short)]
    identity: Option<String>,

    /// Authenticate through the ssh agent
    #[arg(long)]
    agent: bool,

    #[arg(long, short = 'J')]
    proxy_jump: Option<String>,

    /// Local forward, e.g. 8080:localhost:80 (repeatable)
    #[arg(short = 'L', value_name = "SPEC")]
    local: Vec<String>,

    /// Remote forward (repeatable)
    #[arg(short = 'R', value_name = "SPEC")]
    remote: Vec<String>,

    /// Dynamic SOCKS forward (repeatable)
    #[arg(short = 'D', value_name = "PORT")]
    dynamic: Vec<String>,

    /// Command to run after connecting
    #[arg(long)]
    remote_command: Option<String>,

    /// Directory to change into after connecting
    #[arg(long)]
    remote_dir: Option<String>,

    /// Remote environment assignment KEY=VALUE (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    set_env: Vec<String>,

    /// Extra argument passed to the tool verbatim (repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    extra_args: Vec<String>,

    #[arg(long)]
    aws_region: Option<String>,

    #[arg(long)]
    aws_profile: Option<String>,

    /// SSM target instance
    #[arg(long)]
    instance_id: Option<String>,

    #[arg(long)]
    gcp_project: Option<String>,

    #[arg(long)]
    gcp_zone: Option<String>,

    /// Tunnel gcloud ssh through IAP
    #[arg(long)]
    iap: bool,

    /// mosh-server path on the remote host
    #[arg(long)]
    mosh_server: Option<String>,

    #[arg(long, short)]
    group: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// Tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long)]
    favorite: bool,

    /// Template profile to inherit unset fields from
    #[arg(long)]
    extends: Option<String>,

    /// Read the profile's password from stdin
    #[arg(long)]
    password_stdin: bool,
}

impl AddArgs {
    fn into_profile(self) -> Profile {
        let mut profile = Profile::new(self.name, Protocol::Ssh, self.host);
        profile.protocol = match (self.protocol, &self.extends) {
            (Some(protocol), _) => Some(protocol.into()),
            (None, Some(_)) => None,
            (None, None) => Some(Protocol::Ssh.into()),
        };
        profile.port = self.port;
        profile.username = self.user.unwrap_or_default();
        profile.identity_file = self.identity.unwrap_or_default();
        profile.use_agent = self.agent;
        profile.proxy_jump = self.proxy_jump.unwrap_or_default();
        profile.local_forwards = self.local;
        profile.remote_forwards = self.remote;
        profile.dynamic_forwards = self.dynamic;
        profile.remote_command = self.remote_command.unwrap_or_default();
        profile.remote_dir = self.remote_dir.unwrap_or_default();
        profile.set_env = self.set_env;
        profile.extra_args = self.extra_args;
        profile.aws_region = self.aws_region.unwrap_or_default();
        profile.aws_profile = self.aws_profile.unwrap_or_default();
        profile.instance_id = self.instance_id.unwrap_or_default();
        profile.gcp_project = self.gcp_project.unwrap_or_default();
        profile.gcp_zone = self.gcp_zone.unwrap_or_default();
        profile.gcp_use_tunnel = self.iap;
        profile.mosh_server = self.mosh_server.unwrap_or_default();
        profile.group = self.group.unwrap_or_default();
        profile.description = self.description.unwrap_or_default();
        profile.tags = self.tags;
        profile.favorite = self.favorite;
        profile.extends = self.extends.unwrap_or_default();
        profile
    }
}

fn read_password() -> io::Result<String> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut app = App::open(cli.config)?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        None => app.run()?,
        Some(Commands::Connect { name, no_forward }) => app.connect(&name, no_forward)?,
        Some(Commands::List { group, json }) => app.list(&mut stdout, group.as_deref(), json)?,
        Some(Commands::Show { name, raw }) => app.show(&mut stdout, &name, raw)?,
        Some(Commands::Add(args)) => {
            let password = if args.password_stdin {
                Some(read_password()?)
            } else {
                None
            };
            let profile = args.into_profile();
            let name = profile.name.clone();
            app.add(profile, password.as_deref())?;
            println!("Added profile {name}");
        }
        Some(Commands::Edit {
            name,
            fields,
            password_stdin,
        }) => {
            let password = if password_stdin {
                Some(read_password()?)
            } else {
                None
            };
            app.edit(&name, fields.into_edit(), password.as_deref())?;
            println!("Updated profile {name}");
        }
        Some(Commands::Clone {
            source,
            new_name,
            fields,
        }) => {
            app.clone_profile(&source, &new_name, fields.into_edit())?;
            println!("Cloned {source} to {new_name}");
        }
        Some(Commands::Remove {
            name,
            delete_password,
        }) => {
            app.remove(&name, delete_password)?;
            println!("Removed profile {name}");
        }
        Some(Commands::Passwd { name, delete: true }) => {
            app.delete_password(&name)?;
            println!("Deleted password for {name}");
        }
        Some(Commands::Passwd { name, delete: false }) => {
            app.set_password(&name, &read_password()?)?;
            println!("Stored password for {name}");
        }
        Some(Commands::Favorite { name }) => {
            let favorite = app.toggle_favorite(&name)?;
            println!("{name} is {}a favorite", if favorite { "now " } else { "no longer " });
        }
        Some(Commands::SetBackend { kind }) => {
            app.set_backend(kind)?;
            println!("Default credential backend: {kind}");
        }
        Some(Commands::Backends) => app.backends(&mut stdout)?,
        Some(Commands::ImportSsh {
            file,
            group,
            prefix,
            overwrite,
            dry_run,
        }) => {
            let ssh_config = sshconfig::read_ssh_config(file.as_deref())?;
            let options = sshconfig::ImportOptions { group, prefix };
            let profiles = sshconfig::import_profiles(&ssh_config, &options);
            let summary = app.import(profiles, overwrite, dry_run)?;
            print_summary(&summary, dry_run);
        }
        Some(Commands::Export { file }) => {
            let count = app.export(&file)?;
            println!("Exported {count} profiles to {}", file.display());
        }
        Some(Commands::Import {
            file,
            overwrite,
            dry_run,
        }) => {
            let profiles = App::read_export(&file)?;
            let summary = app.import(profiles, overwrite, dry_run)?;
            print_summary(&summary, dry_run);
        }
        Some(Commands::Run { name, tty, command }) => app.exec(&name, &command, tty)?,
        Some(Commands::Test { name, timeout, .. }) => {
            app.test(&mut stdout, name.as_deref(), Duration::from_secs(timeout))?;
        }
    }
    Ok(())
}

fn print_summary(summary: &ImportSummary, dry_run: bool) {
    let verb = if dry_run { "Would import" } else { "Imported" };
    for name in &summary.added {
        println!("{verb} {name}");
    }
    for name in &summary.replaced {
        println!("{verb} {name} (replacing)");
    }
    for name in &summary.skipped {
        println!("Skipped {name}");
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The tool has already reported its own failure.
            let quiet = matches!(
                e.downcast_ref::<Error>(),
                Some(Error::Cancelled | Error::Exited { .. })
            );
            if !quiet {
                eprintln!("error: {e:#}");
            }
            ExitCode::from(exit_status(&e))
        }
    }
}

/// Process status for a failed run: 130 when interrupted, the tool's own
/// status when it failed, `128 + signal` when a signal killed it.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Cancelled) => EXIT_CANCELLED,
        Some(Error::Exited { code, .. }) => u8::try_from(*code).unwrap_or(1),
        Some(Error::Signaled { signal, .. }) => u8::try_from(128 + *signal).unwrap_or(1),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn cli_is_well_formed() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn add_collects_repeated_flags() {
        let cli = parse(&[
            "sshelf", "add", "web", "--host", "web.example.com", "-u", "deploy", "-L",
            "8080:localhost:80", "-L", "9090:localhost:90", "--tag", "prod", "--arg", "-v",
        ]);
        let Some(Commands::Add(args)) = cli.command else {
            panic!("expected add");
        };
        let profile = args.into_profile();
        assert_eq!(profile.protocol, Some(Protocol::Ssh.into()));
        assert_eq!(profile.username, "deploy");
        assert_eq!(profile.local_forwards, ["8080:localhost:80", "9090:localhost:90"]);
        assert_eq!(profile.tags, ["prod"]);
        assert_eq!(profile.extra_args, ["-v"]);
    }

    #[test]
    fn add_child_leaves_protocol_to_template() {
        let cli = parse(&["sshelf", "add", "api", "--extends", "base"]);
        let Some(Commands::Add(args)) = cli.command else {
            panic!("expected add");
        };
        let profile = args.into_profile();
        assert_eq!(profile.protocol, None);
        assert_eq!(profile.extends, "base");
    }

    #[test]
    fn backend_kind_parses() {
        let cli = parse(&["sshelf", "set-backend", "1password"]);
        assert!(matches!(
            cli.command,
            Some(Commands::SetBackend { kind: BackendKind::OnePassword })
        ));
        assert!(Cli::try_parse_from(["sshelf", "set-backend", "vault"]).is_err());
    }

    #[test]
    fn exit_status_follows_the_outcome() {
        let status = |e: Error| exit_status(&anyhow::Error::from(e));
        assert_eq!(status(Error::Cancelled), 130);
        assert_eq!(
            status(Error::Exited {
                program: "sshpass".into(),
                code: 5
            }),
            5
        );
        assert_eq!(
            status(Error::Signaled {
                program: "ssh".into(),
                signal: 9
            }),
            137
        );
        assert_eq!(status(Error::ProfileNotFound("web".into())), 1);
    }

    #[test]
    fn exit_status_sees_through_context() {
        use anyhow::Context;

        let err = Err::<(), _>(Error::Cancelled)
            .context("connecting to web")
            .unwrap_err();
        assert_eq!(exit_status(&err), 130);
    }

    #[test]
    fn edit_only_carries_given_flags() {
        let cli = parse(&["sshelf", "edit", "web", "--host", "new.example.com", "-p", "2200"]);
        let Some(Commands::Edit { name, fields, password_stdin }) = cli.command else {
            panic!("expected edit");
        };
        assert_eq!(name, "web");
        assert!(!password_stdin);
        let edit = fields.into_edit();
        assert_eq!(edit.host.as_deref(), Some("new.example.com"));
        assert_eq!(edit.port, Some(2200));
        assert!(edit.username.is_none());
        assert!(edit.tags.is_none());

        let cli = parse(&["sshelf", "edit", "web", "--clear-tags"]);
        let Some(Commands::Edit { fields, .. }) = cli.command else {
            panic!("expected edit");
        };
        assert_eq!(fields.into_edit().tags, Some(Vec::new()));
        assert!(Cli::try_parse_from(["sshelf", "edit", "web", "--clear-tags", "--tag", "x"]).is_err());
    }

    #[test]
    fn remove_keeps_password_by_default() {
        let cli = parse(&["sshelf", "remove", "web"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Remove { delete_password: false, .. })
        ));
        let cli = parse(&["sshelf", "remove", "web", "--delete-password"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Remove { delete_password: true, .. })
        ));
    }

    #[test]
    fn run_keeps_the_command_verbatim() {
        let cli = parse(&["sshelf", "run", "-t", "web", "ls", "-la", "/srv"]);
        let Some(Commands::Run { name, tty, command }) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(name, "web");
        assert!(tty);
        assert_eq!(command, ["ls", "-la", "/srv"]);
        assert!(Cli::try_parse_from(["sshelf", "run", "web"]).is_err());
    }

    #[test]
    fn test_needs_a_name_or_all() {
        assert!(Cli::try_parse_from(["sshelf", "test"]).is_err());
        assert!(Cli::try_parse_from(["sshelf", "test", "web", "--all"]).is_err());
        let cli = parse(&["sshelf", "test", "--all", "--timeout", "3"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Test { name: None, all: true, timeout: 3 })
        ));
    }

    #[test]
    fn clone_and_export_parse() {
        let cli = parse(&["sshelf", "clone", "web", "web2", "--host", "web2.example.com"]);
        let Some(Commands::Clone { source, new_name, fields }) = cli.command else {
            panic!("expected clone");
        };
        assert_eq!((source.as_str(), new_name.as_str()), ("web", "web2"));
        assert_eq!(fields.into_edit().host.as_deref(), Some("web2.example.com"));

        assert!(Cli::try_parse_from(["sshelf", "export"]).is_err());
        let cli = parse(&["sshelf", "import", "-f", "profiles.yaml", "--overwrite"]);
        assert!(matches!(cli.command, Some(Commands::Import { overwrite: true, .. })));
    }

    #[test]
    fn global_config_flag() {
        let cli = parse(&["sshelf", "list", "--json", "--config", "/tmp/x.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.yaml")));
    }
}
