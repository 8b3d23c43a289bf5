use std::io::{self, Write};
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use crate::envfile;
use crate::error::{ProvisionError, ProvisionResult};
use crate::host::{Recorder, SystemHost};
use crate::pipeline::{CertificatePolicy, FailurePolicy, Provisioner};
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "alicerce", version)]
#[command(about = "Provision this host to serve the API behind nginx with TLS")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Domain the API is served on (www.<domain> is added)
    domain: Option<String>,

    /// YAML settings file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Application checkout to serve
    #[arg(long)]
    app_dir: Option<PathBuf>,

    /// Account the service runs as
    #[arg(long)]
    user: Option<String>,

    /// Loopback port uvicorn listens on
    #[arg(long)]
    port: Option<u16>,

    /// Uvicorn worker processes
    #[arg(long)]
    workers: Option<u16>,

    /// Git URL cloned when the application directory is missing
    #[arg(long)]
    repo: Option<String>,

    /// Contact e-mail registered with Let's Encrypt
    #[arg(long)]
    email: Option<String>,

    /// Request the certificate without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Continue past failed steps instead of stopping
    #[arg(long)]
    keep_going: bool,

    /// Print generated files and planned actions without changing
    /// anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a runtime env file for missing keys, placeholders,
    /// and loose permissions
    Verify {
        /// Env file to check (defaults to <app-dir>/.env)
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// YAML settings file used to locate the env file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Application checkout holding the env file
        #[arg(long)]
        app_dir: Option<PathBuf>,
    },
}

impl Cli {
    /// Settings from the config file (if any) with flags applied
    /// on top.
    fn settings(&self) -> ProvisionResult<Settings> {
        let mut settings = load_settings(self.config.as_ref())?;

        if let Some(domain) = &self.domain {
            settings = settings.domain(domain);
        }
        if let Some(dir) = &self.app_dir {
            settings = settings.app_dir(dir);
        }
        if let Some(user) = &self.user {
            settings = settings.app_user(user).app_group(user);
        }
        if let Some(port) = self.port {
            settings = settings.port(port);
        }
        if let Some(workers) = self.workers {
            settings = settings.workers(workers);
        }
        if let Some(repo) = &self.repo {
            settings = settings.repo(repo);
        }
        if let Some(email) = &self.email {
            settings = settings.email(email);
        }
        Ok(settings)
    }
}

/// Parse the command line and dispatch.
pub fn run() -> ProvisionResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Verify {
            env_file,
            config,
            app_dir,
        }) => cmd_verify(env_file.as_ref(), config.as_ref(), app_dir.as_ref()),
        None => cmd_provision(&cli),
    }
}

/// The domain is the one required input.
pub fn validate_args(domain: Option<&str>) -> ProvisionResult<String> {
    match domain.map(str::trim) {
        Some(d) if !d.is_empty() => Ok(d.to_string()),
        _ => Err(ProvisionError::Usage(
            "a domain name is required, e.g. alicerce api.example.com".into(),
        )),
    }
}

fn cmd_provision(cli: &Cli) -> ProvisionResult<()> {
    let settings = cli.settings()?;
    let given = cli
        .domain
        .as_deref()
        .or_else(|| Some(settings.domain.as_str()).filter(|d| !d.is_empty()));
    let domain = match validate_args(given) {
        Ok(domain) => domain,
        Err(e) => {
            eprintln!("{}", Cli::command().render_usage());
            return Err(e);
        }
    };
    let settings = settings.domain(&domain);

    if cli.dry_run {
        return cmd_dry_run(settings);
    }

    let failure = if cli.keep_going {
        FailurePolicy::KeepGoing
    } else {
        FailurePolicy::Halt
    };
    let certificate = if cli.yes {
        CertificatePolicy::Accept
    } else {
        CertificatePolicy::Ask
    };

    let host = SystemHost;
    let provisioner = Provisioner::new(settings, &host)
        .failure_policy(failure)
        .certificate_policy(certificate);

    let report = {
        let mut input = io::stdin().lock();
        let mut out = io::stdout().lock();
        provisioner.run(&mut input, &mut out)?
    };

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(ProvisionError::StepsFailed(report.failed.len()))
    }
}

fn cmd_dry_run(settings: Settings) -> ProvisionResult<()> {
    if !settings.app_dir.exists() && settings.repo.is_none() {
        eprintln!(
            "note: {} does not exist; a real run would stop at step 4",
            settings.app_dir.display()
        );
    }

    let recorder = Recorder::new()
        .reading_filesystem()
        .with_path(&settings.app_dir);
    let provisioner = Provisioner::new(settings, &recorder)
        .skip_prerequisites()
        .certificate_policy(CertificatePolicy::Accept);

    let mut input = io::empty();
    let mut sink = io::sink();
    provisioner.run(&mut input, &mut sink)?;

    eprintln!("=== Dry run: no changes will be made ===");
    eprintln!();
    for (path, content) in recorder.files() {
        eprintln!("--- {} ---", path.display());
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{content}")?;
        stdout.flush()?;
    }

    eprintln!("--- Actions that would be performed ---");
    for (n, action) in recorder.actions().iter().enumerate() {
        eprintln!("{}. {action}", n + 1);
    }
    Ok(())
}

fn cmd_verify(
    env_file: Option<&PathBuf>,
    config: Option<&PathBuf>,
    app_dir: Option<&PathBuf>,
) -> ProvisionResult<()> {
    let path = if let Some(path) = env_file {
        path.clone()
    } else {
        let mut settings = load_settings(config)?;
        if let Some(dir) = app_dir {
            settings = settings.app_dir(dir);
        }
        settings.env_file()
    };

    let report = envfile::verify(&path)?;
    let mut out = io::stdout().lock();
    writeln!(out, "Checking {}", path.display())?;
    for error in &report.errors {
        writeln!(out, "  error:   {error}")?;
    }
    for warning in &report.warnings {
        writeln!(out, "  warning: {warning}")?;
    }

    if report.passed() {
        writeln!(out, "OK ({} warning(s))", report.warnings.len())?;
        Ok(())
    } else {
        Err(ProvisionError::VerificationFailed(format!(
            "{} error(s) in {}",
            report.errors.len(),
            path.display()
        )))
    }
}

fn load_settings(config: Option<&PathBuf>) -> ProvisionResult<Settings> {
    match config {
        Some(path) => Settings::from_yaml_file(path),
        None => Ok(Settings::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn validate_args_requires_domain() {
        assert!(matches!(validate_args(None), Err(ProvisionError::Usage(_))));
        assert!(matches!(
            validate_args(Some("  ")),
            Err(ProvisionError::Usage(_))
        ));
        assert_eq!(validate_args(Some("example.com")).unwrap(), "example.com");
    }

    #[test]
    fn positional_domain() {
        let cli = parse(&["alicerce", "example.com"]);

        assert_eq!(cli.domain.as_deref(), Some("example.com"));
        assert!(cli.command.is_none());
        assert!(!cli.dry_run);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = parse(&[
            "alicerce",
            "example.com",
            "--port",
            "9000",
            "--app-dir",
            "/srv/api",
            "--user",
            "epaper",
            "--email",
            "ops@example.com",
        ]);

        let settings = cli.settings().unwrap();

        assert_eq!(settings.domain, "example.com");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.app_dir, PathBuf::from("/srv/api"));
        assert_eq!(settings.app_user, "epaper");
        assert_eq!(settings.app_group, "epaper");
        assert_eq!(settings.email.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn verify_subcommand() {
        let cli = parse(&["alicerce", "verify", "--env-file", "/tmp/x.env"]);

        assert!(cli.domain.is_none());
        assert!(matches!(
            cli.command,
            Some(Command::Verify { env_file: Some(ref p), .. }) if p == &PathBuf::from("/tmp/x.env")
        ));
    }

    #[test]
    fn no_arguments_parses_without_domain() {
        let cli = parse(&["alicerce"]);

        assert!(cli.domain.is_none());
        assert!(cmd_provision(&cli).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
