use std::fmt;
use std::io::{BufRead, Write};

use crate::app;
use crate::certificate::{self, Outcome};
use crate::envfile;
use crate::error::{ProvisionError, ProvisionResult};
use crate::firewall;
use crate::host::Host;
use crate::nginx::{self, SiteMode};
use crate::packages;
use crate::settings::Settings;
use crate::systemd;

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failed step.
    #[default]
    Halt,
    /// Log the failure, list it in the summary, and move on.
    /// A missing or uncloneable application tree still stops the
    /// run.
    KeepGoing,
}

/// How the certificate prompt is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificatePolicy {
    #[default]
    Ask,
    Accept,
}

/// The numbered steps of a run. Argument validation is step 1 and
/// the summary is the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Packages,
    Firewall,
    Source,
    Environment,
    ProxyConfig,
    ProxyStart,
    Certificate,
    RuntimeConfig,
    Service,
    Summary,
}

impl Stage {
    pub const TOTAL: usize = 11;

    #[must_use]
    pub const fn number(self) -> usize {
        match self {
            Self::Packages => 2,
            Self::Firewall => 3,
            Self::Source => 4,
            Self::Environment => 5,
            Self::ProxyConfig => 6,
            Self::ProxyStart => 7,
            Self::Certificate => 8,
            Self::RuntimeConfig => 9,
            Self::Service => 10,
            Self::Summary => 11,
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Packages => "Installing system packages",
            Self::Firewall => "Configuring firewall",
            Self::Source => "Checking application source",
            Self::Environment => "Building Python environment",
            Self::ProxyConfig => "Writing nginx site",
            Self::ProxyStart => "Starting nginx",
            Self::Certificate => "TLS certificate",
            Self::RuntimeConfig => "Writing runtime configuration",
            Self::Service => "Installing systemd service",
            Self::Summary => "Summary",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}",
            self.number(),
            Self::TOTAL,
            self.description()
        )
    }
}

/// What a run did, for the summary.
#[derive(Debug, Default)]
pub struct Report {
    pub certificate: Option<Outcome>,
    /// Steps that failed under [`FailurePolicy::KeepGoing`].
    pub failed: Vec<(Stage, String)>,
}

impl Report {
    /// Whether nginx is serving the site over TLS at the end of the
    /// run.
    #[must_use]
    pub fn https(&self) -> bool {
        match self.certificate {
            Some(Outcome::Existing) => true,
            Some(Outcome::Issued) => !self.switch_failed(),
            Some(Outcome::Declined) | None => false,
        }
    }

    /// A certificate was issued but nginx was not switched to it.
    fn switch_failed(&self) -> bool {
        self.certificate == Some(Outcome::Issued)
            && self.failed.iter().any(|(stage, _)| *stage == Stage::Certificate)
    }
}

/// One provisioning run against a host.
pub struct Provisioner<'a> {
    settings: Settings,
    host: &'a dyn Host,
    failure: FailurePolicy,
    certificate: CertificatePolicy,
    check_prerequisites: bool,
}

impl<'a> Provisioner<'a> {
    #[must_use]
    pub fn new(settings: Settings, host: &'a dyn Host) -> Self {
        Self {
            settings,
            host,
            failure: FailurePolicy::default(),
            certificate: CertificatePolicy::default(),
            check_prerequisites: true,
        }
    }

    #[must_use]
    pub const fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure = policy;
        self
    }

    #[must_use]
    pub const fn certificate_policy(mut self, policy: CertificatePolicy) -> Self {
        self.certificate = policy;
        self
    }

    /// Skip the root and package-manager checks. Used for dry runs.
    #[must_use]
    pub const fn skip_prerequisites(mut self) -> Self {
        self.check_prerequisites = false;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The procedure needs root and apt.
    pub fn prerequisites(&self) -> ProvisionResult<()> {
        let uid = self.host.output("id", &["-u"])?;
        if uid.trim() != "0" {
            return Err(ProvisionError::PrerequisiteMissing(
                "must run as root (try sudo)".into(),
            ));
        }
        if !self.host.command_exists("apt-get") {
            return Err(ProvisionError::PrerequisiteMissing(
                "apt-get not found; only Debian and Ubuntu hosts are supported".into(),
            ));
        }
        Ok(())
    }

    /// Run every stage in order, then print the summary. Progress
    /// goes to `out`; the certificate prompt reads from `input`.
    pub fn run(&self, input: &mut dyn BufRead, out: &mut dyn Write) -> ProvisionResult<Report> {
        let s = &self.settings;
        let host = self.host;
        s.validate()?;

        writeln!(out, "[1/{}] Provisioning {}", Stage::TOTAL, s.domain)?;
        if self.check_prerequisites {
            self.prerequisites()?;
        }

        let mut report = Report::default();

        self.step(Stage::Packages, out, &mut report, || packages::install(host))?;
        self.step(Stage::Firewall, out, &mut report, || firewall::configure(host))?;
        // Later stages all act on the checkout, so this one never
        // falls under the keep-going policy.
        writeln!(out, "{}", Stage::Source)?;
        app::ensure_present(host, s)?;
        self.step(Stage::Environment, out, &mut report, || {
            app::ensure_user(host, s)?;
            app::build_environment(host, s)
        })?;

        let have_certificate = certificate::present(host, s);
        let mode = if have_certificate {
            SiteMode::Tls
        } else {
            SiteMode::Bootstrap
        };
        self.step(Stage::ProxyConfig, out, &mut report, || {
            nginx::activate(host, s, mode)
        })?;
        self.step(Stage::ProxyStart, out, &mut report, || nginx::start(host))?;

        writeln!(out, "{}", Stage::Certificate)?;
        let outcome = if have_certificate {
            writeln!(out, "  Certificate for {} already present", s.domain)?;
            Some(Outcome::Existing)
        } else {
            let approved = match self.certificate {
                CertificatePolicy::Accept => true,
                CertificatePolicy::Ask => certificate::confirm(input, out, s)?,
            };
            let result = certificate::acquire(host, s, approved, out);
            self.settle(Stage::Certificate, result, out, &mut report)?
        };
        report.certificate = outcome;
        if outcome == Some(Outcome::Issued) {
            // The certificate stays recorded as issued even if nginx
            // cannot be switched over to it.
            let switched =
                nginx::activate(host, s, SiteMode::Tls).and_then(|()| nginx::reload(host));
            self.settle(Stage::Certificate, switched, out, &mut report)?;
        }

        self.step(Stage::RuntimeConfig, out, &mut report, || {
            envfile::write(host, s).map(|_| ())
        })?;
        self.step(Stage::Service, out, &mut report, || systemd::install(host, s))?;

        writeln!(out, "{}", Stage::Summary)?;
        write_summary(out, s, &report)?;
        Ok(report)
    }

    fn step<T>(
        &self,
        stage: Stage,
        out: &mut dyn Write,
        report: &mut Report,
        f: impl FnOnce() -> ProvisionResult<T>,
    ) -> ProvisionResult<Option<T>> {
        writeln!(out, "{stage}")?;
        self.settle(stage, f(), out, report)
    }

    fn settle<T>(
        &self,
        stage: Stage,
        result: ProvisionResult<T>,
        out: &mut dyn Write,
        report: &mut Report,
    ) -> ProvisionResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.failure == FailurePolicy::KeepGoing && e.is_recoverable() => {
                tracing::warn!(stage = stage.description(), error = %e, "step failed, continuing");
                writeln!(out, "  FAILED: {e} (continuing)")?;
                report.failed.push((stage, e.to_string()));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Final operator-facing summary with the commands needed to run
/// the service day to day.
pub fn write_summary(out: &mut dyn Write, s: &Settings, report: &Report) -> ProvisionResult<()> {
    let unit = s.unit_name();
    let scheme = if report.https() { "https" } else { "http" };
    let certificate = match report.certificate {
        Some(Outcome::Existing) => "already present",
        Some(Outcome::Issued) if report.switch_failed() => {
            "issued, but nginx still serves plain HTTP"
        }
        Some(Outcome::Issued) => "issued",
        Some(Outcome::Declined) => "not requested",
        None => "request failed",
    };

    writeln!(out)?;
    writeln!(out, "========================================")?;
    if report.failed.is_empty() {
        writeln!(out, "Provisioning complete!")?;
    } else {
        writeln!(out, "Provisioning finished with failures")?;
    }
    writeln!(out, "========================================")?;
    writeln!(out)?;
    writeln!(out, "URL:         {scheme}://{}", s.domain)?;
    writeln!(out, "Application: {}", s.app_dir.display())?;
    writeln!(out, "Site config: {}", s.site_path().display())?;
    writeln!(out, "Unit:        {}", s.unit_path().display())?;
    writeln!(out, "Env file:    {}", s.env_file().display())?;
    writeln!(out, "Certificate: {certificate}")?;

    if !report.failed.is_empty() {
        writeln!(out)?;
        writeln!(out, "Failed steps:")?;
        for (stage, error) in &report.failed {
            writeln!(out, "  {stage}: {error}")?;
        }
    }

    writeln!(out)?;
    writeln!(
        out,
        "Edit the {} values in {}, then restart the service.",
        envfile::PLACEHOLDER,
        s.env_file().display()
    )?;
    writeln!(out)?;
    writeln!(out, "Useful commands:")?;
    writeln!(out, "  View logs:  sudo journalctl -u {unit} -f")?;
    writeln!(out, "  Status:     sudo systemctl status {unit}")?;
    writeln!(out, "  Restart:    sudo systemctl restart {unit}")?;
    writeln!(
        out,
        "  Check env:  sudo alicerce verify --env-file {}",
        s.env_file().display()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Recorder;

    #[test]
    fn stage_display() {
        assert_eq!(
            Stage::Firewall.to_string(),
            "[3/11] Configuring firewall"
        );
        assert_eq!(
            Stage::Service.to_string(),
            "[10/11] Installing systemd service"
        );
        assert_eq!(Stage::Summary.to_string(), "[11/11] Summary");
        assert_eq!(Stage::Summary.number(), Stage::TOTAL);
    }

    #[test]
    fn prerequisites_require_root() {
        let host = Recorder::new().with_output("id", "1000");
        let p = Provisioner::new(Settings::new("example.com"), &host);

        let err = p.prerequisites().unwrap_err();

        assert_eq!(
            err.to_string(),
            "prerequisite missing: must run as root (try sudo)"
        );
    }

    #[test]
    fn prerequisites_require_apt() {
        let host = Recorder::new().with_output("id", "0").failing("apt-get");
        let p = Provisioner::new(Settings::new("example.com"), &host);

        assert!(matches!(
            p.prerequisites(),
            Err(ProvisionError::PrerequisiteMissing(_))
        ));
    }

    #[test]
    fn summary_lists_operational_commands() {
        let settings = Settings::new("example.com");
        let report = Report {
            certificate: Some(Outcome::Issued),
            failed: Vec::new(),
        };
        let mut out = Vec::new();

        write_summary(&mut out, &settings, &report).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Provisioning complete!"));
        assert!(text.contains("URL:         https://example.com"));
        assert!(text.contains("sudo journalctl -u epaper-api.service -f"));
        assert!(text.contains("sudo systemctl status epaper-api.service"));
        assert!(text.contains("sudo systemctl restart epaper-api.service"));
    }

    #[test]
    fn summary_reports_failures_and_plain_http() {
        let settings = Settings::new("example.com");
        let report = Report {
            certificate: Some(Outcome::Declined),
            failed: vec![(Stage::Firewall, "command failed: ufw allow OpenSSH".into())],
        };
        let mut out = Vec::new();

        write_summary(&mut out, &settings, &report).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Provisioning finished with failures"));
        assert!(text.contains("URL:         http://example.com"));
        assert!(text.contains("[3/11] Configuring firewall: command failed: ufw allow OpenSSH"));
        assert!(text.contains("Certificate: not requested"));
    }

    #[test]
    fn summary_flags_issued_certificate_left_unused() {
        let settings = Settings::new("example.com");
        let report = Report {
            certificate: Some(Outcome::Issued),
            failed: vec![(Stage::Certificate, "command failed: nginx -t".into())],
        };
        let mut out = Vec::new();

        write_summary(&mut out, &settings, &report).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(!report.https());
        assert!(text.contains("URL:         http://example.com"));
        assert!(text.contains("Certificate: issued, but nginx still serves plain HTTP"));
    }
}
