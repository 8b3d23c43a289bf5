//! TLS certificate issuance through certbot's webroot plugin.

use std::io::{BufRead, Write};

use crate::error::ProvisionResult;
use crate::host::Host;
use crate::settings::Settings;

/// How the certificate stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A certificate for the domain was already on disk.
    Existing,
    Issued,
    /// The operator said no; manual instructions were printed.
    Declined,
}

/// Whether a certificate for the domain is already installed.
#[must_use]
pub fn present(host: &dyn Host, settings: &Settings) -> bool {
    host.exists(&settings.certificate_dir().join("fullchain.pem"))
}

/// Ask the operator whether to request a certificate now. Only
/// `y` or `yes` (any case) counts as consent; end of input or an
/// answer that is not valid UTF-8 is a no.
pub fn confirm(
    input: &mut dyn BufRead,
    out: &mut dyn Write,
    settings: &Settings,
) -> ProvisionResult<bool> {
    write!(
        out,
        "Request a Let's Encrypt certificate for {} and {} now? \
         DNS must already point at this host. [y/N] ",
        settings.domain,
        settings.www_domain()
    )?;
    out.flush()?;

    let mut line = Vec::new();
    input.read_until(b'\n', &mut line)?;
    let answer = String::from_utf8_lossy(&line).trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Arguments for a non-interactive `certbot certonly` run.
#[must_use]
pub fn certbot_args(settings: &Settings) -> Vec<String> {
    let mut args = vec![
        "certonly".to_string(),
        "--webroot".to_string(),
        "-w".to_string(),
        settings.acme_webroot.display().to_string(),
        "-d".to_string(),
        settings.domain.clone(),
        "-d".to_string(),
        settings.www_domain(),
        "--agree-tos".to_string(),
        "--non-interactive".to_string(),
    ];
    match &settings.email {
        Some(email) => {
            args.push("--email".to_string());
            args.push(email.clone());
        }
        None => args.push("--register-unsafely-without-email".to_string()),
    }
    args
}

/// Request the certificate when `approved`, or print how to do it
/// by hand when not.
pub fn acquire(
    host: &dyn Host,
    settings: &Settings,
    approved: bool,
    out: &mut dyn Write,
) -> ProvisionResult<Outcome> {
    if !approved {
        write_manual_instructions(out, settings)?;
        return Ok(Outcome::Declined);
    }

    let args = certbot_args(settings);
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    host.run("certbot", &refs)?;
    tracing::info!(domain = %settings.domain, "certificate issued");
    Ok(Outcome::Issued)
}

/// Tell the operator how to obtain the certificate later.
pub fn write_manual_instructions(out: &mut dyn Write, settings: &Settings) -> ProvisionResult<()> {
    let args = certbot_args(settings).join(" ");
    writeln!(out)?;
    writeln!(out, "Skipping certificate request.")?;
    writeln!(
        out,
        "Once DNS for {} and {} points at this host, run:",
        settings.domain,
        settings.www_domain()
    )?;
    let env = settings.env_file();
    let backup = env.with_file_name(".env.bak");
    writeln!(out, "  sudo certbot {args}")?;
    writeln!(out, "then rerun this tool to switch the site to HTTPS:")?;
    writeln!(out, "  sudo alicerce {}", settings.domain)?;
    writeln!(
        out,
        "Rerunning regenerates {} with placeholder values. Keep a copy of",
        env.display()
    )?;
    writeln!(out, "your edits and restore it afterwards:")?;
    writeln!(out, "  sudo cp -p {} {}", env.display(), backup.display())?;
    writeln!(out, "  sudo alicerce {}", settings.domain)?;
    writeln!(out, "  sudo cp -p {} {}", backup.display(), env.display())?;
    writeln!(out, "  sudo systemctl restart {}", settings.unit_name())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Recorder;

    fn ask(answer: &str) -> bool {
        let settings = Settings::new("example.com");
        let mut input = answer.as_bytes();
        let mut out = Vec::new();
        confirm(&mut input, &mut out, &settings).unwrap()
    }

    #[test]
    fn yes_answers() {
        assert!(ask("y\n"));
        assert!(ask("Y\n"));
        assert!(ask("yes\n"));
        assert!(ask("  YES  \n"));
    }

    #[test]
    fn everything_else_is_no() {
        assert!(!ask("n\n"));
        assert!(!ask("\n"));
        assert!(!ask("yep\n"));
        assert!(!ask(""));
    }

    #[test]
    fn invalid_utf8_answer_is_no() {
        let settings = Settings::new("example.com");
        let mut input: &[u8] = &[0xff, 0xfe, b'\n'];
        let mut out = Vec::new();

        assert!(!confirm(&mut input, &mut out, &settings).unwrap());
    }

    #[test]
    fn prompt_names_both_hosts() {
        let settings = Settings::new("example.com");
        let mut input: &[u8] = b"n\n";
        let mut out = Vec::new();

        confirm(&mut input, &mut out, &settings).unwrap();

        let prompt = String::from_utf8(out).unwrap();
        assert!(prompt.contains("example.com and www.example.com"));
        assert!(prompt.ends_with("[y/N] "));
    }

    #[test]
    fn certbot_args_without_email() {
        let settings = Settings::new("example.com");

        let args = certbot_args(&settings).join(" ");

        assert_eq!(
            args,
            "certonly --webroot -w /var/www/html -d example.com -d www.example.com \
             --agree-tos --non-interactive --register-unsafely-without-email"
        );
    }

    #[test]
    fn certbot_args_with_email() {
        let settings = Settings::new("example.com").email("ops@example.com");

        let args = certbot_args(&settings);

        assert!(args.ends_with(&["--email".to_string(), "ops@example.com".to_string()]));
        assert!(!args.contains(&"--register-unsafely-without-email".to_string()));
    }

    #[test]
    fn declined_prints_instructions_and_skips_certbot() {
        let settings = Settings::new("example.com");
        let host = Recorder::new();
        let mut out = Vec::new();

        let outcome = acquire(&host, &settings, false, &mut out).unwrap();

        assert_eq!(outcome, Outcome::Declined);
        assert!(!host.ran("certbot"));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("sudo certbot certonly --webroot"));
    }

    #[test]
    fn manual_instructions_warn_that_rerun_regenerates_env() {
        let settings = Settings::new("example.com");
        let mut out = Vec::new();

        write_manual_instructions(&mut out, &settings).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Rerunning regenerates /opt/epaper-api/.env"));
        assert!(text.contains("sudo cp -p /opt/epaper-api/.env /opt/epaper-api/.env.bak"));
        assert!(text.contains("sudo cp -p /opt/epaper-api/.env.bak /opt/epaper-api/.env"));
        assert!(text.contains("sudo systemctl restart epaper-api.service"));
    }

    #[test]
    fn approved_runs_certbot() {
        let settings = Settings::new("example.com");
        let host = Recorder::new();
        let mut out = Vec::new();

        let outcome = acquire(&host, &settings, true, &mut out).unwrap();

        assert_eq!(outcome, Outcome::Issued);
        assert!(host.ran("certbot"));
        assert!(out.is_empty());
    }

    #[test]
    fn present_checks_fullchain() {
        let settings = Settings::new("example.com");
        let host = Recorder::new()
            .with_path("/etc/letsencrypt/live/example.com/fullchain.pem");

        assert!(present(&host, &settings));
        assert!(!present(&Recorder::new(), &settings));
    }
}
