//! The API's runtime configuration: a flat `KEY=value` file read
//! by systemd through `EnvironmentFile=`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{ProvisionError, ProvisionResult};
use crate::host::Host;
use crate::settings::Settings;

/// Marks a value the operator must replace after provisioning.
pub const PLACEHOLDER: &str = "CHANGE_ME";

/// Owner read/write only.
pub const MODE: u32 = 0o600;

/// Keys every generated file carries, in file order.
pub const KEYS: &[&str] = &[
    "APP_ENV",
    "DEBUG",
    "HOST",
    "PORT",
    "WORKERS",
    "MAX_UPLOAD_SIZE_MB",
    "TEMP_DIR",
    "OLLAMA_HOST",
    "OLLAMA_MODEL",
    "WORDPRESS_URL",
    "WORDPRESS_USERNAME",
    "WORDPRESS_PASSWORD",
    "WORDPRESS_CATEGORIES_URL",
    "WORDPRESS_AUTHORS_URL",
    "WORDPRESS_ENABLE_POSTING",
    "LOG_LEVEL",
    "LOG_FILE",
    "REQUIRE_AUTH",
    "API_KEY",
];

/// The entries written for `settings`: production defaults for
/// [`KEYS`], then `settings.env` layered on top.
#[must_use]
pub fn entries(settings: &Settings) -> IndexMap<String, String> {
    let wp = format!("https://{PLACEHOLDER}/wp-json/wp/v2");
    let defaults = [
        ("APP_ENV", "production".to_string()),
        ("DEBUG", "false".to_string()),
        ("HOST", "127.0.0.1".to_string()),
        ("PORT", settings.port.to_string()),
        ("WORKERS", settings.workers.to_string()),
        ("MAX_UPLOAD_SIZE_MB", settings.max_upload_mb.to_string()),
        ("TEMP_DIR", "/tmp/epaper-uploads".to_string()),
        ("OLLAMA_HOST", "http://localhost:11434".to_string()),
        ("OLLAMA_MODEL", "mistral".to_string()),
        ("WORDPRESS_URL", format!("{wp}/posts")),
        ("WORDPRESS_USERNAME", PLACEHOLDER.to_string()),
        ("WORDPRESS_PASSWORD", PLACEHOLDER.to_string()),
        ("WORDPRESS_CATEGORIES_URL", format!("{wp}/categories?per_page=100")),
        ("WORDPRESS_AUTHORS_URL", format!("{wp}/users?per_page=100")),
        ("WORDPRESS_ENABLE_POSTING", "false".to_string()),
        ("LOG_LEVEL", "INFO".to_string()),
        ("LOG_FILE", String::new()),
        ("REQUIRE_AUTH", "false".to_string()),
        ("API_KEY", PLACEHOLDER.to_string()),
    ];

    let mut map: IndexMap<String, String> = defaults
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    for (k, v) in &settings.env {
        map.insert(k.clone(), v.clone());
    }
    map
}

#[must_use]
pub fn render(settings: &Settings) -> String {
    let mut out = format!(
        "# Runtime configuration for {}.\n\
         # Replace every {PLACEHOLDER} value, then restart the service.\n",
        settings.app_name
    );
    for (k, v) in entries(settings) {
        out.push_str(&k);
        out.push('=');
        out.push_str(&v);
        out.push('\n');
    }
    out
}

/// Write the env file with mode [`MODE`] and give it to the
/// service account. Returns the path written.
pub fn write(host: &dyn Host, settings: &Settings) -> ProvisionResult<PathBuf> {
    let path = settings.env_file();
    host.write_file(&path, &render(settings), Some(MODE))?;

    let owner = format!("{}:{}", settings.app_user, settings.app_group);
    host.run("chown", &[&owner, &path.to_string_lossy()])?;
    Ok(path)
}

/// Parse `KEY=value` lines. Blank lines and `#` comments are
/// skipped; values are taken verbatim after the first `=`.
pub fn parse(content: &str) -> ProvisionResult<IndexMap<String, String>> {
    let mut map = IndexMap::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ProvisionError::InvalidConfig(format!(
                "line {}: expected KEY=value",
                n + 1
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ProvisionError::InvalidConfig(format!(
                "line {}: empty key",
                n + 1
            )));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

/// Findings from [`verify`]. Errors fail the check; warnings are
/// values the operator still has to fill in.
#[derive(Debug, Default)]
pub struct Report {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Report {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Inspect an env file on disk: it parses, it has every key in
/// [`KEYS`], only its owner can read it, and the WordPress
/// endpoint and any placeholders have been filled in.
pub fn verify(path: &Path) -> ProvisionResult<Report> {
    if !path.exists() {
        return Err(ProvisionError::FileNotFound(path.display().to_string()));
    }

    let mut report = Report::default();

    let mode = fs::metadata(path)?.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        report.errors.push(format!(
            "mode {mode:o} lets other accounts read it; run: chmod 600 {}",
            path.display()
        ));
    }

    let entries = match parse(&fs::read_to_string(path)?) {
        Ok(entries) => entries,
        Err(e) => {
            report.errors.push(e.to_string());
            return Ok(report);
        }
    };

    for key in KEYS {
        if !entries.contains_key(*key) {
            report.errors.push(format!("missing key {key}"));
        }
    }

    for key in ["WORDPRESS_URL", "WORDPRESS_USERNAME"] {
        if entries.get(key).is_some_and(String::is_empty) {
            report.warnings.push(format!("{key} is empty"));
        }
    }

    for (key, value) in &entries {
        if value.contains(PLACEHOLDER) {
            report.warnings.push(format!("{key} still holds {PLACEHOLDER}"));
        }
    }

    Ok(report)
}
