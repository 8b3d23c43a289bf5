use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{ProvisionError, ProvisionResult};

/// What to provision and where it lands on the host.
///
/// Every value is fixed for one run. Defaults match a stock
/// Ubuntu host with nginx and systemd.
///
/// # Example
///
/// ```
/// use alicerce::Settings;
///
/// let settings = Settings::new("news.example.com")
///     .app_dir("/srv/epaper-api")
///     .port(9000)
///     .workers(2);
///
/// assert_eq!(settings.domain, "news.example.com");
/// assert_eq!(settings.port, 9000);
/// assert_eq!(settings.unit_name(), "epaper-api.service");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub domain: String,
    /// Names the nginx site, the systemd unit, and the upstream.
    pub app_name: String,
    pub app_user: String,
    pub app_group: String,
    pub app_dir: PathBuf,
    pub port: u16,
    pub workers: u16,
    /// Cloned into `app_dir` when the directory is absent.
    pub repo: Option<String>,
    /// Contact address registered with the certificate authority.
    pub email: Option<String>,
    /// ASGI entry point handed to uvicorn.
    pub asgi_app: String,
    pub max_upload_mb: u32,
    pub nginx_available_dir: PathBuf,
    pub nginx_enabled_dir: PathBuf,
    pub systemd_dir: PathBuf,
    pub letsencrypt_dir: PathBuf,
    pub acme_webroot: PathBuf,
    /// Extra `.env` entries appended after the fixed keys. A key
    /// that matches a fixed key overrides its value in place.
    pub env: IndexMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            domain: String::new(),
            app_name: "epaper-api".to_string(),
            app_user: "www-data".to_string(),
            app_group: "www-data".to_string(),
            app_dir: PathBuf::from("/opt/epaper-api"),
            port: 8000,
            workers: 4,
            repo: None,
            email: None,
            asgi_app: "main:app".to_string(),
            max_upload_mb: 100,
            nginx_available_dir: PathBuf::from("/etc/nginx/sites-available"),
            nginx_enabled_dir: PathBuf::from("/etc/nginx/sites-enabled"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            letsencrypt_dir: PathBuf::from("/etc/letsencrypt/live"),
            acme_webroot: PathBuf::from("/var/www/html"),
            env: IndexMap::new(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..Self::default()
        }
    }

    /// Load settings from a YAML file. Missing keys keep their
    /// defaults.
    pub fn from_yaml_file(path: &Path) -> ProvisionResult<Self> {
        if !path.exists() {
            return Err(ProvisionError::FileNotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> ProvisionResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    #[must_use]
    pub fn app_name(mut self, name: &str) -> Self {
        self.app_name = name.to_string();
        self
    }

    #[must_use]
    pub fn app_user(mut self, user: &str) -> Self {
        self.app_user = user.to_string();
        self
    }

    #[must_use]
    pub fn app_group(mut self, group: &str) -> Self {
        self.app_group = group.to_string();
        self
    }

    #[must_use]
    pub fn app_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.app_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn workers(mut self, workers: u16) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn repo(mut self, url: &str) -> Self {
        self.repo = Some(url.to_string());
        self
    }

    #[must_use]
    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Point every host directory the tool writes to under `root`.
    /// Used to stage a run inside a scratch directory.
    #[must_use]
    pub fn rooted_at(mut self, root: &Path) -> Self {
        let reroot = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        self.app_dir = reroot(&self.app_dir);
        self.nginx_available_dir = reroot(&self.nginx_available_dir);
        self.nginx_enabled_dir = reroot(&self.nginx_enabled_dir);
        self.systemd_dir = reroot(&self.systemd_dir);
        self.letsencrypt_dir = reroot(&self.letsencrypt_dir);
        self.acme_webroot = reroot(&self.acme_webroot);
        self
    }

    /// Check the values that get substituted into generated files.
    pub fn validate(&self) -> ProvisionResult<()> {
        let domain = self.domain.as_str();
        if domain.trim().is_empty() {
            return Err(ProvisionError::Usage(
                "a domain name is required".to_string(),
            ));
        }
        if !is_host_name(domain) {
            return Err(ProvisionError::InvalidConfig(format!(
                "domain '{domain}' is not a host name (letters, digits, '-' and '.' only)"
            )));
        }
        if self.port == 0 {
            return Err(ProvisionError::InvalidConfig(
                "port must be non-zero".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ProvisionError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.app_name.is_empty()
            || !self
                .app_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProvisionError::InvalidConfig(format!(
                "app name '{}' must be alphanumeric, '-' or '_'",
                self.app_name
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.app_name)
    }

    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        self.systemd_dir.join(self.unit_name())
    }

    #[must_use]
    pub fn site_path(&self) -> PathBuf {
        self.nginx_available_dir.join(&self.app_name)
    }

    #[must_use]
    pub fn site_link(&self) -> PathBuf {
        self.nginx_enabled_dir.join(&self.app_name)
    }

    #[must_use]
    pub fn venv_dir(&self) -> PathBuf {
        self.app_dir.join("venv")
    }

    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.app_dir.join(".env")
    }

    #[must_use]
    pub fn certificate_dir(&self) -> PathBuf {
        self.letsencrypt_dir.join(&self.domain)
    }

    #[must_use]
    pub fn www_domain(&self) -> String {
        format!("www.{}", self.domain)
    }
}

/// Dot-separated labels of ASCII letters, digits and `-`, with no
/// label empty or starting or ending in `-`.
fn is_host_name(name: &str) -> bool {
    name.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
