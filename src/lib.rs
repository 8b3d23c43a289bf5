//! Provision a Linux host to serve a Python web API behind nginx.
//!
//! Alicerce (Portuguese for *foundation*) takes a fresh Debian or
//! Ubuntu machine to a running service in one command: system
//! packages, firewall, virtualenv, nginx site, Let's Encrypt
//! certificate, runtime `.env` file, and a systemd unit.
//!
//! # Overview
//!
//! A run is a [`Provisioner`] built from [`Settings`] and a
//! [`Host`](host::Host). It executes these steps in order:
//!
//! 1. Validate arguments (a domain is required)
//! 2. Install packages with `apt-get`
//! 3. Allow SSH, HTTP and HTTPS through `ufw`, then enable it
//! 4. Check for the application checkout, or clone it
//! 5. Build the virtualenv and install requirements
//! 6. Write and enable the nginx site
//! 7. Test and restart nginx
//! 8. Request a certificate with `certbot` (asks first)
//! 9. Write the `.env` file with mode `0600`
//! 10. Install, enable and start the systemd unit
//! 11. Print a summary
//!
//! By default the first failed step stops the run. With
//! [`FailurePolicy::KeepGoing`] failures are recorded and listed
//! in the summary instead.
//!
//! # Command line
//!
//! ```sh
//! # Provision for api.example.com
//! sudo alicerce api.example.com
//!
//! # Preview generated files without touching the host
//! alicerce api.example.com --dry-run
//!
//! # Check the runtime configuration after editing it
//! sudo alicerce verify --env-file /opt/epaper-api/.env
//! ```
//!
//! # Library
//!
//! ```rust,no_run
//! use alicerce::host::SystemHost;
//! use alicerce::{FailurePolicy, Provisioner, Settings};
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new("api.example.com")
//!         .app_dir("/srv/epaper-api")
//!         .port(8000)
//!         .email("ops@example.com");
//!
//!     let host = SystemHost;
//!     let provisioner = Provisioner::new(settings, &host)
//!         .failure_policy(FailurePolicy::Halt);
//!
//!     let mut input = std::io::stdin().lock();
//!     let mut out = std::io::stdout().lock();
//!     provisioner.run(&mut input, &mut out)?;
//!     Ok(())
//! }
//! ```
//!
//! # Previewing a run
//!
//! A [`Recorder`](host::Recorder) host records actions instead of
//! performing them:
//!
//! ```
//! use alicerce::host::Recorder;
//! use alicerce::{CertificatePolicy, Provisioner, Settings};
//!
//! let settings = Settings::new("api.example.com");
//! let host = Recorder::new().with_path(&settings.app_dir);
//! let provisioner = Provisioner::new(settings, &host)
//!     .skip_prerequisites()
//!     .certificate_policy(CertificatePolicy::Accept);
//!
//! let report = provisioner
//!     .run(&mut std::io::empty(), &mut std::io::sink())
//!     .unwrap();
//!
//! assert!(report.failed.is_empty());
//! assert!(host.ran("certbot"));
//! ```

// Allow noisy pedantic lints that don't add value for a
// provisioning tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod app;
pub mod certificate;
pub mod cli;
pub mod cmd;
pub mod envfile;
pub mod error;
pub mod firewall;
pub mod host;
pub mod nginx;
pub mod packages;
pub mod pipeline;
pub mod settings;
pub mod systemd;

pub use error::{ProvisionError, ProvisionResult};
pub use pipeline::{CertificatePolicy, FailurePolicy, Provisioner, Report, Stage};
pub use settings::Settings;
