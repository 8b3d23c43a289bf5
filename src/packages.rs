use crate::error::ProvisionResult;
use crate::host::Host;

/// Packages the host needs: Python runtime and venv support, a
/// compiler toolchain for native wheels, nginx, certbot, ufw, and
/// git for cloning the application.
pub const PACKAGES: &[&str] = &[
    "python3",
    "python3-venv",
    "python3-pip",
    "build-essential",
    "nginx",
    "certbot",
    "ufw",
    "git",
];

/// Refresh the package index and install [`PACKAGES`].
pub fn install(host: &dyn Host) -> ProvisionResult<()> {
    host.run("apt-get", &["update", "-q"])?;

    let mut args = vec![
        "DEBIAN_FRONTEND=noninteractive",
        "apt-get",
        "install",
        "-y",
        "-q",
    ];
    args.extend_from_slice(PACKAGES);
    host.run("env", &args)
}
