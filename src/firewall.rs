use crate::error::ProvisionResult;
use crate::host::Host;

/// `ufw allow` targets opened on the host: SSH, HTTP, HTTPS.
pub const ALLOWED: &[&str] = &["OpenSSH", "80/tcp", "443/tcp"];

/// Open [`ALLOWED`] and enable the firewall.
///
/// SSH is allowed before `ufw enable` so an SSH session running
/// the procedure survives it.
pub fn configure(host: &dyn Host) -> ProvisionResult<()> {
    for rule in ALLOWED {
        host.run("ufw", &["allow", rule])?;
    }
    host.run("ufw", &["--force", "enable"])?;
    tracing::info!(rules = ?ALLOWED, "firewall enabled");
    Ok(())
}
