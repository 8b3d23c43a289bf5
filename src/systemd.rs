use crate::error::ProvisionResult;
use crate::host::Host;
use crate::settings::Settings;

/// Seconds systemd waits before restarting a crashed API.
pub const RESTART_SEC: u32 = 10;

/// Render the unit that runs the API under uvicorn from the
/// virtualenv, bound to loopback so only nginx reaches it.
#[must_use]
pub fn render(settings: &Settings) -> String {
    let dir = settings.app_dir.display();
    let venv_bin = settings.venv_dir().join("bin");
    let venv_bin = venv_bin.display();

    format!(
        "[Unit]\n\
         Description={name} (uvicorn behind nginx for {domain})\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User={user}\n\
         Group={group}\n\
         WorkingDirectory={dir}\n\
         EnvironmentFile={env_file}\n\
         Environment=\"PATH={venv_bin}:/usr/local/bin:/usr/bin:/bin\"\n\
         ExecStart={venv_bin}/uvicorn {asgi} --host 127.0.0.1 --port {port} --workers {workers}\n\
         Restart=always\n\
         RestartSec={RESTART_SEC}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        name = settings.app_name,
        domain = settings.domain,
        user = settings.app_user,
        group = settings.app_group,
        env_file = settings.env_file().display(),
        asgi = settings.asgi_app,
        port = settings.port,
        workers = settings.workers,
    )
}

/// Write the unit, reload systemd, then enable and (re)start the
/// service.
pub fn install(host: &dyn Host, settings: &Settings) -> ProvisionResult<()> {
    let unit = settings.unit_name();
    host.write_file(&settings.unit_path(), &render(settings), Some(0o644))?;
    host.run("systemctl", &["daemon-reload"])?;
    host.run("systemctl", &["enable", &unit])?;
    host.run("systemctl", &["restart", &unit])?;
    tracing::info!(%unit, "service started");
    Ok(())
}
