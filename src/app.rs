//! The application's source tree, service account, and Python
//! virtualenv.

use crate::error::{ProvisionError, ProvisionResult};
use crate::host::Host;
use crate::settings::Settings;

/// Make sure the application source tree is on disk.
///
/// An existing directory is used as is. A missing one is cloned
/// from `settings.repo` when set; otherwise the run cannot go on.
pub fn ensure_present(host: &dyn Host, settings: &Settings) -> ProvisionResult<()> {
    let dir = settings.app_dir.to_string_lossy();

    if host.exists(&settings.app_dir) {
        tracing::info!(%dir, "application directory present");
        return Ok(());
    }

    let Some(repo) = &settings.repo else {
        return Err(ProvisionError::MissingRepository(dir.into_owned()));
    };

    tracing::info!(%repo, %dir, "cloning application");
    host.run("git", &["clone", repo, &dir])
}

/// Create the service account as a system user with no login
/// shell, unless it already exists.
pub fn ensure_user(host: &dyn Host, settings: &Settings) -> ProvisionResult<()> {
    let user = settings.app_user.as_str();
    if host.output("id", &["-u", user]).is_ok() {
        return Ok(());
    }

    tracing::info!(%user, "creating service user");
    let home = settings.app_dir.to_string_lossy();
    host.run(
        "useradd",
        &[
            "--system",
            "--home-dir",
            &home,
            "--no-create-home",
            "--shell",
            "/usr/sbin/nologin",
            "--user-group",
            user,
        ],
    )
}

/// Build the virtualenv, install the application's dependencies
/// into it, and hand the tree to the service account.
pub fn build_environment(host: &dyn Host, settings: &Settings) -> ProvisionResult<()> {
    let dir = settings.app_dir.to_string_lossy();
    let venv = settings.venv_dir();
    let venv_str = venv.to_string_lossy();
    let pip = venv.join("bin").join("pip");
    let pip = pip.to_string_lossy();

    host.run("python3", &["-m", "venv", &venv_str])?;
    host.run(&pip, &["install", "--upgrade", "pip"])?;

    let requirements = settings.app_dir.join("requirements.txt");
    if host.exists(&requirements) {
        host.run(&pip, &["install", "-r", &requirements.to_string_lossy()])?;
    } else {
        tracing::warn!(%dir, "no requirements.txt, installing the project itself");
        host.run(&pip, &["install", &dir])?;
    }

    let owner = format!("{}:{}", settings.app_user, settings.app_group);
    host.run("chown", &["-R", &owner, &dir])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Recorder;

    #[test]
    fn present_directory_is_left_alone() {
        let settings = Settings::new("example.com");
        let host = Recorder::new().with_path(&settings.app_dir);

        ensure_present(&host, &settings).unwrap();

        assert!(host.commands().is_empty());
    }

    #[test]
    fn missing_directory_without_repo_fails() {
        let settings = Settings::new("example.com");
        let host = Recorder::new();

        let err = ensure_present(&host, &settings).unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::MissingRepository(ref d) if d == "/opt/epaper-api"
        ));
        assert!(host.commands().is_empty());
    }

    #[test]
    fn missing_directory_with_repo_clones() {
        let settings =
            Settings::new("example.com").repo("https://git.example.com/epaper.git");
        let host = Recorder::new();

        ensure_present(&host, &settings).unwrap();

        assert_eq!(
            host.commands(),
            vec!["git clone https://git.example.com/epaper.git /opt/epaper-api"]
        );
    }

    #[test]
    fn existing_user_is_not_recreated() {
        let settings = Settings::new("example.com");
        let host = Recorder::new().with_output("id", "33");

        ensure_user(&host, &settings).unwrap();

        assert!(!host.ran("useradd"));
    }

    #[test]
    fn missing_user_is_created() {
        let settings = Settings::new("example.com").app_user("epaper");
        let host = Recorder::new().failing("id");

        ensure_user(&host, &settings).unwrap();

        let useradd = host.commands().pop().unwrap();
        assert!(useradd.starts_with("useradd --system"));
        assert!(useradd.ends_with("--user-group epaper"));
    }

    #[test]
    fn environment_uses_requirements_file() {
        let settings = Settings::new("example.com");
        let host = Recorder::new().with_path(settings.app_dir.join("requirements.txt"));

        build_environment(&host, &settings).unwrap();

        assert_eq!(
            host.commands(),
            vec![
                "python3 -m venv /opt/epaper-api/venv",
                "/opt/epaper-api/venv/bin/pip install --upgrade pip",
                "/opt/epaper-api/venv/bin/pip install -r /opt/epaper-api/requirements.txt",
                "chown -R www-data:www-data /opt/epaper-api",
            ]
        );
    }

    #[test]
    fn environment_without_requirements_installs_project() {
        let settings = Settings::new("example.com");
        let host = Recorder::new();

        build_environment(&host, &settings).unwrap();

        assert!(
            host.commands()
                .contains(&"/opt/epaper-api/venv/bin/pip install /opt/epaper-api".to_string())
        );
    }
}
