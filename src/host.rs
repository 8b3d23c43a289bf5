use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::cmd;
use crate::error::{ProvisionError, ProvisionResult};

/// Everything the provisioning procedure does to the machine it
/// runs on: external commands and filesystem writes.
pub trait Host {
    /// Run a command, showing its output to the operator.
    fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<()>;

    /// Run a command and capture its trimmed stdout.
    fn output(&self, program: &str, args: &[&str]) -> ProvisionResult<String>;

    /// Check if a command exists on PATH.
    fn command_exists(&self, program: &str) -> bool;

    fn exists(&self, path: &Path) -> bool;

    /// Replace `path` with `contents`, creating parent directories.
    /// When `mode` is given the file never holds `contents` with
    /// looser permission bits.
    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> ProvisionResult<()>;

    /// Point `link` at `target`, replacing whatever `link` was.
    fn symlink(&self, target: &Path, link: &Path) -> ProvisionResult<()>;

    /// Remove a file or symlink. Absent paths are not an error.
    fn remove_file(&self, path: &Path) -> ProvisionResult<()>;
}

/// The real machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl Host for SystemHost {
    fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<()> {
        tracing::debug!(command = %cmd::format_command(program, args), "running");
        cmd::run_interactive(program, args)
    }

    fn output(&self, program: &str, args: &[&str]) -> ProvisionResult<String> {
        cmd::run(program, args)
    }

    fn command_exists(&self, program: &str) -> bool {
        cmd::command_exists(program)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> ProvisionResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match mode {
            Some(mode) => {
                // A new file is created with `mode`; an existing one is
                // tightened before it is truncated and rewritten.
                if path.exists() {
                    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
                }
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(mode)
                    .open(path)?;
                file.write_all(contents.as_bytes())?;
                fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
            }
            None => fs::write(path, contents)?,
        }
        tracing::debug!(path = %path.display(), "wrote file");
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> ProvisionResult<()> {
        self.remove_file(link)?;
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(target, link)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> ProvisionResult<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// One thing the procedure did, or would have done, to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run(String),
    Write { path: PathBuf, mode: Option<u32> },
    Symlink { target: PathBuf, link: PathBuf },
    Remove(PathBuf),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(command) => write!(f, "run: {command}"),
            Self::Write {
                path,
                mode: Some(mode),
            } => write!(f, "write: {} (mode {mode:o})", path.display()),
            Self::Write { path, mode: None } => write!(f, "write: {}", path.display()),
            Self::Symlink { target, link } => {
                write!(f, "link: {} -> {}", link.display(), target.display())
            }
            Self::Remove(path) => write!(f, "remove: {}", path.display()),
        }
    }
}

/// A host that records actions instead of performing them.
///
/// Backs `--dry-run`, and lets tests script failures and query
/// results without touching the machine.
#[derive(Debug, Default)]
pub struct Recorder {
    actions: RefCell<Vec<Action>>,
    files: RefCell<BTreeMap<PathBuf, String>>,
    present: RefCell<HashSet<PathBuf>>,
    failing: HashSet<String>,
    outputs: HashMap<String, String>,
    read_filesystem: bool,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `exists` from the real filesystem as well as from
    /// recorded writes.
    #[must_use]
    pub const fn reading_filesystem(mut self) -> Self {
        self.read_filesystem = true;
        self
    }

    /// Pretend `path` already exists.
    #[must_use]
    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        self.present.borrow_mut().insert(path.into());
        self
    }

    /// Make every invocation of `program` fail.
    #[must_use]
    pub fn failing(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string());
        self
    }

    /// Captured stdout returned for `program`.
    #[must_use]
    pub fn with_output(mut self, program: &str, stdout: &str) -> Self {
        self.outputs.insert(program.to_string(), stdout.to_string());
        self
    }

    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.actions.borrow().clone()
    }

    /// Commands run so far, formatted as on a shell line.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.actions
            .borrow()
            .iter()
            .filter_map(|a| match a {
                Action::Run(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether any recorded command was an invocation of `program`.
    #[must_use]
    pub fn ran(&self, program: &str) -> bool {
        self.commands()
            .iter()
            .any(|c| c.split_whitespace().next() == Some(program))
    }

    /// Contents last written to `path`.
    #[must_use]
    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    /// All written files in path order.
    #[must_use]
    pub fn files(&self) -> Vec<(PathBuf, String)> {
        self.files
            .borrow()
            .iter()
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect()
    }

    fn record(&self, action: Action) {
        self.actions.borrow_mut().push(action);
    }

    fn check(&self, program: &str, args: &[&str]) -> ProvisionResult<()> {
        if self.failing.contains(program) {
            return Err(ProvisionError::CommandFailed {
                command: cmd::format_command(program, args),
                status: failed_status(),
            });
        }
        Ok(())
    }
}

impl Host for Recorder {
    fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<()> {
        self.record(Action::Run(cmd::format_command(program, args)));
        self.check(program, args)
    }

    fn output(&self, program: &str, args: &[&str]) -> ProvisionResult<String> {
        self.record(Action::Run(cmd::format_command(program, args)));
        self.check(program, args)?;
        Ok(self.outputs.get(program).cloned().unwrap_or_default())
    }

    fn command_exists(&self, program: &str) -> bool {
        !self.failing.contains(program)
    }

    fn exists(&self, path: &Path) -> bool {
        self.present.borrow().contains(path)
            || self.files.borrow().contains_key(path)
            || (self.read_filesystem && path.exists())
    }

    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> ProvisionResult<()> {
        self.record(Action::Write {
            path: path.to_path_buf(),
            mode,
        });
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> ProvisionResult<()> {
        self.record(Action::Symlink {
            target: target.to_path_buf(),
            link: link.to_path_buf(),
        });
        self.present.borrow_mut().insert(link.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> ProvisionResult<()> {
        self.record(Action::Remove(path.to_path_buf()));
        self.present.borrow_mut().remove(path);
        self.files.borrow_mut().remove(path);
        Ok(())
    }
}

fn failed_status() -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    // Raw wait status: exit code 1.
    std::process::ExitStatus::from_raw(1 << 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_logs_commands_in_order() {
        let host = Recorder::new();

        host.run("ufw", &["allow", "OpenSSH"]).unwrap();
        host.run("ufw", &["--force", "enable"]).unwrap();

        assert_eq!(
            host.commands(),
            vec!["ufw allow OpenSSH", "ufw --force enable"]
        );
        assert!(host.ran("ufw"));
        assert!(!host.ran("certbot"));
    }

    #[test]
    fn recorder_fails_scripted_program() {
        let host = Recorder::new().failing("nginx");

        let err = host.run("nginx", &["-t"]).unwrap_err();

        assert!(matches!(err, ProvisionError::CommandFailed { .. }));
        assert_eq!(err.to_string(), "command failed: nginx -t");
        assert!(!host.command_exists("nginx"));
    }

    #[test]
    fn recorder_writes_become_visible() {
        let host = Recorder::new();
        let path = Path::new("/etc/app/.env");

        assert!(!host.exists(path));
        host.write_file(path, "A=1\n", Some(0o600)).unwrap();

        assert!(host.exists(path));
        assert_eq!(host.file(path).as_deref(), Some("A=1\n"));
        assert_eq!(
            host.actions()[0].to_string(),
            "write: /etc/app/.env (mode 600)"
        );
    }

    #[test]
    fn recorder_output_is_scripted() {
        let host = Recorder::new().with_output("id", "0");

        assert_eq!(host.output("id", &["-u"]).unwrap(), "0");
        assert_eq!(host.output("whoami", &[]).unwrap(), "");
    }

    #[test]
    fn system_host_write_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secret");

        SystemHost.write_file(&path, "x", Some(0o600)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn system_host_write_tightens_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "OLD=1\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        SystemHost.write_file(&path, "NEW=1\n", Some(0o600)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_to_string(&path).unwrap(), "NEW=1\n");
    }

    #[test]
    fn system_host_symlink_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        let link = dir.path().join("link");
        fs::write(&first, "1").unwrap();
        fs::write(&second, "2").unwrap();

        SystemHost.symlink(&first, &link).unwrap();
        SystemHost.symlink(&second, &link).unwrap();

        assert_eq!(fs::read_to_string(&link).unwrap(), "2");
    }

    #[test]
    fn system_host_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();

        SystemHost.remove_file(&dir.path().join("absent")).unwrap();
    }
}
