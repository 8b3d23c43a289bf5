#![allow(dead_code)]

use std::path::Path;

use alicerce::ProvisionResult;
use alicerce::host::{Host, Recorder, SystemHost};

/// Records commands like [`Recorder`] but performs filesystem
/// operations for real, so a run can be staged in a temp dir.
pub struct StagedHost {
    pub commands: Recorder,
}

impl StagedHost {
    pub fn new() -> Self {
        Self {
            commands: Recorder::new().with_output("id", "0"),
        }
    }
}

impl Host for StagedHost {
    fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<()> {
        self.commands.run(program, args)
    }

    fn output(&self, program: &str, args: &[&str]) -> ProvisionResult<String> {
        self.commands.output(program, args)
    }

    fn command_exists(&self, program: &str) -> bool {
        self.commands.command_exists(program)
    }

    fn exists(&self, path: &Path) -> bool {
        SystemHost.exists(path)
    }

    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> ProvisionResult<()> {
        SystemHost.write_file(path, contents, mode)
    }

    fn symlink(&self, target: &Path, link: &Path) -> ProvisionResult<()> {
        SystemHost.symlink(target, link)
    }

    fn remove_file(&self, path: &Path) -> ProvisionResult<()> {
        SystemHost.remove_file(path)
    }
}

/// Run `provisioner`, answering the certificate prompt with
/// `answer`, and return the report result plus everything printed.
pub fn run_with_answer(
    provisioner: &alicerce::Provisioner<'_>,
    answer: &str,
) -> (ProvisionResult<alicerce::Report>, String) {
    run_with_input(provisioner, answer.as_bytes())
}

/// Like [`run_with_answer`] but with raw bytes on stdin.
pub fn run_with_input(
    provisioner: &alicerce::Provisioner<'_>,
    mut input: &[u8],
) -> (ProvisionResult<alicerce::Report>, String) {
    let mut out = Vec::new();
    let result = provisioner.run(&mut input, &mut out);
    (result, String::from_utf8(out).expect("utf-8 output"))
}
