// src/bootstrap/manager.rs

//! jhbuild, the build manager driven at the end of the bootstrap
//!
//! jhbuild is cloned from git into the download directory, installed into
//! the prefix with its own autogen/make/make install, and then invoked with
//! a generated rc file that points it at the same prefix. Every module build
//! is preceded by `jhbuild bootstrap` with that rc file.

use crate::bootstrap::config::{BootstrapConfig, ToolNames};
use crate::bootstrap::locate::Presence;
use crate::bootstrap::steps::{BuildStep, BuildStepKind, StepContext};
use crate::error::Result;
use crate::process::{ShellCommand, shell_quote};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Directory name of the checkout below the download directory
const CHECKOUT_DIR: &str = "jhbuild";

/// Describes where jhbuild comes from and how it is invoked
#[derive(Debug, Clone)]
pub struct BuildManager {
    url: String,
    download_dir: PathBuf,
    checkout: PathBuf,
    tools: ToolNames,
}

impl BuildManager {
    pub fn new(config: &BootstrapConfig) -> Self {
        Self {
            url: config.build_manager_url.clone(),
            download_dir: config.download_dir.clone(),
            checkout: config.download_dir.join(CHECKOUT_DIR),
            tools: config.tools.clone(),
        }
    }

    /// Where the sources are cloned to
    pub fn checkout_dir(&self) -> &Path {
        &self.checkout
    }

    pub fn presence(&self) -> Presence {
        Presence::Binary(self.tools.jhbuild.clone())
    }

    /// Whether a previous run left something in the checkout directory
    pub fn has_checkout(&self) -> bool {
        fs::read_dir(&self.checkout)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// `git status` inside the checkout; non-zero means it is unusable
    pub fn status_command(&self) -> ShellCommand {
        ShellCommand::new([self.tools.git.as_str(), "status"]).with_working_dir(&self.checkout)
    }

    /// Steps that install jhbuild into the prefix
    ///
    /// The clone step is left out when `clone` is false, i.e. when an
    /// existing checkout is reused.
    pub fn install_steps(&self, clone: bool) -> Vec<BuildStep> {
        let mut steps = Vec::new();
        if clone {
            let url = self.url.clone();
            let download_dir = self.download_dir.clone();
            steps.push(BuildStep::new(BuildStepKind::Clone, move |ctx| {
                ShellCommand::new([
                    ctx.tools.git.clone(),
                    "clone".to_string(),
                    url.clone(),
                    shell_quote(&ctx.source_dir),
                ])
                .with_working_dir(&download_dir)
            }));
        }
        steps.push(BuildStep::new(BuildStepKind::Bootstrap, |ctx| {
            ShellCommand::new([ctx.tools.shell.clone(), "autogen.sh".to_string(), ctx.prefix_arg()])
        }));
        steps.push(BuildStep::make());
        steps.push(BuildStep::make_install());
        steps
    }

    /// Write the rc file handed to `jhbuild --file`
    pub fn write_rc(&self, prefix: &Path) -> Result<NamedTempFile> {
        let mut rc = tempfile::Builder::new()
            .prefix("jhbuildrc-")
            .tempfile()?;
        writeln!(rc, "prefix = \"{}\"", python_escape(&prefix.to_string_lossy()))?;
        rc.flush()?;
        debug!("Wrote jhbuild rc file {}", rc.path().display());
        Ok(rc)
    }

    /// Copy a caller-supplied moduleset to a temporary file
    pub fn write_moduleset<R: Read>(&self, mut moduleset: R) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("moduleset-")
            .suffix(".modules")
            .tempfile()?;
        std::io::copy(&mut moduleset, &mut file)?;
        file.flush()?;
        Ok(file)
    }

    /// `jhbuild --file=<rc> --no-interact bootstrap`, run before every module build
    pub fn bootstrap_command(&self, context: &StepContext, rc: &Path) -> ShellCommand {
        let args = vec![
            self.tools.jhbuild.clone(),
            format!("--file={}", shell_quote(rc)),
            "--no-interact".to_string(),
            "bootstrap".to_string(),
        ];
        ShellCommand::new(args)
            .with_working_dir(&self.download_dir)
            .with_envs(&context.base_env())
    }

    /// `jhbuild --file=<rc> [--moduleset=<file>] --no-interact build --nodeps <module>`
    pub fn build_command(&self, context: &StepContext, rc: &Path, moduleset: Option<&Path>, module: &str) -> ShellCommand {
        let mut args = vec![
            self.tools.jhbuild.clone(),
            format!("--file={}", shell_quote(rc)),
        ];
        if let Some(moduleset) = moduleset {
            args.push(format!("--moduleset={}", shell_quote(moduleset)));
        }
        args.extend([
            "--no-interact".to_string(),
            "build".to_string(),
            "--nodeps".to_string(),
            shell_quote(Path::new(module)),
        ]);
        ShellCommand::new(args)
            .with_working_dir(&self.download_dir)
            .with_envs(&context.base_env())
    }
}

fn python_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
