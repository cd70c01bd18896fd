// src/bootstrap/mod.rs

//! Bootstrap of a jhbuild installation from an empty prefix
//!
//! The bootstrap walks a fixed chain of stages. Each stage makes sure one or
//! more prerequisites are installed, building the missing ones from source
//! into the installation prefix:
//!
//! ```text
//! compiler ─► perl ─► gettext ─► xz, libffi ─► git ─► openssl ─► python
//!                                                                  │
//!                 module build ◄─ jhbuild (git clone, make install) ◄┘
//! ```
//!
//! Everything runs sequentially on the calling thread. The only other
//! thread allowed in is one calling [`Bootstrap::cancel`] (or
//! [`CancellationState::cancel`] on the shared state), which kills the
//! running build step and makes every later step return
//! [`Outcome::Cancelled`].
//!
//! Installed prerequisites are left in the prefix when a later stage
//! fails, so a rerun picks up where the failed one stopped.

mod config;
mod locate;
mod manager;
mod prerequisite;
mod stages;
mod steps;

pub use config::{BootstrapConfig, DEFAULT_BUILD_MANAGER_URL, HostPlatform, MissingBinaryPolicy, ToolNames};
pub use locate::{Locator, Presence, PrefixLocator, search_path};
pub use manager::BuildManager;
pub use prerequisite::{PrerequisiteSpec, default_prerequisites};
pub use stages::{BootstrapReport, BootstrapStage, StageRecord, StageStatus};
pub use steps::{BuildStep, BuildStepKind, StepContext, patch_command};

use crate::download::{DownloadSpec, Downloader, FetchPolicies, HttpTransport, Transport};
use crate::error::{BuildFailure, Error, Outcome, Result};
use crate::process::{CancellationState, OutputCapture, ProcessRunner};
use crate::proceed;
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Marker left in a source tree once a patch applied cleanly
const PATCH_MARKER_PREFIX: &str = ".jhbuild-bootstrap-patched-";

/// Name used for the build manager in reports and build failures
const BUILD_MANAGER_NAME: &str = "jhbuild";

/// Bootstrap orchestrator that coordinates the entire bootstrap process
pub struct Bootstrap {
    config: BootstrapConfig,
    prerequisites: Vec<PrerequisiteSpec>,
    downloader: Downloader,
    runner: ProcessRunner,
    locator: Box<dyn Locator>,
    cancellation: Arc<CancellationState>,
    build_manager: BuildManager,
    search_path: OsString,
    prepared: bool,
    report: BootstrapReport,
}

impl Bootstrap {
    /// Create an orchestrator that downloads over HTTP
    pub fn new(config: BootstrapConfig) -> Result<Self> {
        let transport = HttpTransport::new()?.with_progress(config.show_progress);
        Self::with_transport(config, Box::new(transport))
    }

    /// Create an orchestrator with a custom transport
    ///
    /// Uses the built-in prerequisite table for the detected host.
    pub fn with_transport(config: BootstrapConfig, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let platform = HostPlatform::detect()?;
        let prerequisites = default_prerequisites(&config, platform)?;
        debug!("Bootstrapping on {} into {}", platform, config.prefix.display());

        let cancellation = CancellationState::new();
        let downloader = Downloader::new(transport, Arc::clone(&cancellation))
            .with_policies(FetchPolicies::uniform(config.download_attempts))
            .with_skip_checksum(config.skip_checksum);
        let runner = ProcessRunner::new(config.tools.shell.clone(), Arc::clone(&cancellation));
        let locator = PrefixLocator::new(&config.prefix);
        let search_path = locator.search_path().clone();

        Ok(Self {
            build_manager: BuildManager::new(&config),
            prerequisites,
            downloader,
            runner,
            locator: Box::new(locator),
            cancellation,
            search_path,
            prepared: false,
            report: BootstrapReport::default(),
            config,
        })
    }

    /// Replace the presence probe
    pub fn with_locator(mut self, locator: Box<dyn Locator>) -> Self {
        self.locator = locator;
        self
    }

    /// Replace the prerequisite table
    pub fn with_prerequisites(mut self, prerequisites: Vec<PrerequisiteSpec>) -> Self {
        self.prerequisites = prerequisites;
        self
    }

    /// Replace the retry policies of every download
    pub fn with_policies(mut self, policies: FetchPolicies) -> Self {
        self.downloader = self.downloader.with_policies(policies);
        self
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Shared cancellation state, for handing to a signal or UI thread
    pub fn cancellation(&self) -> Arc<CancellationState> {
        Arc::clone(&self.cancellation)
    }

    /// Stop the bootstrap and kill the running build step
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// What the bootstrap did so far
    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }

    /// Make sure every prerequisite and jhbuild itself are installed
    ///
    /// Runs once per orchestrator; later calls return immediately.
    pub fn ensure_prerequisites(&mut self) -> Result<Outcome<()>> {
        if self.prepared {
            return Ok(Outcome::Completed(()));
        }

        self.prerequisites.sort_by_key(|prerequisite| prerequisite.stage);
        self.check_required()?;

        fs::create_dir_all(&self.config.prefix)?;
        fs::create_dir_all(&self.config.download_dir)?;

        for prerequisite in &self.prerequisites {
            let started = Instant::now();
            if self.locator.is_present(&prerequisite.presence) {
                debug!("{} ({}) is already present", prerequisite.name, prerequisite.presence);
                self.report.record(
                    prerequisite.stage,
                    &prerequisite.name,
                    StageStatus::AlreadyPresent,
                    started.elapsed(),
                );
                continue;
            }

            info!("Installing {} ({})", prerequisite.name, prerequisite.stage);
            proceed!(self.install_prerequisite(prerequisite)?);

            if !self.locator.is_present(&prerequisite.presence) {
                return Err(Error::Inconsistent(format!(
                    "{} was built and installed but {} still cannot be found",
                    prerequisite.name, prerequisite.presence
                )));
            }
            self.report.record(
                prerequisite.stage,
                &prerequisite.name,
                StageStatus::Installed,
                started.elapsed(),
            );
            info!("Installed {} in {:.1}s", prerequisite.name, started.elapsed().as_secs_f64());
        }

        proceed!(self.ensure_build_manager()?);
        self.prepared = true;
        Ok(Outcome::Completed(()))
    }

    /// Build `module` with jhbuild's built-in moduleset
    pub fn install_module(&mut self, module: &str) -> Result<Outcome<()>> {
        check_module_name(module)?;
        proceed!(self.ensure_prerequisites()?);
        self.build_module(None, module)
    }

    /// Build `module` from the moduleset read from `moduleset`
    pub fn install_module_with_moduleset<R: Read>(&mut self, moduleset: R, module: &str) -> Result<Outcome<()>> {
        check_module_name(module)?;
        proceed!(self.ensure_prerequisites()?);
        let file = self.build_manager.write_moduleset(moduleset)?;
        self.build_module(Some(file.path()), module)
    }

    /// Fail before any download when a tool that may not be built is missing
    fn check_required(&self) -> Result<()> {
        for prerequisite in &self.prerequisites {
            let buildable = prerequisite.policy == MissingBinaryPolicy::Download && prerequisite.source.is_some();
            if buildable || self.locator.is_present(&prerequisite.presence) {
                continue;
            }
            let reason = if prerequisite.policy == MissingBinaryPolicy::Fail {
                format!("{} cannot be installed by the bootstrap", prerequisite.name)
            } else {
                format!("no source is known for {}", prerequisite.name)
            };
            return Err(Error::MissingSystemBinary {
                binary: prerequisite.presence.name().to_string(),
                reason,
            });
        }
        if self.config.missing_binary_policy(BootstrapStage::BuildManager) == MissingBinaryPolicy::Fail
            && !self.locator.is_present(&self.build_manager.presence())
        {
            return Err(Error::MissingSystemBinary {
                binary: self.config.tools.jhbuild.clone(),
                reason: "jhbuild must already be installed".to_string(),
            });
        }
        Ok(())
    }

    fn install_prerequisite(&self, prerequisite: &PrerequisiteSpec) -> Result<Outcome<()>> {
        if self.cancellation.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let source = prerequisite.source.as_ref().ok_or_else(|| {
            Error::Inconsistent(format!("{} has no source to build from", prerequisite.name))
        })?;
        proceed!(self.downloader.fetch(source)?);

        let context = self.step_context(&source.destination);

        if !prerequisite.patches.is_empty() {
            self.require_binary(&self.config.tools.patch, "needed to patch sources")?;
            for patch in &prerequisite.patches {
                proceed!(self.apply_patch(&prerequisite.name, patch, &context)?);
            }
        }

        self.require_binary(&self.config.tools.make, "make cannot be bootstrapped")?;

        for step in &prerequisite.steps {
            proceed!(self.run_step(&prerequisite.name, step, &context)?);
        }
        Ok(Outcome::Completed(()))
    }

    fn apply_patch(&self, module: &str, patch: &DownloadSpec, context: &StepContext) -> Result<Outcome<()>> {
        proceed!(self.downloader.fetch(patch)?);

        let file_name = patch
            .target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let marker = context.source_dir.join(format!("{}{}", PATCH_MARKER_PREFIX, file_name));
        if marker.exists() {
            debug!("{} already applied to {}", file_name, module);
            return Ok(Outcome::Completed(()));
        }

        info!("Applying {} to {}", file_name, module);
        let command = patch_command(context, &patch.target);
        let (status, output) = proceed!(self.runner.run_to_completion(&command, OutputCapture::all())?);
        if !status.success() {
            if self.cancellation.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            return Err(Error::PatchFailed {
                module: module.to_string(),
                patch: patch.target.clone(),
                stderr: output.stderr,
            });
        }
        fs::write(&marker, "")?;
        Ok(Outcome::Completed(()))
    }

    fn run_step(&self, module: &str, step: &BuildStep, context: &StepContext) -> Result<Outcome<()>> {
        if self.cancellation.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        info!("{}: {}", module, step.kind());
        let command = step.command(context);
        let (status, output) = proceed!(self.runner.run_to_completion(&command, self.capture())?);
        if status.success() {
            return Ok(Outcome::Completed(()));
        }
        if self.cancellation.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        warn!("{}: {} failed with {}", module, step.kind(), status);
        Err(BuildFailure {
            module: module.to_string(),
            step: step.kind(),
            exit_code: status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
        .into())
    }

    fn ensure_build_manager(&mut self) -> Result<Outcome<()>> {
        let started = Instant::now();
        let presence = self.build_manager.presence();
        if self.locator.is_present(&presence) {
            self.report.record(
                BootstrapStage::BuildManager,
                BUILD_MANAGER_NAME,
                StageStatus::AlreadyPresent,
                started.elapsed(),
            );
            return Ok(Outcome::Completed(()));
        }

        info!("Installing {}", BUILD_MANAGER_NAME);
        self.require_binary(&self.config.tools.git, "needed to clone jhbuild")?;

        let clone = if self.build_manager.has_checkout() {
            debug!("Reusing checkout in {}", self.build_manager.checkout_dir().display());
            let status = self.build_manager.status_command();
            let (exit, _) = proceed!(self.runner.run_to_completion(&status, OutputCapture::all())?);
            if !exit.success() {
                if self.cancellation.is_cancelled() {
                    return Ok(Outcome::Cancelled);
                }
                return Err(Error::InvalidCheckout(self.build_manager.checkout_dir().to_path_buf()));
            }
            false
        } else {
            true
        };

        self.require_binary(&self.config.tools.make, "make cannot be bootstrapped")?;

        let context = self.step_context(self.build_manager.checkout_dir());
        for step in self.build_manager.install_steps(clone) {
            proceed!(self.run_step(BUILD_MANAGER_NAME, &step, &context)?);
        }

        if !self.locator.is_present(&presence) {
            return Err(Error::Inconsistent(format!(
                "{} was installed but {} still cannot be found",
                BUILD_MANAGER_NAME, presence
            )));
        }
        self.report.record(
            BootstrapStage::BuildManager,
            BUILD_MANAGER_NAME,
            StageStatus::Installed,
            started.elapsed(),
        );
        Ok(Outcome::Completed(()))
    }

    fn build_module(&mut self, moduleset: Option<&Path>, module: &str) -> Result<Outcome<()>> {
        if self.cancellation.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let started = Instant::now();
        info!("Building module {}", module);
        let rc = self.build_manager.write_rc(&self.config.prefix)?;
        let context = self.step_context(&self.config.download_dir);

        debug!("Running jhbuild bootstrap");
        let command = self.build_manager.bootstrap_command(&context, rc.path());
        let (status, output) = proceed!(self.runner.run_to_completion(&command, self.capture())?);
        if !status.success() {
            if self.cancellation.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            warn!("jhbuild bootstrap failed with {}", status);
            return Err(BuildFailure {
                module: BUILD_MANAGER_NAME.to_string(),
                step: BuildStepKind::Bootstrap,
                exit_code: status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            }
            .into());
        }

        let command = self.build_manager.build_command(&context, rc.path(), moduleset, module);

        let (status, output) = proceed!(self.runner.run_to_completion(&command, self.capture())?);
        if !status.success() {
            if self.cancellation.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            return Err(Error::ModuleBuild {
                module: module.to_string(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        self.report.record(BootstrapStage::ModuleBuild, module, StageStatus::Installed, started.elapsed());
        info!("Built {} in {:.1}s", module, started.elapsed().as_secs_f64());
        Ok(Outcome::Completed(()))
    }

    fn require_binary(&self, binary: &str, reason: &str) -> Result<()> {
        if self.locator.find_binary(binary).is_none() {
            return Err(Error::MissingSystemBinary {
                binary: binary.to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    fn step_context(&self, source_dir: &Path) -> StepContext {
        StepContext {
            source_dir: source_dir.to_path_buf(),
            prefix: self.config.prefix.clone(),
            jobs: self.config.jobs,
            tools: self.config.tools.clone(),
            search_path: self.search_path.clone(),
        }
    }

    fn capture(&self) -> OutputCapture {
        OutputCapture {
            stdout: self.config.capture_stdout,
            stderr: self.config.capture_stderr,
        }
    }
}

fn check_module_name(module: &str) -> Result<()> {
    if module.trim().is_empty() {
        return Err(Error::InvalidArgument("module name is empty".to_string()));
    }
    Ok(())
}
