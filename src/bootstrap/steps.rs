// src/bootstrap/steps.rs

//! Build steps
//!
//! A [`BuildStep`] pairs a step kind with a factory that turns a
//! [`StepContext`] (where the sources are, where to install, how many jobs)
//! into a shell command. Every command gets `PATH`, `CFLAGS`, `LDFLAGS` and
//! `PKG_CONFIG_PATH` pointing into the installation prefix so that later
//! prerequisites link against earlier ones.

use crate::bootstrap::config::ToolNames;
use crate::process::{ShellCommand, shell_quote};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kind of a build step, reported in build failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStepKind {
    Clone,
    Bootstrap,
    Configure,
    Make,
    MakeCheck,
    MakeTest,
    MakeInstall,
    InterpreterBuild,
    InterpreterTest,
    InterpreterInstall,
}

impl BuildStepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Bootstrap => "bootstrap",
            Self::Configure => "configure",
            Self::Make => "make",
            Self::MakeCheck => "make check",
            Self::MakeTest => "make test",
            Self::MakeInstall => "make install",
            Self::InterpreterBuild => "interpreter build",
            Self::InterpreterTest => "interpreter test",
            Self::InterpreterInstall => "interpreter install",
        }
    }
}

impl fmt::Display for BuildStepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Everything a step factory may need
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Extracted or cloned source tree
    pub source_dir: PathBuf,
    /// Installation prefix
    pub prefix: PathBuf,
    /// Parallel make jobs
    pub jobs: usize,
    pub tools: ToolNames,
    /// `PATH` handed to every step
    pub search_path: OsString,
}

impl StepContext {
    /// `--prefix=<prefix>`, quoted for the shell
    pub fn prefix_arg(&self) -> String {
        format!("--prefix={}", shell_quote(&self.prefix))
    }

    pub fn prefix_path(&self, relative: &str) -> PathBuf {
        self.prefix.join(relative)
    }

    /// Environment shared by every step
    pub fn base_env(&self) -> BTreeMap<String, String> {
        let include = self.prefix_path("include");
        let lib = self.prefix_path("lib");
        let pkgconfig = [
            self.prefix_path("lib/pkgconfig"),
            self.prefix_path("lib64/pkgconfig"),
            self.prefix_path("share/pkgconfig"),
        ]
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":");

        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), self.search_path.to_string_lossy().into_owned());
        env.insert(
            "CFLAGS".to_string(),
            format!("-I{} -L{}", include.display(), lib.display()),
        );
        env.insert("CPPFLAGS".to_string(), format!("-I{}", include.display()));
        env.insert("LDFLAGS".to_string(), format!("-L{}", lib.display()));
        env.insert("PKG_CONFIG_PATH".to_string(), pkgconfig);
        env
    }

    /// `make -j<jobs>`
    pub fn make_parallel(&self) -> Vec<String> {
        vec![self.tools.make.clone(), format!("-j{}", self.jobs)]
    }
}

type CommandFactory = Arc<dyn Fn(&StepContext) -> ShellCommand + Send + Sync>;

/// One step of a prerequisite build
#[derive(Clone)]
pub struct BuildStep {
    kind: BuildStepKind,
    factory: CommandFactory,
}

impl BuildStep {
    pub fn new<F>(kind: BuildStepKind, factory: F) -> Self
    where
        F: Fn(&StepContext) -> ShellCommand + Send + Sync + 'static,
    {
        Self {
            kind,
            factory: Arc::new(factory),
        }
    }

    pub fn kind(&self) -> BuildStepKind {
        self.kind
    }

    /// The command for `context`
    ///
    /// Runs in the source directory unless the factory chose otherwise;
    /// variables set by the factory win over the shared environment.
    pub fn command(&self, context: &StepContext) -> ShellCommand {
        let mut command = (self.factory)(context);
        if command.working_dir.is_none() {
            command.working_dir = Some(context.source_dir.clone());
        }
        let mut env = context.base_env();
        env.append(&mut command.env);
        command.env = env;
        command
    }

    /// `sh configure --prefix=<prefix> <extra>`
    pub fn configure(extra: &[&str]) -> Self {
        Self::configure_script("configure", &[], extra)
    }

    /// Run a configure-like script; `prefix_flag` is given the prefix
    /// appended, e.g. `-Dprefix=`. Without one, `--prefix=` is used.
    pub fn configure_script(script: &str, prefix_flag: &[&str], extra: &[&str]) -> Self {
        let script = script.to_string();
        let prefix_flag: Vec<String> = prefix_flag.iter().map(|s| s.to_string()).collect();
        let extra: Vec<String> = extra.iter().map(|s| s.to_string()).collect();
        Self::new(BuildStepKind::Configure, move |ctx| {
            let mut args = vec![ctx.tools.shell.clone(), script.clone()];
            if prefix_flag.is_empty() {
                args.push(ctx.prefix_arg());
            } else {
                args.extend(
                    prefix_flag
                        .iter()
                        .map(|flag| format!("{}{}", flag, shell_quote(&ctx.prefix))),
                );
            }
            args.extend(extra.iter().cloned());
            ShellCommand::new(args)
        })
    }

    /// `make -j<jobs>`
    pub fn make() -> Self {
        Self::new(BuildStepKind::Make, |ctx| ShellCommand::new(ctx.make_parallel()))
    }

    /// `make check`
    pub fn make_check() -> Self {
        Self::new(BuildStepKind::MakeCheck, |ctx| {
            ShellCommand::new([ctx.tools.make.as_str(), "check"])
        })
    }

    /// `make test`, for trees without a `check` target
    pub fn make_test() -> Self {
        Self::new(BuildStepKind::MakeTest, |ctx| {
            ShellCommand::new([ctx.tools.make.as_str(), "test"])
        })
    }

    /// `make install`
    pub fn make_install() -> Self {
        Self::new(BuildStepKind::MakeInstall, |ctx| {
            ShellCommand::new([ctx.tools.make.as_str(), "install"])
        })
    }

    /// `make -j<jobs>` for an interpreter
    pub fn interpreter_build() -> Self {
        Self::new(BuildStepKind::InterpreterBuild, |ctx| ShellCommand::new(ctx.make_parallel()))
    }

    /// `make test` for an interpreter
    pub fn interpreter_test() -> Self {
        Self::new(BuildStepKind::InterpreterTest, |ctx| {
            ShellCommand::new([ctx.tools.make.as_str(), "test"])
        })
    }

    /// `make install` for an interpreter
    pub fn interpreter_install() -> Self {
        Self::new(BuildStepKind::InterpreterInstall, |ctx| {
            ShellCommand::new([ctx.tools.make.as_str(), "install"])
        })
    }

    /// configure, make, optionally make check, make install
    pub fn autotools(extra_configure: &[&str], run_tests: bool) -> Vec<Self> {
        let mut steps = vec![Self::configure(extra_configure), Self::make()];
        if run_tests {
            steps.push(Self::make_check());
        }
        steps.push(Self::make_install());
        steps
    }
}

impl fmt::Debug for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildStep").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Command applying `patch` to the tree in `source_dir`
pub fn patch_command(context: &StepContext, patch: &Path) -> ShellCommand {
    let mut command = ShellCommand::new([
        context.tools.patch.clone(),
        "-p1".to_string(),
        "-i".to_string(),
        shell_quote(patch),
    ])
    .with_working_dir(&context.source_dir);
    command.env = context.base_env();
    command
}
