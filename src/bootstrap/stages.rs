// src/bootstrap/stages.rs

//! Bootstrap stages and the per-run summary
//!
//! Stages run in a fixed order. Each later stage may rely on the tools the
//! earlier ones put into the installation prefix.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bootstrap stages in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum BootstrapStage {
    /// C compiler (never built by the bootstrap)
    Compiler,
    /// Perl and its package manager
    PackageManager,
    /// gettext tooling
    I18nTool,
    /// Compression and FFI libraries
    CompressionLib,
    /// git
    VersionControl,
    /// OpenSSL
    CryptoLib,
    /// Python
    Interpreter,
    /// jhbuild itself
    BuildManager,
    /// The module requested by the caller
    ModuleBuild,
}

impl BootstrapStage {
    /// Get a human-readable name for the stage
    pub fn name(&self) -> &'static str {
        match self {
            Self::Compiler => "C compiler",
            Self::PackageManager => "Perl package manager",
            Self::I18nTool => "i18n tools",
            Self::CompressionLib => "compression and FFI libraries",
            Self::VersionControl => "version control",
            Self::CryptoLib => "crypto library",
            Self::Interpreter => "interpreter",
            Self::BuildManager => "build manager",
            Self::ModuleBuild => "module build",
        }
    }
}

impl std::fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a prerequisite was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Found without doing anything
    AlreadyPresent,
    /// Downloaded, built and installed during this run
    Installed,
}

/// One line of the run summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: BootstrapStage,
    /// Prerequisite or module name
    pub name: String,
    pub status: StageStatus,
    pub duration: Duration,
}

/// What a bootstrap run did, in stage order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    records: Vec<StageRecord>,
}

impl BootstrapReport {
    pub(crate) fn record(&mut self, stage: BootstrapStage, name: &str, status: StageStatus, duration: Duration) {
        self.records.push(StageRecord {
            stage,
            name: name.to_string(),
            status,
            duration,
        });
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Status recorded for a prerequisite or module, if it was reached
    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.records
            .iter()
            .rev()
            .find(|record| record.name == name)
            .map(|record| record.status)
    }

    /// Names installed during this run
    pub fn installed(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|record| record.status == StageStatus::Installed)
            .map(|record| record.name.as_str())
            .collect()
    }

    /// Get a summary of all recorded stages
    pub fn summary(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| {
                let status = match record.status {
                    StageStatus::AlreadyPresent => "already present".to_string(),
                    StageStatus::Installed => format!("installed in {:.1}s", record.duration.as_secs_f64()),
                };
                format!("{} ({}): {}", record.name, record.stage, status)
            })
            .collect()
    }
}
