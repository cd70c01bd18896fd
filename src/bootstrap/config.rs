// src/bootstrap/config.rs

//! Bootstrap configuration types

use crate::bootstrap::stages::BootstrapStage;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name used under the platform cache and data directories
const APP_DIR: &str = "jhbuild-bootstrap";

/// Upstream jhbuild repository
pub const DEFAULT_BUILD_MANAGER_URL: &str = "https://gitlab.gnome.org/GNOME/jhbuild.git";

/// Host operating system and word size
///
/// Only used to pick default download URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostPlatform {
    Linux64,
    Linux32,
    MacOs64,
    Windows64,
    Windows32,
}

impl HostPlatform {
    /// Detect the platform this binary was built for
    pub fn detect() -> Result<Self> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map an OS/architecture pair as named by `std::env::consts`
    pub fn from_parts(os: &str, arch: &str) -> Result<Self> {
        match (os, arch) {
            ("linux", "x86_64" | "aarch64" | "riscv64" | "powerpc64" | "s390x") => Ok(Self::Linux64),
            ("linux", "x86" | "arm" | "riscv32" | "powerpc") => Ok(Self::Linux32),
            ("macos", "x86_64" | "aarch64") => Ok(Self::MacOs64),
            ("windows", "x86_64" | "aarch64") => Ok(Self::Windows64),
            ("windows", "x86") => Ok(Self::Windows32),
            ("linux" | "macos" | "windows", _) => Err(Error::Config(format!(
                "architecture '{}' is not supported on {}",
                arch, os
            ))),
            _ => Err(Error::Config(format!("operating system '{}' is not supported", os))),
        }
    }

    pub fn is_unix(&self) -> bool {
        !matches!(self, Self::Windows64 | Self::Windows32)
    }
}

impl std::fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux64 => write!(f, "linux-64"),
            Self::Linux32 => write!(f, "linux-32"),
            Self::MacOs64 => write!(f, "macos-64"),
            Self::Windows64 => write!(f, "windows-64"),
            Self::Windows32 => write!(f, "windows-32"),
        }
    }
}

/// What to do when a stage's tool is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingBinaryPolicy {
    /// Abort with `MissingSystemBinary`
    Fail,
    /// Download, build and install it into the prefix
    Download,
}

/// Names of the external binaries the bootstrap invokes or probes for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolNames {
    pub shell: String,
    pub make: String,
    pub patch: String,
    pub cc: String,
    pub cpan: String,
    pub msgfmt: String,
    pub git: String,
    pub openssl: String,
    pub python: String,
    pub jhbuild: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            make: "make".to_string(),
            patch: "patch".to_string(),
            cc: "gcc".to_string(),
            cpan: "cpan".to_string(),
            msgfmt: "msgfmt".to_string(),
            git: "git".to_string(),
            openssl: "openssl".to_string(),
            python: "python3".to_string(),
            jhbuild: "jhbuild".to_string(),
        }
    }
}

impl ToolNames {
    fn all(&self) -> [(&'static str, &str); 10] {
        [
            ("shell", &self.shell),
            ("make", &self.make),
            ("patch", &self.patch),
            ("cc", &self.cc),
            ("cpan", &self.cpan),
            ("msgfmt", &self.msgfmt),
            ("git", &self.git),
            ("openssl", &self.openssl),
            ("python", &self.python),
            ("jhbuild", &self.jhbuild),
        ]
    }
}

/// Bootstrap configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Installation prefix every prerequisite and module is installed into
    pub prefix: PathBuf,

    /// Where archives are downloaded, extracted and cloned
    pub download_dir: PathBuf,

    /// Number of parallel make jobs
    pub jobs: usize,

    /// Reuse existing downloads without verifying their checksum
    pub skip_checksum: bool,

    /// Capture build output instead of passing it through
    pub capture_stdout: bool,
    pub capture_stderr: bool,

    /// Attempts per download decision point before giving up
    pub download_attempts: u32,

    /// Show download progress bars
    pub show_progress: bool,

    /// Run each prerequisite's test suite before installing it
    pub run_tests: bool,

    /// Stages whose tool must already be installed
    pub fail_on_missing: Vec<BootstrapStage>,

    /// Git URL the build manager is cloned from
    pub build_manager_url: String,

    pub tools: ToolNames,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            prefix: default_data_dir().join("prefix"),
            download_dir: default_cache_dir(),
            jobs: num_cpus(),
            skip_checksum: false,
            capture_stdout: true,
            capture_stderr: true,
            download_attempts: crate::download::DEFAULT_ATTEMPTS,
            show_progress: false,
            run_tests: false,
            fail_on_missing: vec![BootstrapStage::Compiler],
            build_manager_url: DEFAULT_BUILD_MANAGER_URL.to_string(),
            tools: ToolNames::default(),
        }
    }
}

impl BootstrapConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML configuration file; absent keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the bootstrap cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::InvalidArgument("jobs must be at least 1".to_string()));
        }
        if self.download_attempts == 0 {
            return Err(Error::InvalidArgument(
                "download_attempts must be at least 1".to_string(),
            ));
        }
        if let Some((role, _)) = self.tools.all().into_iter().find(|(_, name)| name.trim().is_empty()) {
            return Err(Error::InvalidArgument(format!("the {} binary name is empty", role)));
        }
        if self.prefix.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("installation prefix is empty".to_string()));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("download directory is empty".to_string()));
        }
        Ok(())
    }

    pub fn with_prefix(mut self, path: impl Into<PathBuf>) -> Self {
        self.prefix = path.into();
        self
    }

    pub fn with_download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    /// Set number of parallel jobs
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_skip_checksum(mut self, skip: bool) -> Self {
        self.skip_checksum = skip;
        self
    }

    /// Capture (true) or pass through (false) both output streams
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self.capture_stderr = capture;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_run_tests(mut self, run: bool) -> Self {
        self.run_tests = run;
        self
    }

    pub fn with_tools(mut self, tools: ToolNames) -> Self {
        self.tools = tools;
        self
    }

    /// Policy applied when `stage`'s tool is missing
    pub fn missing_binary_policy(&self, stage: BootstrapStage) -> MissingBinaryPolicy {
        if self.fail_on_missing.contains(&stage) {
            MissingBinaryPolicy::Fail
        } else {
            MissingBinaryPolicy::Download
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// Get number of CPUs for parallel builds
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_platform_mapping() {
        assert_eq!(HostPlatform::from_parts("linux", "x86_64").unwrap(), HostPlatform::Linux64);
        assert_eq!(HostPlatform::from_parts("linux", "x86").unwrap(), HostPlatform::Linux32);
        assert_eq!(HostPlatform::from_parts("macos", "aarch64").unwrap(), HostPlatform::MacOs64);
        assert_eq!(HostPlatform::from_parts("windows", "x86").unwrap(), HostPlatform::Windows32);
        assert!(matches!(HostPlatform::from_parts("haiku", "x86_64"), Err(Error::Config(_))));
        assert!(matches!(HostPlatform::from_parts("linux", "sparc"), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_defaults() {
        let config = BootstrapConfig::default();
        assert!(config.jobs > 0);
        assert!(config.capture_stdout && config.capture_stderr);
        assert_eq!(config.tools.make, "make");
        assert_eq!(config.missing_binary_policy(BootstrapStage::Compiler), MissingBinaryPolicy::Fail);
        assert_eq!(
            config.missing_binary_policy(BootstrapStage::VersionControl),
            MissingBinaryPolicy::Download
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_config_builder() {
        let config = BootstrapConfig::new()
            .with_prefix("/opt/jhbuild")
            .with_download_dir("/var/cache/jhbuild")
            .with_jobs(8)
            .with_capture(false);

        assert_eq!(config.prefix, PathBuf::from("/opt/jhbuild"));
        assert_eq!(config.download_dir, PathBuf::from("/var/cache/jhbuild"));
        assert_eq!(config.jobs, 8);
        assert!(!config.capture_stdout);
    }

    #[test]
    fn test_validate_rejects_zero_jobs() {
        let err = BootstrapConfig::new().with_jobs(0).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_rejects_empty_binary_name() {
        let tools = ToolNames {
            make: String::new(),
            ..ToolNames::default()
        };
        let err = BootstrapConfig::new().with_tools(tools).validate().unwrap_err();
        assert!(err.to_string().contains("make"));
    }

    #[test]
    fn test_load_partial_toml() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bootstrap.toml");
        std::fs::write(
            &path,
            r#"
prefix = "/opt/jhbuild"
jobs = 2
fail_on_missing = ["compiler", "version-control"]

[tools]
make = "gmake"
"#,
        )
        .unwrap();

        let config = BootstrapConfig::load(&path).unwrap();
        assert_eq!(config.prefix, PathBuf::from("/opt/jhbuild"));
        assert_eq!(config.jobs, 2);
        assert_eq!(config.tools.make, "gmake");
        assert_eq!(config.tools.shell, "sh");
        assert_eq!(
            config.missing_binary_policy(BootstrapStage::VersionControl),
            MissingBinaryPolicy::Fail
        );
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bootstrap.toml");
        std::fs::write(&path, "jobs = \"many\"").unwrap();
        assert!(matches!(BootstrapConfig::load(&path), Err(Error::Config(_))));
    }
}
