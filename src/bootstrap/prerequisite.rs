// src/bootstrap/prerequisite.rs

//! Built-in prerequisite table
//!
//! Each entry names the tool or library a stage provides, how to probe for
//! it and how to build it from a release tarball when it is missing.
//! Every release is pinned to the MD5 published alongside it.

use crate::bootstrap::config::{BootstrapConfig, HostPlatform, MissingBinaryPolicy};
use crate::bootstrap::locate::Presence;
use crate::bootstrap::stages::BootstrapStage;
use crate::bootstrap::steps::{BuildStep, BuildStepKind};
use crate::download::DownloadSpec;
use crate::error::{Error, Result};
use crate::process::{ShellCommand, shell_quote};
use std::path::Path;

/// A tool or library the bootstrap makes sure is installed
#[derive(Debug, Clone)]
pub struct PrerequisiteSpec {
    pub name: String,
    pub stage: BootstrapStage,
    pub presence: Presence,
    pub policy: MissingBinaryPolicy,
    /// Source archive; `None` when the prerequisite cannot be built here
    pub source: Option<DownloadSpec>,
    /// Patches applied in order with `patch -p1`
    pub patches: Vec<DownloadSpec>,
    pub steps: Vec<BuildStep>,
}

impl PrerequisiteSpec {
    /// A prerequisite that must already be installed
    pub fn system(name: &str, stage: BootstrapStage, presence: Presence) -> Self {
        Self {
            name: name.to_string(),
            stage,
            presence,
            policy: MissingBinaryPolicy::Fail,
            source: None,
            patches: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// A prerequisite built from `source` when missing
    pub fn from_source(
        name: &str,
        stage: BootstrapStage,
        presence: Presence,
        source: DownloadSpec,
        steps: Vec<BuildStep>,
    ) -> Self {
        Self {
            name: name.to_string(),
            stage,
            presence,
            policy: MissingBinaryPolicy::Download,
            source: Some(source),
            patches: Vec::new(),
            steps,
        }
    }

    pub fn with_policy(mut self, policy: MissingBinaryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_patch(mut self, patch: DownloadSpec) -> Self {
        self.patches.push(patch);
        self
    }
}

/// A source release: URL, directory it unpacks to, pinned checksum
struct Release {
    url: &'static str,
    dir: &'static str,
    checksum: &'static str,
}

impl Release {
    fn spec(&self, download_dir: &Path) -> DownloadSpec {
        DownloadSpec::archive(self.url, download_dir, self.dir, self.checksum)
    }
}

const PERL: Release = Release {
    url: "https://www.cpan.org/src/5.0/perl-5.26.1.tar.xz",
    dir: "perl-5.26.1",
    checksum: "70e988b4318739b0cf3ad5e120bfde88",
};

const GETTEXT: Release = Release {
    url: "https://ftp.gnu.org/pub/gnu/gettext/gettext-0.19.8.1.tar.xz",
    dir: "gettext-0.19.8.1",
    checksum: "df3f5690eaa30fd228537b00cb7b7590",
};

const XZ: Release = Release {
    url: "https://tukaani.org/xz/xz-5.2.3.tar.xz",
    dir: "xz-5.2.3",
    checksum: "60fb79cab777e3f71ca43d298adacbd5",
};

const LIBFFI: Release = Release {
    url: "https://sourceware.org/pub/libffi/libffi-3.2.1.tar.gz",
    dir: "libffi-3.2.1",
    checksum: "83b89587607e3eb65c70d361f13bab43",
};

const GIT: Release = Release {
    url: "https://www.kernel.org/pub/software/scm/git/git-2.13.3.tar.gz",
    dir: "git-2.13.3",
    checksum: "e10ede8b80a2c987d04ee376534cb7e1",
};

const OPENSSL: Release = Release {
    url: "https://www.openssl.org/source/old/1.1.0/openssl-1.1.0g.tar.gz",
    dir: "openssl-1.1.0g",
    checksum: "ba5f1b8b835b88cadbce9b35ed9531a6",
};

const PYTHON: Release = Release {
    url: "https://www.python.org/ftp/python/3.6.4/Python-3.6.4.tar.xz",
    dir: "Python-3.6.4",
    checksum: "1325134dd525b4a2c3272a1a0214dd54",
};

/// `sh config --prefix=<prefix> --openssldir=<prefix>/ssl`
fn openssl_configure() -> BuildStep {
    BuildStep::new(BuildStepKind::Configure, |ctx| {
        ShellCommand::new([
            ctx.tools.shell.clone(),
            "config".to_string(),
            ctx.prefix_arg(),
            format!("--openssldir={}", shell_quote(&ctx.prefix_path("ssl"))),
        ])
    })
}

/// The prerequisites of a jhbuild bootstrap, in stage order
///
/// Only Unix hosts can build the table from source.
pub fn default_prerequisites(config: &BootstrapConfig, platform: HostPlatform) -> Result<Vec<PrerequisiteSpec>> {
    if !platform.is_unix() {
        return Err(Error::Config(format!(
            "building prerequisites from source is not supported on {}",
            platform
        )));
    }

    let dir = config.download_dir.as_path();
    let tools = &config.tools;
    let tests = config.run_tests;

    let mut perl_steps = vec![
        BuildStep::configure_script("Configure", &["-Dprefix="], &["-des"]),
        BuildStep::interpreter_build(),
    ];
    if tests {
        perl_steps.push(BuildStep::interpreter_test());
    }
    perl_steps.push(BuildStep::interpreter_install());

    let mut python_steps = vec![BuildStep::configure(&[]), BuildStep::interpreter_build()];
    if tests {
        python_steps.push(BuildStep::interpreter_test());
    }
    python_steps.push(BuildStep::interpreter_install());

    let mut openssl_steps = vec![openssl_configure(), BuildStep::make()];
    if tests {
        openssl_steps.push(BuildStep::make_test());
    }
    openssl_steps.push(BuildStep::make_install());

    let prerequisites = vec![
        PrerequisiteSpec::system("gcc", BootstrapStage::Compiler, Presence::Binary(tools.cc.clone())),
        PrerequisiteSpec::from_source(
            "perl",
            BootstrapStage::PackageManager,
            Presence::Binary(tools.cpan.clone()),
            PERL.spec(dir),
            perl_steps,
        ),
        PrerequisiteSpec::from_source(
            "gettext",
            BootstrapStage::I18nTool,
            Presence::Binary(tools.msgfmt.clone()),
            GETTEXT.spec(dir),
            BuildStep::autotools(&[], tests),
        ),
        PrerequisiteSpec::from_source(
            "xz",
            BootstrapStage::CompressionLib,
            Presence::Library("liblzma".to_string()),
            XZ.spec(dir),
            BuildStep::autotools(&[], tests),
        ),
        PrerequisiteSpec::from_source(
            "libffi",
            BootstrapStage::CompressionLib,
            Presence::Library("libffi".to_string()),
            LIBFFI.spec(dir),
            BuildStep::autotools(&[], tests),
        ),
        PrerequisiteSpec::from_source(
            "git",
            BootstrapStage::VersionControl,
            Presence::Binary(tools.git.clone()),
            GIT.spec(dir),
            BuildStep::autotools(&[], tests),
        ),
        PrerequisiteSpec::from_source(
            "openssl",
            BootstrapStage::CryptoLib,
            Presence::Binary(tools.openssl.clone()),
            OPENSSL.spec(dir),
            openssl_steps,
        ),
        PrerequisiteSpec::from_source(
            "python",
            BootstrapStage::Interpreter,
            Presence::Binary(tools.python.clone()),
            PYTHON.spec(dir),
            python_steps,
        ),
    ];

    Ok(prerequisites
        .into_iter()
        .map(|prerequisite| {
            let policy = config.missing_binary_policy(prerequisite.stage);
            prerequisite.with_policy(policy)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveKind;
    use crate::bootstrap::config::ToolNames;
    use crate::bootstrap::steps::StepContext;
    use std::path::PathBuf;

    fn table() -> Vec<PrerequisiteSpec> {
        let config = BootstrapConfig::new().with_download_dir("/cache");
        default_prerequisites(&config, HostPlatform::Linux64).unwrap()
    }

    #[test]
    fn test_table_is_in_stage_order() {
        let table = table();
        assert!(table.windows(2).all(|pair| pair[0].stage <= pair[1].stage));
        assert_eq!(table[0].name, "gcc");
        assert_eq!(table[0].policy, MissingBinaryPolicy::Fail);
        assert!(table[0].source.is_none());
        assert!(table[1..].iter().all(|p| p.policy == MissingBinaryPolicy::Download));
    }

    #[test]
    fn test_git_release() {
        let table = table();
        let git = table.iter().find(|p| p.name == "git").unwrap();
        let source = git.source.as_ref().unwrap();
        assert_eq!(source.target, PathBuf::from("/cache/git-2.13.3.tar.gz"));
        assert_eq!(source.destination, PathBuf::from("/cache/git-2.13.3"));
        assert_eq!(source.kind, ArchiveKind::TarGz);
        assert_eq!(source.checksum, "e10ede8b80a2c987d04ee376534cb7e1");
    }

    #[test]
    fn test_archive_kinds() {
        let table = table();
        let kind_of = |name: &str| {
            table
                .iter()
                .find(|p| p.name == name)
                .and_then(|p| p.source.as_ref())
                .map(|s| s.kind)
        };
        assert_eq!(kind_of("gettext"), Some(ArchiveKind::TarXz));
        assert_eq!(kind_of("python"), Some(ArchiveKind::TarXz));
        assert_eq!(kind_of("openssl"), Some(ArchiveKind::TarGz));
    }

    #[test]
    fn test_run_tests_adds_test_steps() {
        let config = BootstrapConfig::new().with_run_tests(true);
        let table = default_prerequisites(&config, HostPlatform::Linux64).unwrap();
        let perl = table.iter().find(|p| p.name == "perl").unwrap();
        let kinds: Vec<_> = perl.steps.iter().map(BuildStep::kind).collect();
        assert_eq!(
            kinds,
            vec![
                BuildStepKind::Configure,
                BuildStepKind::InterpreterBuild,
                BuildStepKind::InterpreterTest,
                BuildStepKind::InterpreterInstall
            ]
        );
    }

    #[test]
    fn test_every_source_release_is_pinned() {
        for prerequisite in table() {
            let Some(source) = prerequisite.source else {
                continue;
            };
            assert_eq!(source.checksum.len(), 32, "{} has no MD5", prerequisite.name);
            assert!(
                source.checksum.chars().all(|c| c.is_ascii_hexdigit()),
                "{} checksum is not hex",
                prerequisite.name
            );
        }
    }

    #[test]
    fn test_openssl_runs_make_test() {
        let config = BootstrapConfig::new().with_run_tests(true);
        let table = default_prerequisites(&config, HostPlatform::Linux64).unwrap();
        let openssl = table.iter().find(|p| p.name == "openssl").unwrap();
        let kinds: Vec<_> = openssl.steps.iter().map(BuildStep::kind).collect();
        assert_eq!(
            kinds,
            vec![
                BuildStepKind::Configure,
                BuildStepKind::Make,
                BuildStepKind::MakeTest,
                BuildStepKind::MakeInstall
            ]
        );
    }

    #[test]
    fn test_openssl_dir_inside_prefix() {
        let context = StepContext {
            source_dir: PathBuf::from("/cache/openssl-1.1.0g"),
            prefix: PathBuf::from("/opt/prefix"),
            jobs: 1,
            tools: ToolNames::default(),
            search_path: "/usr/bin".into(),
        };
        assert_eq!(
            openssl_configure().command(&context).command_line(),
            "sh config --prefix=/opt/prefix --openssldir=/opt/prefix/ssl"
        );
    }

    #[test]
    fn test_windows_is_rejected() {
        let config = BootstrapConfig::new();
        assert!(matches!(
            default_prerequisites(&config, HostPlatform::Windows64),
            Err(Error::Config(_))
        ));
    }
}
