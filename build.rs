// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Mirrors the derive definition in src/main.rs
fn build_cli() -> Command {
    Command::new("jhbuild-bootstrap")
        .version(env!("CARGO_PKG_VERSION"))
        .author("jhbuild-bootstrap Contributors")
        .about("Bootstrap jhbuild and its prerequisites, then build a module")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)"),
        )
        .arg(
            Arg::new("prefix")
                .short('p')
                .long("prefix")
                .value_name("DIR")
                .help("Installation prefix"),
        )
        .arg(
            Arg::new("download_dir")
                .short('d')
                .long("download-dir")
                .value_name("DIR")
                .help("Directory for downloads, extracted sources and the jhbuild checkout"),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .value_name("N")
                .help("Number of parallel make jobs"),
        )
        .arg(
            Arg::new("skip_checksum")
                .long("skip-checksum")
                .action(ArgAction::SetTrue)
                .help("Reuse existing downloads without verifying their checksum"),
        )
        .arg(
            Arg::new("quiet_builds")
                .short('q')
                .long("quiet-builds")
                .action(ArgAction::SetTrue)
                .help("Capture build output and only show it when a step fails"),
        )
        .subcommand(
            Command::new("build")
                .about("Install missing prerequisites and jhbuild, then build a module")
                .arg(Arg::new("module").required(true).help("Module to build"))
                .arg(
                    Arg::new("moduleset")
                        .short('m')
                        .long("moduleset")
                        .value_name("FILE")
                        .help("Moduleset file to use instead of jhbuild's default"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("jhbuild-bootstrap.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
