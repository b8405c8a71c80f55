//! Workspace automation tasks.
//!
//! Run with: `cargo xtask <command>`

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Attributes every library crate root must carry.
const REQUIRED_CRATE_ATTRS: [&str; 3] = [
    "#![forbid(unsafe_code)]",
    "#![deny(missing_docs)]",
    "#![deny(rust_2018_idioms)]",
];

#[derive(Parser)]
#[command(name = "xtask", about = "kcb workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks locally
    Ci,
    /// Validate workspace conventions
    Lint,
    /// Run the test suite with task logging enabled
    Test {
        /// `RUST_LOG` filter for the run
        #[arg(long, default_value = "kcb_builder=debug")]
        log: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => run_ci(),
        Commands::Lint => run_lint(),
        Commands::Test { log } => run_tests(&log),
    }
}

fn run_ci() -> Result<()> {
    println!("Running CI checks...\n");

    run_lint()?;
    run_cmd("cargo", &["fmt", "--check"], &[])?;
    run_cmd("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"], &[])?;
    run_cmd("cargo", &["test", "--workspace"], &[])?;
    run_cmd("cargo", &["doc", "--workspace", "--no-deps"], &[])?;

    println!("\nAll CI checks passed!");
    Ok(())
}

fn run_lint() -> Result<()> {
    println!("Validating workspace conventions...\n");

    for entry in std::fs::read_dir("crates").context("reading crates/")? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("kcb-") {
            anyhow::bail!("Crate '{name}' does not follow kcb-* naming");
        }
        check_manifest(&entry.path())?;
        check_crate_root(&entry.path())?;
    }

    println!("All conventions validated!");
    Ok(())
}

fn check_manifest(crate_dir: &Path) -> Result<()> {
    let manifest = crate_dir.join("Cargo.toml");
    let text = std::fs::read_to_string(&manifest)
        .with_context(|| format!("reading {}", manifest.display()))?;
    if !text.contains("[lints]\nworkspace = true") {
        anyhow::bail!("{} does not inherit workspace lints", manifest.display());
    }
    Ok(())
}

fn check_crate_root(crate_dir: &Path) -> Result<()> {
    let lib = crate_dir.join("src/lib.rs");
    let text =
        std::fs::read_to_string(&lib).with_context(|| format!("reading {}", lib.display()))?;
    for attr in REQUIRED_CRATE_ATTRS {
        if !text.contains(attr) {
            anyhow::bail!("{} is missing {attr}", lib.display());
        }
    }
    Ok(())
}

fn run_tests(log: &str) -> Result<()> {
    run_cmd(
        "cargo",
        &["test", "--workspace", "--", "--nocapture"],
        &[("RUST_LOG", log)],
    )
}

fn run_cmd(cmd: &str, args: &[&str], envs: &[(&str, &str)]) -> Result<()> {
    println!("$ {} {}", cmd, args.join(" "));
    let status = Command::new(cmd)
        .args(args)
        .envs(envs.iter().copied())
        .status()
        .with_context(|| format!("Failed to run: {} {}", cmd, args.join(" ")))?;

    if !status.success() {
        anyhow::bail!("Command failed: {} {}", cmd, args.join(" "));
    }
    Ok(())
}
