//! Development tasks.
//!
//! Usage:
//!   cargo xtask dist [--release]   Build and stage plugin cdylibs into dist/
//!   cargo xtask demo [--release]   dist + run the demo host against it

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Plugin crates staged into dist/plugins.
const PLUGINS: &[&str] = &["demo_plugin"];

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let release = args.iter().any(|a| a == "--release");
    match args.first().map(|s| s.as_str()) {
        Some("dist") => {
            dist(release);
        }
        Some("demo") => {
            dist(release);
            demo(release);
        }
        _ => {
            eprintln!("Usage:");
            eprintln!("  cargo xtask dist [--release]   Build and stage plugins");
            eprintln!("  cargo xtask demo [--release]   dist + run the demo host");
            std::process::exit(1);
        }
    }
}

fn dist(release: bool) {
    let root = workspace_root();
    let profile = if release { "release" } else { "debug" };
    let plugin_dir = root.join("dist").join("plugins");

    println!("[1/2] Building workspace ({profile})...");
    let mut cmd = Command::new("cargo");
    cmd.current_dir(&root).arg("build");
    if release {
        cmd.arg("--release");
    }
    run(&mut cmd);

    println!("[2/2] Staging plugins into {}...", plugin_dir.display());
    if plugin_dir.exists() {
        fs::remove_dir_all(&plugin_dir).expect("failed to clean dist/plugins");
    }
    fs::create_dir_all(&plugin_dir).expect("failed to create dist/plugins");

    let target_dir = root.join("target").join(profile);
    for plugin in PLUGINS {
        let name = dylib_name(plugin);
        cp(&target_dir.join(&name), &plugin_dir.join(&name));
    }
}

fn demo(release: bool) {
    let root = workspace_root();
    let profile = if release { "release" } else { "debug" };
    let host = root.join("target").join(profile).join("axon-host");
    let mut cmd = Command::new(host);
    cmd.current_dir(&root).arg("dist/plugins");
    run(&mut cmd);
}

fn dylib_name(crate_name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{crate_name}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{crate_name}.dylib")
    } else {
        format!("lib{crate_name}.so")
    }
}

fn workspace_root() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest
        .parent()
        .expect("xtask lives under the workspace root")
        .to_path_buf()
}

fn cp(from: &Path, to: &Path) {
    fs::copy(from, to).unwrap_or_else(|e| {
        panic!("failed to copy {} -> {}: {e}", from.display(), to.display())
    });
    println!("  staged {}", to.display());
}

fn run(cmd: &mut Command) {
    let status = cmd.status().expect("failed to spawn command");
    if !status.success() {
        eprintln!("command failed: {cmd:?}");
        std::process::exit(status.code().unwrap_or(1));
    }
}
