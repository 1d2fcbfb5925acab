//! Build script for the menupic CLI
//!
//! Writes `built.rs` and exports the values used by `--version`.

use std::env;

fn env_or_unknown(name: &str) -> String {
    println!("cargo:rerun-if-env-changed={name}");
    env::var(name).unwrap_or_else(|_| "unknown".to_string())
}

fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    for (exported, source) in [
        ("BUILT_HOST", "HOST"),
        ("BUILT_TARGET", "TARGET"),
        ("BUILT_GIT_COMMIT_HASH", "GIT_COMMIT_HASH"),
    ] {
        println!("cargo:rustc-env={exported}={}", env_or_unknown(source));
    }
    println!(
        "cargo:rustc-env=BUILT_TIME_UTC={}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );
}
