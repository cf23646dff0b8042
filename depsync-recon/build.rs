//! Stamps the depsync-recon binary with its origin
//!
//! `GIT_HASH`, `BUILD_TIMESTAMP` and `BUILD_PROFILE` are read back with
//! `env!` and logged once at startup, so every reconciliation log can be
//! tied to the build that produced it.

use std::process::Command;

const UNKNOWN: &str = "unknown";

/// Short commit hash of the checkout, if built from one
fn commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    Some(hash.trim().to_string()).filter(|h| !h.is_empty())
}

fn export(name: &str, value: &str) {
    println!("cargo:rustc-env={}={}", name, value);
}

fn main() {
    let hash = commit_hash().unwrap_or_else(|| UNKNOWN.to_string());
    let stamped_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| UNKNOWN.to_string());

    export("GIT_HASH", &hash);
    export("BUILD_TIMESTAMP", &stamped_at);
    export("BUILD_PROFILE", &profile);
}
