//! Build script for party-node
//!
//! Embeds git SHA and build time for `/build-info`.
//! Priority: env var → git command → "unknown"

use chrono::{SecondsFormat, Utc};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-env-changed=BUILD_TIME");

    let git_sha = std::env::var("GIT_SHA")
        .ok()
        .or_else(|| {
            Command::new("git")
                .args(["rev-parse", "--short", "HEAD"])
                .output()
                .ok()
                .filter(|o| o.status.success())
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let build_time = std::env::var("BUILD_TIME")
        .unwrap_or_else(|_| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    println!("cargo:rustc-env=GIT_SHA={git_sha}");
    println!("cargo:rustc-env=BUILD_TIME={build_time}");
}
