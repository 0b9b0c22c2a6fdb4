//! Embeds the source revision and build date into the controller binary.
//!
//! Release pipelines pass `AUDIT_EXTENSION_REVISION` and
//! `AUDIT_EXTENSION_BUILD_DATE`; local builds fall back to git and the clock.

use std::process::Command;

const REVISION_VAR: &str = "AUDIT_EXTENSION_REVISION";
const BUILD_DATE_VAR: &str = "AUDIT_EXTENSION_BUILD_DATE";

fn main() {
    let revision = std::env::var(REVISION_VAR)
        .ok()
        .filter(|r| !r.is_empty())
        .or_else(git_revision)
        .unwrap_or_else(|| "unknown".to_string());

    let build_date = std::env::var(BUILD_DATE_VAR)
        .ok()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));

    println!("cargo:rustc-env={REVISION_VAR}={revision}");
    println!("cargo:rustc-env={BUILD_DATE_VAR}={build_date}");

    println!("cargo:rerun-if-env-changed={REVISION_VAR}");
    println!("cargo:rerun-if-env-changed={BUILD_DATE_VAR}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// `git describe` output, e.g. `v0.3.1-4-g1a2b3c4-dirty`
fn git_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8(output.stdout).ok()?;
    Some(revision.trim().to_string())
}
