//! Stamps the binary with the commit it was built from

use std::process::Command;

fn main() {
    // Short hash and commit date, e.g. "3f2a9c1 2026-10-02"
    let commit = Command::new("git")
        .args(["log", "-1", "--format=%h %cs"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GOULD_COMMIT={}", commit);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
