use std::fs;
use std::path::Path;
use std::process::Command;

fn main() {
    // Detect if this is a release build
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let is_release = profile == "release";

    // Read version from VERSION file, falling back to the package version
    let package_version =
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.1.0".to_string());
    let version_file = Path::new("VERSION");
    let version = if version_file.exists() {
        fs::read_to_string(version_file)
            .map(|s| s.trim().to_string())
            .unwrap_or(package_version)
    } else {
        package_version
    };

    // Get git commit hash if available
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=SAFEPACK_VERSION={}", version);
    println!("cargo:rustc-env=SAFEPACK_PROFILE={}", if is_release { "release" } else { "development" });
    println!("cargo:rustc-env=SAFEPACK_GIT_HASH={}", git_hash);

    println!("cargo:rerun-if-changed=VERSION");
    println!("cargo:rerun-if-env-changed=PROFILE");
}
