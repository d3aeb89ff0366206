use std::{env, process::Command};

/// Короткий хеш коммита, либо `unknown` вне git-репозитория.
fn git_commit() -> String {
    if let Ok(commit) = env::var("FLIGHT_GIT_COMMIT") {
        return commit;
    }
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Время сборки; `SOURCE_DATE_EPOCH` делает его воспроизводимым.
fn build_time() -> String {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.parse::<i64>().ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339()
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=FLIGHT_GIT_COMMIT");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    println!("cargo:rustc-env=FLIGHT_GIT_COMMIT={}", git_commit());
    println!("cargo:rustc-env=FLIGHT_BUILD_TIME={}", build_time());
}
