//! Version-dependent command shapes for the backend CLIs.
//!
//! Every builder is pure so the flag matrix can be table tested without a
//! backend installed.

use std::str::FromStr;

use pep440_rs::Version;

fn at_least(version: &Version, minimum: &str) -> bool {
    Version::from_str(minimum).is_ok_and(|minimum| *version >= minimum)
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

/// Parse the first `x.y.z` that follows `prefix` in a `--version` banner.
#[must_use]
pub fn parse_banner_version(banner: &str, prefix: &str) -> Option<Version> {
    let start = banner.find(prefix)? + prefix.len();
    let candidate: String = banner[start..]
        .trim_start()
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '.')
        .collect();
    Version::from_str(candidate.trim_end_matches('.')).ok()
}

/// `poetry lock`; Poetry 2 keeps existing pins by default.
#[must_use]
pub fn poetry_lock_args(version: &Version, update: bool) -> Vec<String> {
    let mut args = strings(&["lock"]);
    if at_least(version, "2.0.0") {
        if update {
            args.push("--regenerate".into());
        }
    } else if !update {
        args.push("--no-update".into());
    }
    args
}

#[must_use]
pub fn poetry_sync_args(version: &Version) -> Vec<String> {
    if at_least(version, "2.0.0") {
        strings(&["sync"])
    } else {
        strings(&["install", "--sync"])
    }
}

/// `poetry remove --lock` exists from 1.5.
#[must_use]
pub fn poetry_remove_supports_lock(version: &Version) -> bool {
    at_least(version, "1.5.0")
}

#[must_use]
pub fn poetry_export_group_args(version: &Version, dev: bool) -> Vec<String> {
    match (dev, at_least(version, "1.2.0")) {
        (false, _) => Vec::new(),
        (true, true) => strings(&["--with", "dev"]),
        (true, false) => strings(&["--dev"]),
    }
}

#[must_use]
pub fn poetry_export_args(
    version: &Version,
    output: &str,
    extras: &[String],
    dev: bool,
) -> Vec<String> {
    let mut args = strings(&[
        "export",
        "--format",
        "requirements.txt",
        "--without-hashes",
        "--without-urls",
        "--output",
        output,
    ]);
    args.extend(poetry_export_group_args(version, dev));
    for extra in extras {
        args.push("--extras".into());
        args.push(extra.clone());
    }
    args
}

#[must_use]
pub fn uv_export_args(version: &Version, project: &str, dev: bool) -> Vec<String> {
    let mut args = strings(&[
        "export",
        "--format",
        "requirements-txt",
        "--no-hashes",
        "--no-header",
    ]);
    if at_least(version, "0.6.11") {
        args.push("--no-annotate".into());
    }
    args.extend(strings(&["--frozen", "--no-emit-project", "--project", project]));
    if !dev {
        args.push("--no-dev".into());
    }
    args
}

#[must_use]
pub fn uv_lock_args(update: bool) -> Vec<String> {
    let mut args = strings(&["lock"]);
    if update {
        args.push("--upgrade".into());
    }
    args
}
