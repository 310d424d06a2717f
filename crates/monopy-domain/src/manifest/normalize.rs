use std::path::{Component, Path, PathBuf};

/// Canonical PEP 503 form used for every name comparison.
#[must_use]
pub fn canonicalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut previous_dash = false;
    for ch in name.trim().chars() {
        if matches!(ch, '_' | '.' | '-') {
            if !previous_dash {
                normalized.push('-');
            }
            previous_dash = true;
        } else {
            normalized.push(ch.to_ascii_lowercase());
            previous_dash = false;
        }
    }
    normalized
}

/// Importable module name for a distribution name (`my-lib` -> `my_lib`).
#[must_use]
pub fn module_name(package: &str) -> String {
    canonicalize_package_name(package).replace('-', "_")
}

/// Name portion of a requirement string, canonicalized.
pub(crate) fn dependency_name(spec: &str) -> String {
    let trimmed = strip_wrapping_quotes(spec.trim());
    let mut end = trimmed.len();
    for (idx, ch) in trimmed.char_indices() {
        if ch.is_ascii_whitespace() || matches!(ch, '<' | '>' | '=' | '!' | '~' | ';' | '@') {
            end = idx;
            break;
        }
    }
    let head = &trimmed[..end];
    let base = head.split('[').next().unwrap_or(head);
    canonicalize_package_name(base)
}

pub(crate) fn strip_wrapping_quotes(input: &str) -> &str {
    if input.len() >= 2 {
        let bytes = input.as_bytes();
        let first = bytes[0];
        let last = bytes[input.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &input[1..input.len() - 1];
        }
    }
    input
}

/// Lexically normalize a workspace-relative path.
///
/// `.` segments are dropped and `..` pops the previous segment. A result that
/// escapes the workspace keeps its leading `..` so it never matches a project.
#[must_use]
pub fn normalize_relative(path: &Path) -> PathBuf {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if parts.last().is_some_and(|last| last != "..") {
                    parts.pop();
                } else {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(segment) => parts.push(segment.to_string_lossy().to_string()),
        }
    }
    parts.iter().collect()
}

/// Relative path leading from `from` to `to`, both workspace-relative.
#[must_use]
pub fn relative_path(from: &Path, to: &Path) -> String {
    let from = normalize_relative(from);
    let to = normalize_relative(to);
    let from_parts: Vec<_> = from.components().collect();
    let to_parts: Vec<_> = to.components().collect();
    let shared = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut segments: Vec<String> = Vec::new();
    for _ in shared..from_parts.len() {
        segments.push("..".to_string());
    }
    for part in &to_parts[shared..] {
        segments.push(part.as_os_str().to_string_lossy().to_string());
    }
    if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_fold_separators() {
        assert_eq!(canonicalize_package_name("My_Lib.core"), "my-lib-core");
        assert_eq!(canonicalize_package_name("a__b"), "a-b");
        assert_eq!(module_name("My-Lib"), "my_lib");
    }

    #[test]
    fn dependency_name_strips_constraints_and_extras() {
        assert_eq!(dependency_name("Requests[socks]>=2.0"), "requests");
        assert_eq!(dependency_name("\"numpy ; python_version > '3'\""), "numpy");
        assert_eq!(dependency_name("dep1 @ file:///tmp/dep1"), "dep1");
    }

    #[test]
    fn relative_paths_walk_up_and_down() {
        assert_eq!(
            normalize_relative(Path::new("apps/app1/../../libs/dep1")),
            PathBuf::from("libs/dep1")
        );
        assert_eq!(
            normalize_relative(Path::new("apps/../../outside")),
            PathBuf::from("../outside")
        );
        assert_eq!(
            relative_path(Path::new("apps/app1"), Path::new("libs/dep1")),
            "../../libs/dep1"
        );
        assert_eq!(relative_path(Path::new(""), Path::new("libs/dep1")), "libs/dep1");
    }
}
