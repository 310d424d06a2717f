//! Lines of a `requirements.txt` produced by `poetry export` / `uv export`.

use serde::Serialize;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum ExportLocation {
    /// A filesystem directory, absolute or relative to the export's cwd.
    Path(String),
    /// A direct URL (VCS or archive).
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedRequirement {
    /// Absent for bare editable paths such as `-e ./libs/dep1`.
    pub name: Option<String>,
    pub version: Option<String>,
    pub extras: Vec<String>,
    /// Environment markers exactly as exported.
    pub markers: Option<String>,
    pub location: Option<ExportLocation>,
}

impl ExportedRequirement {
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.location, Some(ExportLocation::Path(_)))
    }
}

/// Parse every requirement line, skipping blanks, comments and pip options.
#[must_use]
pub fn parse_export(text: &str) -> Vec<ExportedRequirement> {
    text.lines().filter_map(parse_export_line).collect()
}

#[must_use]
pub fn parse_export_line(line: &str) -> Option<ExportedRequirement> {
    let line = line.trim().trim_end_matches('\\').trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("--") {
        return None;
    }
    if let Some(location) = line.strip_prefix("-e ") {
        let location = location.trim();
        let location = location.split_once("#egg=").map_or(location, |(path, _)| path);
        return Some(ExportedRequirement {
            name: None,
            version: None,
            extras: Vec::new(),
            markers: None,
            location: Some(ExportLocation::Path(path_from_location(location))),
        });
    }
    if line.starts_with('.') || line.starts_with('/') {
        return Some(ExportedRequirement {
            name: None,
            version: None,
            extras: Vec::new(),
            markers: None,
            location: Some(ExportLocation::Path(line.to_string())),
        });
    }

    let (head, markers) = match line.split_once(';') {
        Some((head, markers)) => (head.trim(), Some(markers.trim().to_string())),
        None => (line, None),
    };
    let markers = markers.filter(|markers| !markers.is_empty());

    if let Some((name_part, target)) = head.split_once('@') {
        let (name, extras) = split_extras(name_part.trim());
        let target = target.trim();
        let location = if target.starts_with("file:") {
            ExportLocation::Path(path_from_location(target))
        } else {
            ExportLocation::Url(target.to_string())
        };
        return Some(ExportedRequirement {
            name: Some(name),
            version: None,
            extras,
            markers,
            location: Some(location),
        });
    }

    let (name_part, version) = match head.split_once("==") {
        Some((name, version)) => (name.trim(), Some(version.trim().to_string())),
        None => (head, None),
    };
    let (name, extras) = split_extras(name_part);
    if name.is_empty() {
        return None;
    }
    Some(ExportedRequirement {
        name: Some(name),
        version,
        extras,
        markers,
        location: None,
    })
}

fn split_extras(raw: &str) -> (String, Vec<String>) {
    match raw.split_once('[') {
        Some((name, rest)) => {
            let extras = rest
                .trim_end_matches(']')
                .split(',')
                .map(str::trim)
                .filter(|extra| !extra.is_empty())
                .map(str::to_string)
                .collect();
            (name.trim().to_string(), extras)
        }
        None => (raw.trim().to_string(), Vec::new()),
    }
}

fn path_from_location(location: &str) -> String {
    if location.starts_with("file:") {
        if let Some(path) = Url::parse(location)
            .ok()
            .and_then(|url| url.to_file_path().ok())
        {
            return path.to_string_lossy().to_string();
        }
        return location
            .trim_start_matches("file://")
            .trim_start_matches("file:")
            .to_string();
    }
    location.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_poetry_export() {
        let text = r#"click==7.1.2 ; python_version >= "3.6" and python_version < "4.0"
dep1 @ file:///workspace/libs/dep1 ; python_version >= "3.6" and python_version < "4.0"
numpy==1.21.0 ; python_version >= "3.7" and python_version < "3.11"
requests[socks,security]==2.31.0
vcs @ git+https://github.com/acme/vcs.git@abc123
--extra-index-url https://pypi.internal/simple
"#;
        let lines = parse_export(text);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].name.as_deref(), Some("click"));
        assert_eq!(lines[0].version.as_deref(), Some("7.1.2"));
        assert_eq!(
            lines[0].markers.as_deref(),
            Some(r#"python_version >= "3.6" and python_version < "4.0""#)
        );
        assert_eq!(lines[1].name.as_deref(), Some("dep1"));
        assert_eq!(
            lines[1].location,
            Some(ExportLocation::Path("/workspace/libs/dep1".into()))
        );
        assert!(lines[1].is_local());
        assert_eq!(lines[3].extras, vec!["socks", "security"]);
        assert_eq!(
            lines[4].location,
            Some(ExportLocation::Url("git+https://github.com/acme/vcs.git@abc123".into()))
        );
    }

    #[test]
    fn parses_uv_editable_lines() {
        let text = "-e ./libs/dep1\n.\n    # via app1\nclick==8.1.7\n";
        let lines = parse_export(text);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].location, Some(ExportLocation::Path("./libs/dep1".into())));
        assert_eq!(lines[0].name, None);
        assert_eq!(lines[1].location, Some(ExportLocation::Path(".".into())));
        assert_eq!(lines[2].version.as_deref(), Some("8.1.7"));
    }

    #[test]
    fn editable_file_urls_become_paths() {
        let line = parse_export_line("-e file:///workspace/libs/dep2").expect("line");
        assert_eq!(line.location, Some(ExportLocation::Path("/workspace/libs/dep2".into())));
    }
}
