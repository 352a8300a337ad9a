//! In-place manifest edits.
//!
//! Each editor changes exactly one dependency entry and leaves every other
//! byte of the file alone where the format allows it. `package.json` is
//! re-serialized with its original key order, two-space indent and trailing
//! newline; `requirements.txt` and `go.mod` are edited line by line.

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

use crate::ecosystem::{Ecosystem, normalize_name, parse_requirement_line};

/// `package.json` groups searched for a dependency, in order.
pub const NPM_GROUPS: [&str; 4] = [
    "dependencies",
    "devDependencies",
    "optionalDependencies",
    "peerDependencies",
];

/// Where a dependency was found and how it is currently declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    /// Name as spelled in the manifest.
    pub name: String,
    /// Version or range as written; empty when unconstrained.
    pub version: String,
    /// npm dependency group; `None` for pip and Go.
    pub group: Option<String>,
}

/// Looks `package` up in the manifest text of `ecosystem`.
pub fn find(ecosystem: Ecosystem, content: &str, package: &str) -> Result<Option<DeclaredDependency>> {
    match ecosystem {
        Ecosystem::Npm => npm_find(content, package),
        Ecosystem::Pip => Ok(pip_find(content, package)),
        Ecosystem::Go => Ok(go_find(content, package)),
    }
}

/// Rewrites the entry for `package` as `replacement` at `version`.
///
/// `replacement == package` is an upgrade. Otherwise the old entry is swapped
/// for the new name at the same position.
pub fn rewrite(
    ecosystem: Ecosystem,
    content: &str,
    package: &str,
    replacement: &str,
    version: &str,
) -> Result<String> {
    match ecosystem {
        Ecosystem::Npm => npm_rewrite(content, package, replacement, version),
        Ecosystem::Pip => pip_rewrite(content, package, replacement, version),
        Ecosystem::Go => go_rewrite(content, package, replacement, version),
    }
}

fn npm_parse(content: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(content).context("Failed to parse package.json")? {
        Value::Object(map) => Ok(map),
        _ => bail!("package.json is not a JSON object"),
    }
}

fn npm_find(content: &str, package: &str) -> Result<Option<DeclaredDependency>> {
    let manifest = npm_parse(content)?;
    Ok(NPM_GROUPS.iter().find_map(|group| {
        let version = manifest.get(*group)?.as_object()?.get(package)?;
        Some(DeclaredDependency {
            name: package.to_string(),
            version: version.as_str().unwrap_or_default().to_string(),
            group: Some(group.to_string()),
        })
    }))
}

fn npm_rewrite(content: &str, package: &str, replacement: &str, version: &str) -> Result<String> {
    let mut manifest = npm_parse(content)?;
    let group = NPM_GROUPS
        .iter()
        .find(|g| {
            manifest
                .get(**g)
                .and_then(Value::as_object)
                .is_some_and(|deps| deps.contains_key(package))
        })
        .with_context(|| format!("{} is not declared in package.json", package))?;

    if let Some(Value::Object(deps)) = manifest.get_mut(*group) {
        let mut rebuilt = Map::new();
        for (name, spec) in std::mem::take(deps) {
            if name == package {
                rebuilt.insert(replacement.to_string(), Value::String(version.to_string()));
            } else if name != replacement {
                rebuilt.insert(name, spec);
            }
        }
        *deps = rebuilt;
    }

    let mut out = serde_json::to_string_pretty(&Value::Object(manifest))?;
    if content.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

fn pip_find(content: &str, package: &str) -> Option<DeclaredDependency> {
    let wanted = normalize_name(package);
    content
        .lines()
        .filter_map(parse_requirement_line)
        .find(|req| normalize_name(&req.name) == wanted)
        .map(|req| DeclaredDependency {
            version: req.version(),
            name: req.name,
            group: None,
        })
}

fn pip_rewrite(content: &str, package: &str, replacement: &str, version: &str) -> Result<String> {
    let wanted = normalize_name(package);
    let mut out = String::with_capacity(content.len() + 16);
    let mut edited = false;

    for raw in content.split_inclusive('\n') {
        let (line, ending) = split_line_ending(raw);
        match parse_requirement_line(line) {
            Some(mut req) if !edited && normalize_name(&req.name) == wanted => {
                if replacement != package {
                    req.name = replacement.to_string();
                    req.extras = None;
                }
                req.specifier = format!("=={}", version);
                out.push_str(&req.to_string());
                edited = true;
            }
            _ => out.push_str(line),
        }
        out.push_str(ending);
    }

    if !edited {
        bail!("{} is not listed in requirements.txt", package);
    }
    Ok(out)
}

fn split_line_ending(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}

/// A `require` entry located on one `go.mod` line.
struct GoRequireLine<'a> {
    indent: &'a str,
    /// `"require "` for the single-line form, empty inside a block.
    keyword: &'a str,
    path: &'a str,
    version: &'a str,
    comment: Option<&'a str>,
}

/// Walks `go.mod` lines, yielding the index and parsed entry of every
/// requirement.
fn go_require_lines<'a>(lines: &[&'a str]) -> Vec<(usize, GoRequireLine<'a>)> {
    let mut found = Vec::new();
    let mut in_block = false;

    for (index, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }

        let (keyword, entry) = if in_block {
            if trimmed.starts_with(')') {
                in_block = false;
                continue;
            }
            ("", trimmed)
        } else if let Some(rest) = trimmed.strip_prefix("require") {
            let rest = rest.trim_start();
            if rest.starts_with('(') {
                in_block = true;
                continue;
            }
            ("require ", rest)
        } else {
            continue;
        };

        let (code, comment) = match entry.find("//") {
            Some(pos) => (&entry[..pos], Some(entry[pos..].trim_end())),
            None => (entry, None),
        };
        let mut parts = code.split_whitespace();
        if let (Some(path), Some(version)) = (parts.next(), parts.next()) {
            found.push((
                index,
                GoRequireLine {
                    indent,
                    keyword,
                    path,
                    version,
                    comment,
                },
            ));
        }
    }

    found
}

fn go_find(content: &str, package: &str) -> Option<DeclaredDependency> {
    let lines: Vec<&str> = content.lines().collect();
    go_require_lines(&lines)
        .into_iter()
        .find(|(_, req)| req.path == package)
        .map(|(_, req)| DeclaredDependency {
            name: req.path.to_string(),
            version: req.version.to_string(),
            group: None,
        })
}

fn go_rewrite(content: &str, package: &str, replacement: &str, version: &str) -> Result<String> {
    let version = if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    };

    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let bare: Vec<&str> = lines.iter().map(|l| split_line_ending(l).0).collect();
    let (index, req) = go_require_lines(&bare)
        .into_iter()
        .find(|(_, req)| req.path == package)
        .with_context(|| format!("{} is not required in go.mod", package))?;

    let mut edited = format!("{}{}{} {}", req.indent, req.keyword, replacement, version);
    if let Some(comment) = req.comment {
        edited.push(' ');
        edited.push_str(comment);
    }

    let mut out = String::with_capacity(content.len() + 16);
    for (i, raw) in lines.iter().enumerate() {
        if i == index {
            out.push_str(&edited);
            out.push_str(split_line_ending(raw).1);
        } else {
            out.push_str(raw);
        }
    }
    Ok(out)
}
