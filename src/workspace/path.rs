//! Lexical path handling for workspace-relative directories
//!
//! Everything here works on text only; nothing touches the filesystem. A
//! relative working directory is stored as a `PathBuf` made solely of normal
//! components, with the empty path meaning the workspace root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolve `target` against the relative directory `current`.
///
/// `..` pops a component; popping past the root, or any absolute target,
/// is a violation.
pub fn resolve_relative(current: &Path, target: &Path) -> Result<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in current.components().chain(target.components()) {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(Error::WorkspacePathViolation(format!(
                        "'{}' leaves the workspace root",
                        target.display()
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::WorkspacePathViolation(format!(
                    "absolute path '{}' is outside the workspace",
                    target.display()
                )));
            }
        }
    }
    Ok(resolved)
}

/// Turn a directory reported from inside the sandbox into a root-relative path.
pub fn relative_to_mount(mount: &Path, reported: &Path) -> Result<PathBuf> {
    let rest = reported.strip_prefix(mount).map_err(|_| {
        Error::WorkspacePathViolation(format!(
            "working directory '{}' is outside the workspace",
            reported.display()
        ))
    })?;
    resolve_relative(Path::new(""), rest)
}

/// Check every literal `cd` target in a command line before it runs.
///
/// Targets are applied in sequence starting from `cwd`. Absolute targets are
/// accepted only below `mount`. Targets that need shell expansion (`$VAR`,
/// `~`, `-`) cannot be judged lexically and are left to the post-execution
/// check.
pub fn check_cd_targets(command: &str, cwd: &Path, mount: &Path) -> Result<()> {
    let mut current = cwd.to_path_buf();

    for segment in command_segments(command) {
        let mut words = segment.split_whitespace();
        if words.next() != Some("cd") {
            continue;
        }
        let target = words.find(|w| !w.starts_with('-') || *w == "-");
        let Some(target) = target.map(unquote) else {
            current = PathBuf::new();
            continue;
        };
        if target.is_empty() || target == "-" || target.contains(['$', '`', '~', '*', '?']) {
            continue;
        }

        let target = Path::new(target);
        current = if target.is_absolute() {
            relative_to_mount(mount, target)?
        } else {
            resolve_relative(&current, target)?
        };
    }

    Ok(())
}

/// Split a command line at the usual sequencing operators
fn command_segments(command: &str) -> impl Iterator<Item = &str> {
    command
        .split(['\n', ';', '&', '|', '(', ')', '{', '}'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn unquote(word: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = word.strip_prefix(quote).and_then(|w| w.strip_suffix(quote)) {
            return inner;
        }
    }
    word
}
