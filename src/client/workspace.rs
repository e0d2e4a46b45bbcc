//! Rooted local file system served to the agent.
//!
//! Every path the agent names is resolved against the workspace root and
//! rejected if it escapes it, whether through `..` segments, an absolute
//! path elsewhere, or a symlink whose target lies outside.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::protocol::{DirEntry, GrepMatch, GrepSearchParams, GrepSearchResult, ListDirsResult};
use crate::{AppError, Result};

/// Default cap on grep matches per search.
pub const DEFAULT_MAX_GREP_RESULTS: usize = 20;
/// Default cap on directory entries per listing.
pub const DEFAULT_MAX_LIST_ENTRIES: usize = 1000;
/// Grep lines longer than this many characters are shortened.
pub const MAX_LINE_CHARS: usize = 200;
/// Leading bytes inspected when deciding whether a file is text.
const SNIFF_BYTES: usize = 512;

/// Local directory the agent may read and write through reverse requests.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    given_root: PathBuf,
    max_grep_results: usize,
    max_list_entries: usize,
}

impl Workspace {
    /// Open the workspace rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `root` does not exist or is not a
    /// directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let given_root = root.as_ref().to_path_buf();
        let root = given_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace root invalid: {err}")))?;
        if !root.is_dir() {
            return Err(AppError::Config(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            given_root,
            max_grep_results: DEFAULT_MAX_GREP_RESULTS,
            max_list_entries: DEFAULT_MAX_LIST_ENTRIES,
        })
    }

    /// Override the grep match cap.
    #[must_use]
    pub fn with_max_grep_results(mut self, max: usize) -> Self {
        self.max_grep_results = max.max(1);
        self
    }

    /// Override the directory listing cap.
    #[must_use]
    pub fn with_max_list_entries(mut self, max: usize) -> Self {
        self.max_list_entries = max.max(1);
        self
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `candidate` to an absolute path inside the workspace.
    ///
    /// Relative paths are taken relative to the root. The path need not
    /// exist, but every symlink along it must point at an existing target
    /// inside the root.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if the path escapes the workspace.
    pub fn resolve(&self, candidate: impl AsRef<Path>) -> Result<PathBuf> {
        let candidate = candidate.as_ref();
        let relative = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root)
                .or_else(|_| candidate.strip_prefix(&self.given_root))
                .map_err(|_| AppError::PathViolation("path outside workspace".into()))?
        } else {
            candidate
        };

        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(AppError::PathViolation(
                            "path attempts to escape workspace".into(),
                        ));
                    }
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AppError::PathViolation("path outside workspace".into()));
                }
                Component::Normal(part) => normalized.push(part),
            }
        }

        // Walk the path one component at a time so that every symlink on it,
        // dangling or not, is checked before anything follows it.
        let mut resolved = self.root.clone();
        let mut missing = false;
        for part in normalized.components() {
            let next = resolved.join(part);
            if missing {
                resolved = next;
                continue;
            }
            match fs::symlink_metadata(&next) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let target = next.canonicalize().map_err(|_| {
                        AppError::PathViolation(format!(
                            "symlink {} has no resolvable target",
                            part.as_os_str().to_string_lossy()
                        ))
                    })?;
                    if !target.starts_with(&self.root) {
                        return Err(AppError::PathViolation(
                            "symlink target escapes workspace".into(),
                        ));
                    }
                    resolved = target;
                }
                Ok(_) => resolved = next,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    missing = true;
                    resolved = next;
                }
                Err(err) => {
                    return Err(AppError::PathViolation(format!("cannot resolve path: {err}")))
                }
            }
        }
        Ok(resolved)
    }

    /// Read a UTF-8 text file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation`, `AppError::NotFound`, or
    /// `AppError::Io`.
    pub async fn read_text_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|err| io_error(path, &err))?;
        debug!(path, bytes = content.len(), "file read");
        Ok(content)
    }

    /// Write a text file, creating missing parent directories.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` or `AppError::Io`.
    pub async fn write_text_file(&self, path: &str, content: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error(path, &err))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|err| io_error(path, &err))?;
        info!(path, bytes = content.len(), "file written");
        Ok(())
    }

    /// Search files for lines matching `params.pattern`.
    ///
    /// Directories are searched recursively. Binary files are skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidParams` for a bad regex or glob,
    /// `AppError::PathViolation`, or `AppError::NotFound`.
    pub async fn grep(&self, params: &GrepSearchParams) -> Result<GrepSearchResult> {
        let target = self.resolve(params.path.as_deref().unwrap_or("."))?;
        if !target.exists() {
            return Err(AppError::NotFound(
                params.path.as_deref().unwrap_or(".").to_owned(),
            ));
        }
        let regex = RegexBuilder::new(&params.pattern)
            .case_insensitive(!params.case_sensitive.unwrap_or(false))
            .build()
            .map_err(|err| AppError::InvalidParams(format!("invalid regex pattern: {err}")))?;
        let file_glob = params
            .file_pattern
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|err| AppError::InvalidParams(format!("invalid file pattern: {err}")))?;

        let search = GrepJob {
            root: self.root.clone(),
            target,
            regex,
            file_glob,
            cap: self.max_grep_results,
        };
        let result = tokio::task::spawn_blocking(move || search.run())
            .await
            .map_err(|err| AppError::Io(format!("grep task failed: {err}")))?;
        debug!(
            pattern = %params.pattern,
            matches = result.matches.len(),
            truncated = result.truncated,
            "grep finished"
        );
        Ok(result)
    }

    /// List a directory, optionally recursively.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation`, `AppError::NotFound`,
    /// `AppError::InvalidParams` when `path` is not a directory, or
    /// `AppError::Io`.
    pub async fn list_dirs(&self, path: &str, recursive: bool) -> Result<ListDirsResult> {
        let target = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|err| io_error(path, &err))?;
        if !metadata.is_dir() {
            return Err(AppError::InvalidParams(format!("{path} is not a directory")));
        }

        let root = self.root.clone();
        let cap = self.max_list_entries;
        let (entries, truncated) =
            tokio::task::spawn_blocking(move || list_blocking(&root, &target, recursive, cap))
                .await
                .map_err(|err| AppError::Io(format!("listing task failed: {err}")))??;
        Ok(ListDirsResult {
            count: entries.len(),
            entries,
            truncated,
        })
    }
}

/// Whether `sample` looks like text: no NUL byte and at most 30 % control
/// characters other than tab, newline and carriage return.
#[must_use]
pub fn looks_like_text(sample: &[u8]) -> bool {
    if sample.contains(&0) {
        return false;
    }
    let control = sample
        .iter()
        .filter(|&&b| (b < 32 && !matches!(b, b'\t' | b'\n' | b'\r')) || b == 127)
        .count();
    control * 100 <= sample.len() * 30
}

/// Shorten `line` to [`MAX_LINE_CHARS`] characters plus `...`.
#[must_use]
pub fn shorten_line(line: &str) -> String {
    match line.char_indices().nth(MAX_LINE_CHARS) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_owned(),
    }
}

struct GrepJob {
    root: PathBuf,
    target: PathBuf,
    regex: Regex,
    file_glob: Option<glob::Pattern>,
    cap: usize,
}

impl GrepJob {
    fn run(&self) -> GrepSearchResult {
        let mut files = Vec::new();
        if self.target.is_file() {
            files.push(self.target.clone());
        } else {
            walk(&self.target, true, false, &mut files);
        }

        let mut matches = Vec::new();
        let mut truncated = false;
        'files: for file in files {
            if let Some(pattern) = &self.file_glob {
                let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                if !pattern.matches(&name) {
                    continue;
                }
            }
            let Ok(bytes) = fs::read(&file) else {
                continue;
            };
            if !looks_like_text(&bytes[..bytes.len().min(SNIFF_BYTES)]) {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes);
            for (index, line) in text.lines().enumerate() {
                let Some(found) = self.regex.find(line) else {
                    continue;
                };
                if matches.len() == self.cap {
                    truncated = true;
                    break 'files;
                }
                matches.push(GrepMatch {
                    path: display_path(&self.root, &file),
                    line_number: index + 1,
                    line: shorten_line(line),
                    matched: found.as_str().to_owned(),
                });
            }
        }

        let message = truncated.then(|| {
            format!(
                "Results limited to {} matches. Refine your search for more specific results.",
                self.cap
            )
        });
        GrepSearchResult {
            matches,
            truncated,
            message,
        }
    }
}

fn list_blocking(
    root: &Path,
    target: &Path,
    recursive: bool,
    cap: usize,
) -> Result<(Vec<DirEntry>, bool)> {
    let paths = if recursive {
        let mut paths = Vec::new();
        walk(target, true, true, &mut paths);
        paths
    } else {
        sorted_children(target).map_err(|err| io_error(&target.to_string_lossy(), &err))?
    };

    let truncated = paths.len() > cap;
    let entries = paths
        .into_iter()
        .take(cap)
        .filter_map(|path| {
            let metadata = fs::symlink_metadata(&path).ok()?;
            Some(DirEntry {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: display_path(root, &path),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            })
        })
        .collect();
    Ok((entries, truncated))
}

fn sorted_children(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut children: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .collect();
    children.sort();
    Ok(children)
}

/// Depth-first walk in name order. Symlinked directories are not followed.
fn walk(dir: &Path, recursive: bool, include_dirs: bool, out: &mut Vec<PathBuf>) {
    let Ok(children) = sorted_children(dir) else {
        debug!(dir = %dir.display(), "skipping unreadable directory");
        return;
    };
    for child in children {
        let Ok(file_type) = fs::symlink_metadata(&child).map(|m| m.file_type()) else {
            continue;
        };
        if file_type.is_dir() {
            if include_dirs {
                out.push(child.clone());
            }
            if recursive {
                walk(&child, recursive, include_dirs, out);
            }
        } else if file_type.is_file() || include_dirs {
            out.push(child);
        }
    }
}

fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn io_error(path: &str, err: &std::io::Error) -> AppError {
    if err.kind() == ErrorKind::NotFound {
        AppError::NotFound(path.to_owned())
    } else {
        AppError::Io(format!("{path}: {err}"))
    }
}
