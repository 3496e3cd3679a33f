use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Names never shown or descended into, regardless of depth.
pub const IGNORED_NAMES: &[&str] = &[
    "node_modules",
    ".git",
    ".next",
    ".vite",
    "dist",
    "dist-electron",
    "__pycache__",
    ".DS_Store",
    "Thumbs.db",
    ".cache",
    ".parcel-cache",
    "coverage",
    ".nyc_output",
    ".turbo",
];

/// The one dot-prefixed name that stays visible.
pub const ALLOWED_DOTFILE: &str = ".env";

pub const TREE_MAX_DEPTH: usize = 10;
pub const FLAT_MAX_DEPTH: usize = 8;
pub const FLAT_MAX_FILES: usize = 500;
pub const SEARCH_MAX_DEPTH: usize = 10;
pub const SEARCH_MAX_MATCHES: usize = 200;
pub const MAX_MATCH_TEXT_CHARS: usize = 500;

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "tiff", "psd", "mp3", "mp4", "wav",
    "ogg", "flac", "avi", "mov", "mkv", "webm", "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "exe", "dll", "so", "dylib", "a", "o",
    "obj", "class", "jar", "wasm", "pyc", "bin", "dat", "db", "sqlite", "woff", "woff2", "ttf",
    "otf", "eot", "lock",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub file: String,
    /// 1-based.
    pub line: usize,
    /// 1-based, in characters.
    pub column: usize,
    pub text: String,
}

pub fn is_hidden(name: &str) -> bool {
    IGNORED_NAMES.contains(&name) || (name.starts_with('.') && name != ALLOWED_DOTFILE)
}

fn is_binary(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
}

struct Visible {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

/// Visible children of `dir`, directories first, then by name ignoring case.
/// Failing to open `dir` is an error; a bad individual entry is skipped.
fn visible_entries(dir: &Path) -> io::Result<Vec<Visible>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }
        let path = entry.path();
        // Symlinks are never followed; a link to a directory is a leaf.
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        entries.push(Visible { name, path, is_dir });
    }
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}

pub fn read_tree(root: &Path) -> io::Result<Vec<FileEntry>> {
    tree_level(root, 0)
}

fn tree_level(dir: &Path, depth: usize) -> io::Result<Vec<FileEntry>> {
    if depth > TREE_MAX_DEPTH {
        return Ok(Vec::new());
    }
    let entries = visible_entries(dir)?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let children = entry.is_dir.then(|| {
                tree_level(&entry.path, depth + 1).unwrap_or_else(|e| {
                    debug!(path = %entry.path.display(), error = %e, "Skipping unreadable directory");
                    Vec::new()
                })
            });
            FileEntry {
                name: entry.name,
                path: entry.path.to_string_lossy().into_owned(),
                is_directory: entry.is_dir,
                children,
            }
        })
        .collect())
}

/// Absolute paths of visible files, at most `FLAT_MAX_FILES`.
pub fn list_files_flat(root: &Path) -> io::Result<Vec<String>> {
    let mut files = Vec::new();
    let top = visible_entries(root)?;
    collect_flat(top, 0, &mut files);
    Ok(files)
}

fn collect_flat(entries: Vec<Visible>, depth: usize, files: &mut Vec<String>) {
    for entry in entries {
        if files.len() >= FLAT_MAX_FILES {
            return;
        }
        if entry.is_dir {
            if depth >= FLAT_MAX_DEPTH {
                continue;
            }
            match visible_entries(&entry.path) {
                Ok(children) => collect_flat(children, depth + 1, files),
                Err(e) => debug!(path = %entry.path.display(), error = %e, "Skipping unreadable directory"),
            }
        } else {
            files.push(entry.path.to_string_lossy().into_owned());
        }
    }
}

/// Line matches of `query` under `root`, at most `SEARCH_MAX_MATCHES` in total.
pub fn search(root: &Path, query: &str, case_sensitive: bool) -> io::Result<Vec<SearchMatch>> {
    let top = visible_entries(root)?;
    let mut matches = Vec::new();
    if query.is_empty() {
        return Ok(matches);
    }
    let pattern = RegexBuilder::new(&regex::escape(query))
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    search_entries(top, 0, &pattern, &mut matches);
    Ok(matches)
}

fn search_entries(entries: Vec<Visible>, depth: usize, pattern: &Regex, matches: &mut Vec<SearchMatch>) {
    for entry in entries {
        if matches.len() >= SEARCH_MAX_MATCHES {
            return;
        }
        if entry.is_dir {
            if depth >= SEARCH_MAX_DEPTH {
                continue;
            }
            match visible_entries(&entry.path) {
                Ok(children) => search_entries(children, depth + 1, pattern, matches),
                Err(e) => debug!(path = %entry.path.display(), error = %e, "Skipping unreadable directory"),
            }
        } else if !is_binary(&entry.path) {
            search_file(&entry.path, pattern, matches);
        }
    }
}

fn search_file(path: &Path, pattern: &Regex, matches: &mut Vec<SearchMatch>) {
    let Ok(bytes) = fs::read(path) else { return };
    let Ok(content) = String::from_utf8(bytes) else { return };
    let file = path.to_string_lossy();

    for (index, line) in content.lines().enumerate() {
        if matches.len() >= SEARCH_MAX_MATCHES {
            return;
        }
        // Columns count chars of the line as written, not of a case-folded copy.
        if let Some(found) = pattern.find(line) {
            matches.push(SearchMatch {
                file: file.to_string(),
                line: index + 1,
                column: line[..found.start()].chars().count() + 1,
                text: line.trim().chars().take(MAX_MATCH_TEXT_CHARS).collect(),
            });
        }
    }
}
