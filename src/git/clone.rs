use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// Files below this many characters (after trimming) carry no signal.
const MIN_CONTENT_CHARS: usize = 5;
const NUL_SCAN_CHARS: usize = 1000;
const MAX_NUL_COUNT: usize = 10;
const PRINTABLE_SAMPLE_CHARS: usize = 2000;
const MIN_PRINTABLE_RATIO: f64 = 0.7;

/// A text file extracted from a repo
#[derive(Debug, Clone)]
pub struct RepoFile {
    pub relative_path: String,
    pub content: String,
    /// Lowercased extension without the dot
    pub extension: String,
}

/// Result of walking a cloned repo.
#[derive(Debug, Clone, Default)]
pub struct RepoScan {
    /// Sorted by relative path
    pub files: Vec<RepoFile>,
    /// Indexed files per extension
    pub file_type_counts: BTreeMap<String, usize>,
}

/// Turn user input into a cloneable URL.
///
/// `github.com/acme/demo` becomes `https://github.com/acme/demo.git`.
/// URLs with an explicit scheme keep it; `.git` is appended when missing.
pub fn normalize_repo_url(input: &str) -> String {
    let url = input.trim().trim_end_matches('/');
    let has_scheme = ["http://", "https://", "git@", "git://"]
        .iter()
        .any(|p| url.starts_with(p));
    let mut url = if has_scheme {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    if !url.ends_with(".git") {
        url.push_str(".git");
    }
    url
}

/// Repository name from a URL: last path segment without `.git`.
pub fn repo_name_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit(['/', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("repo")
        .to_string()
}

/// Clone a git repository to the target directory.
///
/// Some hosts reject the `.git` suffix, so a failed clone of a `.git` URL is
/// retried once without it.
pub fn clone_repo(url: &str, target: &Path) -> Result<()> {
    tracing::info!("Cloning {} into {}", url, target.display());
    match git2::Repository::clone(url, target) {
        Ok(_) => {}
        Err(first) => {
            let Some(stripped) = url.strip_suffix(".git") else {
                return Err(first).with_context(|| format!("Failed to clone {url}"));
            };
            tracing::warn!("Clone of {url} failed ({first}), retrying as {stripped}");
            if target.exists() {
                std::fs::remove_dir_all(target).with_context(|| {
                    format!("Failed to clean up partial clone at {}", target.display())
                })?;
            }
            git2::Repository::clone(stripped, target)
                .with_context(|| format!("Failed to clone {url} (also tried {stripped})"))?;
        }
    }
    tracing::info!("Clone complete: {}", target.display());
    Ok(())
}

/// Walk all indexable text files in a cloned repo and return their contents.
pub fn walk_repo_files(repo_dir: &Path, max_file_bytes: u64) -> RepoScan {
    let mut scan = RepoScan::default();

    for entry in WalkDir::new(repo_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_or_ignored(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(extension) = indexable_extension(path) else {
            continue;
        };

        match entry.metadata() {
            Ok(meta) if meta.len() <= max_file_bytes => {}
            Ok(meta) => {
                tracing::debug!("Skipping {} ({} bytes)", path.display(), meta.len());
                continue;
            }
            Err(_) => continue,
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("Skipping unreadable {}: {e}", path.display());
                continue;
            }
        };
        let content = String::from_utf8_lossy(&bytes).into_owned();
        if !looks_like_text(&content) {
            continue;
        }

        let relative = path
            .strip_prefix(repo_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        *scan.file_type_counts.entry(extension.clone()).or_default() += 1;
        scan.files.push(RepoFile {
            relative_path: relative,
            content,
            extension,
        });
    }

    scan.files
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    tracing::info!(
        "Found {} indexable files in {}",
        scan.files.len(),
        repo_dir.display()
    );
    scan
}

/// Heuristic binary detection on decoded content.
fn looks_like_text(content: &str) -> bool {
    if content.trim().chars().count() < MIN_CONTENT_CHARS {
        return false;
    }

    if content.chars().take(NUL_SCAN_CHARS).any(|c| c == '\0')
        || content.matches('\0').count() > MAX_NUL_COUNT
    {
        return false;
    }

    let mut total = 0usize;
    let mut printable = 0usize;
    for c in content.chars().take(PRINTABLE_SAMPLE_CHARS) {
        total += 1;
        if !c.is_control() || matches!(c, '\n' | '\r' | '\t') {
            printable += 1;
        }
    }
    total > 0 && printable as f64 / total as f64 >= MIN_PRINTABLE_RATIO
}

fn is_hidden_or_ignored(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    // Skip common non-code directories
    entry.file_type().is_dir()
        && matches!(
            name.as_ref(),
            "node_modules"
                | "target"
                | "dist"
                | "build"
                | "__pycache__"
                | "vendor"
                | "venv"
                | "env"
        )
}

fn indexable_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();

    let known = matches!(
        ext.as_str(),
        "txt"
            | "md"
            | "markdown"
            | "rst"
            | "py"
            | "js"
            | "ts"
            | "jsx"
            | "tsx"
            | "java"
            | "c"
            | "cpp"
            | "cs"
            | "go"
            | "rb"
            | "php"
            | "scala"
            | "html"
            | "htm"
            | "xml"
            | "json"
            | "yaml"
            | "yml"
            | "ini"
            | "toml"
            | "cfg"
            | "conf"
            | "sh"
            | "bash"
            | "css"
            | "scss"
            | "sql"
            | "vue"
            | "svelte"
            | "r"
            | "dart"
            | "kt"
            | "swift"
            | "pl"
            | "lua"
            | "rs"
    );
    known.then_some(ext)
}
