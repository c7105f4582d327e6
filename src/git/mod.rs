//! Cloning repositories and reading their text files.

pub mod clone;

pub use clone::{clone_repo, normalize_repo_url, repo_name_from_url, walk_repo_files, RepoFile, RepoScan};
