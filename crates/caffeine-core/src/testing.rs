//! Test support: an in-memory git double and directory fingerprints

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use walkdir::WalkDir;

use crate::error::{CaffeineError, Result};
use crate::git::{latest_release_tag, GitOperator, UpstreamHead};

const FAKE_HEAD: &str = ".git/HEAD";
const FAKE_SOURCE: &str = ".git/source";

#[derive(Debug, Clone)]
struct FakeRepo {
    head: String,
    refs: BTreeMap<String, String>,
    files: Vec<String>,
}

/// Git double: clones write the repo's files plus a `.git/HEAD` holding the commit
#[derive(Default)]
pub(crate) struct FakeGit {
    repos: Mutex<BTreeMap<String, FakeRepo>>,
    failing: Mutex<BTreeSet<String>>,
    clones: Mutex<Vec<String>>,
}

pub(crate) fn commit(label: &str) -> String {
    format!("{:0>40}", label)
}

impl FakeGit {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a repository whose default branch points at `head`
    pub(crate) fn add_repo(&self, source: &str, head: &str, files: &[&str]) {
        self.repos.lock().unwrap().insert(
            source.to_string(),
            FakeRepo {
                head: head.to_string(),
                refs: BTreeMap::new(),
                files: files.iter().map(|f| f.to_string()).collect(),
            },
        );
    }

    pub(crate) fn add_ref(&self, source: &str, reference: &str, commit: &str) {
        if let Some(repo) = self.repos.lock().unwrap().get_mut(source) {
            repo.refs.insert(reference.to_string(), commit.to_string());
        }
    }

    pub(crate) fn set_head(&self, source: &str, commit: &str) {
        if let Some(repo) = self.repos.lock().unwrap().get_mut(source) {
            repo.head = commit.to_string();
        }
    }

    /// Make every clone and ls-remote of `source` fail
    pub(crate) fn fail_fetch(&self, source: &str) {
        self.failing.lock().unwrap().insert(source.to_string());
    }

    pub(crate) fn clone_count(&self, source: &str) -> usize {
        self.clones
            .lock()
            .unwrap()
            .iter()
            .filter(|s| *s == source)
            .count()
    }

    fn repo(&self, source: &str) -> Result<FakeRepo> {
        if self.failing.lock().unwrap().contains(source) {
            return Err(CaffeineError::Fetch {
                source_location: source.to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.repos
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .ok_or_else(|| CaffeineError::Fetch {
                source_location: source.to_string(),
                message: "repository not found".to_string(),
            })
    }

    fn repo_at(&self, path: &Path) -> Result<FakeRepo> {
        let source = fs::read_to_string(path.join(FAKE_SOURCE)).map_err(|_| {
            CaffeineError::NotARepository {
                path: path.to_path_buf(),
            }
        })?;
        self.repo(source.trim())
    }
}

impl GitOperator for FakeGit {
    fn clone_repo(&self, source: &str, dest: &Path) -> Result<()> {
        if dest.exists() && fs::read_dir(dest)?.next().is_some() {
            return Err(CaffeineError::PathConflict {
                path: dest.to_path_buf(),
                message: "clone destination is not empty".to_string(),
            });
        }
        let repo = self.repo(source)?;
        self.clones.lock().unwrap().push(source.to_string());

        fs::create_dir_all(dest.join(".git"))?;
        fs::write(dest.join(FAKE_HEAD), &repo.head)?;
        fs::write(dest.join(FAKE_SOURCE), source)?;
        for file in &repo.files {
            let path = dest.join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, format!("# {}", file))?;
        }
        Ok(())
    }

    fn checkout_ref(&self, path: &Path, reference: Option<&str>) -> Result<()> {
        let Some(reference) = reference else {
            return Ok(());
        };
        let repo = self.repo_at(path)?;
        let known_commit =
            repo.head == reference || repo.refs.values().any(|c| c == reference);
        let commit = match repo.refs.get(reference) {
            Some(commit) => commit.clone(),
            None if known_commit => reference.to_string(),
            None => {
                return Err(CaffeineError::RefNotFound {
                    reference: reference.to_string(),
                    message: "unknown to fake".to_string(),
                })
            }
        };
        fs::write(path.join(FAKE_HEAD), commit)?;
        Ok(())
    }

    fn current_commit(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path.join(FAKE_HEAD))
            .map(|c| c.trim().to_string())
            .map_err(|_| CaffeineError::NotARepository {
                path: path.to_path_buf(),
            })
    }

    fn remote_head_commit(&self, source: &str, reference: Option<&str>) -> Result<UpstreamHead> {
        let repo = self.repo(source)?;
        match reference {
            Some(reference) => repo
                .refs
                .get(reference)
                .map(|commit| UpstreamHead {
                    reference: Some(reference.to_string()),
                    commit: commit.clone(),
                })
                .ok_or_else(|| CaffeineError::RefNotFound {
                    reference: reference.to_string(),
                    message: "unknown to fake".to_string(),
                }),
            None => match latest_release_tag(repo.refs.keys().map(String::as_str)) {
                Some(tag) => Ok(UpstreamHead {
                    commit: repo.refs[&tag].clone(),
                    reference: Some(tag),
                }),
                None => Ok(UpstreamHead {
                    reference: None,
                    commit: repo.head.clone(),
                }),
            },
        }
    }

    fn list_tags(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self.repo_at(path)?.refs.keys().cloned().collect())
    }
}

/// Relative path -> content for every file under `root` (empty if missing)
pub(crate) fn fingerprint(root: &Path) -> BTreeMap<String, Vec<u8>> {
    if !root.exists() {
        return BTreeMap::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .to_string();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}
