//! `git` executable backend

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use super::version::latest_release_tag;
use super::{repo_url, GitOperator, UpstreamHead};
use crate::error::{CaffeineError, Result};

/// Runs the system `git` binary
#[derive(Debug, Clone)]
pub struct SystemGit {
    program: PathBuf,
}

impl Default for SystemGit {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl SystemGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        command.args(args).stdin(Stdio::null());

        tracing::debug!(?command, "running git");
        command
            .output()
            .map_err(|e| CaffeineError::Git(format!("failed to run {}: {}", self.program.display(), e)))
    }

    /// `git rev-parse --verify` a candidate; `None` if it does not name a commit
    fn verify_commit(&self, path: &Path, candidate: &str) -> Result<Option<String>> {
        let spec = format!("{}^{{commit}}", candidate);
        let output = self.run(Some(path), ["rev-parse", "--verify", "--quiet", spec.as_str()])?;
        if !output.status.success() {
            return Ok(None);
        }
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!commit.is_empty()).then_some(commit))
    }

    fn ls_remote(&self, source: &str, args: &[&str]) -> Result<Vec<(String, String)>> {
        let url = repo_url(source);
        let mut full = vec!["ls-remote"];
        full.extend_from_slice(args);
        full.push(url.as_str());

        let output = self.run(None, &full)?;
        if !output.status.success() {
            return Err(CaffeineError::Fetch {
                source_location: source.to_string(),
                message: stderr_message(&output),
            });
        }
        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl GitOperator for SystemGit {
    fn clone_repo(&self, source: &str, dest: &Path) -> Result<()> {
        if dest.exists() && !is_empty_dir(dest)? {
            return Err(CaffeineError::PathConflict {
                path: dest.to_path_buf(),
                message: "clone destination is not empty".to_string(),
            });
        }
        fs::create_dir_all(dest.parent().unwrap_or(dest))?;

        let url = repo_url(source);
        let output = self.run(
            None,
            [
                OsStr::new("clone"),
                OsStr::new("--quiet"),
                OsStr::new(url.as_str()),
                dest.as_os_str(),
            ],
        )?;

        if !output.status.success() {
            return Err(CaffeineError::Fetch {
                source_location: source.to_string(),
                message: stderr_message(&output),
            });
        }
        Ok(())
    }

    fn checkout_ref(&self, path: &Path, reference: Option<&str>) -> Result<()> {
        let Some(reference) = reference else {
            return Ok(());
        };

        let candidates = [
            format!("refs/tags/{}", reference),
            format!("refs/remotes/origin/{}", reference),
            reference.to_string(),
        ];
        let mut commit = None;
        for candidate in &candidates {
            if let Some(found) = self.verify_commit(path, candidate)? {
                commit = Some(found);
                break;
            }
        }
        let commit = commit.ok_or_else(|| CaffeineError::RefNotFound {
            reference: reference.to_string(),
            message: format!("not found in {}", path.display()),
        })?;

        let output = self.run(Some(path), ["checkout", "--quiet", "--detach", commit.as_str()])?;
        if !output.status.success() {
            return Err(CaffeineError::Git(format!(
                "git checkout {} failed: {}",
                reference,
                stderr_message(&output)
            )));
        }
        Ok(())
    }

    fn current_commit(&self, path: &Path) -> Result<String> {
        let not_a_repo = || CaffeineError::NotARepository {
            path: path.to_path_buf(),
        };
        if !path.join(".git").exists() {
            return Err(not_a_repo());
        }

        let output = self.run(Some(path), ["rev-parse", "HEAD"])?;
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || commit.is_empty() {
            return Err(not_a_repo());
        }
        Ok(commit)
    }

    fn remote_head_commit(&self, source: &str, reference: Option<&str>) -> Result<UpstreamHead> {
        match reference {
            Some(reference) if is_full_commit(reference) => Ok(UpstreamHead {
                reference: None,
                commit: reference.to_string(),
            }),
            Some(reference) => {
                let refs = self.ls_remote(source, &[])?;
                resolve_remote_ref(&refs, reference)
                    .map(|commit| UpstreamHead {
                        reference: Some(reference.to_string()),
                        commit,
                    })
                    .ok_or_else(|| CaffeineError::RefNotFound {
                        reference: reference.to_string(),
                        message: format!("not found upstream in {}", source),
                    })
            }
            None => {
                let tags = tag_commits(&self.ls_remote(source, &["--tags"])?);
                if let Some(tag) = latest_release_tag(tags.keys().map(String::as_str)) {
                    let commit = tags[&tag].clone();
                    return Ok(UpstreamHead {
                        reference: Some(tag),
                        commit,
                    });
                }

                let head = self.ls_remote(source, &["HEAD"])?;
                head.into_iter()
                    .find(|(name, _)| name == "HEAD")
                    .map(|(_, commit)| UpstreamHead {
                        reference: None,
                        commit,
                    })
                    .ok_or_else(|| CaffeineError::RefNotFound {
                        reference: "HEAD".to_string(),
                        message: format!("remote {} has no HEAD", source),
                    })
            }
        }
    }

    fn list_tags(&self, path: &Path) -> Result<Vec<String>> {
        let output = self.run(Some(path), ["tag", "--list"])?;
        if !output.status.success() {
            return Err(CaffeineError::NotARepository {
                path: path.to_path_buf(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(path.is_dir() && fs::read_dir(path)?.next().is_none())
}

fn is_full_commit(reference: &str) -> bool {
    reference.len() == 40 && reference.bytes().all(|b| b.is_ascii_hexdigit())
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("git exited with {}", output.status)
    } else {
        stderr
    }
}

/// Parse `git ls-remote` output into `(refname, commit)` pairs
pub(crate) fn parse_ls_remote(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let commit = fields.next()?;
            let name = fields.next()?;
            Some((name.to_string(), commit.to_string()))
        })
        .collect()
}

/// Tag name -> commit, preferring the peeled (`^{}`) commit of annotated tags
pub(crate) fn tag_commits(refs: &[(String, String)]) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    let mut peeled = BTreeMap::new();

    for (name, commit) in refs {
        let Some(tag) = name.strip_prefix("refs/tags/") else {
            continue;
        };
        match tag.strip_suffix("^{}") {
            Some(tag) => {
                peeled.insert(tag.to_string(), commit.clone());
            }
            None => {
                tags.insert(tag.to_string(), commit.clone());
            }
        }
    }

    tags.extend(peeled);
    tags
}

/// Commit for a tag or branch name in ls-remote output
pub(crate) fn resolve_remote_ref(refs: &[(String, String)], reference: &str) -> Option<String> {
    if let Some(commit) = tag_commits(refs).remove(reference) {
        return Some(commit);
    }
    let branch = format!("refs/heads/{}", reference);
    refs.iter()
        .find(|(name, _)| *name == branch || name == reference)
        .map(|(_, commit)| commit.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LS_REMOTE: &str = "\
1111111111111111111111111111111111111111\tHEAD
1111111111111111111111111111111111111111\trefs/heads/main
2222222222222222222222222222222222222222\trefs/heads/dev
3333333333333333333333333333333333333333\trefs/tags/v1.0.0
4444444444444444444444444444444444444444\trefs/tags/v1.0.0^{}
5555555555555555555555555555555555555555\trefs/tags/v1.1.0
";

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(dir)
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
            .args(args)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    /// Upstream repo with two tagged commits
    fn upstream_repo(temp: &TempDir) -> PathBuf {
        let repo = temp.path().join("upstream");
        fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "--quiet"]);
        fs::write(repo.join("plugin.tmux"), "# v1").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "--quiet", "-m", "first"]);
        git(&repo, &["tag", "v1.0.0"]);
        fs::write(repo.join("plugin.tmux"), "# v2").unwrap();
        git(&repo, &["commit", "--quiet", "-am", "second"]);
        git(&repo, &["tag", "-a", "v1.1.0", "-m", "release"]);
        repo
    }

    #[test]
    fn test_parse_ls_remote() {
        let refs = parse_ls_remote(LS_REMOTE);
        assert_eq!(refs.len(), 6);
        assert_eq!(refs[0], ("HEAD".to_string(), "1".repeat(40)));
    }

    #[test]
    fn test_tag_commits_prefers_peeled() {
        let tags = tag_commits(&parse_ls_remote(LS_REMOTE));
        assert_eq!(tags["v1.0.0"], "4".repeat(40));
        assert_eq!(tags["v1.1.0"], "5".repeat(40));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_resolve_remote_ref() {
        let refs = parse_ls_remote(LS_REMOTE);
        assert_eq!(resolve_remote_ref(&refs, "dev"), Some("2".repeat(40)));
        assert_eq!(resolve_remote_ref(&refs, "v1.0.0"), Some("4".repeat(40)));
        assert_eq!(resolve_remote_ref(&refs, "missing"), None);
    }

    #[test]
    fn test_clone_into_non_empty_is_conflict() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("file"), "x").unwrap();

        let result = SystemGit::new().clone_repo("/nonexistent/repo", &dest);
        assert!(matches!(result, Err(CaffeineError::PathConflict { .. })));
    }

    #[test]
    fn test_current_commit_not_a_repository() {
        let temp = TempDir::new().unwrap();
        let result = SystemGit::new().current_commit(temp.path());
        assert!(matches!(result, Err(CaffeineError::NotARepository { .. })));
    }

    #[test]
    fn test_local_clone_checkout_and_remote_head() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let upstream = upstream_repo(&temp);
        let source = upstream.to_string_lossy().to_string();
        let git = SystemGit::new();

        let dest = temp.path().join("clone");
        git.clone_repo(&source, &dest).unwrap();

        let mut tags = git.list_tags(&dest).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["v1.0.0", "v1.1.0"]);

        git.checkout_ref(&dest, Some("v1.0.0")).unwrap();
        let v1 = git.current_commit(&dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("plugin.tmux")).unwrap(), "# v1");

        let remote_v1 = git.remote_head_commit(&source, Some("v1.0.0")).unwrap();
        assert_eq!(remote_v1.commit, v1);

        // No ref: newest release tag, peeled to its commit
        git.checkout_ref(&dest, Some("v1.1.0")).unwrap();
        let v11 = git.current_commit(&dest).unwrap();
        let latest = git.remote_head_commit(&source, None).unwrap();
        assert_eq!(latest.reference.as_deref(), Some("v1.1.0"));
        assert_eq!(latest.commit, v11);
    }

    #[test]
    fn test_checkout_unknown_ref() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let upstream = upstream_repo(&temp);
        let git = SystemGit::new();

        let dest = temp.path().join("clone");
        git.clone_repo(&upstream.to_string_lossy(), &dest).unwrap();

        let result = git.checkout_ref(&dest, Some("v9.9.9"));
        assert!(matches!(result, Err(CaffeineError::RefNotFound { .. })));
    }

    #[test]
    fn test_clone_missing_source_is_fetch_error() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let result = SystemGit::new().clone_repo(
            &temp.path().join("nope").to_string_lossy(),
            &temp.path().join("dest"),
        );
        assert!(matches!(result, Err(CaffeineError::Fetch { .. })));
    }
}
