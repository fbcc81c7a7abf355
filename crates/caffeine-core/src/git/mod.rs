//! Git capability
//!
//! The engine only talks to git through [`GitOperator`], so tests can swap in a
//! fake and the real implementation can stay a thin wrapper over the `git`
//! executable (which also owns credentials and transport).

pub mod system;
pub mod version;

use std::path::Path;

use crate::error::Result;

pub use system::SystemGit;
pub use version::{latest_release_tag, ReleaseVersion};

/// Commit a ref points to upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamHead {
    /// The tag or branch that was resolved (the newest release tag when none was asked for)
    pub reference: Option<String>,
    pub commit: String,
}

/// External git operations. None of them cache or retry.
pub trait GitOperator: Send + Sync {
    /// Clone `source` into `dest`. `Fetch` on transport failure, `PathConflict`
    /// if `dest` exists and is not empty.
    fn clone_repo(&self, source: &str, dest: &Path) -> Result<()>;

    /// Detach HEAD at a tag, branch or commit; `None` keeps the default branch.
    /// `RefNotFound` if the ref does not resolve.
    fn checkout_ref(&self, path: &Path, reference: Option<&str>) -> Result<()>;

    /// Checked-out commit. `NotARepository` when git metadata is missing or corrupt.
    fn current_commit(&self, path: &Path) -> Result<String>;

    /// Resolve a ref upstream without touching local state. With no ref, the
    /// newest release tag is used, falling back to the remote HEAD.
    fn remote_head_commit(&self, source: &str, reference: Option<&str>) -> Result<UpstreamHead>;

    /// Tags present in a local clone
    fn list_tags(&self, _path: &Path) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Turn a declared source location into something `git clone` accepts.
///
/// `owner/name` is a GitHub shorthand; URLs, scp-style addresses and existing
/// local paths pass through unchanged.
pub fn repo_url(source: &str) -> String {
    let source = source.trim();

    let passthrough = source.contains("://")
        || source.starts_with("git@")
        || source.starts_with('/')
        || source.starts_with('.')
        || source.starts_with('~')
        || Path::new(source).exists();
    if passthrough {
        return source.to_string();
    }

    let mut parts = source.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            format!("https://github.com/{}/{}", owner, name.trim_end_matches(".git"))
        }
        _ => source.to_string(),
    }
}
