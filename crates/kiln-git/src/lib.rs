//! Git gateway.
//!
//! Clone, head resolution, and checkout behind the [`GitClient`] port, plus
//! credential rewriting for the supported remote providers.

mod cli;
mod url;

pub use cli::GitCli;
pub use url::{Provider, authenticated_url};

use async_trait::async_trait;
use kiln_core::error::Result;
use std::path::Path;

/// Port over the `git` binary.
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clones `url` into `dir`. The target must not exist or be empty.
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<()>;

    /// Hash of the remote head for `branch` as seen from the clone in `dir`.
    async fn remote_head(&self, dir: &Path, branch: &str) -> Result<String>;

    /// Resolves `reference` to a canonical hash in the clone at `dir`.
    async fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String>;

    /// Like [`rev_parse`] but rejects references unknown to the clone.
    async fn rev_parse_verify(&self, dir: &Path, reference: &str) -> Result<String>;

    /// Checks out `reference`, failing loudly when the working tree
    /// disagrees.
    async fn checkout(&self, dir: &Path, reference: &str) -> Result<()>;

    /// Cheap probe that the `git` binary is invokable.
    async fn system_check(&self) -> Result<()>;
}
