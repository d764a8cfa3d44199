pub mod github;

use crate::error::Result;
use std::fmt;

/// Where a file lives: repository (`ORG/REPO`), branch and path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileLocation {
    pub repository: String,
    pub branch: String,
    pub path: String,
}

impl FileLocation {
    pub fn new(repository: &str, branch: &str, path: &str) -> Self {
        Self {
            repository: repository.to_string(),
            branch: branch.to_string(),
            path: path.to_string(),
        }
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.repository, self.branch, self.path)
    }
}

/// File content together with the blob SHA it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub location: FileLocation,
    pub content: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// A conditional write: it only succeeds if the remote blob is still at
/// `prior_sha`.
#[derive(Debug, Clone)]
pub struct CommitRequest<'a> {
    pub location: &'a FileLocation,
    pub content: &'a str,
    pub prior_sha: &'a str,
    pub message: &'a str,
    pub author: &'a CommitAuthor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub commit_sha: String,
    /// Blob SHA of the file after the commit.
    pub content_sha: String,
    pub html_url: Option<String>,
}

#[allow(async_fn_in_trait)]
pub trait ContentStore {
    async fn fetch_file(&self, location: &FileLocation) -> Result<FetchedFile>;

    async fn commit_file(&self, request: &CommitRequest<'_>) -> Result<CommitInfo>;
}
