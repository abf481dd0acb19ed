//! Repository references for the release source.

use serde::{Deserialize, Serialize};

/// Errors produced while parsing a repository reference.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// The string is not in `owner/repo` form.
    #[error("Invalid GitHub repo format: expected 'owner/repo', got '{0}'")]
    Format(String),
}

/// A validated GitHub repository reference in `owner/repo` format.
///
/// # Example
///
/// ```
/// use relup_schema::repo::GitHubRepo;
///
/// let repo = GitHubRepo::new("thepeacockproject/Peacock").unwrap();
/// assert_eq!(repo.owner(), "thepeacockproject");
/// assert_eq!(repo.name(), "Peacock");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GitHubRepo {
    owner: String,
    name: String,
}

impl GitHubRepo {
    /// Create a new `GitHubRepo`, validating the `owner/repo` format.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Format`] if `s` is not in `owner/repo` format or
    /// if either component is empty.
    pub fn new(s: &str) -> Result<Self, RepoError> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::from_parts(owner, name))
            }
            _ => Err(RepoError::Format(s.to_string())),
        }
    }

    /// Build a reference from an already separated owner and name.
    pub fn from_parts(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Get the owner (user or organization) part.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Get the repository name part.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for GitHubRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl TryFrom<String> for GitHubRepo {
    type Error = RepoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<GitHubRepo> for String {
    fn from(repo: GitHubRepo) -> Self {
        repo.to_string()
    }
}
