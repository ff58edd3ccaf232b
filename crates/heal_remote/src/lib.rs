//! # heal_remote
//!
//! Network-facing collaborators for heal:
//!
//! - [`SonarQubeClient`]: the issue tracker
//! - [`GitHubForge`] / [`GitLabForge`]: review request APIs
//! - [`RepositoryClient`]: local git plus a forge, as a version-control client

pub mod error;
pub mod forge;
pub mod repository;
pub mod sonarqube;

pub use error::{RemoteError, RemoteResult};
pub use forge::{parse_repo_slug, Forge, GitHubForge, GitLabForge, GITHUB_API_URL};
pub use repository::{RepositoryClient, DEFAULT_REMOTE};
pub use sonarqube::{component_path, SonarQubeClient};
