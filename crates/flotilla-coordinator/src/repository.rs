//! Assignment resolution.
//!
//! The repository turns an [`Assignment`] into what an install needs: the
//! resources to reserve and where the agent should fetch the artifacts.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use flotilla_core::{Assignment, Resources};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("unknown assignment: {0}")]
    UnknownAssignment(Assignment),

    #[error("malformed coordinate '{0}'")]
    MalformedCoordinate(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// An assignment ready to hand to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAssignment {
    pub assignment: Assignment,
    pub resources: Resources,
    pub binary_location: String,
    pub config_location: String,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn resolve(&self, assignment: &Assignment) -> RepositoryResult<ResolvedAssignment>;
}

/// Table-driven repository.
///
/// Binaries are Maven-style coordinates, `group:artifact:version` or
/// `group:artifact:packaging:version`. Configs are `@name:version`.
#[derive(Debug, Clone)]
pub struct StaticRepository {
    binary_base: String,
    config_base: String,
    assignments: HashMap<Assignment, Resources>,
}

impl StaticRepository {
    pub fn new(binary_base: impl Into<String>, config_base: impl Into<String>) -> Self {
        Self {
            binary_base: binary_base.into(),
            config_base: config_base.into(),
            assignments: HashMap::new(),
        }
    }

    /// Register an assignment and the resources each slot of it needs.
    pub fn with_assignment(mut self, assignment: Assignment, resources: Resources) -> Self {
        self.assignments.insert(assignment, resources);
        self
    }

    fn binary_location(&self, coordinate: &str) -> RepositoryResult<String> {
        let parts: Vec<&str> = coordinate.split(':').collect();
        let (group, artifact, packaging, version) = match parts.as_slice() {
            [g, a, v] => (*g, *a, "tar.gz", *v),
            [g, a, p, v] => (*g, *a, *p, *v),
            _ => return Err(RepositoryError::MalformedCoordinate(coordinate.to_string())),
        };
        if group.is_empty() || artifact.is_empty() || version.is_empty() {
            return Err(RepositoryError::MalformedCoordinate(coordinate.to_string()));
        }
        Ok(format!(
            "{}/{}/{artifact}/{version}/{artifact}-{version}.{packaging}",
            self.binary_base.trim_end_matches('/'),
            group.replace('.', "/"),
        ))
    }

    fn config_location(&self, coordinate: &str) -> RepositoryResult<String> {
        let named = coordinate
            .strip_prefix('@')
            .ok_or_else(|| RepositoryError::MalformedCoordinate(coordinate.to_string()))?;
        let (name, version) = named
            .split_once(':')
            .filter(|(n, v)| !n.is_empty() && !v.is_empty())
            .ok_or_else(|| RepositoryError::MalformedCoordinate(coordinate.to_string()))?;
        Ok(format!(
            "{}/{name}/{version}",
            self.config_base.trim_end_matches('/')
        ))
    }
}

#[async_trait]
impl Repository for StaticRepository {
    async fn resolve(&self, assignment: &Assignment) -> RepositoryResult<ResolvedAssignment> {
        let resources = self
            .assignments
            .get(assignment)
            .cloned()
            .ok_or_else(|| RepositoryError::UnknownAssignment(assignment.clone()))?;

        let resolved = ResolvedAssignment {
            assignment: assignment.clone(),
            binary_location: self.binary_location(&assignment.binary)?,
            config_location: self.config_location(&assignment.config)?,
            resources,
        };
        debug!(%assignment, resources = %resolved.resources, "assignment resolved");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> StaticRepository {
        StaticRepository::new("http://repo.example/maven/", "http://repo.example/config")
            .with_assignment(
                Assignment::new("food.fruit:apple:1.0", "@apple:1.0"),
                Resources::from([("cpu", 1), ("memory", 512)]),
            )
    }

    #[tokio::test]
    async fn resolves_known_assignment() {
        let resolved = repo()
            .resolve(&Assignment::new("food.fruit:apple:1.0", "@apple:1.0"))
            .await
            .unwrap();

        assert_eq!(resolved.resources, Resources::from([("cpu", 1), ("memory", 512)]));
        assert_eq!(
            resolved.binary_location,
            "http://repo.example/maven/food/fruit/apple/1.0/apple-1.0.tar.gz"
        );
        assert_eq!(resolved.config_location, "http://repo.example/config/apple/1.0");
    }

    #[tokio::test]
    async fn unknown_assignment_is_rejected() {
        let err = repo()
            .resolve(&Assignment::new("food.fruit:banana:2.0", "@banana:2.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UnknownAssignment(_)));
    }

    #[tokio::test]
    async fn malformed_binary_is_rejected() {
        let assignment = Assignment::new("apple", "@apple:1.0");
        let repo = repo().with_assignment(assignment.clone(), Resources::new());
        let err = repo.resolve(&assignment).await.unwrap_err();
        assert!(matches!(err, RepositoryError::MalformedCoordinate(_)));
    }

    #[tokio::test]
    async fn explicit_packaging_is_used() {
        let assignment = Assignment::new("food.fruit:apple:zip:1.0", "@apple:1.0");
        let repo = repo().with_assignment(assignment.clone(), Resources::new());
        let resolved = repo.resolve(&assignment).await.unwrap();
        assert!(resolved.binary_location.ends_with("apple-1.0.zip"));
    }
}
