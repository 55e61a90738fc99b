use serde::Serialize;

use crate::github::{ApiError, PushEvent};

enum Rule {
    Exact(&'static str),
    Prefix(&'static str),
}

impl Rule {
    fn matches(&self, reference: &str) -> bool {
        match self {
            Rule::Exact(expected) => reference == *expected,
            Rule::Prefix(prefix) => reference.starts_with(prefix),
        }
    }
}

/// Evaluated top to bottom, first match wins.
const RULES: &[(Rule, &str)] = &[
    (Rule::Exact("refs/heads/master"), "staging"),
    (Rule::Prefix("refs/heads/release/"), "testing"),
    (Rule::Exact("refs/heads/develop"), "development"),
    (Rule::Exact("refs/heads/test/temp"), "development"),
];

pub fn resolve_environment(reference: &str) -> Option<&'static str> {
    RULES
        .iter()
        .find(|(rule, _)| rule.matches(reference))
        .map(|(_, environment)| *environment)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewDeployment {
    #[serde(rename = "ref")]
    pub reference: String,
    pub environment: String,
    pub description: String,
    pub auto_merge: bool,
    pub required_contexts: Vec<String>,
}

/// Registers deployment requests on the origin system.
pub trait DeploymentCreator: Send + Sync {
    fn create_deployment(&self, deployments_url: &str, request: &NewDeployment)
        -> Result<(), ApiError>;
}

/// Requests a deployment for a push if its ref maps to an environment.
///
/// Returns the environment that was requested, or `None` when the push was
/// skipped.
pub fn request_deployment(
    event: &PushEvent,
    creator: &dyn DeploymentCreator,
) -> Result<Option<&'static str>, ApiError> {
    if event.deleted {
        tracing::debug!("Ignoring deletion of {}", event.reference);
        return Ok(None);
    }
    let environment = match resolve_environment(&event.reference) {
        Some(environment) => environment,
        None => {
            tracing::debug!("No environment for {}, skipping", event.reference);
            return Ok(None);
        }
    };

    let request = NewDeployment {
        reference: event.reference.clone(),
        environment: environment.to_string(),
        description: event
            .head_commit
            .as_ref()
            .map(|commit| commit.message.clone())
            .unwrap_or_default(),
        auto_merge: false,
        required_contexts: Vec::new(),
    };
    creator.create_deployment(&event.repository.deployments_url, &request)?;
    tracing::info!(
        "Requested deployment of {} ({}) to {}",
        event.repository.full_name,
        event.reference,
        environment,
    );
    Ok(Some(environment))
}
