//! Webhook payloads sent by GitHub and the client used to talk back to it.

mod client;

use serde::{Deserialize, Serialize};

pub use self::client::{ApiError, Github};

pub const EVENT_HEADER: &str = "X-GitHub-Event";

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
    #[serde(default)]
    pub deployments_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub reference: String,
    pub after: String,
    #[serde(default)]
    pub deleted: bool,
    pub head_commit: Option<Commit>,
    pub repository: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    pub id: u64,
    pub sha: String,
    pub environment: String,
    pub description: Option<String>,
    pub statuses_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentEvent {
    pub deployment: Deployment,
    pub repository: Repository,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Pending,
    Success,
    Error,
    Failure,
    Inactive,
    InProgress,
    Queued,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Success => "success",
            State::Error => "error",
            State::Failure => "failure",
            State::Inactive => "inactive",
            State::InProgress => "in_progress",
            State::Queued => "queued",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentStatus {
    pub state: State,
    pub description: Option<String>,
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentStatusEvent {
    pub deployment_status: DeploymentStatus,
    pub deployment: Deployment,
    pub repository: Repository,
}

#[derive(Debug, Clone)]
pub enum Event {
    Ping,
    Push(PushEvent),
    Deployment(DeploymentEvent),
    DeploymentStatus(DeploymentStatusEvent),
    Unsupported(String),
}

impl Event {
    pub fn parse(kind: &str, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            "ping" => Event::Ping,
            "push" => Event::Push(serde_json::from_slice(body)?),
            "deployment" => Event::Deployment(serde_json::from_slice(body)?),
            "deployment_status" => Event::DeploymentStatus(serde_json::from_slice(body)?),
            other => Event::Unsupported(other.to_string()),
        })
    }
}
