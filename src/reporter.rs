use serde::Serialize;

use crate::github::{ApiError, State};

/// GitHub rejects deployment status descriptions longer than this.
pub const DESCRIPTION_LIMIT: usize = 140;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewStatus {
    pub state: State,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl NewStatus {
    pub fn new(state: State, description: &str, target_url: Option<String>) -> Self {
        Self {
            state,
            description: truncate(description, DESCRIPTION_LIMIT),
            target_url,
        }
    }
}

/// Appends deployment statuses on the origin system.
pub trait StatusReporter: Send + Sync {
    fn report(&self, statuses_url: &str, status: &NewStatus) -> Result<(), ApiError>;
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_description_is_cut_to_limit() {
        let status = NewStatus::new(State::Error, &"x".repeat(500), None);
        assert_eq!(status.description.chars().count(), DESCRIPTION_LIMIT);
    }

    #[test]
    fn multibyte_description_is_cut_on_char_boundary() {
        let status = NewStatus::new(State::Error, &"ü".repeat(200), None);
        assert_eq!(status.description.chars().count(), DESCRIPTION_LIMIT);
    }

    #[test]
    fn short_description_is_kept() {
        let status = NewStatus::new(State::Success, "Deploy succeeded", None);
        assert_eq!(status.description, "Deploy succeeded");
    }

    #[test]
    fn serializes_for_github() {
        let status = NewStatus::new(
            State::Success,
            "Deploy succeeded",
            Some("https://deploy.example.org/deployment/o/r/1".into()),
        );
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({
                "state": "success",
                "description": "Deploy succeeded",
                "target_url": "https://deploy.example.org/deployment/o/r/1",
            })
        );

        let pending = NewStatus::new(State::Pending, "Deploy started", None);
        assert_eq!(
            serde_json::to_value(&pending).unwrap(),
            serde_json::json!({ "state": "pending", "description": "Deploy started" })
        );
    }
}
