use askama::Template;
use color_eyre::eyre::{self, WrapErr as _};
use secstr::SecUtf8;
use serde::Serialize;

use crate::{
    github::{DeploymentStatusEvent, State},
    logs::LogKey,
};

#[derive(Debug, Template)]
#[template(path = "slack-title.txt")]
struct TitleTemplate<'a> {
    subject: &'a str,
    environment: &'a str,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct Attachment {
    pub title: String,
    pub title_link: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'static str>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct Message {
    pub channel: String,
    pub attachments: Vec<Attachment>,
}

/// Slack attachment color for a deployment state.
pub fn color(state: State) -> Option<&'static str> {
    match state {
        State::Pending | State::Queued | State::InProgress => Some("warning"),
        State::Error | State::Failure => Some("danger"),
        State::Success => Some("good"),
        State::Inactive => None,
    }
}

pub fn render(
    event: &DeploymentStatusEvent,
    channel: &str,
    public_url: &str,
) -> eyre::Result<Message> {
    let deployment = &event.deployment;
    let status = &event.deployment_status;

    let title = TitleTemplate {
        subject: deployment.description.as_deref().unwrap_or(&deployment.sha),
        environment: &deployment.environment,
    }
    .render()
    .wrap_err("Failed to render message template")?;
    let title_link = LogKey::for_repository(&event.repository, deployment.id)
        .map(|key| key.url(public_url))
        .or_else(|| status.target_url.clone())
        .unwrap_or_default();

    Ok(Message {
        channel: channel.to_string(),
        attachments: vec![Attachment {
            title: title.trim_end().to_string(),
            title_link,
            text: status.description.clone().unwrap_or_default(),
            color: color(status.state),
        }],
    })
}

pub struct Slack {
    http: awc::Client,
    url: SecUtf8,
    channel: String,
    public_url: String,
}

impl Slack {
    pub fn new(http: awc::Client, url: SecUtf8, channel: String, public_url: String) -> Self {
        Self {
            http,
            url,
            channel,
            public_url,
        }
    }

    pub async fn notify(&self, event: &DeploymentStatusEvent) -> eyre::Result<()> {
        let message = render(event, &self.channel, &self.public_url)?;

        let mut resp = self
            .http
            .post(self.url.unsecure())
            .send_json(&message)
            .await
            .map_err(|err| eyre::eyre!("Failed to send request to Slack: {}", err))?;

        if !resp.status().is_success() {
            let body = resp
                .body()
                .await
                .map_err(|err| eyre::eyre!("Failed to fetch Slack response body: {}", err))?;
            eyre::bail!(
                "Slack returned error: {}\n{}",
                resp.status(),
                String::from_utf8_lossy(body.as_ref())
            );
        }

        tracing::info!(
            "Sent {} notification for deployment {}",
            event.deployment_status.state.as_str(),
            event.deployment.id,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{github::fixtures, testing::FakeServer};

    fn event(state: &str) -> DeploymentStatusEvent {
        serde_json::from_value(fixtures::deployment_status_event("http://gh", 7, state)).unwrap()
    }

    #[test]
    fn maps_states_to_colors() {
        assert_eq!(color(State::Pending), Some("warning"));
        assert_eq!(color(State::Error), Some("danger"));
        assert_eq!(color(State::Success), Some("good"));
    }

    #[test]
    fn renders_single_attachment() {
        let message = render(&event("success"), "#deploys", "https://deploy.example.org").unwrap();
        assert_eq!(
            message,
            Message {
                channel: "#deploys".into(),
                attachments: vec![Attachment {
                    title: "Deploying Fix donation button to staging".into(),
                    title_link: "https://deploy.example.org/deployment/onepercentclub/reef/7"
                        .into(),
                    text: "Deploy succeeded".into(),
                    color: Some("good"),
                }],
            }
        );
    }

    #[test]
    fn falls_back_to_sha_without_description() {
        let mut event = event("pending");
        event.deployment.description = None;
        let message = render(&event, "#deploys", "https://deploy.example.org").unwrap();
        assert_eq!(
            message.attachments[0].title,
            "Deploying a10867b14bb761a232cd80139fbd4c0d33264240 to staging"
        );
    }

    #[actix_rt::test]
    async fn posts_message_once() {
        let server = FakeServer::start();
        let slack = Slack::new(
            awc::Client::default(),
            SecUtf8::from(server.url("/services/T000")),
            "#deploys".into(),
            "https://deploy.example.org".into(),
        );

        slack.notify(&event("error")).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/services/T000");
        assert_eq!(requests[0].body["channel"], "#deploys");
        assert_eq!(requests[0].body["attachments"][0]["color"], "danger");
    }

    #[actix_rt::test]
    async fn surfaces_send_failure() {
        let server = FakeServer::start();
        server.respond_with(500);
        let slack = Slack::new(
            awc::Client::default(),
            SecUtf8::from(server.url("/services/T000")),
            "#deploys".into(),
            "https://deploy.example.org".into(),
        );

        assert!(slack.notify(&event("success")).await.is_err());
    }
}
