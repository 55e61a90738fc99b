mod slack;

use std::sync::Arc;

use actix::prelude::*;
use color_eyre::eyre;
use secstr::SecUtf8;

use crate::github::DeploymentStatusEvent;

#[derive(Debug, Clone, Message)]
#[rtype(result = "eyre::Result<()>")]
pub struct Notification {
    pub event: Arc<DeploymentStatusEvent>,
}

impl Notification {
    pub fn new(event: DeploymentStatusEvent) -> Self {
        Self {
            event: Arc::new(event),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub slack_webhook: SecUtf8,
    pub slack_channel: String,
    pub public_url: String,
}

/// Posts deployment status changes to the chat channel.
#[derive(Clone)]
pub struct Notifier {
    slack: Arc<slack::Slack>,
}

impl Notifier {
    pub fn new(config: Config) -> Self {
        let Config {
            slack_webhook,
            slack_channel,
            public_url,
        } = config;
        Self {
            slack: Arc::new(slack::Slack::new(
                awc::Client::default(),
                slack_webhook,
                slack_channel,
                public_url,
            )),
        }
    }
}

impl Actor for Notifier {
    type Context = Context<Self>;
}

impl Handler<Notification> for Notifier {
    type Result = ResponseFuture<eyre::Result<()>>;

    fn handle(&mut self, msg: Notification, _ctx: &mut Self::Context) -> Self::Result {
        let slack = self.slack.clone();
        Box::pin(async move { slack.notify(&msg.event).await })
    }
}
