use std::future::Future;

use actix::prelude::*;
use actix_web::web::Bytes;
use awc::{
    error::{PayloadError, SendRequestError},
    http::{header, Method},
    ClientResponse,
};
use futures::Stream;
use secstr::SecUtf8;

use crate::{
    reporter::{NewStatus, StatusReporter},
    resolver::{DeploymentCreator, NewDeployment},
};

const USER_AGENT: &str = concat!("deployd/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("{url} responded with {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("GitHub client is unavailable: {0}")]
    Mailbox(#[from] MailboxError),
}

#[derive(Debug, Message)]
#[rtype(result = "Result<(), ApiError>")]
pub struct CreateDeployment {
    pub url: String,
    pub request: NewDeployment,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<(), ApiError>")]
pub struct CreateStatus {
    pub url: String,
    pub status: NewStatus,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<Bytes, ApiError>")]
pub struct ListStatuses {
    pub owner: String,
    pub repo: String,
    pub id: u64,
}

/// Actor owning the HTTP client used for the GitHub REST API.
pub struct Api {
    http: awc::Client,
    token: SecUtf8,
    base: String,
}

impl Api {
    pub fn new(token: SecUtf8, base: String) -> Self {
        Self {
            http: awc::Client::default(),
            token,
            base,
        }
    }

    fn request(&self, method: Method, url: &str) -> awc::ClientRequest {
        self.http
            .request(method, url)
            .bearer_auth(self.token.unsecure())
            .insert_header((header::ACCEPT, ACCEPT))
            .insert_header((header::USER_AGENT, USER_AGENT))
    }
}

async fn send<S>(
    url: String,
    request: impl Future<Output = Result<ClientResponse<S>, SendRequestError>>,
) -> Result<Bytes, ApiError>
where
    S: Stream<Item = Result<Bytes, PayloadError>> + Unpin,
{
    let mut resp = request.await.map_err(|err| ApiError::Request {
        url: url.clone(),
        message: err.to_string(),
    })?;
    let body = resp.body().await.map_err(|err| ApiError::Request {
        url: url.clone(),
        message: err.to_string(),
    })?;

    if !resp.status().is_success() {
        return Err(ApiError::Status {
            url,
            status: resp.status().as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    Ok(body)
}

impl Actor for Api {
    type Context = Context<Self>;
}

impl Handler<CreateDeployment> for Api {
    type Result = ResponseFuture<Result<(), ApiError>>;

    fn handle(&mut self, msg: CreateDeployment, _ctx: &mut Self::Context) -> Self::Result {
        let req = self.request(Method::POST, &msg.url).send_json(&msg.request);
        Box::pin(async move { send(msg.url, req).await.map(drop) })
    }
}

impl Handler<CreateStatus> for Api {
    type Result = ResponseFuture<Result<(), ApiError>>;

    fn handle(&mut self, msg: CreateStatus, _ctx: &mut Self::Context) -> Self::Result {
        let req = self.request(Method::POST, &msg.url).send_json(&msg.status);
        Box::pin(async move { send(msg.url, req).await.map(drop) })
    }
}

impl Handler<ListStatuses> for Api {
    type Result = ResponseFuture<Result<Bytes, ApiError>>;

    fn handle(&mut self, msg: ListStatuses, _ctx: &mut Self::Context) -> Self::Result {
        let url = format!(
            "{}/repos/{}/{}/deployments/{}/statuses",
            self.base, msg.owner, msg.repo, msg.id
        );
        let req = self.request(Method::GET, &url).send();
        Box::pin(send(url, req))
    }
}

/// Cloneable handle to the [`Api`] actor.
///
/// The blocking trait implementations must only be used from threads other
/// than the one running the actor, i.e. from the job workers.
#[derive(Clone)]
pub struct Github {
    api: Addr<Api>,
}

impl Github {
    pub fn start(token: SecUtf8, base: String) -> Self {
        Self {
            api: Api::new(token, base).start(),
        }
    }

    pub async fn statuses(&self, owner: &str, repo: &str, id: u64) -> Result<Bytes, ApiError> {
        self.api
            .send(ListStatuses {
                owner: owner.to_string(),
                repo: repo.to_string(),
                id,
            })
            .await?
    }
}

impl StatusReporter for Github {
    fn report(&self, statuses_url: &str, status: &NewStatus) -> Result<(), ApiError> {
        futures::executor::block_on(self.api.send(CreateStatus {
            url: statuses_url.to_string(),
            status: status.clone(),
        }))?
    }
}

impl DeploymentCreator for Github {
    fn create_deployment(
        &self,
        deployments_url: &str,
        request: &NewDeployment,
    ) -> Result<(), ApiError> {
        futures::executor::block_on(self.api.send(CreateDeployment {
            url: deployments_url.to_string(),
            request: request.clone(),
        }))?
    }
}
