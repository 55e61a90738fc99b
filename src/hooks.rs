use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};
use serde_json::json;

use crate::{
    dispatcher::{DispatchError, Dispatcher, Job},
    github::{ApiError, Event, Github},
    http::Webhook,
    logs::{LogKey, LogStore},
};

/// GitHub sends payloads of up to 25 MB.
const MAX_PAYLOAD: usize = 25 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to queue job: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("deployment log not found")]
    NotFound,
    #[error("failed to read deployment log")]
    LogStore,
    #[error("failed to fetch deployment statuses: {0}")]
    Upstream(#[from] ApiError),
}

impl ResponseError for HookError {
    fn status_code(&self) -> StatusCode {
        match self {
            HookError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
            HookError::NotFound => StatusCode::NOT_FOUND,
            HookError::LogStore => StatusCode::INTERNAL_SERVER_ERROR,
            HookError::Upstream(ApiError::Status { status: 404, .. }) => StatusCode::NOT_FOUND,
            HookError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_PAYLOAD))
        .route("/webhook", web::post().to(webhook))
        .route(
            "/deployment/{owner}/{repo}/{id}",
            web::get().to(deployment_log),
        );
}

pub async fn webhook(
    Webhook(event): Webhook,
    dispatcher: web::Data<Dispatcher>,
) -> Result<HttpResponse, HookError> {
    let job = match event {
        Event::Ping => return Ok(HttpResponse::Ok().json(json!({ "msg": "hi" }))),
        Event::Push(event) => Job::CreateDeployment(event),
        Event::Deployment(event) => Job::RunDeploy(event),
        Event::DeploymentStatus(event) => Job::Notify(event),
        Event::Unsupported(kind) => {
            tracing::debug!("Ignoring `{}` event", kind);
            return Ok(HttpResponse::Created().finish());
        }
    };

    dispatcher.submit(job).map_err(|err| {
        tracing::error!("Failed to queue job: {}", err);
        err
    })?;
    Ok(HttpResponse::Created().finish())
}

/// Serves the stored log of a deployment, or GitHub's statuses for it if
/// the log isn't there (yet).
pub async fn deployment_log(
    path: web::Path<(String, String, u64)>,
    logs: web::Data<dyn LogStore>,
    github: web::Data<Github>,
) -> Result<HttpResponse, HookError> {
    let (owner, repo, id) = path.into_inner();
    let key = LogKey::new(&owner, &repo, id).ok_or(HookError::NotFound)?;

    let stored = {
        let key = key.clone();
        web::block(move || logs.get(&key)).await
    };
    match stored {
        Ok(Ok(Some(log))) => {
            return Ok(HttpResponse::Ok()
                .content_type("text/plain; charset=utf-8")
                .body(log))
        }
        Ok(Ok(None)) => {}
        Ok(Err(err)) => {
            tracing::error!("Failed to read log for {}/{}#{}: {}", owner, repo, id, err);
            return Err(HookError::LogStore);
        }
        Err(err) => {
            tracing::error!("Failed to read log for {}/{}#{}: {}", owner, repo, id, err);
            return Err(HookError::LogStore);
        }
    }

    let statuses = github.statuses(key.owner(), key.repo(), key.id()).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .body(statuses))
}
