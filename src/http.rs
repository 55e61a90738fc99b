use actix_web::{
    dev::Payload, error::ResponseError, http::StatusCode, web::Bytes, FromRequest, HttpRequest,
};
use futures::future::{FutureExt, LocalBoxFuture};
use secstr::SecStr;

use crate::{
    github::{Event, EVENT_HEADER},
    signature::{self, Signature},
};

/// A webhook event whose signature has been checked against
/// [`WebhookConfig`].
#[derive(Debug, Clone)]
pub struct Webhook(pub Event);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("failed parsing signature: {0}")]
    SignatureParseError(#[from] signature::Error),
    #[error("signature doesn't match")]
    InvalidSignature,
    #[error("HMAC key is not configured")]
    NoHmacKey,
    #[error("`X-GitHub-Event` header is missing")]
    MissingEvent,
    #[error("failed reading request data: {0}")]
    Payload(actix_web::Error),
    #[error("invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ResponseError for WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::SignatureParseError(_) => StatusCode::FORBIDDEN,
            WebhookError::InvalidSignature => StatusCode::FORBIDDEN,
            WebhookError::NoHmacKey => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookError::MissingEvent => StatusCode::BAD_REQUEST,
            WebhookError::JsonError(_) => StatusCode::BAD_REQUEST,
            WebhookError::Payload(err) => err.as_response_error().status_code(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub key: SecStr,
}

impl WebhookConfig {
    pub fn new(key: SecStr) -> Self {
        Self { key }
    }
}

impl FromRequest for Webhook {
    type Error = WebhookError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let req = req.clone();

        Bytes::from_request(&req, payload)
            .map(move |bytes| -> Result<Self, Self::Error> {
                let config = req
                    .app_data::<WebhookConfig>()
                    .ok_or(WebhookError::NoHmacKey)?;
                let bytes = bytes.map_err(WebhookError::Payload)?;

                let signature = Signature::from_headers(req.headers())?;
                if !signature.verify(config.key.unsecure(), &bytes) {
                    tracing::warn!("Rejected webhook with invalid signature");
                    return Err(WebhookError::InvalidSignature);
                }

                let kind = req
                    .headers()
                    .get(EVENT_HEADER)
                    .and_then(|kind| kind.to_str().ok())
                    .ok_or(WebhookError::MissingEvent)?;
                Ok(Self(Event::parse(kind, &bytes)?))
            })
            .boxed_local()
    }
}
