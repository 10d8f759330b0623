//! The trusted backend. Holds the model credentials, serves the two `/api`
//! routes the pipeline client talks to, and serves the browser front end.

use crate::services::{ImageService, PromptService, ServiceError};
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use std::sync::Arc;

pub mod protocol;
pub mod routes;

/// The services the backend delegates to
#[derive(Clone)]
pub struct Backend {
    pub prompts: Arc<dyn PromptService>,
    pub images: Arc<dyn ImageService>,
}

impl Backend {
    pub fn new(prompts: Arc<dyn PromptService>, images: Arc<dyn ImageService>) -> Self {
        Backend { prompts, images }
    }
}

/// Register every route and the JSON limits on an `App`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(crate::config::MAX_JSON_BODY)
            .error_handler(|err, _req| {
                WebError::bad_request(format!("Invalid request body: {err}")).into()
            }),
    )
    .service(routes::index)
    .service(routes::blend_modes)
    .service(routes::generate_prompt)
    .service(routes::generate_image);
}

/// An error rendered as `{"message": ...}`
#[derive(Debug)]
pub struct WebError {
    status: StatusCode,
    message: String,
}

impl WebError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        WebError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        WebError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// An upstream model failure. The upstream message is passed through
    /// verbatim when there is one.
    pub fn upstream(err: ServiceError, fallback: &str) -> Self {
        let message = match err {
            ServiceError::Status {
                message: Some(message),
                ..
            } => message,
            _ => fallback.to_string(),
        };
        WebError {
            status: StatusCode::BAD_GATEWAY,
            message,
        }
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(protocol::ErrorBody {
                message: Some(self.message.clone()),
            })
    }

    fn status_code(&self) -> StatusCode {
        self.status
    }
}

impl From<crate::intake::IntakeError> for WebError {
    fn from(err: crate::intake::IntakeError) -> Self {
        WebError::bad_request(err.to_string())
    }
}
