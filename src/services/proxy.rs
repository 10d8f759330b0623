//! Client for the trusted backend. The backend holds the model credentials;
//! this side only ever sees the two `/api` routes.

use super::{DescribeRequest, ImageConfig, ImageService, PromptService, ServiceError};
use crate::server::protocol::{ErrorBody, GenerateImageBody, ImageResponse, PromptResponse};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const GENERATE_PROMPT_ROUTE: &str = "/api/generate-prompt";
pub const GENERATE_IMAGE_ROUTE: &str = "/api/generate-image";

/// Talks to `POST /api/generate-prompt` and `POST /api/generate-image`
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
}

impl ProxyClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ProxyClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, route);
        debug!("POST {url}");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|body| body.message)
                .filter(|message| !message.trim().is_empty());
            warn!("{route} failed with {status}: {message:?}");
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PromptService for ProxyClient {
    async fn describe(&self, request: &DescribeRequest) -> Result<Option<String>, ServiceError> {
        let response: PromptResponse = self.post(GENERATE_PROMPT_ROUTE, request).await?;
        Ok(response.prompt)
    }
}

#[async_trait]
impl ImageService for ProxyClient {
    /// The backend applies its own output configuration; only the prompt
    /// travels over the wire.
    async fn generate(
        &self,
        prompt: &str,
        _config: &ImageConfig,
    ) -> Result<Option<String>, ServiceError> {
        let body = GenerateImageBody {
            prompt: prompt.to_string(),
        };
        let response: ImageResponse = self.post(GENERATE_IMAGE_ROUTE, &body).await?;
        Ok(response.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ProxyClient {
        ProxyClient::new(&format!("{}/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    fn sample_request() -> DescribeRequest {
        DescribeRequest {
            image1: "data:image/png;base64,AA==".parse().unwrap(),
            image2: "data:image/png;base64,BB==".parse().unwrap(),
            blend_mode: "Fuse".into(),
            guidance: "anything".into(),
        }
    }

    #[tokio::test]
    async fn test_describe_posts_wire_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PROMPT_ROUTE))
            .and(body_json(json!({
                "image1": "data:image/png;base64,AA==",
                "image2": "data:image/png;base64,BB==",
                "blendMode": "Fuse",
                "prompt": "anything",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "prompt": "a fused scene" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let prompt = client(&server).describe(&sample_request()).await.unwrap();
        assert_eq!(prompt.as_deref(), Some("a fused scene"));
    }

    #[tokio::test]
    async fn test_generate_returns_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_IMAGE_ROUTE))
            .and(body_json(json!({ "prompt": "a fused scene" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "image": "ZZ==" })))
            .mount(&server)
            .await;

        let image = client(&server)
            .generate("a fused scene", &ImageConfig::default())
            .await
            .unwrap();
        assert_eq!(image.as_deref(), Some("ZZ=="));
    }

    #[tokio::test]
    async fn test_missing_fields_are_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_IMAGE_ROUTE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let image = client(&server)
            .generate("x", &ImageConfig::default())
            .await
            .unwrap();
        assert_eq!(image, None);
    }

    #[tokio::test]
    async fn test_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PROMPT_ROUTE))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "message": "quota exhausted" })),
            )
            .mount(&server)
            .await;

        let err = client(&server).describe(&sample_request()).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::Status {
                status: 500,
                message: Some("quota exhausted".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_error_without_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_IMAGE_ROUTE))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .generate("x", &ImageConfig::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Status {
                status: 503,
                message: None,
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PROMPT_ROUTE))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server).describe(&sample_request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }
}
