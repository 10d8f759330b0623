//! Direct client for the Generative Language REST API. The backend uses it to
//! serve both `/api` routes; it is the only place the API key is used.

use super::{
    describe_instruction, DescribeRequest, ImageConfig, ImageService, PromptService, ServiceError,
};
use crate::intake::EncodedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Content container used in `generateContent` requests and responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Variant order matters for untagged decoding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl From<&EncodedImage> for Part {
    fn from(image: &EncodedImage) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type().to_string(),
                data: image.data().to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters<'a>,
}

#[derive(Debug, Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters<'a> {
    sample_count: u32,
    output_mime_type: &'a str,
    aspect_ratio: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Settings for `GeminiClient`
#[derive(Debug, Clone)]
pub struct GeminiOptions {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub timeout: Duration,
}

/// Speaks `generateContent` for the describe step and Imagen `predict` for the
/// generate step
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    options: GeminiOptions,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GeminiClient {{ base_url: {:?}, text_model: {:?}, image_model: {:?} }}",
            self.options.base_url, self.options.text_model, self.options.image_model
        )
    }
}

impl GeminiClient {
    pub fn new(mut options: GeminiOptions) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        options.base_url = options.base_url.trim_end_matches('/').to_string();
        Ok(GeminiClient { client, options })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{model}:{method}", self.options.base_url)
    }

    async fn post<B, R>(&self, url: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize,
        R: serde::de::DeserializeOwned,
    {
        debug!("POST {url}");
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.options.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&text)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .filter(|message| !message.trim().is_empty());
            warn!("model API responded with {status}: {message:?}");
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
impl PromptService for GeminiClient {
    async fn describe(&self, request: &DescribeRequest) -> Result<Option<String>, ServiceError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::from(&request.image1),
                    Part::from(&request.image2),
                    Part::Text {
                        text: describe_instruction(&request.blend_mode, &request.guidance),
                    },
                ],
            }],
        };

        let url = self.model_url(&self.options.text_model, "generateContent");
        let response: GenerateContentResponse = self.post(&url, &body).await?;

        let text = response
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .next()
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| match part {
                        Part::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        info!(
            model = %self.options.text_model,
            blend_mode = %request.blend_mode,
            "describe returned {} chars",
            text.as_ref().map_or(0, String::len)
        );
        Ok(text)
    }
}

#[async_trait]
impl ImageService for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        config: &ImageConfig,
    ) -> Result<Option<String>, ServiceError> {
        let body = PredictRequest {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                sample_count: config.number_of_images,
                output_mime_type: &config.output_mime_type,
                aspect_ratio: &config.aspect_ratio,
            },
        };

        let url = self.model_url(&self.options.image_model, "predict");
        let response: PredictResponse = self.post(&url, &body).await?;

        let image = response
            .predictions
            .into_iter()
            .find_map(|prediction| prediction.bytes_base64_encoded)
            .filter(|data| !data.trim().is_empty());

        info!(
            model = %self.options.image_model,
            "generate returned an image: {}",
            image.is_some()
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiOptions {
            api_key: "test-key".into(),
            base_url: server.uri(),
            text_model: "text-model".into(),
            image_model: "image-model".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn sample_request() -> DescribeRequest {
        DescribeRequest {
            image1: "data:image/png;base64,AA==".parse().unwrap(),
            image2: "data:image/jpeg;base64,BB==".parse().unwrap(),
            blend_mode: "Fuse".into(),
            guidance: "make it glow".into(),
        }
    }

    #[tokio::test]
    async fn test_describe_sends_inline_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-model:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{
                    "parts": [
                        { "inlineData": { "mimeType": "image/png", "data": "AA==" } },
                        { "inlineData": { "mimeType": "image/jpeg", "data": "BB==" } },
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{ "text": "a glowing " }, { "text": "fused scene\n" }]
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let prompt = client(&server).describe(&sample_request()).await.unwrap();
        assert_eq!(prompt.as_deref(), Some("a glowing fused scene"));
    }

    #[tokio::test]
    async fn test_describe_without_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let prompt = client(&server).describe(&sample_request()).await.unwrap();
        assert_eq!(prompt, None);
    }

    #[tokio::test]
    async fn test_generate_requests_one_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/image-model:predict"))
            .and(body_partial_json(json!({
                "instances": [{ "prompt": "a fused scene" }],
                "parameters": {
                    "sampleCount": 1,
                    "outputMimeType": "image/jpeg",
                    "aspectRatio": "1:1",
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "predictions": [{ "bytesBase64Encoded": "ZZ==", "mimeType": "image/jpeg" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let image = client(&server)
            .generate("a fused scene", &ImageConfig::default())
            .await
            .unwrap();
        assert_eq!(image.as_deref(), Some("ZZ=="));
    }

    #[tokio::test]
    async fn test_generate_filtered_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/image-model:predict"))
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
    async fn test_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/image-model:predict"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT" }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .generate("x", &ImageConfig::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Status {
                status: 400,
                message: Some("API key not valid".into()),
            }
        );
    }
}
