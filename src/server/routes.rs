//! Backend routes. The two `/api/generate-*` routes are what the pipeline's
//! proxy client calls; the others serve the browser front end.

use super::protocol::*;
use super::{Backend, WebError};
use crate::blend::BlendMode;
use crate::intake::EncodedImage;
use crate::pipeline::{
    GenerationRequest, PipelineError, IMAGE_FAILURE_FALLBACK, PROMPT_FAILURE_FALLBACK,
};
use crate::services::ImageConfig;
use actix_web::http::header::ContentType;
use actix_web::{get, post, web, HttpResponse, Responder};
use tracing::*;

type Result<T> = std::result::Result<T, WebError>;

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// The single-page front end
#[get("/")]
pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(INDEX_HTML)
}

#[get("/api/blend-modes")]
pub async fn blend_modes() -> impl Responder {
    let modes: Vec<BlendModeInfo> = BlendMode::ALL.into_iter().map(Into::into).collect();
    web::Json(modes)
}

/// Describe step: two images, a blend mode and guidance in, a prompt out
#[post("/api/generate-prompt")]
pub async fn generate_prompt(
    body: web::Json<GeneratePromptBody>,
    backend: web::Data<Backend>,
) -> Result<impl Responder> {
    let body = body.into_inner();

    let parse = |image: Option<String>| -> Result<Option<EncodedImage>> {
        match image.filter(|image| !image.trim().is_empty()) {
            Some(image) => Ok(Some(image.parse()?)),
            None => Ok(None),
        }
    };

    let request = GenerationRequest {
        image1: parse(body.image1)?,
        image2: parse(body.image2)?,
        blend_mode: body.blend_mode.unwrap_or_default(),
        guidance: body.prompt,
    }
    .validate()
    .map_err(|err| WebError::bad_request(err.to_string()))?;

    debug!(blend_mode = %request.blend_mode, "describe request");

    let prompt = backend
        .prompts
        .describe(&request)
        .await
        .map_err(|err| {
            warn!("describe failed: {err}");
            WebError::upstream(err, PROMPT_FAILURE_FALLBACK)
        })?
        .filter(|prompt| !prompt.trim().is_empty())
        .ok_or_else(|| WebError::internal(PipelineError::EmptyPromptResult.to_string()))?;

    info!("served generate-prompt request");
    Ok(web::Json(PromptResponse {
        prompt: Some(prompt),
    }))
}

/// Generate step: a prompt in, one bare base 64 image out
#[post("/api/generate-image")]
pub async fn generate_image(
    body: web::Json<GenerateImageBody>,
    backend: web::Data<Backend>,
) -> Result<impl Responder> {
    let prompt = body.into_inner().prompt;
    if prompt.trim().is_empty() {
        return Err(WebError::bad_request("Missing required field: prompt"));
    }

    let payload = backend
        .images
        .generate(&prompt, &ImageConfig::default())
        .await
        .map_err(|err| {
            warn!("generate failed: {err}");
            WebError::upstream(err, IMAGE_FAILURE_FALLBACK)
        })?
        .filter(|payload| !payload.trim().is_empty())
        .ok_or_else(|| WebError::internal(PipelineError::EmptyImageResult.to_string()))?;

    // Some models answer with a full data URL; the wire carries bare base 64
    let image = match payload.strip_prefix("data:") {
        Some(_) => EncodedImage::parse_data_url(&payload)?.data().to_string(),
        None => payload,
    };

    info!("served generate-image request");
    Ok(web::Json(ImageResponse { image: Some(image) }))
}
