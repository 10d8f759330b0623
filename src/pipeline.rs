//! The orchestration pipeline turns a `GenerationRequest` into a generated
//! image in two strictly sequential stages: describe (two images to a
//! descriptive prompt) and generate (prompt to image).
//!
//! A single `Pipeline` owns the observable `PipelineState`. Only one run is in
//! flight at a time; each stage has its own timeout and a run can be
//! cancelled at whichever stage it is suspended in.

use crate::config::{DEFAULT_DESCRIBE_TIMEOUT_SECS, DEFAULT_GENERATE_TIMEOUT_SECS};
use crate::intake::EncodedImage;
use crate::services::{DescribeRequest, ImageConfig, ImageService, PromptService, ServiceError};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Guidance used when the user leaves the guidance field blank
pub const DEFAULT_GUIDANCE: &str =
    "Combine these two images in a creative, visually striking and coherent way.";

pub const PROMPT_FAILURE_FALLBACK: &str = "Failed to generate prompt";
pub const IMAGE_FAILURE_FALLBACK: &str = "Failed to generate image";

/// The complete input to one pipeline run, as collected from the user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub image1: Option<EncodedImage>,
    pub image2: Option<EncodedImage>,
    pub blend_mode: String,
    pub guidance: Option<String>,
}

impl GenerationRequest {
    pub fn new(image1: EncodedImage, image2: EncodedImage, blend_mode: impl Into<String>) -> Self {
        GenerationRequest {
            image1: Some(image1),
            image2: Some(image2),
            blend_mode: blend_mode.into(),
            guidance: None,
        }
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    /// Check the required fields and default the guidance
    pub fn validate(self) -> Result<DescribeRequest, PipelineError> {
        let image1 = self
            .image1
            .ok_or(PipelineError::IncompleteRequest("the first image is missing"))?;
        let image2 = self
            .image2
            .ok_or(PipelineError::IncompleteRequest("the second image is missing"))?;

        let blend_mode = self.blend_mode.trim();
        if blend_mode.is_empty() {
            return Err(PipelineError::IncompleteRequest("no blend mode was selected"));
        }

        let guidance = self
            .guidance
            .map(|guidance| guidance.trim().to_string())
            .filter(|guidance| !guidance.is_empty())
            .unwrap_or_else(|| DEFAULT_GUIDANCE.to_string());

        Ok(DescribeRequest {
            image1,
            image2,
            blend_mode: blend_mode.to_string(),
            guidance,
        })
    }
}

pub type GenerationResult = Result<EncodedImage, PipelineError>;

/// The two stages of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Waiting on the prompt-synthesis service
    Describing,

    /// Waiting on the image-synthesis service
    Generating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Describing => f.write_str("describe"),
            Stage::Generating => f.write_str("generate"),
        }
    }
}

/// The observable state of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Idle,
    Loading(Stage),
    Succeeded(EncodedImage),
    Failed(String),
}

impl PipelineState {
    pub fn is_loading(&self) -> bool {
        matches!(self, PipelineState::Loading(_))
    }

    pub fn image(&self) -> Option<&EncodedImage> {
        match self {
            PipelineState::Succeeded(image) => Some(image),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PipelineState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Why a run failed. `Display` is the message shown to the user.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("Request incomplete: {0}. Upload both images and choose a blend mode.")]
    IncompleteRequest(&'static str),

    /// The describe service failed; carries its message or a fallback
    #[error("{0}")]
    PromptServiceFailure(String),

    /// The generate service failed; carries its message or a fallback
    #[error("{0}")]
    ImageServiceFailure(String),

    #[error("Prompt generation failed: the model returned no description.")]
    EmptyPromptResult,

    #[error("Image generation failed: the model returned no image.")]
    EmptyImageResult,

    #[error("An unknown error occurred: {0}")]
    Unknown(String),

    #[error("A generation is already in progress.")]
    Busy,

    #[error("Generation was cancelled during the {0} step.")]
    Cancelled(Stage),

    #[error("The {stage} step timed out after {}s.", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },
}

impl PipelineError {
    /// Keep the service's own message when it sent one
    fn from_service(stage: Stage, err: ServiceError) -> Self {
        let failure = match stage {
            Stage::Describing => PipelineError::PromptServiceFailure,
            Stage::Generating => PipelineError::ImageServiceFailure,
        };
        let fallback = match stage {
            Stage::Describing => PROMPT_FAILURE_FALLBACK,
            Stage::Generating => IMAGE_FAILURE_FALLBACK,
        };

        match err {
            ServiceError::Status {
                message: Some(message),
                ..
            } => failure(message),
            ServiceError::Unexpected(message) => PipelineError::Unknown(message),
            other => {
                debug!("{stage} step failed without a service message: {other}");
                failure(fallback.to_string())
            }
        }
    }
}

/// Per-stage time limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub describe: Duration,
    pub generate: Duration,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Describing => self.describe,
            Stage::Generating => self.generate,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        StageTimeouts {
            describe: Duration::from_secs(DEFAULT_DESCRIBE_TIMEOUT_SECS),
            generate: Duration::from_secs(DEFAULT_GENERATE_TIMEOUT_SECS),
        }
    }
}

/// The pipeline controller
pub struct Pipeline {
    prompts: Arc<dyn PromptService>,
    images: Arc<dyn ImageService>,
    image_config: ImageConfig,
    timeouts: StageTimeouts,
    state: watch::Sender<PipelineState>,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("image_config", &self.image_config)
            .field("timeouts", &self.timeouts)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl Pipeline {
    pub fn new(prompts: Arc<dyn PromptService>, images: Arc<dyn ImageService>) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Pipeline {
            prompts,
            images,
            image_config: ImageConfig::default(),
            timeouts: StageTimeouts::default(),
            state,
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_image_config(mut self, image_config: ImageConfig) -> Self {
        self.image_config = image_config;
        self
    }

    /// A snapshot of the current state
    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Abort the in-flight run, if any. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match in_flight.as_ref() {
            Some(token) => {
                info!("cancelling in-flight generation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run both stages for `request`. The outcome is returned and also left
    /// in the observable state. Rejected with `Busy`, without touching the
    /// state, while another run is in flight.
    pub async fn submit(&self, request: GenerationRequest) -> GenerationResult {
        let validated = request.validate();
        let token = CancellationToken::new();

        // Busy check and the move to Loading happen under the state lock
        let mut busy = false;
        self.state.send_if_modified(|state| {
            if state.is_loading() {
                busy = true;
                return false;
            }
            *state = match &validated {
                Ok(_) => {
                    *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(token.clone());
                    PipelineState::Loading(Stage::Describing)
                }
                Err(err) => PipelineState::Failed(err.to_string()),
            };
            true
        });

        if busy {
            warn!("rejected a submission while another generation is in flight");
            return Err(PipelineError::Busy);
        }
        let request = validated.map_err(|err| {
            warn!("rejected incomplete request: {err}");
            err
        })?;

        info!(blend_mode = %request.blend_mode, "generation started");
        let mut guard = RunGuard {
            pipeline: self,
            finished: false,
        };
        let result = self.run(request, &token).await;
        guard.finish(&result);
        result
    }

    async fn run(&self, request: DescribeRequest, token: &CancellationToken) -> GenerationResult {
        let prompt = self
            .stage(Stage::Describing, token, self.describe(&request))
            .await?;

        self.state
            .send_replace(PipelineState::Loading(Stage::Generating));
        info!("describe step produced a prompt, generating");

        self.stage(Stage::Generating, token, self.generate(&prompt))
            .await
    }

    /// Bound one stage by its timeout and by the run's cancellation token
    async fn stage<T, F>(&self, stage: Stage, token: &CancellationToken, work: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        let limit = self.timeouts.for_stage(stage);
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(PipelineError::Cancelled(stage)),
            outcome = tokio::time::timeout(limit, work) => {
                outcome.unwrap_or_else(|_| Err(PipelineError::Timeout { stage, after: limit }))
            }
        }
    }

    async fn describe(&self, request: &DescribeRequest) -> Result<String, PipelineError> {
        match self.prompts.describe(request).await {
            Ok(Some(prompt)) if !prompt.trim().is_empty() => {
                debug!("descriptive prompt: {prompt}");
                Ok(prompt)
            }
            Ok(_) => Err(PipelineError::EmptyPromptResult),
            Err(err) => Err(PipelineError::from_service(Stage::Describing, err)),
        }
    }

    async fn generate(&self, prompt: &str) -> GenerationResult {
        match self.images.generate(prompt, &self.image_config).await {
            Ok(Some(payload)) if !payload.trim().is_empty() => self.decode_payload(&payload),
            Ok(_) => Err(PipelineError::EmptyImageResult),
            Err(err) => Err(PipelineError::from_service(Stage::Generating, err)),
        }
    }

    /// Accept either a bare base 64 payload or a full data URL
    fn decode_payload(&self, payload: &str) -> GenerationResult {
        let image = if payload.trim_start().starts_with("data:") {
            EncodedImage::parse_data_url(payload)
        } else {
            EncodedImage::from_base64(&self.image_config.output_mime_type, payload)
        };

        image.map_err(|err| {
            warn!("image payload could not be decoded: {err}");
            PipelineError::ImageServiceFailure(IMAGE_FAILURE_FALLBACK.to_string())
        })
    }
}

/// Leaves the state terminal even when the `submit` future is dropped midway
struct RunGuard<'a> {
    pipeline: &'a Pipeline,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(&mut self, result: &GenerationResult) {
        let state = match result {
            Ok(image) => {
                info!("generation succeeded ({})", image.mime_type());
                PipelineState::Succeeded(image.clone())
            }
            Err(err) => {
                warn!("generation failed: {err}");
                PipelineState::Failed(err.to_string())
            }
        };
        self.pipeline.state.send_replace(state);
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self
            .pipeline
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        if self.finished {
            return;
        }
        self.pipeline.state.send_if_modified(|state| match *state {
            PipelineState::Loading(stage) => {
                *state = PipelineState::Failed(PipelineError::Cancelled(stage).to_string());
                true
            }
            _ => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(data: &str) -> EncodedImage {
        EncodedImage::from_base64("image/png", data).unwrap()
    }

    #[test]
    fn test_validate_defaults_blank_guidance() {
        for guidance in [None, Some(""), Some("   ")] {
            let mut request = GenerationRequest::new(image("AA=="), image("BB=="), " Fuse ");
            request.guidance = guidance.map(String::from);
            let describe = request.validate().unwrap();
            assert_eq!(describe.guidance, DEFAULT_GUIDANCE);
            assert_eq!(describe.blend_mode, "Fuse");
        }
    }

    #[test]
    fn test_validate_keeps_guidance() {
        let describe = GenerationRequest::new(image("AA=="), image("BB=="), "Collage")
            .with_guidance("  neon city  ")
            .validate()
            .unwrap();
        assert_eq!(describe.guidance, "neon city");
    }

    #[test]
    fn test_validate_missing_fields() {
        let complete = GenerationRequest::new(image("AA=="), image("BB=="), "Fuse");

        let mut missing_first = complete.clone();
        missing_first.image1 = None;
        let mut missing_second = complete.clone();
        missing_second.image2 = None;
        let mut missing_mode = complete;
        missing_mode.blend_mode = "  ".into();

        for request in [missing_first, missing_second, missing_mode] {
            assert!(matches!(
                request.validate(),
                Err(PipelineError::IncompleteRequest(_))
            ));
        }
    }

    #[test]
    fn test_service_errors_keep_message() {
        let err = PipelineError::from_service(
            Stage::Describing,
            ServiceError::Status {
                status: 500,
                message: Some("model overloaded".into()),
            },
        );
        assert_eq!(err.to_string(), "model overloaded");

        let err = PipelineError::from_service(
            Stage::Generating,
            ServiceError::Status {
                status: 500,
                message: None,
            },
        );
        assert_eq!(err, PipelineError::ImageServiceFailure(IMAGE_FAILURE_FALLBACK.into()));

        let err = PipelineError::from_service(
            Stage::Describing,
            ServiceError::Transport("connection refused".into()),
        );
        assert_eq!(err, PipelineError::PromptServiceFailure(PROMPT_FAILURE_FALLBACK.into()));

        let err = PipelineError::from_service(
            Stage::Generating,
            ServiceError::Unexpected("boom".into()),
        );
        assert_eq!(err, PipelineError::Unknown("boom".into()));
    }

    #[test]
    fn test_timeout_message() {
        let err = PipelineError::Timeout {
            stage: Stage::Generating,
            after: Duration::from_secs(120),
        };
        assert_eq!(err.to_string(), "The generate step timed out after 120s.");
    }
}
