//! In-memory services with scripted replies. Every call is recorded, along
//! with the pipeline state seen at call time when an observer is attached.

use super::{DescribeRequest, ImageConfig, ImageService, PromptService, ServiceError};
use crate::pipeline::PipelineState;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

pub type Reply = Result<Option<String>, ServiceError>;

/// Replies are consumed in order; the last one repeats forever
struct Script<C> {
    replies: Mutex<Vec<Reply>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<C>>,
    observer: Mutex<Option<watch::Receiver<PipelineState>>>,
    seen: Mutex<Vec<PipelineState>>,
}

impl<C: Clone> Script<C> {
    fn new(replies: Vec<Reply>) -> Self {
        Script {
            replies: Mutex::new(replies),
            delay: None,
            calls: Mutex::new(vec![]),
            observer: Mutex::new(None),
            seen: Mutex::new(vec![]),
        }
    }

    async fn call(&self, call: C) -> Reply {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        let observed = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|rx| rx.borrow().clone());
        if let Some(state) = observed {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(state);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        match replies.len() {
            0 => Err(ServiceError::Unexpected("no scripted reply".into())),
            1 => replies[0].clone(),
            _ => replies.remove(0),
        }
    }

    fn calls(&self) -> Vec<C> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn observe(&self, rx: watch::Receiver<PipelineState>) {
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
    }

    fn seen(&self) -> Vec<PipelineState> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A scripted `PromptService`
pub struct MockPromptService {
    script: Script<DescribeRequest>,
}

impl MockPromptService {
    pub fn replying(prompt: &str) -> Self {
        Self::with_replies(vec![Ok(Some(prompt.to_string()))])
    }

    pub fn with_reply(reply: Reply) -> Self {
        Self::with_replies(vec![reply])
    }

    pub fn with_replies(replies: Vec<Reply>) -> Self {
        MockPromptService {
            script: Script::new(replies),
        }
    }

    /// Sleep before answering, to simulate a slow model
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    /// Record the pipeline state at the start of every call
    pub fn observe(&self, rx: watch::Receiver<PipelineState>) {
        self.script.observe(rx);
    }

    pub fn seen_states(&self) -> Vec<PipelineState> {
        self.script.seen()
    }

    pub fn calls(&self) -> Vec<DescribeRequest> {
        self.script.calls()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl PromptService for MockPromptService {
    async fn describe(&self, request: &DescribeRequest) -> Result<Option<String>, ServiceError> {
        self.script.call(request.clone()).await
    }
}

/// A scripted `ImageService`
pub struct MockImageService {
    script: Script<(String, ImageConfig)>,
}

impl MockImageService {
    pub fn replying(base64: &str) -> Self {
        Self::with_replies(vec![Ok(Some(base64.to_string()))])
    }

    pub fn with_reply(reply: Reply) -> Self {
        Self::with_replies(vec![reply])
    }

    pub fn with_replies(replies: Vec<Reply>) -> Self {
        MockImageService {
            script: Script::new(replies),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    pub fn observe(&self, rx: watch::Receiver<PipelineState>) {
        self.script.observe(rx);
    }

    pub fn seen_states(&self) -> Vec<PipelineState> {
        self.script.seen()
    }

    pub fn calls(&self) -> Vec<(String, ImageConfig)> {
        self.script.calls()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl ImageService for MockImageService {
    async fn generate(
        &self,
        prompt: &str,
        config: &ImageConfig,
    ) -> Result<Option<String>, ServiceError> {
        self.script
            .call((prompt.to_string(), config.clone()))
            .await
    }
}
