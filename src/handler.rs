use std::error::Error;
use std::future::Future;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::emitter::Emitter;
use crate::protocol::{Options, PromptContent};

pub type HandlerError = Box<dyn Error + Send + Sync>;
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Turns one prompt into a sequence of events.
///
/// The stream ends when `handle` returns. An `Err` is reported to the client
/// as a final `error` event; emitting `done` is up to the implementation.
#[async_trait]
pub trait PromptHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        prompt: PromptContent,
        emitter: Emitter,
        options: Options,
    ) -> HandlerResult;
}

/// Supplies the body of `GET /health`. The returned map is sent verbatim.
#[async_trait]
pub trait HealthHandler: Send + Sync + 'static {
    async fn check(&self) -> HandlerResult<Map<String, Value>>;
}

#[async_trait]
impl<F, Fut> PromptHandler for F
where
    F: Fn(PromptContent, Emitter, Options) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(
        &self,
        prompt: PromptContent,
        emitter: Emitter,
        options: Options,
    ) -> HandlerResult {
        (self)(prompt, emitter, options).await
    }
}

#[async_trait]
impl<F, Fut> HealthHandler for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Map<String, Value>>> + Send + 'static,
{
    async fn check(&self) -> HandlerResult<Map<String, Value>> {
        (self)().await
    }
}

/// Streams the prompt text back as a single chunk.
pub struct EchoHandler;

#[async_trait]
impl PromptHandler for EchoHandler {
    async fn handle(
        &self,
        prompt: PromptContent,
        emitter: Emitter,
        _options: Options,
    ) -> HandlerResult {
        emitter.text_chunk(prompt.text());
        emitter.done();
        Ok(())
    }
}
