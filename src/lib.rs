//! A small HTTP relay that runs inside a sandbox: `POST /prompt` hands the
//! prompt to a [`PromptHandler`] and streams whatever it emits back to the
//! caller as newline-delimited JSON.

mod agent;
mod ai_sdk;
pub mod client;
pub mod emitter;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
mod tools;

pub use agent::{Agent, DEFAULT_MODEL};
pub use client::RelayClient;
pub use emitter::Emitter;
pub use error::{RequestError, ServerError};
pub use handler::{EchoHandler, HandlerError, HandlerResult, HealthHandler, PromptHandler};
pub use protocol::{CustomEvent, Event, Options, PromptContent, PromptRequest, StreamEvent};
pub use server::{DEFAULT_PORT, Relay, Server, ServerConfig};
pub use tools::Workspace;
