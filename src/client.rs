use std::error::Error;
use std::future::Future;

use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde_json::{Map, Value};

use crate::protocol::{Event, PromptRequest, from_line};

type ClientResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Talks to a running relay the way an orchestrator would.
#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    http: HttpClient,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> ClientResult<Map<String, Value>> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Health check failed: {} - {}", status, body).into());
        }

        Ok(response.json().await?)
    }

    /// Send a prompt and invoke `on_event` for every line of the reply, in
    /// order. Returns once the server ends the stream.
    pub async fn stream_prompt<F, Fut>(
        &self,
        request: &PromptRequest,
        mut on_event: F,
    ) -> ClientResult<()>
    where
        F: FnMut(Event) -> Fut,
        Fut: Future<Output = ()>,
    {
        let response = self
            .http
            .post(format!("{}/prompt", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Failed to send prompt: {} - {}", status, body).into());
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                on_event(parse_line(&line)?).await;
            }
        }

        if let Some(rest) = lines.finish() {
            on_event(parse_line(&rest)?).await;
        }

        Ok(())
    }

    pub async fn collect_prompt(&self, request: &PromptRequest) -> ClientResult<Vec<Event>> {
        let mut events = Vec::new();
        self.stream_prompt(request, |event| {
            events.push(event);
            async {}
        })
        .await?;
        Ok(events)
    }
}

fn parse_line(line: &str) -> ClientResult<Event> {
    from_line(line).map_err(|e| format!("Malformed event line {:?}: {}", line, e).into())
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

/// Splits a byte stream into lines. Chunk boundaries may fall anywhere,
/// including inside a multi-byte character.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=idx).collect();
            let line = String::from_utf8_lossy(&raw[..idx]);
            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whatever trails the last newline, if the server omitted one.
    fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"type\":\"text_").is_empty());
        let lines = buffer.push(b"chunk\",\"text\":\"a\"}\n{\"type\":\"done\"}\n");
        assert_eq!(
            lines,
            vec!["{\"type\":\"text_chunk\",\"text\":\"a\"}", "{\"type\":\"done\"}"]
        );
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let line = "{\"type\":\"text_chunk\",\"text\":\"héllo\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&line[..split]).is_empty());
        let lines = buffer.push(&line[split..]);
        assert_eq!(lines, vec!["{\"type\":\"text_chunk\",\"text\":\"héllo\"}"]);
    }

    #[test]
    fn trailing_partial_line_is_returned_on_finish() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"\r\n{\"type\":\"done\"}").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("{\"type\":\"done\"}"));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = RelayClient::new("http://127.0.0.1:4001/");
        assert_eq!(client.base_url(), "http://127.0.0.1:4001");
    }
}
