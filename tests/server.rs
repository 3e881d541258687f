use std::time::Duration;

use sandbox_relay::{
    EchoHandler, Emitter, Event, HandlerError, Options, PromptContent, PromptRequest,
    RelayClient, Server, ServerConfig, StreamEvent,
};
use serde_json::json;
use tokio::sync::mpsc;

fn local_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        shutdown_grace: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn echo_round_trip_over_tcp() {
    let mut server = Server::new(local_config(), EchoHandler);
    let addr = server.start().await.unwrap();
    let client = RelayClient::new(&format!("http://{addr}"));

    let events = client
        .collect_prompt(&PromptRequest::new("Hello, world!"))
        .await
        .unwrap();
    assert_eq!(
        events,
        vec![
            Event::Stream(StreamEvent::TextChunk {
                text: "Hello, world!".to_string()
            }),
            Event::Stream(StreamEvent::Done { result: None }),
        ]
    );

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/prompt"))
        .json(&json!({"prompt": "headers"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "application/x-ndjson");
    assert_eq!(headers["transfer-encoding"], "chunked");
    assert_eq!(headers["connection"], "keep-alive");
    assert!(headers.get("content-length").is_none());
    let body = response.text().await.unwrap();
    assert_eq!(
        body,
        "{\"type\":\"text_chunk\",\"text\":\"headers\"}\n{\"type\":\"done\"}\n"
    );

    let health = client.health().await.unwrap();
    assert_eq!(health.get("status"), Some(&json!("ok")));

    server.stop().await;
    assert!(client.health().await.is_err());
}

#[tokio::test]
async fn rejected_prompt_surfaces_as_client_error() {
    let mut server = Server::new(local_config(), EchoHandler);
    let addr = server.start().await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/prompt"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<serde_json::Value>().await.unwrap(),
        json!({"error": "Missing or invalid 'prompt' field"})
    );

    server.stop().await;
}

#[tokio::test]
async fn concurrent_prompts_have_independent_streams() {
    let handler = |prompt: PromptContent, emitter: Emitter, _options: Options| async move {
        let label = prompt.text();
        for i in 0..5 {
            emitter.text_chunk(format!("{label}-{i}"));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        emitter.done();
        Ok::<(), HandlerError>(())
    };
    let mut server = Server::new(local_config(), handler);
    let addr = server.start().await.unwrap();
    let client = RelayClient::new(&format!("http://{addr}"));

    let a = PromptRequest::new("a");
    let b = PromptRequest::new("b");
    let (left, right) = tokio::join!(client.collect_prompt(&a), client.collect_prompt(&b));

    for (label, events) in [("a", left.unwrap()), ("b", right.unwrap())] {
        let texts: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                Event::Stream(StreamEvent::TextChunk { text }) => Some(text.clone()),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..5).map(|i| format!("{label}-{i}")).collect();
        assert_eq!(texts, expected);
        assert_eq!(events.last().map(Event::kind), Some("done"));
    }

    server.stop().await;
}

#[tokio::test]
async fn client_disconnect_closes_the_emitter() {
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();
    let handler = move |_prompt: PromptContent, emitter: Emitter, _options: Options| {
        let closed_tx = closed_tx.clone();
        async move {
            while !emitter.is_closed() {
                emitter.text_chunk("tick");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = closed_tx.send(());
            Ok::<(), HandlerError>(())
        }
    };
    let mut server = Server::new(local_config(), handler);
    let addr = server.start().await.unwrap();

    let mut response = reqwest::Client::new()
        .post(format!("http://{addr}/prompt"))
        .json(&json!({"prompt": "keep going"}))
        .send()
        .await
        .unwrap();
    assert!(response.chunk().await.unwrap().is_some());
    drop(response);

    tokio::time::timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .expect("handler should observe the disconnect")
        .unwrap();

    server.stop().await;
}

#[tokio::test]
async fn stop_abandons_streams_that_never_finish() {
    let handler = |_prompt: PromptContent, emitter: Emitter, _options: Options| async move {
        emitter.text_chunk("forever");
        std::future::pending::<()>().await;
        Ok::<(), HandlerError>(())
    };
    let mut server = Server::new(
        ServerConfig {
            shutdown_grace: Duration::from_millis(100),
            ..local_config()
        },
        handler,
    );
    let addr = server.start().await.unwrap();

    let mut response = reqwest::Client::new()
        .post(format!("http://{addr}/prompt"))
        .json(&json!({"prompt": "hang"}))
        .send()
        .await
        .unwrap();
    assert!(response.chunk().await.unwrap().is_some());

    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("stop should not wait past the grace period");
    assert!(!server.is_running());
}
