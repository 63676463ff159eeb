use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use futures::StreamExt;
use genai_gateway::GenerationGateway;
use genai_gateway::catalog::ProviderCatalog;
use genai_gateway::config::{CredentialStore, RoutingPolicy};
use genai_gateway::core::types::{
    Capability, GenerationOptions, ProviderId, TextFragment, TextRequest, Usage,
};
use genai_gateway::streaming::StreamPacing;
use genai_gateway::transport::http::RetryPolicy;
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct MockResponse {
    status_code: u16,
    content_type: &'static str,
    body: String,
}

impl MockResponse {
    fn json(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    fn event_stream(body: &str) -> Self {
        Self {
            status_code: 200,
            content_type: "text/event-stream",
            body: body.to_string(),
        }
    }
}

struct MockServer {
    addr: std::net::SocketAddr,
    captured_requests: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");

        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let captured_requests = Arc::new(Mutex::new(Vec::new()));

        let queue_clone = Arc::clone(&queue);
        let captured_clone = Arc::clone(&captured_requests);

        let handle = thread::spawn(move || {
            loop {
                let next_response = queue_clone.lock().expect("queue lock").pop_front();
                let Some(response) = next_response else {
                    break;
                };

                let (mut stream, _) = listener.accept().expect("accept connection");
                stream
                    .set_read_timeout(Some(Duration::from_secs(3)))
                    .expect("set stream timeout");

                let raw_request = read_http_request(&mut stream);
                captured_clone
                    .lock()
                    .expect("capture lock")
                    .push(raw_request);

                let rendered = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response.status_code,
                    if response.status_code == 200 { "OK" } else { "Error" },
                    response.content_type,
                    response.body.len(),
                    response.body
                );
                stream
                    .write_all(rendered.as_bytes())
                    .expect("write response");
                stream.flush().expect("flush response");
            }
        });

        Self {
            addr,
            captured_requests,
            handle: Some(handle),
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request lines (`METHOD /path`) in arrival order.
    fn request_lines(&self) -> Vec<String> {
        self.captured_requests
            .lock()
            .expect("capture lock")
            .iter()
            .map(|raw| {
                raw.lines()
                    .next()
                    .unwrap_or_default()
                    .split_whitespace()
                    .take(2)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    fn bodies(&self) -> Vec<String> {
        self.captured_requests
            .lock()
            .expect("capture lock")
            .iter()
            .map(|raw| {
                raw.split_once("\r\n\r\n")
                    .map(|(_, body)| body.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join mock server");
        }
    }
}

fn read_http_request(stream: &mut std::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut chunk = [0_u8; 1024];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(bytes_read) => {
                request.extend_from_slice(&chunk[..bytes_read]);
                if let Some(header_end) =
                    request.windows(4).position(|window| window == b"\r\n\r\n")
                {
                    let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
                    let content_length = headers
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            if name.eq_ignore_ascii_case("content-length") {
                                value.trim().parse::<usize>().ok()
                            } else {
                                None
                            }
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(error) => panic!("failed reading request: {error}"),
        }
    }

    String::from_utf8_lossy(&request).to_string()
}

fn credentials(providers: &[ProviderId]) -> CredentialStore {
    let catalog = ProviderCatalog::builtin();
    providers.iter().fold(CredentialStore::new(), |store, provider| {
        let key = &catalog
            .descriptor(*provider)
            .expect("builtin descriptor")
            .credential_key;
        store.with_secret(key.clone(), format!("sk-{provider}"))
    })
}

fn gateway(
    catalog: ProviderCatalog,
    credentialed: &[ProviderId],
    routing: RoutingPolicy,
) -> GenerationGateway {
    GenerationGateway::builder()
        .with_catalog(catalog)
        .with_credentials(credentials(credentialed))
        .with_routing(routing)
        .with_request_timeout_ms(2_000)
        .with_retry_policy(RetryPolicy::none())
        .with_stream_pacing(StreamPacing::immediate())
        .build()
        .expect("gateway should build")
}

#[tokio::test]
async fn test_text_falls_back_when_default_backend_is_unreachable() {
    let openrouter = MockServer::start(vec![MockResponse::json(
        503,
        json!({"error": {"message": "maintenance"}}),
    )]);
    let deepseek = MockServer::start(vec![
        MockResponse::json(200, json!({"data": []})),
        MockResponse::json(
            200,
            json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello from fallback"}}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 4, "total_tokens": 13}
            }),
        ),
    ]);

    let catalog = ProviderCatalog::builtin()
        .with_base_url(ProviderId::Openrouter, openrouter.url())
        .with_base_url(ProviderId::Deepseek, deepseek.url());
    let gateway = gateway(
        catalog,
        &[ProviderId::Openrouter, ProviderId::Deepseek],
        RoutingPolicy::default().with_fallback_providers(vec![ProviderId::Deepseek]),
    );

    let envelope = gateway
        .generate_text(&TextRequest::new("You are helpful.", Vec::new(), "Hi"))
        .await;

    assert!(envelope.is_success(), "unexpected failure: {:?}", envelope.error());
    assert_eq!(
        envelope.payload().map(|payload| payload.text.as_str()),
        Some("Hello from fallback")
    );
    assert_eq!(
        envelope.usage(),
        Some(&Usage {
            prompt_tokens: 9,
            completion_tokens: 4,
            total_tokens: 13,
        })
    );

    assert_eq!(openrouter.request_lines(), vec!["GET /key"]);
    assert_eq!(
        deepseek.request_lines(),
        vec!["GET /models", "POST /chat/completions"]
    );

    let sent: Value =
        serde_json::from_str(&deepseek.bodies()[1]).expect("chat body should be JSON");
    assert_eq!(sent["model"], "deepseek-chat");
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["content"], "Hi");
}

#[tokio::test]
async fn test_empty_choices_produce_empty_text() {
    let deepseek = MockServer::start(vec![
        MockResponse::json(200, json!({"data": []})),
        MockResponse::json(200, json!({"choices": []})),
    ]);

    let gateway = gateway(
        ProviderCatalog::builtin().with_base_url(ProviderId::Deepseek, deepseek.url()),
        &[ProviderId::Deepseek],
        RoutingPolicy::default().with_global_override(ProviderId::Deepseek),
    );

    let envelope = gateway
        .generate_text(&TextRequest::new("sys", Vec::new(), "Hi"))
        .await;

    assert!(envelope.is_success());
    assert_eq!(envelope.payload().map(|p| p.text.as_str()), Some(""));
    assert_eq!(envelope.usage(), Some(&Usage::default()));
}

#[tokio::test]
async fn test_openrouter_streams_native_deltas() {
    let openrouter = MockServer::start(vec![
        MockResponse::json(200, json!({"data": {"label": "test"}})),
        MockResponse::event_stream(concat!(
            ": OPENROUTER PROCESSING\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        )),
    ]);

    let gateway = gateway(
        ProviderCatalog::builtin().with_base_url(ProviderId::Openrouter, openrouter.url()),
        &[ProviderId::Openrouter],
        RoutingPolicy::default(),
    );

    let fragments: Vec<TextFragment> = gateway
        .stream_text(TextRequest::new("sys", Vec::new(), "greet"))
        .await
        .collect()
        .await;

    assert_eq!(
        fragments,
        vec![
            TextFragment::Delta("Hel".to_string()),
            TextFragment::Delta("lo".to_string()),
        ]
    );

    let sent: Value =
        serde_json::from_str(&openrouter.bodies()[1]).expect("stream body should be JSON");
    assert_eq!(sent["stream"], true);
}

#[tokio::test]
async fn test_image_override_routes_to_together() {
    let together = MockServer::start(vec![
        MockResponse::json(200, json!([])),
        MockResponse::json(200, json!({"data": [{"b64_json": "aW1hZ2U="}]})),
    ]);

    let gateway = gateway(
        ProviderCatalog::builtin().with_base_url(ProviderId::Together, together.url()),
        &[ProviderId::Together],
        RoutingPolicy::default().with_capability_override(Capability::Image, ProviderId::Together),
    );

    let envelope = gateway
        .generate_image("a lighthouse", &GenerationOptions::default())
        .await;

    assert_eq!(
        envelope.payload().map(|p| p.image.as_str()),
        Some("aW1hZ2U=")
    );
    assert_eq!(
        together.request_lines(),
        vec!["GET /models", "POST /images/generations"]
    );

    let sent: Value =
        serde_json::from_str(&together.bodies()[1]).expect("image body should be JSON");
    assert_eq!(sent["prompt"], "a lighthouse");
    assert_eq!(sent["width"], 1024);
}

#[tokio::test]
async fn test_no_reachable_backend_reports_failure() {
    let openrouter = MockServer::start(vec![MockResponse::json(
        401,
        json!({"error": {"message": "bad key"}}),
    )]);

    let gateway = gateway(
        ProviderCatalog::builtin().with_base_url(ProviderId::Openrouter, openrouter.url()),
        &[ProviderId::Openrouter],
        RoutingPolicy::default(),
    );

    let envelope = gateway
        .generate_text(&TextRequest::new("sys", Vec::new(), "Hi"))
        .await;

    assert!(!envelope.is_success());
    assert_eq!(
        envelope.error(),
        Some("no text provider available; configure provider API keys")
    );
}
