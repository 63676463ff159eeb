//! Shared test doubles: a blocking single-threaded HTTP stub for adapter and
//! transport tests, and scripted in-memory adapters for routing tests.
//!
//! The HTTP stub answers exactly the queued responses, one per connection,
//! then stops accepting. Tests must queue as many responses as requests they
//! make.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::ProviderCatalog;
use crate::config::CredentialStore;
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    AudioPayload, Capability, GenerationOptions, ImagePayload, ProviderDescriptor, ProviderId,
    ResultEnvelope, TextFragment, TextPayload, TextRequest, TextStream, Usage,
};
use crate::registry::{AdapterFactory, ProviderRegistry};
use crate::transport::http::{HttpTransport, RetryPolicy};

/// No retries and a short timeout so a misbehaving stub fails fast.
pub(crate) fn test_transport() -> HttpTransport {
    HttpTransport::new(2_000, RetryPolicy::none()).expect("test transport")
}

/// Builtin descriptor for `provider` pointed at `base_url`.
pub(crate) fn descriptor_at(provider: ProviderId, base_url: &str) -> ProviderDescriptor {
    ProviderCatalog::builtin()
        .with_base_url(provider, base_url)
        .descriptor(provider)
        .expect("builtin descriptor")
        .clone()
}

#[derive(Debug, Clone)]
pub(crate) struct MockResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: &'static str,
    pub body: String,
    /// When set, the body is written in these pieces with a pause before each
    /// piece after the first.
    pub paced_parts: Option<(Vec<Vec<u8>>, Duration)>,
}

impl MockResponse {
    pub(crate) fn json(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            headers: Vec::new(),
            content_type: "application/json",
            body: body.to_string(),
            paced_parts: None,
        }
    }

    pub(crate) fn text(status_code: u16, body: &str) -> Self {
        Self {
            status_code,
            headers: Vec::new(),
            content_type: "text/plain",
            body: body.to_string(),
            paced_parts: None,
        }
    }

    pub(crate) fn event_stream(body: &str) -> Self {
        Self {
            status_code: 200,
            headers: Vec::new(),
            content_type: "text/event-stream",
            body: body.to_string(),
            paced_parts: None,
        }
    }

    /// Event stream whose body arrives as `parts`, `pause` apart.
    pub(crate) fn paced_event_stream(parts: Vec<Vec<u8>>, pause: Duration) -> Self {
        let body = String::from_utf8(parts.concat()).expect("paced body should be UTF-8");
        Self {
            paced_parts: Some((parts, pause)),
            ..Self::event_stream(&body)
        }
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub(crate) fn json_body(&self) -> Value {
        serde_json::from_str(&self.body).expect("captured body should be JSON")
    }
}

pub(crate) struct MockServer {
    addr: std::net::SocketAddr,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    pub(crate) fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        listener
            .set_nonblocking(false)
            .expect("configure blocking listener");
        let addr = listener.local_addr().expect("listener addr");

        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let captured = Arc::new(Mutex::new(Vec::new()));

        let queue_clone = Arc::clone(&queue);
        let captured_clone = Arc::clone(&captured);

        let handle = thread::spawn(move || {
            loop {
                let next_response = {
                    let mut queue = queue_clone.lock().expect("queue lock");
                    queue.pop_front()
                };

                let Some(response) = next_response else {
                    break;
                };

                let (mut stream, _) = listener.accept().expect("accept connection");
                stream
                    .set_read_timeout(Some(Duration::from_secs(3)))
                    .expect("set stream timeout");

                let raw_request = read_http_request_with_body(&mut stream);
                captured_clone
                    .lock()
                    .expect("capture lock")
                    .push(parse_request(&raw_request));

                match &response.paced_parts {
                    Some((parts, pause)) => {
                        stream
                            .write_all(build_http_head(&response).as_bytes())
                            .expect("write response head");
                        for (index, part) in parts.iter().enumerate() {
                            if index > 0 {
                                thread::sleep(*pause);
                            }
                            // The client may hang up mid-body, e.g. on an idle timeout.
                            if stream.write_all(part).and_then(|_| stream.flush()).is_err() {
                                break;
                            }
                        }
                    }
                    None => {
                        stream
                            .write_all(build_http_response(&response).as_bytes())
                            .expect("write response");
                        stream.flush().expect("flush response");
                    }
                }
            }
        });

        Self {
            addr,
            captured,
            handle: Some(handle),
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().expect("capture lock").clone()
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join mock server");
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_http_request_with_body(stream: &mut std::net::TcpStream) -> String {
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

fn parse_request(raw_request: &str) -> CapturedRequest {
    let (head, body) = raw_request
        .split_once("\r\n\r\n")
        .unwrap_or((raw_request, ""));
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();

    let headers = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();

    CapturedRequest {
        method,
        path,
        headers,
        body: body.to_string(),
    }
}

fn build_http_response(response: &MockResponse) -> String {
    let mut rendered = build_http_head(response);
    rendered.push_str(&response.body);
    rendered
}

fn build_http_head(response: &MockResponse) -> String {
    let mut rendered = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status_code,
        status_reason(response.status_code),
        response.content_type,
        response.body.len(),
    );
    for (name, value) in &response.headers {
        rendered.push_str(name);
        rendered.push_str(": ");
        rendered.push_str(value);
        rendered.push_str("\r\n");
    }
    rendered.push_str("\r\n");
    rendered
}

fn status_reason(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Scripted behaviour of one in-memory adapter.
#[derive(Debug, Clone)]
pub(crate) struct StubBehavior {
    pub available: bool,
    pub text: Result<String, String>,
    pub native_stream: Option<Vec<TextFragment>>,
}

impl StubBehavior {
    pub(crate) fn available(text: &str) -> Self {
        Self {
            available: true,
            text: Ok(text.to_string()),
            native_stream: None,
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            available: false,
            text: Err("stub backend is down".to_string()),
            native_stream: None,
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            available: true,
            text: Err(message.to_string()),
            native_stream: None,
        }
    }

    pub(crate) fn with_native_stream(mut self, fragments: Vec<TextFragment>) -> Self {
        self.native_stream = Some(fragments);
        self
    }
}

/// Records probes in a log shared with its factory so tests can assert the
/// exact order backends were asked.
pub(crate) struct StubAdapter {
    descriptor: ProviderDescriptor,
    behavior: StubBehavior,
    probe_log: Arc<Mutex<Vec<ProviderId>>>,
    text_calls: AtomicUsize,
}

impl StubAdapter {
    pub(crate) fn new(descriptor: ProviderDescriptor, behavior: StubBehavior) -> Self {
        Self {
            descriptor,
            behavior,
            probe_log: Arc::new(Mutex::new(Vec::new())),
            text_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate_text(&self, _request: &TextRequest) -> ResultEnvelope<TextPayload> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior.text {
            Ok(text) => ResultEnvelope::success_with_usage(
                TextPayload { text: text.clone() },
                Usage::default(),
            ),
            Err(message) => ResultEnvelope::failure(message.clone()),
        }
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> ResultEnvelope<ImagePayload> {
        if !self.descriptor.supports(Capability::Image) {
            return ResultEnvelope::failure(
                ProviderError::unsupported(self.descriptor.id, &self.descriptor.name, Capability::Image)
                    .to_string(),
            );
        }
        ResultEnvelope::success(ImagePayload {
            image: format!("{}:{prompt}", self.descriptor.id),
        })
    }

    async fn generate_audio(
        &self,
        text: &str,
        _options: &GenerationOptions,
    ) -> ResultEnvelope<AudioPayload> {
        if !self.descriptor.supports(Capability::Audio) {
            return ResultEnvelope::failure(
                ProviderError::unsupported(self.descriptor.id, &self.descriptor.name, Capability::Audio)
                    .to_string(),
            );
        }
        ResultEnvelope::success(AudioPayload {
            audio: format!("{}:{text}", self.descriptor.id),
            mime_type: "audio/wav".to_string(),
        })
    }

    async fn is_available(&self) -> bool {
        self.probe_log
            .lock()
            .expect("probe log lock")
            .push(self.descriptor.id);
        self.behavior.available
    }

    fn stream_text(&self, _request: &TextRequest) -> Option<TextStream> {
        let fragments = self.behavior.native_stream.clone()?;
        Some(Box::pin(futures::stream::iter(fragments)))
    }
}

/// Factory handing out [`StubAdapter`]s. Backends without a scripted
/// behaviour are built unavailable.
#[derive(Default)]
pub(crate) struct StubFactory {
    behaviors: BTreeMap<ProviderId, StubBehavior>,
    probe_log: Arc<Mutex<Vec<ProviderId>>>,
    builds: AtomicUsize,
}

impl StubFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, provider: ProviderId, behavior: StubBehavior) -> Self {
        self.behaviors.insert(provider, behavior);
        self
    }

    pub(crate) fn probes(&self) -> Vec<ProviderId> {
        self.probe_log.lock().expect("probe log lock").clone()
    }

    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for StubFactory {
    fn supports(&self, provider: ProviderId) -> bool {
        provider != ProviderId::Grok
    }

    fn build(
        &self,
        descriptor: &ProviderDescriptor,
        _credential: &str,
    ) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .get(&descriptor.id)
            .cloned()
            .unwrap_or_else(StubBehavior::unavailable);

        let mut adapter = StubAdapter::new(descriptor.clone(), behavior);
        adapter.probe_log = Arc::clone(&self.probe_log);
        Ok(Arc::new(adapter))
    }
}

/// Credentials for exactly `providers`, under their builtin credential keys.
pub(crate) fn credentials_for(providers: &[ProviderId]) -> CredentialStore {
    let catalog = ProviderCatalog::builtin();
    providers.iter().fold(CredentialStore::new(), |store, provider| {
        let key = &catalog
            .descriptor(*provider)
            .expect("builtin descriptor")
            .credential_key;
        store.with_secret(key.clone(), format!("test-{provider}"))
    })
}

pub(crate) fn stub_registry(
    factory: Arc<StubFactory>,
    credentialed: &[ProviderId],
) -> ProviderRegistry {
    ProviderRegistry::new(
        ProviderCatalog::builtin(),
        credentials_for(credentialed),
        factory,
    )
}
