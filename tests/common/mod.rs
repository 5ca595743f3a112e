#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use nanieval::dispatch::{
    GenerationConfig, ProviderAdapter, ProviderKind, ProviderResponse, estimate_tokens,
};
use nanieval::error::EvalError;

/// One request captured by [`MockServer`].
#[derive(Debug, Clone)]
pub struct Captured {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal HTTP/1.1 server that answers each connection with the next
/// scripted `(status, body)` pair. The last pair repeats once the script
/// runs out.
pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl MockServer {
    pub async fn start(script: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let captured = requests.clone();
        tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((mut socket, _)) = listener.accept().await {
                let Some(request) = read_request(&mut socket).await else {
                    continue;
                };
                captured.lock().unwrap().push(request);

                let (status, body) = script[served.min(script.len() - 1)].clone();
                served += 1;
                let response = format!(
                    "HTTP/1.1 {status} Mock\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            requests,
        }
    }

    pub async fn json(status: u16, body: Value) -> Self {
        Self::start(vec![(status, body.to_string())]).await
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let path = lines
        .next()?
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
    Some(Captured {
        path,
        headers,
        body,
    })
}

/// Scripted in-process adapter for orchestrator tests.
///
/// Replies are served in order (the last one repeats); each reply is either a
/// flat `{"text", "total_tokens"}` body or an error built on demand.
pub struct StubAdapter {
    replies: Mutex<Vec<StubReply>>,
    pub prompts: Mutex<Vec<String>>,
    input_tokens: Option<u64>,
}

#[derive(Clone)]
pub enum StubReply {
    Text { text: String, total_tokens: u64 },
    Status(u16, &'static str),
}

impl StubAdapter {
    pub fn new(replies: Vec<StubReply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
            input_tokens: None,
        }
    }

    /// Fixed prompt token count instead of the length heuristic.
    pub fn with_input_tokens(mut self, n: u64) -> Self {
        self.input_tokens = Some(n);
        self
    }

    pub fn text(text: &str, total_tokens: u64) -> StubReply {
        StubReply::Text {
            text: text.to_string(),
            total_tokens,
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn next_reply(&self) -> StubReply {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies[0].clone()
        }
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nani
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    async fn count_tokens(&self, text: &str) -> u64 {
        self.input_tokens.unwrap_or_else(|| estimate_tokens(text))
    }

    fn default_config(&self) -> GenerationConfig {
        GenerationConfig::new().with("temperature", 0.7)
    }

    async fn generate(
        &self,
        prompt: &str,
        _system_prompt: Option<&str>,
        _config: &GenerationConfig,
    ) -> Result<ProviderResponse, EvalError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.next_reply() {
            StubReply::Text { text, total_tokens } => Ok(ProviderResponse {
                provider: ProviderKind::Nani,
                body: serde_json::json!({"text": text, "total_tokens": total_tokens}),
            }),
            StubReply::Status(status, message) => Err(EvalError::Request {
                provider: "nani".to_string(),
                message: format!("{status}: {message}"),
                status: Some(status),
            }),
        }
    }
}
