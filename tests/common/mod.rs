//! Mock HTTP servers built on a raw TcpListener.

#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use prdraft::config::HttpSettings;
use prdraft::dispatch::BackendDescriptor;
use prdraft::dispatch::http::{HttpAdapter, build_client};

/// What the mock server received.
#[derive(Debug, Clone)]
pub struct Captured {
    pub head: String,
    pub body: String,
}

impl Captured {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Read one request: headers, then exactly Content-Length body bytes.
pub async fn read_request(socket: &mut TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before headers were complete");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| v.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[body_start..]).to_string();
    Captured { head, body }
}

/// Serve the given raw responses to consecutive connections, then stop.
/// Returns the base URL and a handle yielding every captured request.
pub async fn serve(responses: Vec<Vec<u8>>) -> (String, JoinHandle<Vec<Captured>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut captured = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            captured.push(read_request(&mut socket).await);
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.ok();
        }
        captured
    });
    (format!("http://127.0.0.1:{port}"), handle)
}

pub async fn serve_once(response: Vec<u8>) -> (String, JoinHandle<Vec<Captured>>) {
    serve(vec![response]).await
}

pub fn json_response(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// A complete SSE response. Each event is written verbatim, so callers
/// include the `data:` prefix and the blank-line terminator.
pub fn sse_response(events: &[String]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 200 OK\r\n\
        Content-Type: text/event-stream\r\n\
        Connection: close\r\n\r\n"
        .to_vec();
    for event in events {
        out.extend_from_slice(event.as_bytes());
    }
    out
}

pub fn openai_body(text: &str) -> String {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": text}}]
    })
    .to_string()
}

pub fn openai_delta(text: &str) -> String {
    let chunk = serde_json::json!({"choices": [{"delta": {"content": text}}]});
    format!("data: {chunk}\n\n")
}

pub fn settings() -> HttpSettings {
    HttpSettings {
        timeout_secs: 5,
        connect_timeout_secs: 2,
        max_tokens: 256,
    }
}

pub fn adapter(descriptor: &BackendDescriptor) -> HttpAdapter {
    adapter_with(descriptor, settings())
}

pub fn adapter_with(descriptor: &BackendDescriptor, settings: HttpSettings) -> HttpAdapter {
    HttpAdapter::new(build_client(&settings).unwrap(), descriptor, &settings)
}

/// Accept one connection, read the request, then hold the socket open
/// without replying.
pub async fn serve_silent(hold: std::time::Duration) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        tokio::time::sleep(hold).await;
    });
    (format!("http://127.0.0.1:{port}"), handle)
}
