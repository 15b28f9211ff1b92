//! Throwaway HTTP/1.1 responders bound to loopback.

#![allow(dead_code)]

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Answers every request with `200` and the body `reply`.
pub async fn fixed_server(reply: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(answer(socket, reply));
        }
    });
    addr
}

/// Accepts connections and never answers them.
pub async fn stalled_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

async fn answer(mut socket: TcpStream, reply: &'static str) {
    let mut buf = vec![0u8; 8192];
    let mut seen = Vec::new();
    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => seen.extend_from_slice(&buf[..n]),
        }
    }
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
        reply.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
}

/// The two-capability application used across the tests: one component linked
/// to an HTTP provider at `address` and a blob provider rooted at `root`.
pub fn manifest(address: &str, root: &str, replicas: u32) -> String {
    format!(
        r#"
name = "http-blobstore"
version = "0.1.0"

[[components]]
id = "http-blobstore"
replicas = {replicas}

[[components.links]]
contract = "wasi:http/outgoing-handler"
target = "httpclient"
values = {{ ADDRESS = "{address}" }}

[[components.links]]
contract = "wasi:blobstore"
target = "blobstore-fs"
values = {{ ROOT = "{root}" }}

[[providers]]
id = "httpclient"
contract = "outgoing-http"

[[providers]]
id = "blobstore-fs"
contract = "blobstore"
"#
    )
}
