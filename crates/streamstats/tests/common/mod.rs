// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Event stream that never ends on its own: every connection gets `frames`, then a
/// comment line every `keep_alive` until the client hangs up.
pub struct MockStream {
    pub url: String,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockStream {
    pub async fn start(frames: Vec<String>, keep_alive: Duration) -> MockStream {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("unable to bind mock stream");
        let addr = listener.local_addr().expect("mock stream has no address");
        let connections = Arc::new(AtomicUsize::new(0));

        let accepted = Arc::clone(&connections);
        let frames = Arc::new(frames);
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, Arc::clone(&frames), keep_alive));
            }
        });

        MockStream {
            url: format!("http://{addr}/stream"),
            connections,
            handle,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut socket: TcpStream, frames: Arc<Vec<String>>, keep_alive: Duration) {
    // the request is tiny and never inspected
    let mut request = [0u8; 1024];
    if socket.read(&mut request).await.is_err() {
        return;
    }

    let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for frame in frames.iter() {
        if socket.write_all(frame.as_bytes()).await.is_err() {
            return;
        }
    }
    loop {
        tokio::time::sleep(keep_alive).await;
        if socket.write_all(b": keep-alive\n\n").await.is_err() {
            return;
        }
    }
}

/// One `tweet` frame per value, with a timestamp derived from the value.
pub fn like_frames(values: impl IntoIterator<Item = i64>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| {
            format!(
                "data: {{\"tweet\":{{\"timestamp\":{},\"likes\":{v}}}}}\n\n",
                1_700_000_000 + v
            )
        })
        .collect()
}
