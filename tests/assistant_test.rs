//! Exercises the assistant HTTP client against a one-shot local stub.

use std::net::SocketAddr;

use greenloop::learn::{AssistantAnswer, AssistantClient, parse_carbon, parse_or_raw};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves exactly one HTTP request with the given JSON body, then closes.
async fn serve_once(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        // Drain the request: headers, then content-length worth of body.
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn new_chat_returns_the_chat_id() {
    let addr = serve_once("{\"success\": true, \"chatId\": \"chat-42\"}").await;
    let client = AssistantClient::new(format!("http://{addr}"));

    assert_eq!(client.new_chat().await.unwrap(), "chat-42");
}

#[tokio::test(flavor = "multi_thread")]
async fn unsuccessful_new_chat_is_an_error() {
    let addr = serve_once("{\"success\": false}").await;
    let client = AssistantClient::new(format!("http://{addr}"));

    assert!(client.new_chat().await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn a_reply_flows_from_wire_to_parsed_reading() {
    let addr = serve_once(
        "{\"success\": true, \"response\": \"Sure! {\\\"footprint\\\": 12.5, \\\"unit\\\": \\\"kg CO2e\\\"}\"}",
    )
    .await;
    let client = AssistantClient::new(format!("http://{addr}"));

    let text = client.send_message("chat-42", "my commute?").await.unwrap();
    match parse_or_raw(&text, parse_carbon) {
        AssistantAnswer::Parsed(estimate) => {
            assert_eq!(estimate.footprint, 12.5);
            assert_eq!(estimate.unit, "kg CO2e");
            assert_eq!(estimate.breakdown.len(), 1);
            assert_eq!(estimate.tips.len(), 3);
        }
        AssistantAnswer::Raw(raw) => panic!("expected a parsed estimate, got raw: {raw}"),
    }
}
