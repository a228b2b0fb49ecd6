//! HttpDispatch against a raw TCP mock provider.

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use vidrelay::dispatch::ProviderApi;
use vidrelay::dispatch::http::HttpDispatch;
use vidrelay::error::RelayError;

/// Helper: bind a TCP listener on localhost and return (listener, port).
async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Helper: read one HTTP/1.1 request (headers plus Content-Length body).
async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Helper: answer each incoming connection with the next scripted
/// (status line, JSON body) pair and return every request seen.
fn serve(listener: TcpListener, script: Vec<(&'static str, Value)>) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        for (status, body) in script {
            let (mut stream, _) = listener.accept().await.unwrap();
            seen.push(read_request(&mut stream).await);
            let body = body.to_string();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
        seen
    })
}

fn dispatch(port: u16) -> HttpDispatch {
    HttpDispatch::new(format!("http://127.0.0.1:{port}/v1/"), Some("sk-test".into())).unwrap()
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_posts_payload_with_bearer_auth() {
    let (listener, port) = mock_listener().await;
    let server = serve(
        listener,
        vec![("200 OK", json!({"task_id": "T1", "base_resp": {"status_code": 0}}))],
    );

    let body = dispatch(port)
        .create_task(&json!({"model": "m", "prompt": "a cat"}))
        .await
        .unwrap();
    assert_eq!(body["task_id"], "T1");

    let requests = server.await.unwrap();
    let req = &requests[0];
    assert!(req.starts_with("POST /v1/video_generation "), "{req}");
    assert!(req.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    assert!(req.contains("\"prompt\":\"a cat\""));
}

#[tokio::test]
async fn query_sends_task_id_as_query_param() {
    let (listener, port) = mock_listener().await;
    let server = serve(listener, vec![("200 OK", json!({"status": "Processing"}))]);

    let body = dispatch(port).query_task("T 1").await.unwrap();
    assert_eq!(body["status"], "Processing");

    let requests = server.await.unwrap();
    assert!(
        requests[0].starts_with("GET /v1/query/video_generation?task_id=T+1 "),
        "{}",
        requests[0]
    );
}

#[tokio::test]
async fn missing_api_key_fails_before_any_request() {
    let client = HttpDispatch::new("http://127.0.0.1:9/v1", None).unwrap();
    let err = client.query_task("T").await.unwrap_err();
    assert!(matches!(err, RelayError::Config(_)));
    assert!(!err.is_transient());
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_success_status_is_transport_error_with_detail() {
    let (listener, port) = mock_listener().await;
    let _server = serve(
        listener,
        vec![(
            "503 Service Unavailable",
            json!({"base_resp": {"status_code": 1002, "status_msg": "rate limited"}}),
        )],
    );

    let err = dispatch(port).query_task("T").await.unwrap_err();
    match &err {
        RelayError::ProviderTransport { message, status } => {
            assert_eq!(*status, Some(503));
            assert!(message.contains("rate limited"), "{message}");
        }
        other => panic!("expected ProviderTransport, got {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn application_error_body_is_passed_through() {
    let (listener, port) = mock_listener().await;
    let _server = serve(
        listener,
        vec![(
            "200 OK",
            json!({"base_resp": {"status_code": 2013, "status_msg": "invalid params"}}),
        )],
    );

    // base_resp inspection belongs to the caller.
    let body = dispatch(port).query_task("T").await.unwrap();
    assert_eq!(body["base_resp"]["status_code"], 2013);
}

#[tokio::test]
async fn unparseable_body_is_schema_error() {
    let (listener, port) = mock_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        let body = "<html>gateway</html>";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    });

    let err = dispatch(port).query_task("T").await.unwrap_err();
    assert!(matches!(err, RelayError::SchemaParse(_)));
}

#[tokio::test]
async fn connection_refused_is_transient() {
    // Bind then drop to get a port nothing listens on.
    let (listener, port) = mock_listener().await;
    drop(listener);

    let err = dispatch(port).query_task("T").await.unwrap_err();
    assert!(err.is_transient(), "{err:?}");
}

// ---------------------------------------------------------------------------
// File retrieval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_retrieve_falls_back_to_path_form_on_404() {
    let (listener, port) = mock_listener().await;
    let server = serve(
        listener,
        vec![
            ("404 Not Found", json!({"error": "no such route"})),
            (
                "200 OK",
                json!({"file": {"file_id": "f1", "download_url": "https://cdn/f1.mp4"}}),
            ),
        ],
    );

    let body = dispatch(port).retrieve_file("f1").await.unwrap();
    assert_eq!(body["file"]["download_url"], "https://cdn/f1.mp4");

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("GET /v1/files/retrieve?file_id=f1 "));
    assert!(requests[1].starts_with("GET /v1/file/f1 "));
}

#[tokio::test]
async fn file_retrieve_does_not_fall_back_on_other_errors() {
    let (listener, port) = mock_listener().await;
    let server = serve(listener, vec![("500 Internal Server Error", json!({}))]);

    let err = dispatch(port).retrieve_file("f1").await.unwrap_err();
    assert_eq!(err.provider_status(), Some(500));
    assert_eq!(server.await.unwrap().len(), 1);
}

#[tokio::test]
async fn file_id_with_reserved_characters_stays_one_segment() {
    let (listener, port) = mock_listener().await;
    let server = serve(
        listener,
        vec![
            ("404 Not Found", json!({})),
            ("200 OK", json!({"file": {"download_url": "https://cdn/x.mp4"}})),
        ],
    );

    dispatch(port).retrieve_file("a/b?c#d").await.unwrap();

    let requests = server.await.unwrap();
    assert!(
        requests[0].starts_with("GET /v1/files/retrieve?file_id=a%2Fb%3Fc%23d "),
        "{}",
        requests[0]
    );
    assert!(
        requests[1].starts_with("GET /v1/file/a%2Fb%3Fc%23d "),
        "{}",
        requests[1]
    );
}
