use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tailscope::error::BackendError;
use tailscope::logs::{HttpLogBackend, LogFetcher, QueryWindow};

#[derive(Debug, Clone)]
struct RecordedRequest {
    headers: Vec<(String, String)>,
    body: Value,
}

impl RecordedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

type Recorded = Arc<Mutex<Vec<RecordedRequest>>>;

/// Serve canned `(status, body)` responses in order, recording each request
async fn serve(responses: Vec<(u16, Value)>) -> (String, Recorded) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let responses = Arc::new(Mutex::new(VecDeque::from(responses)));
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));

    let server_recorded = recorded.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            tokio::spawn(handle_connection(socket, responses.clone(), server_recorded.clone()));
        }
    });

    (format!("http://{}", address), recorded)
}

async fn handle_connection(
    mut socket: TcpStream,
    responses: Arc<Mutex<VecDeque<(u16, Value)>>>,
    recorded: Recorded,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        // Read until the end of the headers
        let header_end = loop {
            if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let headers: Vec<(String, String)> = head
            .lines()
            .skip(1)
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);

        while buffer.len() < header_end + content_length {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }
        }

        let body: Value = serde_json::from_slice(&buffer[header_end..header_end + content_length]).unwrap_or(Value::Null);
        buffer.drain(..header_end + content_length);
        recorded.lock().unwrap().push(RecordedRequest { headers, body });

        let (status, payload) = responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((500, json!({"message": "no canned response"})));
        let payload = payload.to_string();
        let response = format!(
            "HTTP/1.1 {} Canned\r\nContent-Type: application/x-amz-json-1.1\r\nContent-Length: {}\r\n\r\n{}",
            status,
            payload.len(),
            payload
        );
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

#[tokio::test]
async fn test_http_backend_pages_and_decodes() {
    let (endpoint, recorded) = serve(vec![
        (
            200,
            json!({
                "events": [
                    {"timestamp": 2000, "ingestionTime": 2001, "message": "second"},
                    {"timestamp": "bad", "message": "malformed"},
                ],
                "nextToken": "page-2"
            }),
        ),
        (
            200,
            json!({
                "events": [{"timestamp": 1000, "ingestionTime": 1001, "message": "first"}],
                "nextToken": ""
            }),
        ),
    ])
    .await;

    let mut headers = BTreeMap::new();
    headers.insert("x-signed-by".to_string(), "proxy".to_string());
    let backend = HttpLogBackend::new(endpoint, &headers).unwrap();
    let fetcher = LogFetcher::new(Arc::new(backend));

    let window = QueryWindow::new("/ecs/api")
        .with_range(Some(500), Some(5000))
        .with_filter(Some("GET".to_string()));
    let events = fetcher.fetch_window(&window).await.unwrap();

    let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert_eq!(events[0].ingestion_time, 1001);

    let requests = recorded.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("x-amz-target"), Some("Logs_20140328.FilterLogEvents"));
    assert_eq!(requests[0].header("content-type"), Some("application/x-amz-json-1.1"));
    assert_eq!(requests[0].header("x-signed-by"), Some("proxy"));
    assert_eq!(
        requests[0].body,
        json!({"logGroupName": "/ecs/api", "startTime": 500, "endTime": 5000, "filterPattern": "GET"})
    );
    assert_eq!(requests[1].body["nextToken"], "page-2");
}

#[tokio::test]
async fn test_http_errors_are_classified() {
    let (endpoint, _) = serve(vec![
        (400, json!({"__type": "ThrottlingException", "message": "Rate exceeded"})),
        (403, json!({"message": "expired token"})),
        (400, json!({"__type": "InvalidParameterException", "message": "bad group"})),
    ])
    .await;
    let fetcher = LogFetcher::new(Arc::new(HttpLogBackend::new(endpoint, &BTreeMap::new()).unwrap()));
    let window = QueryWindow::new("g");

    let throttled = fetcher.fetch_window(&window).await.unwrap_err();
    assert!(matches!(throttled, BackendError::Throttled(ref m) if m == "Rate exceeded"));

    let denied = fetcher.fetch_window(&window).await.unwrap_err();
    assert!(matches!(denied, BackendError::Unauthorized { status: 403, .. }));

    let rejected = fetcher.fetch_window(&window).await.unwrap_err();
    assert!(matches!(rejected, BackendError::Rejected { status: 400, ref message } if message == "bad group"));
}
