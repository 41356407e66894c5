//! Integration tests for API extraction against a local HTTP responder

use analytics_etl::client::{ApiClient, DEFAULT_TIMEOUT};
use analytics_etl::config::Settings;
use analytics_etl::etl::{API_REVIEWS, Extractor, Pipeline, SourceStatus};
use analytics_etl::records::{Comment, Review};
use analytics_etl::sources::ApiExtractor;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

type Requests = Arc<Mutex<Vec<String>>>;

const TRUNCATED: &str = "TRUNCATED:";

/// Serve canned `(path, status, body)` responses, one request per connection
async fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> (Url, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 16 * 1024];
            let mut len = 0;
            while len < buf.len() {
                match socket.read(&mut buf[len..]).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => len += n,
                }
                if buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }

            let request = String::from_utf8_lossy(&buf[..len]).to_string();
            let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
            seen.lock().unwrap().push(request);

            let (status, body) = routes
                .iter()
                .find(|(route, _, _)| *route == path)
                .map(|(_, status, body)| (*status, *body))
                .unwrap_or((404, ""));
            // A TRUNCATED body announces more bytes than it sends
            let (length, body) = match body.strip_prefix(TRUNCATED) {
                Some(partial) => (partial.len() + 100, partial),
                None => (body.len(), body),
            };
            let response = format!(
                "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status, length, body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (Url::parse(&format!("http://{}/api", addr)).unwrap(), requests)
}

const COMMENTS: &str = r#"[
    {"commentId": 1, "orderId": 100, "customerId": 1, "content": "Fast delivery",
     "createdDate": "2024-02-01T09:30:00", "status": "Published"},
    {"COMMENTID": 2, "ORDERID": 101, "CUSTOMERID": 2, "CONTENT": "Late",
     "CREATEDDATE": "2024-02-02 10:00:00", "STATUS": "Hidden"},
    {"commentId": 1, "orderId": 100, "customerId": 1, "content": "Repeated",
     "createdDate": "2024-02-03T09:30:00", "status": "Published"}
]"#;

#[tokio::test]
async fn test_extract_sends_api_key_and_maps_fields() {
    let (url, requests) = serve(vec![("/api/comments", 200, COMMENTS)]).await;
    let client = ApiClient::try_new(url, Some("secret".to_string()), DEFAULT_TIMEOUT).unwrap();

    let comments = ApiExtractor::<Comment>::new(client, "comments", "ApiComments")
        .extract()
        .await
        .unwrap();

    assert_eq!(comments.len(), 3);
    assert_eq!(comments[1].comment_id, 2);
    assert_eq!(comments[1].content.as_deref(), Some("Late"));

    let requests = requests.lock().unwrap();
    let request = requests[0].to_ascii_lowercase();
    assert!(request.starts_with("get /api/comments "));
    assert!(request.contains("x-api-key: secret"));
}

#[tokio::test]
async fn test_non_success_status_yields_no_records() {
    let (url, _) = serve(vec![("/api/reviews", 503, r#"{"error": "down"}"#)]).await;
    let client = ApiClient::try_new(url, None, DEFAULT_TIMEOUT).unwrap();

    let reviews = ApiExtractor::<Review>::new(client, "reviews", "ApiReviews")
        .extract()
        .await
        .unwrap();

    assert!(reviews.is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_an_error() {
    let (url, _) = serve(vec![("/api/comments", 200, "[{\"commentId\": ")]).await;
    let client = ApiClient::try_new(url, None, DEFAULT_TIMEOUT).unwrap();

    let result = ApiExtractor::<Comment>::new(client, "comments", "ApiComments")
        .extract()
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.source_name, "ApiComments");
}

#[tokio::test]
async fn test_unreachable_api_yields_no_records() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = Url::parse(&format!("http://{}/api", addr)).unwrap();
    let client = ApiClient::try_new(url, None, DEFAULT_TIMEOUT).unwrap();

    let comments = ApiExtractor::<Comment>::new(client, "comments", "ApiComments")
        .extract()
        .await
        .unwrap();

    assert!(comments.is_empty());
}

#[tokio::test]
async fn test_pipeline_merges_api_reviews_after_database_reviews() {
    let reviews = r#"[
        {"reviewId": 1, "orderId": 1, "customerId": 1, "productId": 1, "rating": 1,
         "comment": "from api", "reviewDate": "2024-05-01T00:00:00"},
        {"reviewId": 2, "orderId": 1, "customerId": 1, "productId": 1, "rating": 3,
         "comment": "only api", "reviewDate": "2024-05-02T00:00:00"}
    ]"#;
    let (url, _) = serve(vec![
        ("/api/comments", 200, COMMENTS),
        ("/api/reviews", 200, reviews),
    ])
    .await;

    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source.db");
    let conn = Connection::open(&source).unwrap();
    conn.execute_batch(
        "CREATE TABLE Reviews (
            ReviewID INTEGER PRIMARY KEY, OrderID INTEGER, CustomerID INTEGER,
            ProductID INTEGER, Rating INTEGER, Comment TEXT, ReviewDate TEXT
        );",
    )
    .unwrap();
    conn.execute(
        "INSERT INTO Reviews VALUES (1, 1, 1, 1, 5, 'from database', datetime('now', '-1 day'))",
        [],
    )
    .unwrap();
    drop(conn);

    let mut settings = Settings::default();
    settings.data_sources.csv_path = temp.path().join("csv");
    settings.data_sources.api_base_url = Some(url.to_string());
    settings.data_sources.api_endpoints.reviews = Some("reviews".to_string());
    settings.etl.staging_path = temp.path().join("staging");
    settings.source_database = Some(source);
    settings.destination = temp.path().join("analytics.db");

    let pipeline = Pipeline::from_settings(settings.clone()).unwrap();
    let run = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(run.sources["Comments"].status, SourceStatus::Staged);
    assert_eq!(run.sources["Comments"].record_count, 3);
    assert_eq!(run.sources[API_REVIEWS].record_count, 2);
    assert_eq!(run.transformed["Comments"], 2);
    assert_eq!(run.transformed["Reviews"], 2);
    assert!(!run.is_degraded(), "unexpected pending load: {:?}", run.load_pending);

    let conn = Connection::open(&settings.destination).unwrap();
    let rating: i64 = conn
        .query_row("SELECT Rating FROM Reviews WHERE ReviewID = 1", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(rating, 5);
    let content: String = conn
        .query_row("SELECT Content FROM Comments WHERE CommentID = 1", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(content, "Fast delivery");
}

#[tokio::test]
async fn test_interrupted_body_yields_no_records() {
    let (url, _) = serve(vec![("/api/comments", 200, "TRUNCATED:[{\"commentId\": 1")]).await;
    let client = ApiClient::try_new(url, None, DEFAULT_TIMEOUT).unwrap();

    let comments = ApiExtractor::<Comment>::new(client, "comments", "ApiComments")
        .extract()
        .await
        .unwrap();

    assert!(comments.is_empty());
}

#[tokio::test]
async fn test_database_failure_leaves_csv_and_api_staged() {
    let (url, _) = serve(vec![("/api/comments", 200, COMMENTS)]).await;
    let temp = TempDir::new().unwrap();
    let csv = temp.path().join("csv");
    std::fs::create_dir_all(&csv).unwrap();
    std::fs::write(csv.join("customers.csv"), "CustomerID,FirstName\n1,Ada\n").unwrap();

    let mut settings = Settings::default();
    settings.data_sources.csv_path = csv;
    settings.data_sources.api_base_url = Some(url.to_string());
    settings.etl.staging_path = temp.path().join("staging");
    settings.source_database = Some(temp.path().join("absent.db"));
    settings.destination = temp.path().join("analytics.db");

    let pipeline = Pipeline::from_settings(settings).unwrap();
    let run = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(run.sources["Reviews"].status, SourceStatus::Failed);
    assert_eq!(run.sources["Customers"].status, SourceStatus::Staged);
    assert_eq!(run.sources["Comments"].status, SourceStatus::Staged);
    assert_eq!(run.sources["Comments"].record_count, 3);
    assert_eq!(run.loaded["Customers"], 1);
    assert_eq!(run.loaded["Comments"], 2);
    assert!(!run.is_degraded(), "unexpected pending load: {:?}", run.load_pending);
}
