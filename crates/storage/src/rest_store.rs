//! REST row store for the hosted cloud service.
//!
//! Speaks the PostgREST dialect: rows are filtered with `column=eq.value`
//! query parameters and upserted with `Prefer: resolution=merge-duplicates`.

use std::time::Duration;
use async_trait::async_trait;
use clipdo_core::{ChangeOp, Session};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use tracing::debug;
use super::{ChangeFeed, CloudRow, Result, RowStore, StorageError};

/// HTTP-backed [`RowStore`].
#[derive(Clone)]
pub struct RestRowStore {
    /// HTTP client
    client: Client,
    /// Service base URL
    url: String,
    /// Public API key
    api_key: String,
    table: String,
    feed: ChangeFeed,
}

impl RestRowStore {
    /// Create a store talking to `url`.
    pub fn new(url: String, api_key: String, table: String, timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            table,
            feed: ChangeFeed::new(),
        })
    }

    /// Replace the HTTP client, e.g. to route through a proxy.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.url, self.table)
    }

    fn authorized(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Remote {
            status: status.as_u16(),
            body,
        })
    }

    async fn select(&self, session: &Session, key: Option<&str>) -> Result<Vec<CloudRow>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("owner_id", eq(&session.user_id)),
        ];
        if let Some(key) = key {
            query.push(("key", eq(key)));
        }
        let request = self.client.get(self.endpoint()).query(&query);
        let response = self.authorized(request, session).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

/// Quote a value for a PostgREST `in.(...)` list.
fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl RowStore for RestRowStore {
    fn table(&self) -> &str {
        &self.table
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn fetch(&self, session: &Session, key: &str) -> Result<Option<CloudRow>> {
        Ok(self.select(session, Some(key)).await?.into_iter().next())
    }

    async fn fetch_all(&self, session: &Session) -> Result<Vec<CloudRow>> {
        self.select(session, None).await
    }

    async fn upsert(&self, session: &Session, row: &CloudRow) -> Result<()> {
        debug!("POST {} key={}", self.endpoint(), row.key);
        let request = self
            .client
            .post(self.endpoint())
            .query(&[("on_conflict", "owner_id,key")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);
        let response = self.authorized(request, session).send().await?;
        Self::check(response).await?;
        // The service does not say whether the row was new.
        self.feed.publish(&self.table, &session.user_id, ChangeOp::Update, Some(&row.key));
        Ok(())
    }

    async fn delete(&self, session: &Session, key: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.endpoint())
            .query(&[("owner_id", eq(&session.user_id)), ("key", eq(key))]);
        let response = self.authorized(request, session).send().await?;
        Self::check(response).await?;
        self.feed.publish(&self.table, &session.user_id, ChangeOp::Delete, Some(key));
        Ok(())
    }

    async fn delete_except(&self, session: &Session, keep: &[String]) -> Result<()> {
        let mut query = vec![("owner_id", eq(&session.user_id))];
        if !keep.is_empty() {
            let list: Vec<String> = keep.iter().map(|k| quoted(k)).collect();
            query.push(("key", format!("not.in.({})", list.join(","))));
        }
        let request = self.client.delete(self.endpoint()).query(&query);
        let response = self.authorized(request, session).send().await?;
        Self::check(response).await?;
        self.feed.publish(&self.table, &session.user_id, ChangeOp::Delete, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_slash() {
        let store = RestRowStore::new(
            "https://example.supabase.co/".to_string(),
            "anon".to_string(),
            "storage".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(store.endpoint(), "https://example.supabase.co/rest/v1/storage");
    }

    #[test]
    fn test_filter_values() {
        assert_eq!(eq("user-1"), "eq.user-1");
        assert_eq!(quoted("themeMode"), "\"themeMode\"");
        assert_eq!(quoted("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one HTTP request with `status` and `body`; yields the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    fn store(url: String) -> RestRowStore {
        let client = Client::builder().no_proxy().build().unwrap();
        RestRowStore::new(url, "anon-key".to_string(), "storage".to_string(), Duration::from_secs(5))
            .unwrap()
            .with_client(client)
    }

    fn session() -> Session {
        Session::new("u1", "token-1")
    }

    fn request_line(request: &str) -> &str {
        request.lines().next().unwrap()
    }

    fn has_header(request: &str, header: &str) -> bool {
        request.to_ascii_lowercase().lines().any(|l| l.trim() == header)
    }

    #[tokio::test]
    async fn test_upsert_request() {
        let (url, server) = serve_once("201 Created", "").await;
        let store = store(url);
        let row = CloudRow {
            owner: "u1".to_string(),
            key: "todos".to_string(),
            value: json!([1, 2]),
            updated: None,
        };
        let mut changes = store.changes().subscribe("storage", "u1");

        store.upsert(&session(), &row).await.unwrap();

        let request = server.await.unwrap();
        assert_eq!(
            request_line(&request),
            "POST /rest/v1/storage?on_conflict=owner_id%2Ckey HTTP/1.1"
        );
        assert!(has_header(&request, "prefer: resolution=merge-duplicates,return=minimal"));
        assert!(has_header(&request, "authorization: bearer token-1"));
        assert!(has_header(&request, "apikey: anon-key"));
        let body = request.split("\r\n\r\n").nth(1).unwrap();
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent, json!([{"owner_id": "u1", "key": "todos", "value": [1, 2]}]));
        assert_eq!(changes.try_recv().unwrap().key.as_deref(), Some("todos"));
    }

    #[tokio::test]
    async fn test_fetch_is_scoped_to_owner() {
        let (url, server) = serve_once(
            "200 OK",
            r#"[{"owner_id":"u1","key":"todos","value":["a"],"updated_at":"2026-10-16T08:00:00Z"}]"#,
        )
        .await;
        let store = store(url);

        let row = store.fetch(&session(), "todos").await.unwrap().unwrap();

        assert_eq!(row.value, json!(["a"]));
        assert_eq!(row.owner, "u1");
        assert!(row.updated.is_some());
        let request = server.await.unwrap();
        assert_eq!(
            request_line(&request),
            "GET /rest/v1/storage?select=*&owner_id=eq.u1&key=eq.todos HTTP/1.1"
        );
        assert!(has_header(&request, "authorization: bearer token-1"));
    }

    #[tokio::test]
    async fn test_fetch_missing_row() {
        let (url, server) = serve_once("200 OK", "[]").await;
        let store = store(url);

        assert_eq!(store.fetch(&session(), "nothing").await.unwrap(), None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_except_request() {
        let (url, server) = serve_once("204 No Content", "").await;
        let store = store(url);

        store
            .delete_except(&session(), &["storagePreference".to_string(), "themeMode".to_string()])
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert_eq!(
            request_line(&request),
            "DELETE /rest/v1/storage?owner_id=eq.u1&key=not.in.%28%22storagePreference%22%2C%22themeMode%22%29 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_error_status_is_remote_error() {
        let (url, server) = serve_once("401 Unauthorized", r#"{"message":"JWT expired"}"#).await;
        let store = store(url);

        let err = store.delete(&session(), "todos").await.unwrap_err();

        match err {
            StorageError::Remote { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("JWT expired"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let request = server.await.unwrap();
        assert_eq!(
            request_line(&request),
            "DELETE /rest/v1/storage?owner_id=eq.u1&key=eq.todos HTTP/1.1"
        );
    }
}
