//! HTTP-клиент backend-сервиса выдачи VPN-ключей.
//!
//! Все данные (пользователи, серверы, ключи, трафик) живут в backend; здесь
//! только запросы и разбор ответов.

use crate::config::Config;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("User with telegram_id {0} not found")]
    UserNotFound(i64),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Server {
    pub id: i64,
    #[serde(rename = "server_name")]
    pub name: String,
    #[serde(rename = "server_location", default)]
    pub location: String,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Key {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub server_location: String,
    pub access_url: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(rename = "traffic_limit", default)]
    pub traffic_limit_bytes: u64,
    #[serde(rename = "traffic_used", default)]
    pub traffic_used_bytes: u64,
    #[serde(default)]
    pub user_telegram_id: Option<i64>,
}

/// Параметры создания ключа в единицах бота (ГБ, дни).
#[derive(Debug, Clone, PartialEq)]
pub struct NewKey {
    pub telegram_id: i64,
    pub server_id: i64,
    pub name: String,
    pub traffic_limit_gb: u64,
    pub expiration_days: u32,
}

pub fn gb_to_bytes(gb: u64) -> u64 {
    gb.saturating_mul(BYTES_PER_GB)
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}

/// Операции backend, которые использует диалог.
pub trait Backend: Send + Sync + 'static {
    fn register_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> impl Future<Output = Result<User, ApiError>> + Send;

    /// Пустой список, если пользователь не найден.
    fn list_user_keys(
        &self,
        telegram_id: i64,
    ) -> impl Future<Output = Result<Vec<Key>, ApiError>> + Send;

    /// Только серверы с `active == true`.
    fn list_active_servers(&self) -> impl Future<Output = Result<Vec<Server>, ApiError>> + Send;

    fn create_key(&self, request: &NewKey) -> impl Future<Output = Result<Key, ApiError>> + Send;

    /// `true` только при явном подтверждении backend.
    fn revoke_key(&self, key_id: i64) -> impl Future<Output = bool> + Send;

    fn list_all_users(&self) -> impl Future<Output = Result<Vec<User>, ApiError>> + Send;

    fn list_all_servers(&self) -> impl Future<Output = Result<Vec<Server>, ApiError>> + Send;

    fn list_all_keys(&self) -> impl Future<Output = Result<Vec<Key>, ApiError>> + Send;
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Serialize)]
struct UserPayload<'a> {
    telegram_id: i64,
    username: Option<&'a str>,
    first_name: Option<&'a str>,
    is_active: bool,
}

#[derive(Debug, Serialize)]
struct CreateKeyPayload<'a> {
    user_id: i64,
    server_id: i64,
    name: &'a str,
    traffic_limit: u64,
    expiration_days: u32,
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    auth: Option<(String, String)>,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.backend.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build()?;
        let auth = config
            .basic_auth()
            .map(|(user, password)| (user.to_string(), password.to_string()));
        Ok(Self {
            http,
            base_url: config.backend.base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn check_status(
        resp: reqwest::Response,
        expected: StatusCode,
    ) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status == expected || (expected == StatusCode::OK && status.is_success()) {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_page<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ApiError> {
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        let resp = Self::check_status(resp, StatusCode::OK).await?;
        let page: Page<T> = resp.json().await?;
        Ok(page.results)
    }

    async fn find_user(&self, telegram_id: i64) -> Result<Option<User>, ApiError> {
        let users: Vec<User> = self
            .get_page(&format!("/users/?telegram_id={telegram_id}"))
            .await?;
        Ok(users.into_iter().next())
    }
}

impl Backend for HttpBackend {
    async fn register_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> Result<User, ApiError> {
        let payload = UserPayload {
            telegram_id,
            username,
            first_name,
            is_active: true,
        };
        let builder = match self.find_user(telegram_id).await? {
            Some(existing) => {
                tracing::debug!(telegram_id, user_id = existing.id, "Updating backend user");
                self.request(reqwest::Method::PATCH, &format!("/users/{}/", existing.id))
            }
            None => {
                tracing::debug!(telegram_id, "Creating backend user");
                self.request(reqwest::Method::POST, "/users/")
            }
        };
        let resp = builder.json(&payload).send().await?;
        let resp = Self::check_status(resp, StatusCode::OK).await?;
        Ok(resp.json().await?)
    }

    async fn list_user_keys(&self, telegram_id: i64) -> Result<Vec<Key>, ApiError> {
        let Some(user) = self.find_user(telegram_id).await? else {
            return Ok(Vec::new());
        };
        let resp = self
            .request(reqwest::Method::GET, &format!("/users/{}/keys/", user.id))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let resp = Self::check_status(resp, StatusCode::OK).await?;
        Ok(resp.json().await?)
    }

    async fn list_active_servers(&self) -> Result<Vec<Server>, ApiError> {
        let servers: Vec<Server> = self.get_page("/servers/").await?;
        Ok(servers.into_iter().filter(|server| server.active).collect())
    }

    async fn create_key(&self, request: &NewKey) -> Result<Key, ApiError> {
        let user = self
            .find_user(request.telegram_id)
            .await?
            .ok_or(ApiError::UserNotFound(request.telegram_id))?;
        let payload = CreateKeyPayload {
            user_id: user.id,
            server_id: request.server_id,
            name: &request.name,
            traffic_limit: gb_to_bytes(request.traffic_limit_gb),
            expiration_days: request.expiration_days,
        };
        let resp = self
            .request(reqwest::Method::POST, "/keys/create_key/")
            .json(&payload)
            .send()
            .await?;
        let resp = Self::check_status(resp, StatusCode::CREATED).await?;
        Ok(resp.json().await?)
    }

    async fn revoke_key(&self, key_id: i64) -> bool {
        let result = self
            .request(reqwest::Method::POST, &format!("/keys/{key_id}/revoke/"))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status() == StatusCode::OK => true,
            Ok(resp) => {
                tracing::warn!(key_id, status = resp.status().as_u16(), "Backend refused key revocation");
                false
            }
            Err(error) => {
                tracing::error!(key_id, error = %error, "Error revoking key");
                false
            }
        }
    }

    async fn list_all_users(&self) -> Result<Vec<User>, ApiError> {
        self.get_page("/users/").await
    }

    async fn list_all_servers(&self) -> Result<Vec<Server>, ApiError> {
        self.get_page("/servers/").await
    }

    async fn list_all_keys(&self) -> Result<Vec<Key>, ApiError> {
        self.get_page("/keys/").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode as HttpStatus, Uri};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<(String, String)>>>;

    /// Локальный backend: отвечает по `respond(метод, путь с query)` и пишет журнал запросов.
    async fn stub_backend<F>(respond: F) -> (HttpBackend, Calls)
    where
        F: Fn(&str, &str) -> (u16, Value) + Send + Sync + 'static,
    {
        let calls: Calls = Arc::default();
        let respond = Arc::new(respond);
        let log = calls.clone();
        let app = axum::Router::new().fallback(move |method: Method, uri: Uri, body: String| {
            let respond = respond.clone();
            let log = log.clone();
            async move {
                let target = uri
                    .path_and_query()
                    .map(|pq| pq.as_str().to_string())
                    .unwrap_or_default();
                log.lock().unwrap().push((format!("{method} {target}"), body));
                let (status, reply) = (*respond)(method.as_str(), &target);
                (HttpStatus::from_u16(status).unwrap(), axum::Json(reply))
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (backend(&format!("[backend]\nbase_url = \"http://{addr}/api\"\n")), calls)
    }

    fn page(results: Value) -> Value {
        let count = results.as_array().map_or(0, Vec::len);
        json!({ "count": count, "results": results })
    }

    fn known_user() -> Value {
        page(json!([{ "id": 3, "telegram_id": 42, "username": "alice", "is_active": true }]))
    }

    fn key_json() -> Value {
        json!({
            "id": 9,
            "name": "TG_42_NL",
            "server_name": "NL",
            "server_location": "Amsterdam",
            "access_url": "ss://abc@203.0.113.7:443/?outline=1",
            "is_active": true,
            "expiration_date": "2026-12-01T00:00:00Z",
            "traffic_limit": 0,
            "traffic_used": 0
        })
    }

    fn new_key() -> NewKey {
        NewKey {
            telegram_id: 42,
            server_id: 1,
            name: "TG_42_NL".to_string(),
            traffic_limit_gb: 1,
            expiration_days: 30,
        }
    }

    fn requests(calls: &Calls) -> Vec<String> {
        calls.lock().unwrap().iter().map(|(line, _)| line.clone()).collect()
    }

    fn backend(raw: &str) -> HttpBackend {
        let config = Config::parse(raw).unwrap();
        HttpBackend::new(&config).unwrap()
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = backend("[backend]\nbase_url = \"http://localhost:8000/api/\"\n");
        assert_eq!(client.url("/servers/"), "http://localhost:8000/api/servers/");
        assert!(client.auth.is_none());
    }

    #[test]
    fn credentials_are_kept_for_basic_auth() {
        let client = backend(
            "[backend]\nbase_url = \"http://localhost\"\nusername = \"bot\"\npassword = \"pw\"\n",
        );
        assert_eq!(client.auth, Some(("bot".to_string(), "pw".to_string())));
    }

    #[test]
    fn gigabytes_convert_to_bytes() {
        assert_eq!(gb_to_bytes(0), 0);
        assert_eq!(gb_to_bytes(10), 10 * 1_073_741_824);
        assert!((bytes_to_gb(1_610_612_736) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn server_page_is_decoded() {
        let raw = r#"{
            "count": 2,
            "results": [
                {"id": 1, "server_name": "NL", "server_location": "Amsterdam", "active": true},
                {"id": 2, "server_name": "DE", "server_location": "Frankfurt", "active": false}
            ]
        }"#;
        let page: Page<Server> = serde_json::from_str(raw).unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].name, "NL");
        assert_eq!(page.results[0].location, "Amsterdam");
        assert!(!page.results[1].active);
    }

    #[test]
    fn key_with_nulls_is_decoded() {
        let raw = r#"{
            "id": 5,
            "name": "TG_42_NL",
            "server_name": "NL",
            "server_location": "Amsterdam",
            "access_url": "ss://abc@1.2.3.4:443/?outline=1",
            "is_active": true,
            "expiration_date": null,
            "traffic_limit": 0,
            "traffic_used": 1073741824
        }"#;
        let key: Key = serde_json::from_str(raw).unwrap();
        assert_eq!(key.expiration_date, None);
        assert_eq!(key.traffic_limit_bytes, 0);
        assert_eq!(key.traffic_used_bytes, 1_073_741_824);
        assert_eq!(key.user_telegram_id, None);
    }

    #[test]
    fn user_with_missing_optional_fields_is_decoded() {
        let raw = r#"{"id": 3, "telegram_id": 42, "username": null, "is_active": true}"#;
        let user: User = serde_json::from_str(raw).unwrap();
        assert_eq!(user.telegram_id, 42);
        assert_eq!(user.username, None);
        assert_eq!(user.first_name, None);
    }

    #[test]
    fn create_payload_uses_backend_field_names() {
        let payload = CreateKeyPayload {
            user_id: 3,
            server_id: 1,
            name: "TG_42_NL",
            traffic_limit: gb_to_bytes(1),
            expiration_days: 30,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["user_id"], 3);
        assert_eq!(value["traffic_limit"], 1_073_741_824u64);
        assert_eq!(value["expiration_days"], 30);
    }

    #[tokio::test]
    async fn create_key_requires_created_status() {
        for (status, created) in [(201, true), (200, false), (400, false)] {
            let (client, calls) = stub_backend(move |method, target| match (method, target) {
                ("GET", "/api/users/?telegram_id=42") => (200, known_user()),
                ("POST", "/api/keys/create_key/") => (status, key_json()),
                _ => (404, json!({})),
            })
            .await;

            let result = client.create_key(&new_key()).await;
            if created {
                assert_eq!(result.unwrap().id, 9);
            } else {
                match result {
                    Err(ApiError::Status { status: got, .. }) => assert_eq!(got, status),
                    other => panic!("expected status error for {status}, got {other:?}"),
                }
            }

            let calls = calls.lock().unwrap().clone();
            let (line, body) = &calls[1];
            assert_eq!(line, "POST /api/keys/create_key/");
            let body: Value = serde_json::from_str(body).unwrap();
            assert_eq!(body["user_id"], 3);
            assert_eq!(body["traffic_limit"], 1_073_741_824u64);
        }
    }

    #[tokio::test]
    async fn create_key_for_unknown_user_fails_without_posting() {
        let (client, calls) = stub_backend(|method, target| match (method, target) {
            ("GET", "/api/users/?telegram_id=42") => (200, page(json!([]))),
            _ => (201, key_json()),
        })
        .await;

        assert!(matches!(
            client.create_key(&new_key()).await,
            Err(ApiError::UserNotFound(42))
        ));
        assert_eq!(requests(&calls), vec!["GET /api/users/?telegram_id=42"]);
    }

    #[tokio::test]
    async fn revoke_is_true_only_on_ok() {
        for (status, expected) in [(200, true), (204, false), (404, false), (500, false)] {
            let (client, calls) = stub_backend(move |_, _| (status, json!({}))).await;
            assert_eq!(client.revoke_key(15).await, expected, "status {status}");
            assert_eq!(requests(&calls), vec!["POST /api/keys/15/revoke/"]);
        }
    }

    #[tokio::test]
    async fn revoke_is_false_when_backend_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = backend(&format!("[backend]\nbase_url = \"http://{addr}\"\n"));
        assert!(!client.revoke_key(15).await);
    }

    #[tokio::test]
    async fn keys_of_unknown_user_are_empty() {
        let (client, calls) = stub_backend(|_, _| (200, page(json!([])))).await;
        assert_eq!(client.list_user_keys(42).await.unwrap(), Vec::new());
        assert_eq!(requests(&calls), vec!["GET /api/users/?telegram_id=42"]);
    }

    #[tokio::test]
    async fn keys_of_known_user_come_from_user_endpoint() {
        let (client, calls) = stub_backend(|_, target| match target {
            "/api/users/?telegram_id=42" => (200, known_user()),
            "/api/users/3/keys/" => (200, json!([key_json()])),
            _ => (404, json!({})),
        })
        .await;

        let keys = client.list_user_keys(42).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].access_url, "ss://abc@203.0.113.7:443/?outline=1");
        assert_eq!(requests(&calls)[1], "GET /api/users/3/keys/");
    }

    #[tokio::test]
    async fn inactive_servers_are_dropped() {
        let (client, _) = stub_backend(|_, _| {
            (
                200,
                page(json!([
                    { "id": 1, "server_name": "NL", "server_location": "Amsterdam", "active": true },
                    { "id": 2, "server_name": "DE", "server_location": "Frankfurt", "active": false }
                ])),
            )
        })
        .await;

        let servers = client.list_active_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "NL");
        assert_eq!(client.list_all_servers().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn existing_user_is_patched() {
        let (client, calls) = stub_backend(|method, _| match method {
            "GET" => (200, known_user()),
            _ => (200, json!({ "id": 3, "telegram_id": 42, "username": "alice_new", "is_active": true })),
        })
        .await;

        let user = client
            .register_user(42, Some("alice_new"), Some("Alice"))
            .await
            .unwrap();
        assert_eq!(user.username.as_deref(), Some("alice_new"));

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls[1].0, "PATCH /api/users/3/");
        let body: Value = serde_json::from_str(&calls[1].1).unwrap();
        assert_eq!(body["telegram_id"], 42);
        assert_eq!(body["first_name"], "Alice");
    }

    #[tokio::test]
    async fn missing_user_is_created() {
        let (client, calls) = stub_backend(|method, _| match method {
            "GET" => (200, page(json!([]))),
            _ => (201, json!({ "id": 8, "telegram_id": 42, "is_active": true })),
        })
        .await;

        let user = client.register_user(42, None, None).await.unwrap();
        assert_eq!(user.id, 8);
        assert_eq!(
            requests(&calls),
            vec!["GET /api/users/?telegram_id=42", "POST /api/users/"]
        );
    }

    #[tokio::test]
    async fn lookup_failure_is_a_status_error() {
        let (client, _) = stub_backend(|_, _| (503, json!({ "detail": "down" }))).await;
        assert!(matches!(
            client.list_user_keys(42).await,
            Err(ApiError::Status { status: 503, .. })
        ));
    }
}
