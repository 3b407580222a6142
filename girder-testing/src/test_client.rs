// In-process HTTP client

use girder_core::{Application, HttpRequest, HttpResponse, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Sends requests straight to an [`Application`], without a socket.
#[derive(Clone)]
pub struct TestClient {
    app: Arc<Application>,
}

impl TestClient {
    pub fn new(app: Arc<Application>) -> Self {
        Self { app }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(TestRequest::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.send(TestRequest::delete(path)).await
    }

    pub async fn post(&self, path: &str, body: impl Into<Vec<u8>>) -> TestResponse {
        self.send(TestRequest::post(path).body(body)).await
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<TestResponse> {
        Ok(self.send(TestRequest::post(path).json(body)?).await)
    }

    pub async fn put_json<T: Serialize>(&self, path: &str, body: &T) -> Result<TestResponse> {
        Ok(self.send(TestRequest::put(path).json(body)?).await)
    }

    pub async fn patch_json<T: Serialize>(&self, path: &str, body: &T) -> Result<TestResponse> {
        Ok(self.send(TestRequest::patch(path).json(body)?).await)
    }

    pub async fn send(&self, request: TestRequest) -> TestResponse {
        TestResponse(self.app.dispatch(request.build()).await)
    }

    /// Send, dropping the request when `abort` resolves first.
    pub async fn send_until<F>(&self, request: TestRequest, abort: F) -> Option<TestResponse>
    where
        F: Future<Output = ()>,
    {
        self.app
            .dispatch_cancellable(request.build(), abort)
            .await
            .map(TestResponse)
    }

    /// Send, giving up after `timeout`.
    pub async fn send_with_timeout(&self, request: TestRequest, timeout: Duration) -> Option<TestResponse> {
        self.send_until(request, tokio::time::sleep(timeout)).await
    }

    /// Send `count` copies of a request on separate tasks; responses come
    /// back in completion order.
    pub async fn send_concurrent(&self, request: TestRequest, count: usize) -> Vec<TestResponse> {
        let mut tasks = JoinSet::new();
        for _ in 0..count {
            let app = self.app.clone();
            let request = request.clone().build();
            tasks.spawn(async move { app.dispatch(request).await });
        }

        let mut responses = Vec::with_capacity(count);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(response) => responses.push(TestResponse(response)),
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            }
        }
        responses
    }
}

/// Request builder
#[derive(Debug, Clone)]
pub struct TestRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    query: Vec<(String, String)>,
}

impl TestRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            query: Vec::new(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: &str) -> Self {
        Self::new("POST", path)
    }

    pub fn put(path: &str) -> Self {
        Self::new("PUT", path)
    }

    pub fn patch(path: &str) -> Self {
        Self::new("PATCH", path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new("DELETE", path)
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {token}"))
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json<T: Serialize>(mut self, data: &T) -> Result<Self> {
        self.body = serde_json::to_vec(data)
            .map_err(|e| girder_core::Error::Serialization(e.to_string()))?;
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Append a query pair. Values go into the URL as given.
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> HttpRequest {
        let mut path = self.path;
        if !self.query.is_empty() {
            let pairs: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            path.push(if path.contains('?') { '&' } else { '?' });
            path.push_str(&pairs.join("&"));
        }

        let mut request = HttpRequest::new(self.method, path).with_body(self.body);
        request.headers = self.headers;
        request
    }
}

/// Response from a [`TestClient`]
#[derive(Debug, Clone)]
pub struct TestResponse(pub HttpResponse);

impl TestResponse {
    pub fn status(&self) -> u16 {
        self.0.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.0.body_ref()).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        self.0.body_json()
    }

    pub fn header(&self, name: &str) -> Option<&String> {
        self.0.header(name)
    }

    /// Message of a Girder error body
    pub fn error_message(&self) -> Option<String> {
        self.json::<serde_json::Value>()
            .ok()?
            .get("message")?
            .as_str()
            .map(str::to_string)
    }

    pub fn into_inner(self) -> HttpResponse {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = TestRequest::post("/users?active=1")
            .header("X-Api-Key", "secret")
            .query("page", "2")
            .json(&serde_json::json!({"name": "Ada"}))
            .unwrap()
            .build();

        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/users?active=1&page=2");
        assert_eq!(request.header("x-api-key").map(String::as_str), Some("secret"));
        assert_eq!(
            request.header("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(&request.body[..], br#"{"name":"Ada"}"#);
    }

    #[test]
    fn test_error_message() {
        let response = TestResponse(
            HttpResponse::json(&serde_json::json!({"statusCode": 404, "message": "gone"})).unwrap(),
        );
        assert_eq!(response.error_message().as_deref(), Some("gone"));
        assert!(response.is_success());
    }
}
