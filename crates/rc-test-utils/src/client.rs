//! `ApiClient` - thin `reqwest` wrapper over the Room Controller HTTP API.
//!
//! Success helpers return the parsed JSON body and fail on any non-2xx
//! status; the `*_raw` variants return the response untouched for error
//! assertions.

use anyhow::Context;
use serde_json::{json, Value};

/// HTTP client bound to one server.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Register `display_name` and return the new user id.
    pub async fn register(&self, display_name: &str) -> Result<String, anyhow::Error> {
        let body = self
            .expect_success(
                self.http
                    .post(self.url("/api/v1/users"))
                    .json(&json!({ "display_name": display_name }))
                    .send()
                    .await?,
            )
            .await?;

        body["user_id"]
            .as_str()
            .map(str::to_string)
            .context("registration response has no user_id")
    }

    pub async fn create_room(&self, user_id: &str) -> Result<Value, anyhow::Error> {
        let response = self.create_room_raw(user_id).await?;
        self.expect_success(response).await
    }

    pub async fn create_room_raw(&self, user_id: &str) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .http
            .post(self.url("/api/v1/rooms"))
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?)
    }

    pub async fn join(&self, room_id: &str, user_id: &str) -> Result<Value, anyhow::Error> {
        let response = self.join_raw(room_id, user_id).await?;
        self.expect_success(response).await
    }

    pub async fn join_raw(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .http
            .post(self.url(&format!("/api/v1/rooms/{room_id}/join")))
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?)
    }

    pub async fn leave(&self, room_id: &str, user_id: &str) -> Result<Value, anyhow::Error> {
        let response = self.leave_raw(room_id, user_id).await?;
        self.expect_success(response).await
    }

    pub async fn leave_raw(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .http
            .post(self.url(&format!("/api/v1/rooms/{room_id}/leave")))
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?)
    }

    pub async fn list_rooms(&self) -> Result<Value, anyhow::Error> {
        let response = self.http.get(self.url("/api/v1/rooms")).send().await?;
        self.expect_success(response).await
    }

    pub async fn room_detail(&self, room_id: &str) -> Result<Value, anyhow::Error> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/rooms/{room_id}")))
            .send()
            .await?;
        self.expect_success(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn expect_success(&self, response: reqwest::Response) -> Result<Value, anyhow::Error> {
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            anyhow::bail!("request failed with {status}: {body}");
        }
        Ok(body)
    }
}
