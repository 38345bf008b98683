use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use store::{EntityType, RecordId, Role};

use crate::error::{ApiError, Result};
use crate::{RemoteApi, Session};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    token: Option<String>,
    role: Option<Role>,
    message: Option<String>,
}

fn network(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.to_string())
}

/// [`RemoteApi`] over HTTP(S) with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    #[cfg_attr(target_arch = "wasm32", allow(unused_variables))]
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let builder = Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(timeout);
        let client = builder.build().map_err(network)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn record_url(&self, entity: EntityType, id: &RecordId) -> String {
        format!("{}/{}", self.url(entity.path()), id.storage_key())
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Request failed with {status}: {body}");
        Err(ApiError::from_status(status.as_u16(), body))
    }

    async fn json(response: Response) -> Result<Value> {
        let text = response.text().await.map_err(network)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn json_list(response: Response) -> Result<Vec<Value>> {
        match Self::json(response).await? {
            Value::Array(items) => Ok(items),
            other => Err(ApiError::Decode(format!("expected a list, got {other}"))),
        }
    }
}

impl RemoteApi for HttpApi {
    async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let body = serde_json::json!({ "username": username, "password": password });
        let response = Self::send(self.client.post(self.url("/api/login")).json(&body)).await?;
        let login: LoginResponse = serde_json::from_value(Self::json(response).await?)
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        match login.token {
            Some(token) if login.success => Ok(Session {
                token,
                role: login.role,
            }),
            _ => Err(ApiError::Auth(
                login.message.unwrap_or_else(|| "invalid credentials".to_string()),
            )),
        }
    }

    async fn list(&self, token: &str, entity: EntityType) -> Result<Vec<Value>> {
        let request = self.client.get(self.url(entity.path())).bearer_auth(token);
        Self::json_list(Self::send(request).await?).await
    }

    async fn list_aids_for(&self, token: &str, resident: &RecordId) -> Result<Vec<Value>> {
        let request = self
            .client
            .get(self.url(EntityType::Aid.path()))
            .query(&[("resident_id", resident.storage_key())])
            .bearer_auth(token);
        Self::json_list(Self::send(request).await?).await
    }

    async fn create(&self, token: &str, entity: EntityType, payload: &Value) -> Result<Value> {
        let request = self
            .client
            .post(self.url(entity.path()))
            .bearer_auth(token)
            .json(payload);
        Self::json(Self::send(request).await?).await
    }

    async fn update(
        &self,
        token: &str,
        entity: EntityType,
        id: &RecordId,
        payload: &Value,
    ) -> Result<Value> {
        let request = self
            .client
            .put(self.record_url(entity, id))
            .bearer_auth(token)
            .json(payload);
        Self::json(Self::send(request).await?).await
    }

    async fn delete(&self, token: &str, entity: EntityType, id: &RecordId) -> Result<()> {
        let request = self
            .client
            .delete(self.record_url(entity, id))
            .bearer_auth(token);
        Self::send(request).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        // any HTTP answer, even an error status, means the server is reachable
        self.client
            .head(&self.base_url)
            .send()
            .await
            .map_err(network)?;
        Ok(())
    }
}
