//! REST transport behind an async trait seam.
//!
//! For an entity served at path `P` the backend maps operations to
//! `POST /P`, `GET /P`, `GET /P/{id}`, `DELETE /P/{id}`, `PUT /P/{id}` and
//! `PATCH /P/{id}`. Any transport *reply* settles — an HTTP error status is
//! normalized and returned as `Settlement::Error` — while reply-less
//! failures (connection refused, DNS, decode) are a distinct
//! [`TransportError`] and never reach a slice.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};
use shared::{
    error::NormalizedError,
    protocol::{Op, Settlement},
};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid api url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("api url {0:?} must use http or https")]
    UnsupportedScheme(String),
    #[error("{op} on {path:?} requires an \"id\" parameter")]
    MissingId { path: String, op: Op },
    #[error("failed to reach server: {0}")]
    Network(#[source] reqwest::Error),
    #[error("failed to decode response body: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Executes one entity-scoped operation against the backing service.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn execute(&self, path: &str, op: Op, params: Value)
        -> Result<Settlement, TransportError>;
}

/// Production backend over reqwest.
pub struct RestBackend {
    http: Client,
    base_url: String,
}

impl RestBackend {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(base_url).map_err(|source| TransportError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransportError::UnsupportedScheme(base_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, path, id),
            None => format!("{}/{}", self.base_url, path),
        }
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn execute(
        &self,
        path: &str,
        op: Op,
        params: Value,
    ) -> Result<Settlement, TransportError> {
        let request = match op {
            Op::Create => self.http.post(self.endpoint(path, None)).json(&params),
            Op::GetMany => {
                with_query(self.http.get(self.endpoint(path, None)), &params)
            }
            Op::GetOne => {
                let id = require_id(&params, path, op)?;
                with_query(
                    self.http.get(self.endpoint(path, Some(&id))),
                    &without_id(&params),
                )
            }
            Op::Delete => {
                let id = require_id(&params, path, op)?;
                with_query(self.http.delete(self.endpoint(path, Some(&id))), &params)
            }
            Op::Update => {
                let id = require_id(&params, path, op)?;
                self.http.put(self.endpoint(path, Some(&id))).json(&params)
            }
            Op::Patch => {
                let id = require_id(&params, path, op)?;
                self.http
                    .patch(self.endpoint(path, Some(&id)))
                    .json(&without_id(&params))
            }
        };

        let response = request.send().await.map_err(TransportError::Network)?;
        let status = response.status();
        if status.is_success() {
            let body = response
                .json::<Value>()
                .await
                .map_err(TransportError::Decode)?;
            Ok(Settlement::Data(body))
        } else {
            let status_text = status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string();
            let body = response.json::<Value>().await.unwrap_or(Value::Null);
            Ok(Settlement::Error(NormalizedError::from_http(
                status.as_u16(),
                status_text,
                body,
            )))
        }
    }
}

fn require_id(params: &Value, path: &str, op: Op) -> Result<String, TransportError> {
    let id = match params.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    id.ok_or_else(|| TransportError::MissingId {
        path: path.to_string(),
        op,
    })
}

fn without_id(params: &Value) -> Value {
    match params {
        Value::Object(fields) => {
            let mut fields = fields.clone();
            fields.remove("id");
            Value::Object(fields)
        }
        _ => Value::Object(Map::new()),
    }
}

/// Attaches scalar params as query pairs; nested values are not sent.
fn with_query(request: RequestBuilder, params: &Value) -> RequestBuilder {
    let Value::Object(fields) = params else {
        return request;
    };
    let pairs: Vec<(String, String)> = fields
        .iter()
        .filter_map(|(key, value)| match value {
            Value::String(value) => Some((key.clone(), value.clone())),
            Value::Number(value) => Some((key.clone(), value.to_string())),
            Value::Bool(value) => Some((key.clone(), value.to_string())),
            _ => None,
        })
        .collect();
    if pairs.is_empty() {
        request
    } else {
        request.query(&pairs)
    }
}
