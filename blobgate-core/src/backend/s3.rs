//! S3-compatible storage over signed HTTP.
//!
//! Every operation signs its request with Signature V4, issues it through a
//! shared reqwest client, and is raced against the configured deadline so a
//! hung socket fails deterministically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::backend::{BackendSocket, ObjectMetadata};
use crate::error::{GateError, Result};
use crate::promise::{deadline, Promise, ReadyCell};
use crate::sigv4::{sign_request, SignOptions};

#[derive(Debug, Clone)]
pub struct S3BackendConfig {
    /// Host (and optional port) of the object store, e.g. `127.0.0.1:9000`.
    pub host: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Per-request deadline.
    pub timeout: Duration,
}

impl S3BackendConfig {
    pub fn new(
        host: impl Into<String>,
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            bucket: bucket.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            timeout: Duration::from_millis(5000),
        }
    }
}

pub struct S3Backend {
    config: Arc<S3BackendConfig>,
    client: reqwest::Client,
    ready: ReadyCell,
}

impl S3Backend {
    pub fn new(config: S3BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|error| GateError::Config(error.to_string()))?;
        Ok(Self {
            config: Arc::new(config),
            client,
            ready: ReadyCell::new(),
        })
    }

    fn object_path(config: &S3BackendConfig, id: &str) -> String {
        format!("/{}/{}", config.bucket, id)
    }

    /// Sign and issue one request. Connection-level failures map to a
    /// network error carrying the configured host.
    async fn request(
        config: &S3BackendConfig,
        client: &reqwest::Client,
        method: &str,
        path: &str,
        query: &str,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        let options = SignOptions {
            method: method.to_string(),
            query: query.to_string(),
            ..SignOptions::default()
        };
        let signed = sign_request(
            &config.host,
            path,
            &config.access_key,
            &config.secret_key,
            &options,
        )?;

        let base = if config.host.contains("://") {
            config.host.clone()
        } else {
            format!("http://{}", config.host)
        };
        let url = if query.is_empty() {
            format!("{base}{path}")
        } else {
            format!("{base}{path}?{query}")
        };

        let mut request = match method {
            "GET" => client.get(&url),
            "PUT" => client.put(&url),
            "HEAD" => client.head(&url),
            "DELETE" => client.delete(&url),
            other => {
                return Err(GateError::Internal(format!(
                    "unsupported object store verb: {other}"
                )))
            }
        };
        for (name, value) in &signed {
            // reqwest derives the host header from the URL.
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        request.send().await.map_err(|error| GateError::Network {
            host: config.host.clone(),
            message: error.to_string(),
        })
    }

    async fn fetch_metadata(
        config: &S3BackendConfig,
        client: &reqwest::Client,
        id: &str,
    ) -> Result<ObjectMetadata> {
        let path = Self::object_path(config, id);
        let response =
            Self::request(config, client, "GET", &path, "attributes=", None).await?;
        if !response.status().is_success() {
            return Err(GateError::NotFound(id.to_string()));
        }

        // Second precision only; the ×1000 keeps the field in millis.
        let created_at = response
            .headers()
            .get("last-modified")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| chrono::DateTime::parse_from_rfc2822(value).ok())
            .map(|stamp| stamp.timestamp() * 1000)
            .unwrap_or(0);

        let body = response.text().await.map_err(|error| GateError::Network {
            host: config.host.clone(),
            message: error.to_string(),
        })?;
        let size = parse_tag(&body, "ObjectSize").ok_or_else(|| {
            GateError::Storage(format!("attributes response for {id} lacks an ObjectSize"))
        })?;

        Ok(ObjectMetadata {
            id: id.to_string(),
            size,
            created_at,
        })
    }
}

fn parse_tag(body: &str, tag: &str) -> Option<i64> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    body[start..end].trim().parse().ok()
}

impl BackendSocket for S3Backend {
    fn kind(&self) -> &'static str {
        "s3"
    }

    fn is_ready(&self) -> Promise<bool> {
        self.ready.current()
    }

    fn init(&self) -> Promise<bool> {
        // No local resource to open; the client is built at construction.
        let ready = self.ready.replace();
        ready.resolve(true);
        ready
    }

    fn backup(&self) -> Promise<bool> {
        // The object store owns durability.
        Promise::resolved(true)
    }

    fn close(&self) -> Promise<bool> {
        self.ready.close();
        Promise::resolved(true)
    }

    fn is_online(&self) -> Promise<Option<u64>> {
        let config = Arc::clone(&self.config);
        let client = self.client.clone();
        let probe = Promise::spawn(async move {
            let started = Instant::now();
            let path = format!("/{}", config.bucket);
            // Any HTTP response means the host is reachable; status is not
            // a liveness signal.
            Ok(
                match Self::request(&config, &client, "HEAD", &path, "", None).await {
                    Ok(_) => Some(started.elapsed().as_millis() as u64),
                    Err(_) => None,
                },
            )
        });
        deadline(probe, self.config.timeout).catch(|_| Ok(None))
    }

    fn get_object_metadata(&self, id: &str) -> Promise<ObjectMetadata> {
        let config = Arc::clone(&self.config);
        let client = self.client.clone();
        let id = id.to_string();
        let fetch =
            Promise::spawn(async move { Self::fetch_metadata(&config, &client, &id).await });
        deadline(fetch, self.config.timeout)
    }

    fn approve_object_metadata(&self, id: &str, _size: i64) -> Promise<bool> {
        let config = Arc::clone(&self.config);
        let client = self.client.clone();
        let id = id.to_string();
        let check = Promise::spawn(async move {
            let path = Self::object_path(&config, &id);
            let response = Self::request(&config, &client, "HEAD", &path, "", None).await?;
            if response.status().is_success() {
                return Err(GateError::AlreadyExists(id));
            }
            Ok(true)
        });
        deadline(check, self.config.timeout)
    }

    fn get_object(&self, id: &str) -> Promise<Bytes> {
        let config = Arc::clone(&self.config);
        let client = self.client.clone();
        let id = id.to_string();
        let fetch = Promise::spawn(async move {
            let path = Self::object_path(&config, &id);
            let response = Self::request(&config, &client, "GET", &path, "", None).await?;
            if !response.status().is_success() {
                return Err(GateError::NotFound(id));
            }
            response.bytes().await.map_err(|error| GateError::Network {
                host: config.host.clone(),
                message: error.to_string(),
            })
        });
        deadline(fetch, self.config.timeout)
    }

    fn set_object(&self, id: &str, data: Bytes) -> Promise<ObjectMetadata> {
        let config = Arc::clone(&self.config);
        let client = self.client.clone();
        let id = id.to_string();
        let store = Promise::spawn(async move {
            let path = Self::object_path(&config, &id);
            let response =
                Self::request(&config, &client, "PUT", &path, "", Some(data)).await?;
            if !response.status().is_success() {
                return Err(GateError::Storage(format!(
                    "object store refused PUT for {} with status {}",
                    id,
                    response.status()
                )));
            }
            tracing::debug!("stored {} in bucket {}", id, config.bucket);
            Self::fetch_metadata(&config, &client, &id).await
        });
        deadline(store, self.config.timeout)
    }

    fn del_object(&self, id: &str) -> Promise<bool> {
        let config = Arc::clone(&self.config);
        let client = self.client.clone();
        let id = id.to_string();
        let remove = Promise::spawn(async move {
            let path = Self::object_path(&config, &id);
            let response = Self::request(&config, &client, "DELETE", &path, "", None).await?;
            Ok(response.status().is_success())
        });
        deadline(remove, self.config.timeout)
    }
}
