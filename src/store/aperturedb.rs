//! ApertureDB descriptor store over the REST endpoint.
//!
//! Every call posts a JSON command list as a multipart form to
//! `http(s)://host:port/api/`:
//!
//! | Part | Content |
//! |------|---------|
//! | `query` | JSON array of commands |
//! | `blobs` | One part per embedding, little-endian `f32` bytes |
//!
//! The response body is `{"json": [...], "blobs": [...]}` with one result
//! object per command; a command succeeded when its `status` is 0.
//!
//! Requests carry `Authorization: Bearer <session_token>`. The token comes
//! from an `Authenticate` command on first use and is renewed once when the
//! service answers 401.
//!
//! # Retry Strategy
//!
//! With `max_retries > 0`, HTTP 429, 5xx and network errors are retried with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s). Other 4xx responses
//! and command-level failures are never retried. The default of 0 fails on
//! the first error.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use guide_index_core::embedding::vec_to_blob;
use guide_index_core::models::{
    DescriptorMetadata, Hit, SetInfo, SetSpec, ENGINE_FLAT, METRIC_IP,
};
use guide_index_core::store::{check_compatible, rank_hits, DescriptorStore, StoreError};

use crate::config::ApertureDbConfig;

pub struct ApertureDbStore {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
    max_retries: u32,
    session: tokio::sync::Mutex<Option<String>>,
    /// Dimensions of sets seen so far, to validate `add` without a round trip.
    known_dims: RwLock<HashMap<String, usize>>,
}

impl ApertureDbStore {
    pub fn new(config: &ApertureDbConfig) -> Result<Self> {
        let password = config.password()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url(),
            username: config.username.clone(),
            password,
            max_retries: config.max_retries,
            session: tokio::sync::Mutex::new(None),
            known_dims: RwLock::new(HashMap::new()),
        })
    }

    /// POST one command list, retrying transient failures.
    ///
    /// Returns `Ok(None)` on 401 so the caller can renew the session.
    async fn post(
        &self,
        commands: &Value,
        blobs: &[Vec<u8>],
        token: Option<&str>,
    ) -> Result<Option<Value>> {
        let query = serde_json::to_string(commands)?;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying vector service request");
                tokio::time::sleep(delay).await;
            }

            // Forms are consumed by send, so rebuild per attempt
            let mut form = Form::new().text("query", query.clone());
            for blob in blobs {
                form = form.part(
                    "blobs",
                    Part::bytes(blob.clone()).mime_str("application/octet-stream")?,
                );
            }
            let mut request = self.client.post(&self.url).multipart(form);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(Some(response.json().await?));
                    }
                    if status == StatusCode::UNAUTHORIZED && token.is_some() {
                        return Ok(None);
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        last_err = Some(StoreError::Service(format!("HTTP {}: {}", status, body)));
                        continue;
                    }
                    return Err(StoreError::Service(format!("HTTP {}: {}", status, body)).into());
                }
                Err(e) => {
                    last_err = Some(StoreError::Service(format!(
                        "cannot reach {}: {}",
                        self.url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| StoreError::Service("request failed after retries".to_string()))
            .into())
    }

    async fn authenticate(&self) -> Result<String> {
        let commands = json!([{
            "Authenticate": {
                "username": self.username,
                "password": self.password,
            }
        }]);
        let body = self
            .post(&commands, &[], None)
            .await?
            .ok_or_else(|| anyhow!("authentication rejected"))?;
        let results = command_results(&body, 1)?;
        let auth = command_body(&results[0], "Authenticate")?;
        let token = auth
            .get("session_token")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Service("Authenticate returned no session_token".into()))?;
        tracing::debug!(user = %self.username, "authenticated with vector service");
        Ok(token.to_string())
    }

    async fn session_token(&self, renew: bool) -> Result<String> {
        let mut session = self.session.lock().await;
        if !renew {
            if let Some(token) = session.as_ref() {
                return Ok(token.clone());
            }
        }
        let token = self.authenticate().await?;
        *session = Some(token.clone());
        Ok(token)
    }

    /// Run a command list and return one result object per command.
    async fn execute(&self, commands: Value, blobs: Vec<Vec<u8>>) -> Result<Vec<Value>> {
        let expected = commands.as_array().map(Vec::len).unwrap_or(0);

        let token = self.session_token(false).await?;
        let body = match self.post(&commands, &blobs, Some(&token)).await? {
            Some(body) => body,
            None => {
                tracing::debug!("session expired, authenticating again");
                let token = self.session_token(true).await?;
                self.post(&commands, &blobs, Some(&token))
                    .await?
                    .ok_or_else(|| StoreError::Service("unauthorized".to_string()))?
            }
        };

        command_results(&body, expected)
    }

    fn cached_dims(&self, set: &str) -> Option<usize> {
        self.known_dims
            .read()
            .ok()
            .and_then(|m| m.get(set).copied())
    }

    fn remember_dims(&self, set: &str, dims: usize) {
        if let Ok(mut m) = self.known_dims.write() {
            m.insert(set.to_string(), dims);
        }
    }

    async fn dims_of(&self, set: &str) -> Result<Option<usize>> {
        if let Some(d) = self.cached_dims(set) {
            return Ok(Some(d));
        }
        Ok(self.describe_set(set).await?.map(|info| info.dimensions))
    }
}

#[async_trait]
impl DescriptorStore for ApertureDbStore {
    fn backend_name(&self) -> &str {
        "aperturedb"
    }

    async fn create_set(&self, spec: &SetSpec) -> Result<()> {
        if let Some(existing) = self.describe_set(&spec.name).await? {
            check_compatible(&existing, spec)?;
            return Ok(());
        }
        let results = self
            .execute(
                json!([{
                    "AddDescriptorSet": {
                        "name": spec.name,
                        "dimensions": spec.dimensions,
                        "engine": ENGINE_FLAT,
                        "metric": METRIC_IP,
                    }
                }]),
                Vec::new(),
            )
            .await?;
        command_body(&results[0], "AddDescriptorSet")?;
        self.remember_dims(&spec.name, spec.dimensions);
        tracing::info!(set = %spec.name, dims = spec.dimensions, "created descriptor set");
        Ok(())
    }

    async fn describe_set(&self, name: &str) -> Result<Option<SetInfo>> {
        let results = self
            .execute(
                json!([{
                    "FindDescriptorSet": {
                        "with_name": name,
                        "dimensions": true,
                        "metrics": true,
                        "engines": true,
                        "counts": true,
                        "results": { "all_properties": true },
                    }
                }]),
                Vec::new(),
            )
            .await?;
        let body = command_body(&results[0], "FindDescriptorSet")?;
        let info = parse_set_info(name, body)?;
        if let Some(info) = &info {
            self.remember_dims(name, info.dimensions);
        }
        Ok(info)
    }

    async fn add(
        &self,
        set: &str,
        embedding: &[f32],
        metadata: &DescriptorMetadata,
    ) -> Result<()> {
        let dims = self
            .dims_of(set)
            .await?
            .ok_or_else(|| StoreError::SetNotFound(set.to_string()))?;
        if embedding.len() != dims {
            return Err(StoreError::DimensionMismatch {
                set: set.to_string(),
                expected: dims,
                actual: embedding.len(),
            }
            .into());
        }

        let results = self
            .execute(
                json!([{
                    "AddDescriptor": {
                        "set": set,
                        "properties": metadata.to_properties(),
                    }
                }]),
                vec![vec_to_blob(embedding)],
            )
            .await?;
        command_body(&results[0], "AddDescriptor")?;
        Ok(())
    }

    async fn query(&self, set: &str, embedding: &[f32], k: usize) -> Result<Vec<Hit>> {
        let dims = match self.dims_of(set).await? {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        if embedding.len() != dims {
            return Err(StoreError::DimensionMismatch {
                set: set.to_string(),
                expected: dims,
                actual: embedding.len(),
            }
            .into());
        }

        let results = self
            .execute(
                json!([{
                    "FindDescriptor": {
                        "set": set,
                        "k_neighbors": k,
                        "distances": true,
                        "results": { "all_properties": true },
                    }
                }]),
                vec![vec_to_blob(embedding)],
            )
            .await?;
        let body = command_body(&results[0], "FindDescriptor")?;
        Ok(rank_hits(parse_hits(body)?, k))
    }
}

/// The `json` array of a response, checked to hold `expected` results.
fn command_results(body: &Value, expected: usize) -> Result<Vec<Value>> {
    let json = body
        .get("json")
        .ok_or_else(|| StoreError::Service("response has no json field".to_string()))?;

    // Whole-request failures come back as a single object
    if let Some(obj) = json.as_object() {
        return Err(StoreError::Service(failure_info(obj)).into());
    }

    let results = json
        .as_array()
        .ok_or_else(|| StoreError::Service("response json is not an array".to_string()))?;
    if results.len() != expected {
        bail!(StoreError::Service(format!(
            "expected {} command results, got {}",
            expected,
            results.len()
        )));
    }
    Ok(results.clone())
}

/// The body of one named command result, failing unless `status` is 0.
fn command_body<'a>(result: &'a Value, command: &str) -> Result<&'a Map<String, Value>> {
    let body = result
        .get(command)
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::Service(format!("missing {} result", command)))?;
    match body.get("status").and_then(Value::as_i64) {
        Some(0) | None => Ok(body),
        Some(_) => Err(StoreError::Service(format!("{} failed: {}", command, failure_info(body))).into()),
    }
}

fn failure_info(obj: &Map<String, Value>) -> String {
    let status = obj
        .get("status")
        .map(Value::to_string)
        .unwrap_or_else(|| "?".to_string());
    let info = obj
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("no details");
    format!("status {}: {}", status, info)
}

/// First string of a scalar-or-array field like `_metrics: ["IP"]`.
fn first_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn parse_set_info(name: &str, body: &Map<String, Value>) -> Result<Option<SetInfo>> {
    let entity = match body
        .get("entities")
        .and_then(Value::as_array)
        .and_then(|e| e.first())
    {
        Some(e) => e,
        None => return Ok(None),
    };

    let dimensions = entity
        .get("_dimensions")
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Service(format!("set '{}' reported no _dimensions", name)))?;

    Ok(Some(SetInfo {
        name: name.to_string(),
        dimensions: dimensions as usize,
        engine: first_str(entity.get("_engines")).unwrap_or_else(|| ENGINE_FLAT.to_string()),
        metric: first_str(entity.get("_metrics")).unwrap_or_else(|| METRIC_IP.to_string()),
        count: entity.get("_count").and_then(Value::as_u64),
    }))
}

fn parse_hits(body: &Map<String, Value>) -> Result<Vec<Hit>> {
    let entities = match body.get("entities").and_then(Value::as_array) {
        Some(e) => e,
        None => return Ok(Vec::new()),
    };

    entities
        .iter()
        .map(|entity| {
            let props = entity
                .as_object()
                .ok_or_else(|| StoreError::InvalidMetadata("entity is not an object".into()))?;
            let score = props
                .get("_distance")
                .and_then(Value::as_f64)
                .ok_or_else(|| StoreError::InvalidMetadata("entity has no _distance".into()))?;
            Ok(Hit {
                score: score as f32,
                metadata: DescriptorMetadata::from_properties(props)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_results_require_matching_count() {
        let body = json!({"json": [{"AddDescriptor": {"status": 0}}], "blobs": []});
        assert_eq!(command_results(&body, 1).unwrap().len(), 1);
        assert!(command_results(&body, 2).is_err());
    }

    #[test]
    fn request_level_failure_is_service_error() {
        let body = json!({"json": {"info": "Not Authenticated!", "status": -1}});
        let err = command_results(&body, 1).unwrap_err();
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::Service(msg)) => assert!(msg.contains("Not Authenticated!")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn nonzero_status_fails_command() {
        let result = json!({"AddDescriptorSet": {"status": 2, "info": "Object Exists!"}});
        let err = command_body(&result, "AddDescriptorSet").unwrap_err();
        assert!(err.to_string().contains("Object Exists!"));
        assert!(command_body(&result, "FindDescriptor").is_err());

        let ok = json!({"AddDescriptor": {"status": 0}});
        assert!(command_body(&ok, "AddDescriptor").is_ok());
    }

    #[test]
    fn set_info_from_find_descriptor_set() {
        let result = json!({"FindDescriptorSet": {
            "status": 0,
            "returned": 1,
            "entities": [{
                "_name": "pdf_instructions",
                "_dimensions": 384,
                "_metrics": ["IP"],
                "_engines": ["Flat"],
                "_count": 42
            }]
        }});
        let body = command_body(&result, "FindDescriptorSet").unwrap();
        let info = parse_set_info("pdf_instructions", body).unwrap().unwrap();
        assert_eq!(
            info,
            SetInfo {
                name: "pdf_instructions".to_string(),
                dimensions: 384,
                engine: "Flat".to_string(),
                metric: "IP".to_string(),
                count: Some(42),
            }
        );
    }

    #[test]
    fn missing_set_has_no_info() {
        let result = json!({"FindDescriptorSet": {"status": 0, "returned": 0}});
        let body = command_body(&result, "FindDescriptorSet").unwrap();
        assert!(parse_set_info("nope", body).unwrap().is_none());

        let empty = json!({"FindDescriptorSet": {"status": 0, "entities": []}});
        let body = command_body(&empty, "FindDescriptorSet").unwrap();
        assert!(parse_set_info("nope", body).unwrap().is_none());
    }

    #[test]
    fn hits_carry_distance_and_metadata() {
        let result = json!({"FindDescriptor": {
            "status": 0,
            "returned": 2,
            "entities": [
                {"_distance": 0.91, "pdf_name": "invite_team_member", "text": "Invite Team Member"},
                {"_distance": 0.42, "pdf_name": "create_organization", "image_index": 0}
            ]
        }});
        let body = command_body(&result, "FindDescriptor").unwrap();
        let hits = parse_hits(body).unwrap();
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - 0.91).abs() < 1e-6);
        assert_eq!(
            hits[0].metadata,
            DescriptorMetadata::text("invite_team_member", "Invite Team Member")
        );
        assert_eq!(
            hits[1].metadata,
            DescriptorMetadata::image("create_organization", 0)
        );
    }

    #[test]
    fn hit_without_payload_is_invalid() {
        let body = json!({"entities": [{"_distance": 0.5, "pdf_name": "x"}]});
        let err = parse_hits(body.as_object().unwrap()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn no_entities_means_no_hits() {
        let body = json!({"status": 0, "returned": 0});
        assert!(parse_hits(body.as_object().unwrap()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_fails_without_retries() {
        let config = ApertureDbConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            username: "admin".to_string(),
            password_env: "GUIDEX_TEST_ADB_PASSWORD".to_string(),
            use_ssl: false,
            timeout_secs: 2,
            max_retries: 0,
        };
        std::env::set_var("GUIDEX_TEST_ADB_PASSWORD", "secret");
        let store = ApertureDbStore::new(&config).unwrap();
        let err = store.describe_set("pdf_instructions").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Service(_))
        ));
    }
}
