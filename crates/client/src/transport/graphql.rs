//! Helpdesk GraphQL API client.
//!
//! Uses `graphql_client` envelopes with `reqwest` 0.13 for HTTP. Read-models
//! are cached in `moka` until they expire or are invalidated.
//!
//! Every invalidation bumps an epoch. A read records the epoch of its model
//! before going to the network and only fills the cache if no invalidation
//! happened in between, so a read that raced a mutation never puts the
//! pre-mutation value back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use deskline_core::{Credential, Identity};
use graphql_client::{QueryBody, Response};
use moka::future::Cache;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, instrument};

use super::documents::{document_for_mutation, document_for_read_model};
use super::{
    GraphQLError, Mutation, MutationResponse, ReadModel, Transport, TransportError,
};
use crate::config::ClientConfig;

const MAX_CACHED_MODELS: u64 = 1000;

// =============================================================================
// GraphqlTransport
// =============================================================================

/// Client for the helpdesk GraphQL API.
#[derive(Clone)]
pub struct GraphqlTransport {
    inner: Arc<GraphqlTransportInner>,
}

struct GraphqlTransportInner {
    client: reqwest::Client,
    endpoint: String,
    cache: Cache<ReadModel, Value>,
    epochs: Mutex<Epochs>,
}

/// Invalidation counters.
#[derive(Debug, Default)]
struct Epochs {
    all: u64,
    models: HashMap<ReadModel, u64>,
}

/// Point in a read-model's invalidation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Epoch {
    all: u64,
    model: u64,
}

impl Epochs {
    fn of(&self, model: &ReadModel) -> Epoch {
        Epoch {
            all: self.all,
            model: self.models.get(model).copied().unwrap_or(0),
        }
    }
}

impl GraphqlTransport {
    /// Create a new API client.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_MODELS)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            inner: Arc::new(GraphqlTransportInner {
                client: reqwest::Client::new(),
                endpoint: config.api_url.clone(),
                cache,
                epochs: Mutex::new(Epochs::default()),
            }),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    fn epochs(&self) -> std::sync::MutexGuard<'_, Epochs> {
        self.inner
            .epochs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch(&self, model: &ReadModel) -> Epoch {
        self.epochs().of(model)
    }

    /// Cache `value` for `model` unless the model was invalidated since
    /// `epoch`.
    async fn fill(&self, model: &ReadModel, epoch: Epoch, value: Value) {
        if self.epoch(model) != epoch {
            debug!(model = %model, "Read-model invalidated during fetch, not caching");
            return;
        }

        self.inner.cache.insert(model.clone(), value).await;

        // An invalidation that landed during the insert wins
        if self.epoch(model) != epoch {
            self.inner.cache.invalidate(model).await;
        }
    }

    /// Execute a JSON-encoded GraphQL request and return its `data`.
    async fn execute(
        &self,
        credential: Option<&Credential>,
        body: &QueryBody<Value>,
    ) -> Result<Value, TransportError> {
        let mut request = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .header("Content-Type", "application/json")
            .header("X-Operation-Name", body.operation_name)
            .json(body);
        if let Some(credential) = credential {
            request = request.bearer_auth(credential.expose_token());
        }

        self.handle_response(request.send().await?).await
    }

    /// Execute a GraphQL multipart request carrying `files` in upload order.
    async fn execute_multipart(
        &self,
        credential: Option<&Credential>,
        body: &QueryBody<Value>,
        files: Vec<Part>,
    ) -> Result<Value, TransportError> {
        let map: serde_json::Map<String, Value> = (0..files.len())
            .map(|index| {
                (
                    index.to_string(),
                    Value::Array(vec![Value::String(format!(
                        "variables.attachments.{index}"
                    ))]),
                )
            })
            .collect();

        let mut form = Form::new()
            .text("operations", serde_json::to_string(body)?)
            .text("map", serde_json::to_string(&map)?);
        for (index, part) in files.into_iter().enumerate() {
            form = form.part(index.to_string(), part);
        }

        let mut request = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .header("X-Operation-Name", body.operation_name)
            .multipart(form);
        if let Some(credential) = credential {
            request = request.bearer_auth(credential.expose_token());
        }

        self.handle_response(request.send().await?).await
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<Value, TransportError> {
        let status = response.status();

        // Check for rate limiting
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(TransportError::RateLimited(retry_after));
        }

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() {
            // Auth rejections are routine; anything else is worth an error log
            if matches!(status.as_u16(), 401 | 403) {
                debug!(status = %status, "Helpdesk API rejected credential");
            } else {
                tracing::error!(
                    status = %status,
                    body = %response_text.chars().take(500).collect::<String>(),
                    endpoint = %self.inner.endpoint,
                    "Helpdesk API returned non-success status"
                );
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response_text.chars().take(200).collect(),
            });
        }

        let response: Response<Value> = match serde_json::from_str(&response_text) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    body = %response_text.chars().take(500).collect::<String>(),
                    "Failed to parse helpdesk GraphQL response"
                );
                return Err(TransportError::Parse(e));
            }
        };

        // Check for GraphQL errors
        if let Some(errors) = response.errors
            && !errors.is_empty()
        {
            debug!(errors = ?errors, "GraphQL errors in response");
            return Err(TransportError::GraphQL(
                errors.into_iter().map(GraphQLError::from).collect(),
            ));
        }

        response.data.ok_or_else(|| {
            tracing::error!(
                body = %response_text.chars().take(500).collect::<String>(),
                "Helpdesk GraphQL response has no data and no errors"
            );
            TransportError::EmptyResponse
        })
    }

    async fn upload_parts(mutation: &Mutation) -> Result<Vec<Part>, TransportError> {
        let Mutation::CreateTicket(ticket) = mutation else {
            return Ok(Vec::new());
        };

        let mut parts = Vec::with_capacity(ticket.attachments.len());
        for attachment in &ticket.attachments {
            let bytes = attachment
                .read_bytes()
                .await
                .map_err(|source| TransportError::Attachment {
                    name: attachment.name.clone(),
                    source,
                })?;
            let part = Part::bytes(bytes)
                .file_name(attachment.name.clone())
                .mime_str(&attachment.mime_type)?;
            parts.push(part);
        }
        Ok(parts)
    }
}

impl Transport for GraphqlTransport {
    #[instrument(skip(self, credential))]
    async fn fetch_identity(&self, credential: &Credential) -> Result<Identity, TransportError> {
        let body = document_for_read_model(&ReadModel::CurrentUser);
        let mut data = self.execute(Some(credential), &body).await?;

        match data.get_mut(ReadModel::CurrentUser.response_field()).map(Value::take) {
            Some(Value::Null) | None => Err(TransportError::Unauthenticated),
            Some(user) => Ok(serde_json::from_value(user)?),
        }
    }

    #[instrument(skip(self, credential), fields(model = %model))]
    async fn query(
        &self,
        credential: Option<&Credential>,
        model: &ReadModel,
    ) -> Result<Value, TransportError> {
        // Check cache
        if let Some(value) = self.inner.cache.get(model).await {
            debug!("Cache hit for read-model");
            return Ok(value);
        }

        let epoch = self.epoch(model);
        let body = document_for_read_model(model);
        let mut data = self.execute(credential, &body).await?;
        let value = data
            .get_mut(model.response_field())
            .map(Value::take)
            .unwrap_or(Value::Null);

        self.fill(model, epoch, value.clone()).await;

        Ok(value)
    }

    #[instrument(skip(self, credential, mutation), fields(kind = %mutation.kind()))]
    async fn mutate(
        &self,
        credential: Option<&Credential>,
        mutation: &Mutation,
    ) -> Result<MutationResponse, TransportError> {
        let body = document_for_mutation(mutation);
        let parts = Self::upload_parts(mutation).await?;

        let mut data = if parts.is_empty() {
            self.execute(credential, &body).await?
        } else {
            self.execute_multipart(credential, &body, parts).await?
        };

        let kind = mutation.kind();
        let payload = data
            .get_mut(kind.response_field())
            .map(Value::take)
            .unwrap_or(Value::Null);

        Ok(MutationResponse::new(kind, payload))
    }

    async fn invalidate(&self, model: &ReadModel) {
        debug!(model = %model, "Invalidating read-model");
        *self.epochs().models.entry(model.clone()).or_default() += 1;
        self.inner.cache.invalidate(model).await;
    }

    async fn invalidate_all(&self) {
        debug!("Invalidating all read-models");
        self.epochs().all += 1;
        self.inner.cache.invalidate_all();
    }
}

impl std::fmt::Debug for GraphqlTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlTransport")
            .field("endpoint", &self.inner.endpoint)
            .field("cached_models", &self.inner.cache.entry_count())
            .finish()
    }
}
