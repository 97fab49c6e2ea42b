//! Generic JSON-over-HTTP provider.
//!
//! The remote API exposes one collection per resource type:
//!
//! - `POST   {endpoint}/resources/{type}`      body `{"attributes": {...}}`
//! - `PATCH  {endpoint}/resources/{type}/{id}` body `{"changes": {...}}`
//! - `DELETE {endpoint}/resources/{type}/{id}`
//!
//! Create and update answer with `{"id": "...", "outputs": {...}}`. Errors
//! answer with `{"code": "...", "message": "..."}`.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderError, Result, StratumError};

use super::capability::{Attributes, OperationContext, ProviderResponse, ResourceProvider};
use super::schema::ResourceSchema;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default wait when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// HTTP resource provider.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    endpoint: String,
    /// Optional bearer token.
    token: Option<String>,
    /// Served schemas by type.
    schemas: BTreeMap<String, ResourceSchema>,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    attributes: &'a Attributes,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    changes: &'a Attributes,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl HttpProvider {
    /// Creates a new HTTP provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
        schemas: impl IntoIterator<Item = ResourceSchema>,
    ) -> std::result::Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            schemas: schemas
                .into_iter()
                .map(|s| (s.resource_type.clone(), s))
                .collect(),
        })
    }

    /// Creates a provider from its document section, reading the token
    /// from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is missing, the token variable is
    /// unset, or the client cannot be built.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            StratumError::Config(ConfigError::validation(
                format!("http provider '{}' needs an endpoint", config.name),
                format!("providers.{}.endpoint", config.name),
            ))
        })?;

        let token = match &config.token_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                StratumError::Config(ConfigError::MissingEnvVar { name: var.clone() })
            })?),
            None => None,
        };

        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        Ok(Self::new(endpoint, token, timeout, config.resources.clone())?)
    }

    fn collection_url(&self, resource_type: &str) -> String {
        format!("{}/resources/{resource_type}", self.endpoint)
    }

    fn object_url(&self, resource_type: &str, provider_id: &str) -> String {
        format!("{}/resources/{resource_type}/{provider_id}", self.endpoint)
    }

    /// Sends a request, mapping transport and status failures.
    async fn send(
        &self,
        ctx: &OperationContext,
        request: RequestBuilder,
    ) -> std::result::Result<Response, ProviderError> {
        // Requests already on the wire are allowed to finish so the remote
        // side effect is never lost; cancellation only stops new requests.
        if ctx.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let request = match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        };

        trace!("Sending provider request for {} (attempt {})", ctx.resource, ctx.attempt);

        let response = request
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        Err(classify_failure(status, retry_after, &body))
    }

    async fn parse_response(response: Response) -> std::result::Result<ProviderResponse, ProviderError> {
        response.json().await.map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }

    fn ensure_served(&self, resource_type: &str) -> std::result::Result<(), ProviderError> {
        if self.schemas.contains_key(resource_type) {
            Ok(())
        } else {
            Err(ProviderError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })
        }
    }
}

/// Maps a non-success HTTP answer onto the provider error taxonomy.
fn classify_failure(status: StatusCode, retry_after: Option<u64>, body: &str) -> ProviderError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| body.to_string());

    match status.as_u16() {
        429 => ProviderError::Throttled {
            retry_after_secs: retry_after
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => ProviderError::Authentication { message },
        404 => ProviderError::NotFound {
            provider_id: message,
        },
        code if status.is_server_error() => ProviderError::Unavailable {
            status: code,
            message,
        },
        code => {
            let error_code = parsed
                .and_then(|b| b.code)
                .unwrap_or_else(|| format!("HTTP_{code}"));
            ProviderError::api(error_code, message)
        }
    }
}

#[async_trait]
impl ResourceProvider for HttpProvider {
    fn schemas(&self) -> Vec<ResourceSchema> {
        self.schemas.values().cloned().collect()
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        attributes: &Attributes,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.ensure_served(ctx.resource_type())?;
        debug!("POST {} for {}", self.collection_url(ctx.resource_type()), ctx.resource);

        let request = self
            .client
            .post(self.collection_url(ctx.resource_type()))
            .json(&CreateBody { attributes });
        let response = self.send(ctx, request).await?;
        Self::parse_response(response).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        provider_id: &str,
        changes: &Attributes,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.ensure_served(ctx.resource_type())?;
        let url = self.object_url(ctx.resource_type(), provider_id);
        debug!("PATCH {url} for {}", ctx.resource);

        let request = self.client.patch(url).json(&UpdateBody { changes });
        let response = self.send(ctx, request).await?;
        Self::parse_response(response).await
    }

    async fn destroy(
        &self,
        ctx: &OperationContext,
        provider_id: &str,
    ) -> std::result::Result<(), ProviderError> {
        self.ensure_served(ctx.resource_type())?;
        let url = self.object_url(ctx.resource_type(), provider_id);
        debug!("DELETE {url} for {}", ctx.resource);

        match self.send(ctx, self.client.delete(url)).await {
            Ok(_) => Ok(()),
            Err(ProviderError::NotFound { .. }) => Err(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;
    use crate::graph::ResourceId;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, token: Option<&str>) -> HttpProvider {
        HttpProvider::new(
            &server.uri(),
            token.map(String::from),
            Duration::from_secs(5),
            [ResourceSchema::new("table").required("hash_key").output("arn")],
        )
        .expect("client builds")
    }

    fn ctx() -> OperationContext {
        OperationContext::new(ResourceId::new("table", "sessions"), CancelSignal::new())
    }

    #[tokio::test]
    async fn test_create_posts_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources/table"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({ "attributes": { "hash_key": "pk" } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "tbl-1",
                "outputs": { "arn": "arn:table/tbl-1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut attributes = Attributes::new();
        attributes.insert(String::from("hash_key"), json!("pk"));

        let response = provider(&server, Some("secret"))
            .create(&ctx(), &attributes)
            .await
            .expect("create succeeds");

        assert_eq!(response.id, "tbl-1");
        assert_eq!(response.outputs.get("arn"), Some(&json!("arn:table/tbl-1")));
    }

    #[tokio::test]
    async fn test_update_patches_changes() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/resources/table/tbl-1"))
            .and(body_json(json!({ "changes": { "billing": "on-demand" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "tbl-1" })))
            .mount(&server)
            .await;

        let mut changes = Attributes::new();
        changes.insert(String::from("billing"), json!("on-demand"));

        let response = provider(&server, None)
            .update(&ctx(), "tbl-1", &changes)
            .await
            .expect("update succeeds");
        assert_eq!(response.id, "tbl-1");
        assert!(response.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resources/table/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/resources/table/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/resources/table/locked"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "ResourceInUse",
                "message": "table is in use"
            })))
            .mount(&server)
            .await;

        let provider = provider(&server, None);

        let gone = provider.destroy(&ctx(), "gone").await.expect_err("404");
        assert_eq!(gone, ProviderError::NotFound { provider_id: String::from("gone") });

        let busy = provider.destroy(&ctx(), "busy").await.expect_err("429");
        assert_eq!(busy, ProviderError::Throttled { retry_after_secs: 7 });

        let locked = provider.destroy(&ctx(), "locked").await.expect_err("409");
        assert_eq!(locked, ProviderError::api("ResourceInUse", "table is in use"));
    }

    #[test]
    fn test_classify_server_error() {
        let err = classify_failure(StatusCode::BAD_GATEWAY, None, "upstream down");
        assert!(err.is_transient());
        let auth = classify_failure(StatusCode::UNAUTHORIZED, None, "");
        assert!(matches!(auth, ProviderError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let server = MockServer::start().await;
        let ctx = ctx();
        ctx.cancel.cancel();

        let err = provider(&server, None)
            .create(&ctx, &Attributes::new())
            .await
            .expect_err("cancelled");
        assert_eq!(err, ProviderError::Cancelled);
    }
}
