//! HTTP transport for the JSON:API backend.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use tracing::{debug, trace};

use crate::{ApiError, Document, HttpConfig, QueryParams};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Whether the method modifies backend state.
    pub fn is_write(self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Something that can execute requests against the backend.
///
/// Implementations must not retry on their own: retrying is left to the
/// caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a document.
    async fn get(&self, endpoint: &str, query: &QueryParams) -> Result<Document, ApiError>;

    /// Send a write request with an optional JSON body.
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Document, ApiError>;
}

/// [`Transport`] backed by a reqwest client.
pub struct HttpTransport {
    http: Client,
    config: HttpConfig,
}

impl HttpTransport {
    /// Build a transport with the timeouts of the given config.
    pub fn new(config: HttpConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { http, config })
    }

    pub fn api_root(&self) -> &str {
        &self.config.api_root
    }

    /// Resolve an endpoint against the API root. Absolute URLs pass through.
    pub fn url(&self, endpoint: &str) -> Result<Url, ApiError> {
        let raw = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.api_root.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )
        };
        Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method.into(), url)
            .header(ACCEPT, "application/json");

        match &self.config.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn handle_response(response: reqwest::Response) -> Result<Document, ApiError> {
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            if let Ok(body) = serde_json::from_slice::<Value>(&bytes) {
                if body.get("errors").is_some() {
                    return Err(ApiError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
            }

            return Err(ApiError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(Document::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, endpoint: &str, query: &QueryParams) -> Result<Document, ApiError> {
        let url = self.url(endpoint)?;
        debug!(url = %url, query = %query.canonical(), "fetching");

        let response = self
            .request(Method::Get, url)
            .query(&query.to_pairs())
            .send()
            .await?;

        let document = Self::handle_response(response).await?;
        trace!(endpoint = %endpoint, resources = document.resources().count(), "fetched");
        Ok(document)
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Document, ApiError> {
        let url = self.url(endpoint)?;
        debug!(method = %method, url = %url, "sending");

        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::{PrimaryData, ResourceKey};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(HttpConfig::new(format!("{}/web_api/v1", server.uri())))
            .expect("transport builds")
    }

    #[test]
    fn test_url_resolution() {
        let transport = HttpTransport::new(HttpConfig::new("https://demo.example.org/web_api/v1/"))
            .expect("transport builds");
        assert_eq!(
            transport.url("/ideas/1").unwrap().as_str(),
            "https://demo.example.org/web_api/v1/ideas/1"
        );
        assert_eq!(
            transport.url("https://other.example.org/x").unwrap().as_str(),
            "https://other.example.org/x"
        );
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Patch.to_string(), "PATCH");
        assert!(Method::Delete.is_write());
        assert!(!Method::Get.is_write());
    }

    #[tokio::test]
    async fn test_get_sends_query_and_parses_document() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/web_api/v1/ideas"))
            .and(query_param("page[number]", "1"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"type": "idea", "id": "1", "attributes": {"title": "X"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let doc = transport(&server)
            .get("/ideas", &QueryParams::new().with("page[number]", 1))
            .await
            .unwrap();

        assert_eq!(doc.resource_keys(), vec![ResourceKey::new("idea", "1")]);
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/web_api/v1/users/me"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(
            HttpConfig::new(format!("{}/web_api/v1", server.uri())).with_bearer_token("secret"),
        )
        .unwrap();
        let doc = transport.get("/users/me", &QueryParams::new()).await.unwrap();
        assert_eq!(doc.data, PrimaryData::Null);
    }

    #[tokio::test]
    async fn test_send_with_body_and_empty_response() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/web_api/v1/ideas/42"))
            .and(body_json(json!({"idea": {"title_multiloc": {"en": "Y"}}})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let body = json!({"idea": {"title_multiloc": {"en": "Y"}}});
        let doc = transport(&server)
            .send(Method::Patch, "/ideas/42", Some(&body))
            .await
            .unwrap();
        assert_eq!(doc, Document::empty());
    }

    #[tokio::test]
    async fn test_structured_error_is_surfaced_verbatim() {
        let server = MockServer::start().await;
        let errors = json!({"errors": [{"field": "title_multiloc", "error": "blank"}]});

        Mock::given(method("POST"))
            .and(path("/web_api/v1/ideas"))
            .respond_with(ResponseTemplate::new(422).set_body_json(errors.clone()))
            .mount(&server)
            .await;

        let err = transport(&server)
            .send(Method::Post, "/ideas", Some(&json!({"idea": {}})))
            .await
            .unwrap_err();

        match err {
            ApiError::Api { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, errors);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unstructured_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/web_api/v1/ideas"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .get("/ideas", &QueryParams::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(matches!(err, ApiError::Status { .. }));
    }

    #[tokio::test]
    async fn test_network_error() {
        let transport = HttpTransport::new(HttpConfig::new("http://127.0.0.1:1/web_api/v1")).unwrap();
        let err = transport.get("/ideas", &QueryParams::new()).await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_invalid_document() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/web_api/v1/ideas"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .get("/ideas", &QueryParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidDocument(_)));
    }
}
