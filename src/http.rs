use std::fmt;
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use url::form_urlencoded;

use crate::errors::{CloudShellError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A single request issued through [`HttpInvoker`]
#[derive(Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub body: Option<String>,
    pub content_type: Option<String>,
    pub bearer_token: Option<String>,
    /// Return the body of non-success responses instead of failing
    pub ignore_errors: bool,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("content_type", &self.content_type)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("ignore_errors", &self.ignore_errors)
            .finish()
    }
}

impl HttpRequest {
    pub fn new(method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            body: None,
            content_type: None,
            bearer_token: None,
            ignore_errors: false,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, uri)
    }

    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, uri)
    }

    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, uri)
    }

    /// Attach an `application/x-www-form-urlencoded` body
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in fields {
            serializer.append_pair(key, value);
        }
        self.body = Some(serializer.finish());
        self.content_type = Some("application/x-www-form-urlencoded".to_string());
        self
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = Some(serde_json::to_string(value)?);
        self.content_type = Some("application/json".to_string());
        Ok(self)
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    /// Decoded value of a query parameter, if present
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.uri.split_once('?')?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Decoded value of a form body field, if present
    pub fn form_field(&self, name: &str) -> Option<String> {
        let body = self.body.as_ref()?;
        form_urlencoded::parse(body.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Raw response: status code plus the fully read body text
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport that actually performs HTTP exchanges
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpTransport`] backed by a shared `reqwest` client
pub struct ReqwestTransport {
    http_client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let http_client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { http_client })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http_client.get(&request.uri),
            HttpMethod::Post => self.http_client.post(&request.uri),
            HttpMethod::Put => self.http_client.put(&request.uri),
            HttpMethod::Delete => self.http_client.delete(&request.uri),
        };

        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}

/// Authenticated request helper shared by every provisioning step
#[derive(Clone)]
pub struct HttpInvoker {
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for HttpInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpInvoker")
            .field("transport", &"<transport>")
            .finish()
    }
}

impl HttpInvoker {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Invoker backed by a real HTTP client with the given user agent
    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(ReqwestTransport::new(user_agent)?)))
    }

    /// Send the request and return the raw response body
    pub async fn send(&self, request: HttpRequest) -> Result<String> {
        let response = self.exchange(&request).await?;

        if !request.ignore_errors && !response.is_success() {
            return Err(CloudShellError::HttpRequestFailed {
                status: response.status,
                body: response.body,
            });
        }

        Ok(response.body)
    }

    /// Send the request and return status and body, whatever the status
    pub async fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse> {
        log::debug!("{} {}", request.method, request.uri);
        let response = self.transport.execute(request).await?;
        log::debug!(
            "{} {} -> {}",
            request.method,
            request.uri,
            response.status
        );
        Ok(response)
    }
}
