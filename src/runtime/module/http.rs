//! Outbound HTTP requests.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;

use super::Module;
use crate::runtime::context::HeaderMultiMap;
use crate::runtime::error::RuntimeError;

/// Methods accepted by [`Module::http_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    fn to_reqwest(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Head => Method::HEAD,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "patch" => Ok(HttpMethod::Patch),
            "delete" => Ok(HttpMethod::Delete),
            "head" => Ok(HttpMethod::Head),
            _ => Err(RuntimeError::invalid_argument(format!(
                "unsupported HTTP method: {s}"
            ))),
        }
    }
}

/// Response returned to scripts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpResponse {
    pub code: u16,
    pub headers: HeaderMultiMap,
    pub body: String,
}

impl Module {
    /// Perform an HTTP request.
    ///
    /// Non-2xx responses are returned normally. A timeout is
    /// `DEADLINE_EXCEEDED`; any other transport failure is `UNAVAILABLE`.
    pub async fn http_request(
        &self,
        url: &str,
        method: HttpMethod,
        headers: &HashMap<String, String>,
        body: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, RuntimeError> {
        let url = url::Url::parse(url)
            .map_err(|e| RuntimeError::invalid_argument(format!("invalid url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RuntimeError::invalid_argument(format!(
                "unsupported url scheme: {}",
                url.scheme()
            )));
        }

        let mut request = self
            .http
            .request(method.to_reqwest(), url)
            .timeout(timeout.unwrap_or(self.http_timeout));
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(transport_error)?;

        let code = response.status().as_u16();
        let mut response_headers = HeaderMultiMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers.append(name.as_str(), value);
            }
        }
        let body = response.text().await.map_err(transport_error)?;

        Ok(HttpResponse {
            code,
            headers: response_headers,
            body,
        })
    }
}

fn transport_error(e: reqwest::Error) -> RuntimeError {
    if e.is_timeout() {
        RuntimeError::deadline_exceeded(format!("HTTP request timed out: {e}"))
    } else if e.is_builder() {
        RuntimeError::invalid_argument(format!("invalid HTTP request: {e}"))
    } else {
        RuntimeError::unavailable(format!("HTTP request failed: {e}"))
    }
}
