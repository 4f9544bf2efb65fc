//! Transport-independent request and response model
//!
//! Handlers mutate [`Request`]s and inspect [`Response`]s without touching
//! the concrete HTTP client; the terminal transport translates to and from
//! its own wire types. Requests are cheaply cloneable so retrying handlers
//! and retry policies can resend them.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use outrigger_core::error::{PipelineError, PipelineResult};

/// Per-request timeout directive
///
/// `Inherit` picks up the pipeline default at send time; `Unbounded`
/// disables the bound entirely, so no timer is created for the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutDirective {
    #[default]
    Inherit,
    Unbounded,
    Bound(Duration),
}

/// An outbound request flowing down the handler chain
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    pub timeout: TimeoutDirective,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: Vec::new(), body: None, timeout: TimeoutDirective::default() }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Set a header, replacing any existing value under the same
    /// (case-insensitive) name
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Builder-style counterpart of [`Request::set_header`]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Builder-style timeout directive
    pub fn with_timeout(mut self, timeout: TimeoutDirective) -> Self {
        self.timeout = timeout;
        self
    }

    /// First header value under `name`, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All headers in insertion order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Attach a raw body
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a JSON body, setting the content type
    pub fn with_json<T: Serialize>(mut self, value: &T) -> PipelineResult<Self> {
        self.body = Some(serde_json::to_vec(value)?);
        self.set_header("content-type", "application/json");
        Ok(self)
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// A response surfaced back up the handler chain
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        serde_json::from_slice(&self.body).map_err(PipelineError::from)
    }

    /// The body as UTF-8 text (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://api.example.test/items").expect("valid url")
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut request = Request::get(url());
        request.set_header("Authorization", "Bearer old");
        request.set_header("authorization", "Bearer new");

        assert_eq!(request.header("AUTHORIZATION"), Some("Bearer new"));
        assert_eq!(request.headers().len(), 1);
    }

    #[test]
    fn json_body_sets_content_type() {
        let request = Request::post(url())
            .with_json(&serde_json::json!({"name": "widget"}))
            .expect("serializable");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert!(request.body().is_some());
    }

    #[test]
    fn timeout_directive_defaults_to_inherit() {
        assert_eq!(Request::get(url()).timeout, TimeoutDirective::Inherit);
    }

    #[test]
    fn response_json_round_trip() {
        let response = Response::new(200).with_body(br#"{"id": 7}"#.to_vec());
        let value: serde_json::Value = response.json().expect("valid json");
        assert_eq!(value["id"], 7);
        assert!(response.is_success());
    }

    #[test]
    fn unauthorized_detection() {
        assert!(Response::new(401).is_unauthorized());
        assert!(!Response::new(403).is_unauthorized());
    }
}
