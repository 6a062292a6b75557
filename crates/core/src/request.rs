//! Request and response values exchanged with the hosting application.
//!
//! Bodies are opaque [`Bytes`]; the proxy never looks inside them.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// How the host issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Script,
    Style,
    Font,
    Image,
    Audio,
    Video,
    Manifest,
    /// Plain data request (fetch/XHR).
    #[default]
    Empty,
}

impl std::str::FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "document" => Ok(Self::Document),
            "script" => Ok(Self::Script),
            "style" => Ok(Self::Style),
            "font" => Ok(Self::Font),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "manifest" => Ok(Self::Manifest),
            "" | "empty" => Ok(Self::Empty),
            other => Err(format!("unknown destination: {other}")),
        }
    }
}

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub destination: Destination,
    pub headers: HeaderMap,
}

impl ProxyRequest {
    /// A plain GET data request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            mode: RequestMode::default(),
            destination: Destination::default(),
            headers: HeaderMap::new(),
        }
    }

    /// A top-level navigation to `url`.
    pub fn navigate(url: Url) -> Self {
        Self { mode: RequestMode::Navigate, destination: Destination::Document, ..Self::get(url) }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Only GET requests may ever touch the store.
    pub fn is_cacheable_method(&self) -> bool {
        self.method == Method::GET
    }
}

/// Where a response handed back to the host came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
}

/// A response handed back to the host.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl ProxyResponse {
    /// A network response with the given status and body.
    pub fn from_network(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body, source: ResponseSource::Network }
    }

    /// Responses are written back only for an exact 200.
    pub fn is_storable(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn is_from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_navigate_request() {
        let req = ProxyRequest::navigate(url("https://app.example.com/"));
        assert_eq!(req.mode, RequestMode::Navigate);
        assert_eq!(req.destination, Destination::Document);
        assert!(req.is_cacheable_method());
    }

    #[test]
    fn test_post_not_cacheable() {
        let req = ProxyRequest::new(Method::POST, url("https://api.example.com/rows"));
        assert!(!req.is_cacheable_method());
    }

    #[test]
    fn test_only_exact_200_is_storable() {
        let ok = ProxyResponse::from_network(StatusCode::OK, HeaderMap::new(), Bytes::new());
        let created = ProxyResponse::from_network(StatusCode::CREATED, HeaderMap::new(), Bytes::new());
        let redirect = ProxyResponse::from_network(StatusCode::FOUND, HeaderMap::new(), Bytes::new());
        assert!(ok.is_storable());
        assert!(!created.is_storable());
        assert!(!redirect.is_storable());
    }

    #[test]
    fn test_destination_from_str() {
        assert_eq!("Style".parse::<Destination>().unwrap(), Destination::Style);
        assert_eq!("".parse::<Destination>().unwrap(), Destination::Empty);
        assert!("spreadsheet".parse::<Destination>().is_err());
    }
}
