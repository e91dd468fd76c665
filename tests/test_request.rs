use warden::http::request::{Method, Request, RequestBuilder};
use std::collections::HashMap;

fn request_with(version: &str, headers: &[(&str, &str)]) -> Request {
    Request {
        method: Method::GET,
        target: "http://example.com/".to_string(),
        version: version.to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: vec![],
    }
}

#[test]
fn test_request_header_retrieval() {
    let req = request_with(
        "HTTP/1.1",
        &[("Host", "example.com"), ("Content-Type", "application/json")],
    );

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("Content-Type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_header_lookup_ignores_case() {
    let req = request_with("HTTP/1.1", &[("proxy-connection", "close")]);

    assert_eq!(req.header("Proxy-Connection"), Some("close"));
}

#[test]
fn test_request_content_length_parsing() {
    let req = request_with("HTTP/1.1", &[("Content-Length", "42")]);
    assert_eq!(req.content_length(), 42);
}

#[test]
fn test_request_content_length_missing_or_invalid() {
    assert_eq!(request_with("HTTP/1.1", &[]).content_length(), 0);
    assert_eq!(
        request_with("HTTP/1.1", &[("Content-Length", "not-a-number")]).content_length(),
        0
    );
}

#[test]
fn test_request_keep_alive_http11_default() {
    // HTTP/1.1 defaults to keep-alive
    assert!(request_with("HTTP/1.1", &[]).keep_alive());
}

#[test]
fn test_request_keep_alive_http10_default() {
    assert!(!request_with("HTTP/1.0", &[]).keep_alive());
    assert!(request_with("HTTP/1.0", &[("Connection", "keep-alive")]).keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    assert!(!request_with("HTTP/1.1", &[("Connection", "close")]).keep_alive());
    assert!(!request_with("HTTP/1.1", &[("Connection", "Close")]).keep_alive());
}

#[test]
fn test_request_keep_alive_proxy_connection() {
    assert!(!request_with("HTTP/1.1", &[("Proxy-Connection", "close")]).keep_alive());
    // Connection takes precedence
    assert!(request_with(
        "HTTP/1.1",
        &[("Connection", "keep-alive"), ("Proxy-Connection", "close")]
    )
    .keep_alive());
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("CONNECT"), Some(Method::CONNECT));
    assert_eq!(Method::from_str("TRACE"), Some(Method::TRACE));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
}

#[test]
fn test_request_method_as_str_matches_parse() {
    for method in [Method::GET, Method::POST, Method::HEAD, Method::CONNECT, Method::PATCH] {
        assert_eq!(Method::from_str(method.as_str()), Some(method));
    }
}

#[test]
fn test_request_builder_defaults_version() {
    let req = RequestBuilder::new()
        .method(Method::CONNECT)
        .target("example.com:443")
        .build()
        .unwrap();

    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.target, "example.com:443");
    assert!(req.headers.is_empty());
}

#[test]
fn test_request_builder_requires_method_and_target() {
    assert!(RequestBuilder::new().target("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}

#[test]
fn test_request_with_body() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .target("http://example.com/api")
        .body(b"test body content".to_vec())
        .build()
        .unwrap();

    assert_eq!(req.body, b"test body content".to_vec());
    assert_eq!(req.headers, HashMap::new());
}
