use crate::http::chunked::{decode_chunked, ChunkError};
use crate::http::request::{Method, Request};
use std::collections::HashMap;

/// Largest header block accepted from a client.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunkedBody,
    HeadersTooLarge,
    Incomplete,
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {

    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest);
    let mut parts = request_line?.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    // Headers, last value wins on repeats
    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;

        headers.insert(
           key.trim().to_string(),
           value.trim().to_string(),
        );
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    };

    // Body
    let chunked = header("Transfer-Encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    let (body, body_consumed) = if chunked {
        decode_chunked(body_bytes).map_err(|e| match e {
            ChunkError::Incomplete => ParseError::Incomplete,
            ChunkError::Invalid => ParseError::InvalidChunkedBody,
        })?
    } else {
        let content_length = header("Content-Length")
            .map(|v| v.trim().parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
            .transpose()?
            .unwrap_or(0);

        if body_bytes.len() < content_length {
            return Err(ParseError::Incomplete);
        }

        (body_bytes[..content_length].to_vec(), content_length)
    };

    let mut request = Request {
        method,
        target: target.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    // The body is now materialised; re-frame it with a plain length.
    if chunked {
        request.headers.retain(|k, _| !k.eq_ignore_ascii_case("Transfer-Encoding"));
        request
            .headers
            .insert("Content-Length".to_string(), request.body.len().to_string());
    }

    let total_consumed = headers_end + 4 + body_consumed;
    Ok((request, total_consumed))

}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_absolute_form_get() {
        let req = b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.target, "http://example.com/");
        assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn parse_chunked_body_reframes_with_length() {
        let req = b"POST http://example.com/up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.body, b"abc");
        assert_eq!(parsed.header("Content-Length"), Some("3"));
        assert_eq!(parsed.header("Transfer-Encoding"), None);
        assert_eq!(consumed, req.len());
    }
}
