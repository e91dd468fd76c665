use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::Method;
use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes `resp` as the answer to a `method` request.
///
/// The head is always written in full. The body is left off for HEAD
/// requests and bodiless statuses, so `Content-Length` may describe bytes
/// that are never sent.
pub fn serialize_response(resp: &Response, method: Method) -> Vec<u8> {
    let send_body = method != Method::HEAD && !resp.status.is_bodiless();
    let body: &[u8] = if send_body { &resp.body } else { &[] };

    let mut buf = Vec::with_capacity(256 + body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf.extend_from_slice(body);

    buf
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response, method: Method) -> Self {
        Self {
            buffer: serialize_response(response, method),
            written: 0,
        }
    }

    pub async fn write_to_stream<S>(&mut self, stream: &mut S) -> anyhow::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        while self.written < self.buffer.len() {
            let n = stream
                .write(&self.buffer[self.written..])
                .await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }

        stream.flush().await?;
        Ok(())
    }
}
