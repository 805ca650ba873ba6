use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::error::HttpError;

/// Upper bound on the request line plus headers. Requests are tiny here;
/// anything bigger is garbage or abuse.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Read chunk size for the framing loop.
const READ_CHUNK: usize = 8 * 1024;

const SERVER_NAME: &str = concat!("wavecast/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Other(s) => write!(f, "{s}"),
        }
    }
}

/// One parsed HTTP/1.1 request. Headers are consumed for framing only; the
/// dispatch logic cares about method, target and body alone.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub body: Bytes,
}

/// Read exactly one HTTP/1.1 request with a bounded body.
///
/// A `Content-Length` above `max_body_bytes` surfaces as
/// `HttpError::BodyTooLarge` before any body byte is read, so oversized
/// uploads cost the server nothing but the header read.
pub async fn read_request<S>(stream: &mut S, max_body_bytes: u64) -> Result<Request, HttpError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    // Accumulate until the blank line terminating the head.
    let head_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(HttpError::Malformed {
                reason: "request head too large".to_string(),
            });
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(HttpError::UnexpectedEof);
        }
    };

    let head = std::str::from_utf8(&buf[..head_end]).map_err(|_| HttpError::Malformed {
        reason: "request head is not valid UTF-8".to_string(),
    })?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) => (m, t, v),
        _ => {
            return Err(HttpError::Malformed {
                reason: format!("bad request line: {request_line:?}"),
            });
        }
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed {
            reason: format!("unsupported version: {version}"),
        });
    }

    let mut content_length: u64 = 0;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().map_err(|_| HttpError::Malformed {
                reason: format!("bad Content-Length: {value:?}"),
            })?;
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(HttpError::Malformed {
                reason: "transfer encodings are not supported".to_string(),
            });
        }
    }

    if content_length > max_body_bytes {
        return Err(HttpError::BodyTooLarge {
            length: content_length,
            limit: max_body_bytes,
        });
    }

    let method = Method::parse(method);
    let target = target.to_string();

    // Drop the head, keep whatever body bytes arrived with it.
    buf.advance(head_end + 4);

    let content_length = content_length as usize;
    while buf.len() < content_length {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(HttpError::UnexpectedEof);
        }
    }
    let body = buf.split_to(content_length).freeze();

    Ok(Request {
        method,
        target,
        body,
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// An HTTP/1.1 response under construction.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Plain-text response with a short message body.
    pub fn text(status: u16, message: impl Into<String>) -> Self {
        Self::new(status).with_body("text/plain", message.into().into_bytes())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = body;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes(),
        );
        out.extend_from_slice(format!("Server: {SERVER_NAME}\r\n").as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Serialize and write a response, flushing the stream.
pub async fn write_response<S>(stream: &mut S, response: &Response) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&response.encode()).await?;
    stream.flush().await
}
