use crate::date::http_date_now;
use crate::error::{ServerError, ServerResult};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::{self, FromStr};

/// Protocol version written on every status line
pub const HTTP_VERSION: &str = "HTTP/1.0";

/// HTTP Status Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 200,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
}

impl Status {
    /// Numeric status code
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the reason phrase for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Ok => "OK",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.as_str())
    }
}

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

impl Method {
    /// Convert the method to a string
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
        }
    }
}

impl FromStr for Method {
    type Err = ServerError;

    fn from_str(s: &str) -> ServerResult<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            _ => Err(ServerError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// URL-decoded path, always starting with `/`
    pub path: String,
    pub version: String,
    pub query_string: Option<String>,
}

/// Request-line parser.
///
/// Only the first line of the request head is inspected; headers are
/// accepted but ignored.
pub struct HttpParser;

impl HttpParser {
    /// Parse the raw bytes preceding the `CRLFCRLF` terminator
    pub fn parse_bytes(head: &[u8]) -> ServerResult<Request> {
        let head = str::from_utf8(head)
            .map_err(|_| ServerError::MalformedRequest("Invalid UTF-8".to_string()))?;
        Self::parse(head)
    }

    /// Parse a decoded request head into a `Request`
    pub fn parse(head: &str) -> ServerResult<Request> {
        let line = head.split("\r\n").next().unwrap_or("");
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ServerError::MalformedRequest(format!(
                "Expected 3 tokens in request line, got {}",
                parts.len()
            )));
        }

        let method = parts[0].parse::<Method>()?;
        let target = percent_decode_str(parts[1]).decode_utf8_lossy();

        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.into_owned(), None),
        };

        // Origin-form targets without a leading slash are anchored at the root
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        Ok(Request {
            method,
            path,
            version: parts[2].to_string(),
            query_string,
        })
    }
}

/// HTTP Response
///
/// Headers are kept in emission order: `Date`, `Server`, `Content-Length`,
/// `Content-Type`, `Connection`.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Response {
    fn assemble(
        status: Status,
        server_name: &str,
        content_length: Option<u64>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Self {
        let candidates = [
            ("Date", Some(http_date_now())),
            ("Server", Some(server_name.to_string())),
            ("Content-Length", content_length.map(|len| len.to_string())),
            ("Content-Type", content_type.map(str::to_string)),
            ("Connection", Some("close".to_string())),
        ];

        let headers = candidates
            .into_iter()
            .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v)))
            .collect();

        Self {
            status,
            headers,
            body,
        }
    }

    /// A header-only response carrying no body headers
    pub fn error(status: Status, server_name: &str) -> Self {
        Self::assemble(status, server_name, None, None, Vec::new())
    }

    /// A 200 response for a regular file.
    ///
    /// The body is read only for GET; HEAD reports the same length from
    /// the file metadata.
    pub fn for_file(
        method: Method,
        path: &Path,
        content_type: &str,
        server_name: &str,
    ) -> ServerResult<Self> {
        let (length, body) = match method {
            Method::Get => {
                let contents = fs::read(path)?;
                (contents.len() as u64, contents)
            }
            Method::Head => (fs::metadata(path)?.len(), Vec::new()),
        };

        Ok(Self::assemble(
            Status::Ok,
            server_name,
            Some(length),
            Some(content_type),
            body,
        ))
    }

    /// Get a header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize the response to a byte vector
    pub fn serialize(&self, writer: &mut Vec<u8>) -> ServerResult<()> {
        write!(writer, "{} {}\r\n", HTTP_VERSION, self.status)?;

        for (name, value) in &self.headers {
            write!(writer, "{}: {}\r\n", name, value)?;
        }

        writer.extend_from_slice(b"\r\n");
        writer.extend_from_slice(&self.body);

        Ok(())
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> ServerResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(128 + self.body.len());
        self.serialize(&mut buffer)?;
        Ok(buffer)
    }
}
