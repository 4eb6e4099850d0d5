//! SIP request, response and the `Message` wrapper.

use std::fmt;

use bytes::Bytes;
use tracing::warn;

use crate::types::cseq::CSeq;
use crate::types::header::{names, split_comma_values, Header};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::via::Via;

/// Shared header access for requests and responses.
pub trait HeaderAccess {
    fn header_list(&self) -> &[Header];
    fn header_list_mut(&mut self) -> &mut Vec<Header>;

    /// First value of the named header.
    fn header(&self, name: &str) -> Option<&str> {
        self.header_list().iter().find(|h| h.is(name)).map(|h| h.value.as_str())
    }

    /// All values of the named header, in message order.
    fn headers<'a>(&'a self, name: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        Box::new(self.header_list().iter().filter(move |h| h.is(name)).map(|h| h.value.as_str()))
    }

    /// Appends a header line.
    fn push_header(&mut self, name: &str, value: impl Into<String>) {
        self.header_list_mut().push(Header::new(name, value));
    }

    /// Replaces every occurrence of the named header with a single value.
    fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let list = self.header_list_mut();
        match list.iter().position(|h| h.is(name)) {
            Some(pos) => {
                list[pos] = Header::new(name, value);
                let mut i = 0;
                list.retain(|h| {
                    let keep = i <= pos || !h.is(name);
                    i += 1;
                    keep
                });
            }
            None => list.push(Header::new(name, value)),
        }
    }

    fn remove_header(&mut self, name: &str) {
        self.header_list_mut().retain(|h| !h.is(name));
    }

    /// Every Via value, top-most first. Unparseable values are skipped.
    fn via_headers(&self) -> Vec<Via> {
        self.headers(names::VIA)
            .flat_map(split_comma_values)
            .filter_map(|v| match v.parse::<Via>() {
                Ok(via) => Some(via),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed Via value");
                    None
                }
            })
            .collect()
    }

    /// The top-most Via.
    fn top_via(&self) -> Option<Via> {
        let first = self.headers(names::VIA).flat_map(split_comma_values).next()?;
        first.parse().ok()
    }

    fn call_id(&self) -> Option<&str> {
        self.header(names::CALL_ID).map(str::trim)
    }

    fn cseq(&self) -> Option<CSeq> {
        self.header(names::CSEQ).and_then(|v| v.parse().ok())
    }

    fn from_header(&self) -> Option<&str> {
        self.header(names::FROM)
    }

    fn to_header(&self) -> Option<&str> {
        self.header(names::TO)
    }
}

fn write_headers_and_body(f: &mut fmt::Formatter<'_>, headers: &[Header], body: &Bytes) -> fmt::Result {
    for header in headers.iter().filter(|h| !h.is(names::CONTENT_LENGTH)) {
        write!(f, "{}\r\n", header)?;
    }
    write!(f, "{}: {}\r\n\r\n", names::CONTENT_LENGTH, body.len())?;
    f.write_str(&String::from_utf8_lossy(body))
}

/// A SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Request-URI, kept verbatim
    pub uri: String,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self { method, uri: uri.into(), headers: Vec::new(), body: Bytes::new() }
    }

    /// Builder-style header append.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Wire form as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl HeaderAccess for Request {
    fn header_list(&self) -> &[Header] {
        &self.headers
    }

    fn header_list_mut(&mut self) -> &mut Vec<Header> {
        &mut self.headers
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.method, self.uri)?;
        write_headers_and_body(f, &self.headers, &self.body)
    }
}

/// A SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Response {
    /// Creates a response with the default reason phrase.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.reason_phrase().to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl HeaderAccess for Response {
    fn header_list(&self) -> &[Header] {
        &self.headers
    }

    fn header_list_mut(&mut self) -> &mut Vec<Header> {
        &mut self.headers
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {} {}\r\n", self.status, self.reason)?;
        write_headers_and_body(f, &self.headers, &self.body)
    }
}

/// Either a request or a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            _ => None,
        }
    }

    /// The request method, or the CSeq method for a response.
    pub fn method(&self) -> Option<Method> {
        match self {
            Message::Request(r) => Some(r.method.clone()),
            Message::Response(r) => r.cseq().map(|c| c.method),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.as_response().map(|r| r.status)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl HeaderAccess for Message {
    fn header_list(&self) -> &[Header] {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }

    fn header_list_mut(&mut self) -> &mut Vec<Header> {
        match self {
            Message::Request(r) => &mut r.headers,
            Message::Response(r) => &mut r.headers,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => r.fmt(f),
            Message::Response(r) => r.fmt(f),
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}
