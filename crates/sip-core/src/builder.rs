//! Builders for requests and responses, plus identifier generators.

use bytes::Bytes;
use rand::{distributions::Alphanumeric, Rng};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::cseq::CSeq;
use crate::types::header::names;
use crate::types::method::Method;
use crate::types::sip_message::{HeaderAccess, Request, Response};
use crate::types::status::StatusCode;
use crate::types::via::{Via, BRANCH_MAGIC_COOKIE};

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A fresh RFC 3261 branch: the magic cookie followed by random characters.
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, random_token(16))
}

/// A random From/To tag.
pub fn generate_tag() -> String {
    random_token(10)
}

/// A globally unique Call-ID, optionally qualified by host.
pub fn generate_call_id(host: Option<&str>) -> String {
    match host {
        Some(h) => format!("{}@{}", Uuid::new_v4().simple(), h),
        None => Uuid::new_v4().simple().to_string(),
    }
}

fn has_tag(value: &str) -> bool {
    // Parameters follow the closing '>' for name-addr, or the URI for addr-spec
    let params = match value.rfind('>') {
        Some(pos) => &value[pos + 1..],
        None => value,
    };
    params.split(';').skip(1).any(|p| {
        p.trim()
            .split('=')
            .next()
            .map_or(false, |n| n.trim().eq_ignore_ascii_case("tag"))
    })
}

/// Chained construction of a [`Request`].
#[derive(Debug, Clone)]
pub struct SimpleRequestBuilder {
    request: Request,
}

impl SimpleRequestBuilder {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self { request: Request::new(method, uri) }
    }

    /// Appends a Via; call in top-most-first order.
    pub fn via(mut self, transport: &str, sent_by: &str, branch: &str) -> Self {
        self.request.push_header(names::VIA, Via::new(transport, sent_by, branch).to_string());
        self
    }

    pub fn from(mut self, uri: &str, tag: Option<&str>) -> Self {
        let value = match tag {
            Some(t) => format!("<{}>;tag={}", uri, t),
            None => format!("<{}>", uri),
        };
        self.request.set_header(names::FROM, value);
        self
    }

    pub fn to(mut self, uri: &str, tag: Option<&str>) -> Self {
        let value = match tag {
            Some(t) => format!("<{}>;tag={}", uri, t),
            None => format!("<{}>", uri),
        };
        self.request.set_header(names::TO, value);
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.request.set_header(names::CALL_ID, call_id);
        self
    }

    /// Sets CSeq using the request's own method.
    pub fn cseq(mut self, seq: u32) -> Self {
        let cseq = CSeq::new(seq, self.request.method.clone());
        self.request.set_header(names::CSEQ, cseq.to_string());
        self
    }

    pub fn max_forwards(mut self, hops: u8) -> Self {
        self.request.set_header(names::MAX_FORWARDS, hops.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.request.push_header(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = body.into();
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

impl Request {
    /// Starts a [`SimpleRequestBuilder`].
    pub fn builder(method: Method, uri: impl Into<String>) -> SimpleRequestBuilder {
        SimpleRequestBuilder::new(method, uri)
    }

    /// Builds the ACK for a non-2xx final response to `invite` (RFC 3261 Section 17.1.1.3).
    ///
    /// The ACK reuses the INVITE's Request-URI, top Via, From, Call-ID, CSeq
    /// number and Route set, and takes To from the response so the remote tag
    /// is echoed.
    pub fn non_2xx_ack(invite: &Request, response: &Response) -> Result<Request> {
        let via = invite
            .headers(names::VIA)
            .next()
            .and_then(|v| crate::types::header::split_comma_values(v).first().map(|s| s.to_string()))
            .ok_or(Error::MissingHeader(names::VIA))?;
        let from = invite.from_header().ok_or(Error::MissingHeader(names::FROM))?;
        let call_id = invite.call_id().ok_or(Error::MissingHeader(names::CALL_ID))?;
        let cseq = invite.cseq().ok_or(Error::MissingHeader(names::CSEQ))?;
        let to = response
            .to_header()
            .or_else(|| invite.to_header())
            .ok_or(Error::MissingHeader(names::TO))?;

        let mut ack = Request::new(Method::Ack, invite.uri.clone())
            .with_header(names::VIA, via)
            .with_header(names::MAX_FORWARDS, "70")
            .with_header(names::FROM, from)
            .with_header(names::TO, to)
            .with_header(names::CALL_ID, call_id)
            .with_header(names::CSEQ, CSeq::new(cseq.seq, Method::Ack).to_string());
        for route in invite.headers(names::ROUTE) {
            ack.push_header(names::ROUTE, route);
        }
        Ok(ack)
    }
}

impl Response {
    /// Builds a response to `request` (RFC 3261 Section 8.2.6.2).
    ///
    /// Via, From, Call-ID and CSeq are copied. To is copied too, and a
    /// To-tag is added to anything but 100 Trying when the request had none.
    pub fn for_request(request: &Request, status: StatusCode) -> Response {
        let mut response = Response::new(status);
        for via in request.headers(names::VIA) {
            response.push_header(names::VIA, via);
        }
        if let Some(from) = request.from_header() {
            response.push_header(names::FROM, from);
        }
        if let Some(to) = request.to_header() {
            let to = if status != StatusCode::TRYING && !has_tag(to) {
                format!("{};tag={}", to, generate_tag())
            } else {
                to.to_string()
            };
            response.push_header(names::TO, to);
        }
        if let Some(call_id) = request.call_id() {
            response.push_header(names::CALL_ID, call_id);
        }
        if let Some(cseq) = request.header(names::CSEQ) {
            response.push_header(names::CSEQ, cseq);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Request {
        Request::builder(Method::Invite, "sip:bob@biloxi.com")
            .via("UDP", "pc33.atlanta.com", "z9hG4bKnashds8")
            .via("UDP", "proxy.atlanta.com", "z9hG4bKold")
            .max_forwards(70)
            .from("sip:alice@atlanta.com", Some("1928301774"))
            .to("sip:bob@biloxi.com", None)
            .call_id("a84b4c76e66710")
            .cseq(314159)
            .header(names::ROUTE, "<sip:proxy.biloxi.com;lr>")
            .build()
    }

    #[test]
    fn branches_carry_the_cookie_and_differ() {
        let a = generate_branch();
        let b = generate_branch();
        assert!(a.starts_with(BRANCH_MAGIC_COOKIE));
        assert_ne!(a, b);
        assert!(generate_call_id(Some("host")).ends_with("@host"));
    }

    #[test]
    fn response_copies_identity_and_adds_to_tag() {
        let req = invite();
        let ringing = Response::for_request(&req, StatusCode::RINGING);
        assert_eq!(ringing.via_headers().len(), 2);
        assert_eq!(ringing.cseq(), req.cseq());
        assert!(has_tag(ringing.to_header().unwrap()));

        let trying = Response::for_request(&req, StatusCode::TRYING);
        assert_eq!(trying.to_header(), Some("<sip:bob@biloxi.com>"));
    }

    #[test]
    fn ack_for_failure_response() {
        let req = invite();
        let busy = Response::for_request(&req, StatusCode::BUSY_HERE);
        let ack = Request::non_2xx_ack(&req, &busy).unwrap();

        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.uri, req.uri);
        assert_eq!(ack.via_headers().len(), 1);
        assert_eq!(ack.top_via().unwrap().branch(), Some("z9hG4bKnashds8"));
        assert_eq!(ack.cseq(), Some(CSeq::new(314159, Method::Ack)));
        assert_eq!(ack.to_header(), busy.to_header());
        assert_eq!(ack.headers(names::ROUTE).count(), 1);
    }

    #[test]
    fn ack_requires_identity_headers() {
        let bare = Request::new(Method::Invite, "sip:x");
        let resp = Response::new(StatusCode::NOT_FOUND);
        assert_eq!(Request::non_2xx_ack(&bare, &resp), Err(Error::MissingHeader(names::VIA)));
    }

    #[test]
    fn tag_detection() {
        assert!(has_tag("<sip:a@b>;tag=1"));
        assert!(!has_tag("<sip:a@b;tag=1>"));
        assert!(has_tag("sip:a@b;TAG=x"));
    }
}
