//! Wire parser for SIP messages (RFC 3261 Section 7).
//!
//! The head (start line and headers) is parsed with nom. Folded header
//! lines are joined with a single space. The body is bounded by
//! `Content-Length` when present; otherwise the rest of the datagram is
//! taken as the body.

use std::str;

use bytes::Bytes;
use nom::{
    bytes::complete::{tag, take_till, take_till1, take_while1},
    character::complete::{char, digit1, line_ending, space0, space1},
    combinator::{all_consuming, map_res},
    multi::many0,
    sequence::{preceded, terminated, tuple},
    IResult,
};

use crate::error::{Error, Result};
use crate::types::header::{names, Header};
use crate::types::method::Method;
use crate::types::sip_message::{HeaderAccess, Message, Request, Response};
use crate::types::status::StatusCode;

type ParseResult<'a, T> = IResult<&'a str, T>;

const SIP_VERSION: &str = "SIP/2.0";

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c)
}

fn is_eol(c: char) -> bool {
    c == '\r' || c == '\n'
}

// Request-Line = Method SP Request-URI SP SIP-Version CRLF
fn request_line(input: &str) -> ParseResult<'_, (Method, String)> {
    let (input, method) = map_res(take_while1(is_token_char), str::parse::<Method>)(input)?;
    let (input, _) = space1(input)?;
    let (input, uri) = take_till1(|c: char| c == ' ' || is_eol(c))(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = terminated(tag(SIP_VERSION), line_ending)(input)?;
    Ok((input, (method, uri.to_string())))
}

// Status-Line = SIP-Version SP Status-Code SP Reason-Phrase CRLF
fn status_line(input: &str) -> ParseResult<'_, (StatusCode, String)> {
    let (input, _) = terminated(tag(SIP_VERSION), space1)(input)?;
    let (input, status) = map_res(digit1, |s: &str| {
        s.parse::<u16>()
            .map_err(|e| Error::ParseError(e.to_string()))
            .and_then(StatusCode::from_u16)
    })(input)?;
    let (input, reason) = terminated(preceded(space0, take_till(is_eol)), line_ending)(input)?;
    Ok((input, (status, reason.trim().to_string())))
}

// message-header = field-name HCOLON field-value CRLF, with LWS folding
fn header_line(input: &str) -> ParseResult<'_, Header> {
    let (input, name) = take_while1(is_token_char)(input)?;
    let (input, _) = tuple((space0, char(':'), space0))(input)?;
    let (input, first) = terminated(take_till(is_eol), line_ending)(input)?;
    let (input, folded) = many0(terminated(preceded(space1, take_till(is_eol)), line_ending))(input)?;

    let mut value = first.trim_end().to_string();
    for part in folded {
        let part = part.trim();
        if !part.is_empty() {
            value.push(' ');
            value.push_str(part);
        }
    }
    Ok((input, Header::new(name, value)))
}

/// Returns `(head_end, body_start)`; the head keeps its last line ending.
fn split_head(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos + 2, pos + 4));
    }
    raw.windows(2).position(|w| w == b"\n\n").map(|pos| (pos + 1, pos + 2))
}

fn nom_error(what: &str, e: nom::Err<nom::error::Error<&str>>) -> Error {
    Error::ParseError(format!("{}: {}", what, e))
}

/// Parses a complete SIP message from a datagram or framed stream chunk.
pub fn parse_message(raw: &[u8]) -> Result<Message> {
    // Keep-alive CRLFs may precede the start line
    let start = raw.iter().position(|b| *b != b'\r' && *b != b'\n').unwrap_or(raw.len());
    let raw = &raw[start..];
    if raw.is_empty() {
        return Err(Error::ParseError("empty message".to_string()));
    }

    let (head_end, body_start) =
        split_head(raw).ok_or_else(|| Error::ParseError("missing empty line after headers".to_string()))?;
    let head = str::from_utf8(&raw[..head_end]).map_err(|e| Error::ParseError(e.to_string()))?;
    let rest = &raw[body_start..];

    let mut message = if head.starts_with(SIP_VERSION) {
        let (input, (status, reason)) = status_line(head).map_err(|e| nom_error("status line", e))?;
        let (_, headers) = all_consuming(many0(header_line))(input).map_err(|e| nom_error("headers", e))?;
        Message::Response(Response { status, reason, headers, body: Bytes::new() })
    } else {
        let (input, (method, uri)) = request_line(head).map_err(|e| nom_error("request line", e))?;
        let (_, headers) = all_consuming(many0(header_line))(input).map_err(|e| nom_error("headers", e))?;
        Message::Request(Request { method, uri, headers, body: Bytes::new() })
    };

    let body = match message.header(names::CONTENT_LENGTH) {
        Some(value) => {
            let len: usize = value
                .trim()
                .parse()
                .map_err(|_| Error::InvalidHeader { name: names::CONTENT_LENGTH, value: value.to_string() })?;
            if rest.len() < len {
                return Err(Error::ParseError(format!(
                    "body truncated: Content-Length {} but {} bytes available",
                    len,
                    rest.len()
                )));
            }
            Bytes::copy_from_slice(&rest[..len])
        }
        None => Bytes::copy_from_slice(rest),
    };

    match &mut message {
        Message::Request(r) => r.body = body,
        Message::Response(r) => r.body = body,
    }
    Ok(message)
}

impl std::str::FromStr for Message {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_message(s.as_bytes())
    }
}
