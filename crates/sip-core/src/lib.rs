//! # siptx-sip-core
//!
//! The SIP message model used by the siptx stack: requests, responses,
//! the handful of typed headers the transaction layer depends on, a nom
//! based wire parser and builders for responses and non-2xx ACKs.
//!
//! ```rust
//! use siptx_sip_core::prelude::*;
//!
//! let invite = Request::builder(Method::Invite, "sip:bob@example.com")
//!     .via("UDP", "client.example.com:5060", &generate_branch())
//!     .from("sip:alice@example.com", Some("a1"))
//!     .to("sip:bob@example.com", None)
//!     .call_id(&generate_call_id(None))
//!     .cseq(1)
//!     .build();
//!
//! let parsed = parse_message(&invite.to_bytes()).unwrap();
//! assert_eq!(parsed.method(), Some(Method::Invite));
//!
//! let ringing = Response::for_request(&invite, StatusCode::RINGING);
//! assert!(ringing.status.is_provisional());
//! ```

pub mod builder;
pub mod error;
pub mod parser;
pub mod types;

pub use builder::{generate_branch, generate_call_id, generate_tag, SimpleRequestBuilder};
pub use error::{Error, Result};
pub use parser::parse_message;
pub use types::*;

/// Commonly used items.
pub mod prelude {
    pub use crate::builder::{generate_branch, generate_call_id, generate_tag, SimpleRequestBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::parser::parse_message;
    pub use crate::types::{
        header_name_eq, names, CSeq, Header, HeaderAccess, Message, Method, Request, Response, StatusCode, Via,
        BRANCH_MAGIC_COOKIE,
    };
}
