pub mod cseq;
pub mod header;
pub mod method;
pub mod sip_message;
pub mod status;
pub mod via;

pub use cseq::CSeq;
pub use header::{header_name_eq, names, Header};
pub use method::Method;
pub use sip_message::{HeaderAccess, Message, Request, Response};
pub use status::StatusCode;
pub use via::{Via, BRANCH_MAGIC_COOKIE};
