//! Message header frame.
//!
//! ```text
//! REQUEST req-17/2 1370963384,123456
//! ^kind   ^id    ^retry ^timestamp
//! ```

use std::fmt;
use std::str::FromStr;

use zmap_remote_core::RequestTime;

use crate::error::{ProtocolError, ProtocolResult};

/// Whether a message is a request or a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Reply,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Reply => "REPLY",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed header frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: MessageKind,
    pub request_id: String,
    /// Attempt number, starting at 1 for the first send.
    pub retry: u32,
    pub timestamp: RequestTime,
}

impl MessageHeader {
    /// Header for the first attempt of a request.
    pub fn request(request_id: impl Into<String>, timestamp: RequestTime) -> Self {
        Self {
            kind: MessageKind::Request,
            request_id: request_id.into(),
            retry: 1,
            timestamp,
        }
    }

    /// Header for a reply. Replies are never retried so the number is always 1.
    pub fn reply(request_id: impl Into<String>, timestamp: RequestTime) -> Self {
        Self {
            kind: MessageKind::Reply,
            request_id: request_id.into(),
            retry: 1,
            timestamp,
        }
    }

    /// Same header with a different attempt number.
    #[must_use]
    pub fn with_retry(&self, retry: u32) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let mut parts = text.split_whitespace();
        let (Some(kind), Some(id_retry), Some(time), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ProtocolError::invalid_header(
                text,
                "expected three space separated fields",
            ));
        };

        let kind = match kind {
            "REQUEST" => MessageKind::Request,
            "REPLY" => MessageKind::Reply,
            other => {
                return Err(ProtocolError::invalid_header(
                    text,
                    format!("unknown message kind {other:?}"),
                ));
            }
        };

        let (request_id, retry) = id_retry
            .rsplit_once('/')
            .ok_or_else(|| ProtocolError::invalid_header(text, "missing '/' before retry"))?;
        if request_id.is_empty() {
            return Err(ProtocolError::invalid_header(text, "empty request id"));
        }
        let retry: u32 = retry
            .parse()
            .map_err(|_| ProtocolError::invalid_header(text, "retry is not a number"))?;

        let timestamp = RequestTime::parse(time)
            .map_err(|e| ProtocolError::invalid_header(text, e.to_string()))?;

        Ok(Self {
            kind,
            request_id: request_id.to_string(),
            retry,
            timestamp,
        })
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} {}",
            self.kind, self.request_id, self.retry, self.timestamp
        )
    }
}

impl FromStr for MessageHeader {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let header = MessageHeader::request("req-1", RequestTime::new(100, 0));
        insta::assert_snapshot!(header.to_string(), @"REQUEST req-1/1 100,000000");
        insta::assert_snapshot!(header.with_retry(3).to_string(), @"REQUEST req-1/3 100,000000");
    }

    #[test]
    fn parse_reply_with_dot_time() {
        let header = MessageHeader::parse("REPLY req-1/1 100.050").unwrap();
        assert_eq!(header.kind, MessageKind::Reply);
        assert_eq!(header.request_id, "req-1");
        assert_eq!(header.retry, 1);
        assert_eq!(header.timestamp, RequestTime::new(100, 50_000));
    }

    #[test]
    fn parse_keeps_slashes_in_id() {
        let header = MessageHeader::parse("REQUEST zmap/peer/9/4 1,000001").unwrap();
        assert_eq!(header.request_id, "zmap/peer/9");
        assert_eq!(header.retry, 4);
    }

    #[test]
    fn parse_errors() {
        for bad in [
            "",
            "REQUEST req-1/1",
            "REQUEST req-1/1 1,0 extra",
            "ANSWER req-1/1 1,0",
            "REQUEST req-1 1,0",
            "REQUEST /1 1,0",
            "REQUEST req-1/x 1,0",
            "REQUEST req-1/1 yesterday",
        ] {
            assert!(
                matches!(
                    MessageHeader::parse(bad),
                    Err(ProtocolError::InvalidHeader { .. })
                ),
                "{bad:?} should not parse"
            );
        }
    }
}
