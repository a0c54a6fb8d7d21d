//! Wire format for the RemoteControl session layer.
//!
//! Every message is two frames: a header frame
//! (`<REQUEST|REPLY> <request_id>/<retry> <secs>,<usecs>`) and a body frame.
//! Bodies are opaque to the session; a [`CommandCodec`] reads the few
//! attributes the session needs out of them.
//!
//! ```rust
//! use zmap_remote_core::RequestTime;
//! use zmap_remote_protocol::{MessageDecoder, MessageHeader, WireMessage, encode_message};
//!
//! let message = WireMessage::new(MessageHeader::request("req-1", RequestTime::new(100, 0)), "{}");
//! let mut decoder = MessageDecoder::new();
//! decoder.extend(&encode_message(&message).unwrap());
//! assert_eq!(decoder.next_message().unwrap(), Some(message));
//! ```

mod codec;
mod error;
mod framing;
mod header;
mod message;
mod types;

pub use codec::{CommandCodec, EnvelopeAttr, JsonCommandCodec};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{FrameReader, FrameWriter, MessageDecoder, encode_frame, encode_message};
pub use header::{MessageHeader, MessageKind};
pub use message::WireMessage;
pub use types::{CommandEnvelope, EnvelopeKind, ReplyStatus};

/// Protocol version carried in command envelopes.
pub const PROTOCOL_VERSION: &str = "1";

/// Maximum frame size (1 MB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;
