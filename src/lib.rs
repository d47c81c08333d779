// SPDX-License-Identifier: LGPL-3.0-only

#![deny(unused_must_use)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::fmt;

use engine::ErrorCode;

extern crate bitflags;
extern crate hex;
extern crate once_cell;
extern crate regex;

mod encoding;
mod identity;
mod utils;

pub mod context;
pub mod engine;
pub mod messages;
pub mod policy;
pub mod session;
pub mod smp;

#[cfg(test)]
mod testing;

pub use context::{ContextRegistry, ConversationContext, Fingerprint};
pub use encoding::TLV;
pub use engine::{CryptoEngine, Decrypted};
pub use policy::{allowed_versions, fallback_notice, Policy};
pub use session::Session;
pub use smp::{SMPInitiators, SMPState};

/// `PROTOCOL_XMPP` is the protocol tag under which all conversation contexts are registered. The
/// deployment is fixed to a single messaging protocol.
pub const PROTOCOL_XMPP: &str = "xmpp";

/// `OTRError` is the enum containing the various errors that can occur.
#[derive(Debug)]
pub enum OTRError {
    /// Account or peer identity is not a well-formed address.
    InvalidIdentity(&'static str),
    /// Crypto engine failed to encrypt. The engine's error code is passed on as-is.
    EncryptionFailure(ErrorCode),
    /// Crypto engine failed to decrypt. The engine's error code is passed on as-is.
    DecryptionFailure(ErrorCode),
    /// Message contained invalid data according to the OTR protocol.
    ProtocolViolation(&'static str),
    /// Message payload is incomplete. The content cannot be reconstructed from the received bytes.
    IncompleteMessage,
    /// No conversation context exists for the requested account and peer.
    UnknownContext,
    /// Operation is not allowed in the current (protocol or SMP) state.
    IncorrectState(&'static str),
    /// (SMP) An SMP exchange is in progress. To initiate a new SMP, the previous one needs to be
    /// aborted first.
    SMPInProgress,
    /// (SMP) Crypto engine failed to process a local SMP action.
    SMPFailure(ErrorCode),
}

impl fmt::Display for OTRError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OTRError::InvalidIdentity(reason) => write!(f, "invalid identity: {reason}"),
            OTRError::EncryptionFailure(code) => write!(f, "encryption failed (code {})", code.0),
            OTRError::DecryptionFailure(code) => write!(f, "decryption failed (code {})", code.0),
            OTRError::ProtocolViolation(reason) => write!(f, "protocol violation: {reason}"),
            OTRError::IncompleteMessage => f.write_str("incomplete message"),
            OTRError::UnknownContext => f.write_str("no conversation context for account and peer"),
            OTRError::IncorrectState(reason) => write!(f, "incorrect state: {reason}"),
            OTRError::SMPInProgress => f.write_str("SMP exchange already in progress"),
            OTRError::SMPFailure(code) => write!(f, "SMP action failed (code {})", code.0),
        }
    }
}

impl std::error::Error for OTRError {}

/// `ProtocolStatus` is the message state of a conversation, as maintained by the crypto engine.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ProtocolStatus {
    Plaintext,
    Encrypted,
    Finished,
}

/// `Version` contains the OTR protocol versions that can be advertised or encountered.
#[derive(Debug, PartialOrd, Ord, PartialEq, Eq, Clone, Copy)]
pub enum Version {
    V1,
    V2,
    /// Version that is recognized on the wire, but not supported. (Carries the numeric version.)
    Unsupported(u16),
}

/// `TLV_TYPE_0_PADDING` is the TLV that can be used to introduce arbitrary-length padding to an
/// encrypted message.
pub const TLV_TYPE_0_PADDING: TLVType = 0;

/// `TLV_TYPE_1_DISCONNECT` is the TLV that signals a disconnect.
pub const TLV_TYPE_1_DISCONNECT: TLVType = 1;

/// `TLV_TYPE` is an alias for an u16 value. The values are not restricted. Therefore define the type.
pub type TLVType = u16;

/// Host represents the interface to the host application, for calling back into the messaging
/// client. Notifications are fire-and-forget: the host cannot influence protocol processing.
pub trait Host {
    /// `on_error` displays a protocol or display error to the user.
    fn on_error(&self, message: &str);

    /// `on_debug` reports SMP status transitions: initiated, successful, unsuccessful, aborted.
    fn on_debug(&self, message: &str);
}
