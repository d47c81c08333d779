// SPDX-License-Identifier: LGPL-3.0-only

use crate::{
    encoding::{OTRDecoder, OTREncoder, TLV},
    utils, ConversationContext, Host, OTRError,
};

/// `ErrorCode` is the crypto engine's own error code. It is opaque to the session manager and is
/// passed on to the caller unchanged.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ErrorCode(pub u32);

/// `Decrypted` is the result of processing an incoming message: the user-visible text, if any, and
/// the control records (TLVs) that were embedded in the message.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct Decrypted {
    /// `plaintext` is `None` for pure protocol control traffic.
    pub plaintext: Option<String>,
    pub tlvs: Vec<TLV>,
}

impl Decrypted {
    /// `from_payload` separates the decrypted content of a data message into message text and
    /// TLVs. The text is terminated by the first NUL byte, the remainder is a sequence of TLV
    /// records. An empty text means the message carried control records only.
    ///
    /// # Errors
    /// In case the text is not valid UTF-8 or the TLV records are malformed.
    pub fn from_payload(payload: &[u8]) -> Result<Self, OTRError> {
        let mut decoder = OTRDecoder::new(payload);
        let text = decoder.read_bytes_null_terminated();
        let tlvs = decoder.read_tlvs();
        let tlvs = match tlvs {
            Ok(tlvs) => tlvs,
            Err(err) => {
                decoder.skip();
                return Err(err);
            }
        };
        decoder.done()?;
        let plaintext = if text.is_empty() {
            None
        } else {
            Some(String::from_utf8(text).or(Err(OTRError::ProtocolViolation(
                "message content is not valid UTF-8",
            )))?)
        };
        Ok(Self { plaintext, tlvs })
    }
}

/// `payload` composes the content of a data message from message text and TLVs, the inverse of
/// `Decrypted::from_payload`. NUL characters are removed from the text, as the first NUL separates
/// the text from the TLVs. The NUL separator is only written if TLVs follow.
///
/// # Errors
/// In case a TLV carries more data than its 16-bit length can express.
pub fn payload(text: &str, tlvs: &[TLV]) -> Result<Vec<u8>, OTRError> {
    if tlvs.iter().any(|tlv| u16::try_from(tlv.1.len()).is_err()) {
        return Err(OTRError::ProtocolViolation(
            "TLV value exceeds maximum length",
        ));
    }
    let text = utils::string::drop_by_value(text, '\0');
    let mut encoder = OTREncoder::new();
    if tlvs.is_empty() {
        encoder.write(text.as_bytes());
    } else {
        encoder.write_bytes_null_terminated(text.as_bytes());
        for tlv in tlvs {
            encoder.write_tlv(tlv);
        }
    }
    Ok(encoder.to_vec())
}

/// `CryptoEngine` is the OTR protocol engine that performs the actual cryptography and wire
/// formatting. The session manager only orchestrates: it decides which context a message belongs
/// to and keeps track of the SMP exchange.
///
/// The engine receives mutable access to the context, through which it maintains the protocol
/// status and the active fingerprint. Account, peer and protocol tag are available from the
/// context. The engine may use the host to display its own messages.
pub trait CryptoEngine {
    /// `send` transforms outgoing plaintext into the message to put on the transport: encrypted,
    /// tagged or unchanged depending on the context's state and policy.
    ///
    /// # Errors
    /// With the engine's error code in case the message cannot be prepared.
    fn send(
        &mut self,
        host: &dyn Host,
        context: &mut ConversationContext,
        plaintext: &str,
    ) -> Result<String, ErrorCode>;

    /// `receive` processes an incoming message, decrypting if needed, and returns the user-visible
    /// text and any embedded TLVs.
    ///
    /// # Errors
    /// With the engine's error code in case the message cannot be processed.
    fn receive(
        &mut self,
        host: &dyn Host,
        context: &mut ConversationContext,
        message: &str,
    ) -> Result<Decrypted, ErrorCode>;

    /// `disconnect` terminates the session with the peer, notifying the peer if a confidential
    /// session was established.
    fn disconnect(&mut self, host: &dyn Host, context: &mut ConversationContext);

    /// `abort_smp` aborts the SMP exchange, sending an SMP abort record to the peer.
    ///
    /// # Errors
    /// With the engine's error code in case the abort cannot be sent.
    fn abort_smp(&mut self, host: &dyn Host, context: &mut ConversationContext)
        -> Result<(), ErrorCode>;

    /// `initiate_smp` starts an SMP exchange with the shared secret, sending SMP message 1 (with
    /// question, if provided).
    ///
    /// # Errors
    /// With the engine's error code in case the exchange cannot be started.
    fn initiate_smp(
        &mut self,
        host: &dyn Host,
        context: &mut ConversationContext,
        question: Option<&str>,
        secret: &[u8],
    ) -> Result<(), ErrorCode>;

    /// `respond_smp` continues an SMP exchange initiated by the peer, sending SMP message 2.
    ///
    /// # Errors
    /// With the engine's error code in case the response cannot be sent.
    fn respond_smp(
        &mut self,
        host: &dyn Host,
        context: &mut ConversationContext,
        secret: &[u8],
    ) -> Result<(), ErrorCode>;
}
