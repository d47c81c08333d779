// SPDX-License-Identifier: LGPL-3.0-only

use crate::{OTRError, TLVType};

pub struct OTRDecoder<'a>(&'a [u8]);

impl Drop for OTRDecoder<'_> {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            // After having finished using the OTRDecoder, verify that the buffer is fully drained.
            // The input data, that originated from the other party, may not conform to the
            // protocol.
            log::warn!("{} unread bytes left in discarded buffer", self.0.len());
        }
    }
}

/// `OTRDecoder` contains the logic for reading entries from byte-buffer.
///
/// The `OTRDecoder` is construct to assume that any read can fail due to unexpected EOL or
/// unexpected data. The input cannot be trusted, so we try to handle everything as an Err-result.
impl<'a> OTRDecoder<'a> {
    pub fn new(content: &'a [u8]) -> Self {
        Self(content)
    }

    /// `read_u16` reads a short value (2 bytes, big-endian) from buffer.
    pub fn read_u16(&mut self) -> Result<u16, OTRError> {
        log::trace!("read short");
        Ok(u16::from_be_bytes(self.read::<2>()?))
    }

    pub fn read_tlvs(&mut self) -> Result<Vec<TLV>, OTRError> {
        log::trace!("decode all TLVs");
        let mut tlvs = Vec::new();
        while !self.0.is_empty() {
            tlvs.push(self.read_tlv()?);
        }
        Ok(tlvs)
    }

    /// `read_tlv` reads a type-length-value record from the content.
    pub fn read_tlv(&mut self) -> Result<TLV, OTRError> {
        log::trace!("decode TLV");
        let typ = self.read_u16()?;
        let len = self.read_u16()? as usize;
        if self.0.len() < len {
            return Err(OTRError::IncompleteMessage);
        }
        let mut data = Vec::with_capacity(len);
        self.transfer(len, &mut data);
        Ok(TLV(typ, data))
    }

    /// `read_bytes_null_terminated` reads bytes until a NULL-byte is found or the buffer is empty.
    /// The NULL-byte is consumed, but will not be returned in the result. If no NULL-byte is
    /// present, read until no more bytes left. Returns all bytes read, except the terminating NULL
    /// if present.
    pub fn read_bytes_null_terminated(&mut self) -> Vec<u8> {
        log::trace!("decode until null-terminated or empty");
        let mut bytes = Vec::new();
        if let Some(i) = self.0.iter().position(|b| *b == 0) {
            self.transfer(i, &mut bytes);
            self.0 = &self.0[1..];
        } else {
            self.transfer(self.0.len(), &mut bytes);
        }
        bytes
    }

    pub fn read<const N: usize>(&mut self) -> Result<[u8; N], OTRError> {
        log::trace!("read {N} (fixed) bytes");
        if self.0.len() < N {
            return Err(OTRError::IncompleteMessage);
        }
        let mut buffer = [0u8; N];
        buffer.copy_from_slice(&self.0[..N]);
        self.0 = &self.0[N..];
        Ok(buffer)
    }

    /// `skip` discards the remainder of the buffer. Used when only a prefix of the content is
    /// relevant.
    pub fn skip(&mut self) {
        log::trace!("skip {} remaining bytes", self.0.len());
        self.0 = &[];
    }

    fn transfer(&mut self, n: usize, buffer: &mut Vec<u8>) {
        log::trace!("read {n} (variable) bytes");
        buffer.extend_from_slice(&self.0[..n]);
        self.0 = &self.0[n..];
    }

    /// `done` can be used to express the end of decoding. The instance is consumed.
    /// Note: during clean-up we verify if the buffer is fully drained.
    pub fn done(self) -> Result<(), OTRError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(OTRError::ProtocolViolation("data remaining in buffer"))
        }
    }
}

pub struct OTREncoder {
    buffer: Vec<u8>,
}

impl OTREncoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn write(&mut self, raw_bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(raw_bytes);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buffer.extend_from_slice(&v.to_be_bytes());
        self
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn write_tlv(&mut self, tlv: &TLV) -> &mut Self {
        assert!(u16::try_from(tlv.1.len()).is_ok());
        self.write_u16(tlv.0).write_u16(tlv.1.len() as u16);
        self.buffer.extend(&tlv.1);
        self
    }

    pub fn write_bytes_null_terminated(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self.buffer.push(0u8);
        self
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.clone()
    }
}

/// `TLV` is a type-length-value control record embedded in the decrypted content of an OTR data
/// message. The length is implied by the payload.
#[derive(Debug, PartialEq, Eq, Clone)]
#[allow(clippy::upper_case_acronyms)]
pub struct TLV(pub TLVType, pub Vec<u8>);
