// SPDX-License-Identifier: LGPL-3.0-only

use bitflags::bitflags;

use crate::Version;

/// `FALLBACK_NOTICE` is sent to peers whose client cannot interpret OTR. The leading `?OTR?v2?`
/// is the query tag that OTR-capable clients parse to learn that we speak versions 1 and 2. It is
/// part of the wire protocol and must be kept verbatim.
const FALLBACK_NOTICE: &str = "?OTR?v2? This user has requested an Off-the-Record private conversation. However, you do not have a plugin to support that. See http://otr.cypherpunks.ca/ for more information.";

bitflags! {
    /// `Policy` bit-flags can be set to indicate how OTR should respond to certain events related
    /// to messaging and the OTR protocol. The flags are interpreted by the crypto engine; the
    /// session manager only uses the version flags for capability advertisement.
    pub struct Policy: u32 {
        // ALLOW_V1
        //     Allow version 1 of the OTR protocol to be used.
        const ALLOW_V1 = 0b0000_0001;
        // ALLOW_V2
        //     Allow version 2 of the OTR protocol to be used.
        const ALLOW_V2 = 0b0000_0010;
        // REQUIRE_ENCRYPTION
        //     Refuse to send unencrypted messages.
        const REQUIRE_ENCRYPTION = 0b0000_0100;
        // SEND_WHITESPACE_TAG
        //     Advertise your support of OTR using the whitespace tag.
        const SEND_WHITESPACE_TAG = 0b0000_1000;
        // WHITESPACE_START_AKE
        //     Start the OTR AKE when you receive a whitespace tag.
        const WHITESPACE_START_AKE = 0b0001_0000;
        // ERROR_START_AKE
        //     Start the OTR AKE when you receive an OTR Error Message.
        const ERROR_START_AKE = 0b0010_0000;
    }
}

impl Default for Policy {
    fn default() -> Self {
        allowed_versions()
    }
}

impl Policy {
    /// `versions` lists the protocol versions this policy allows, in ascending order.
    #[must_use]
    pub fn versions(self) -> Vec<Version> {
        let mut versions = Vec::new();
        if self.contains(Policy::ALLOW_V1) {
            versions.push(Version::V1);
        }
        if self.contains(Policy::ALLOW_V2) {
            versions.push(Version::V2);
        }
        versions
    }

    /// `select_version` selects the highest version that is both offered by the other party and
    /// allowed by this policy.
    #[must_use]
    pub fn select_version(self, offered: &[Version]) -> Option<Version> {
        self.versions()
            .into_iter()
            .filter(|v| offered.contains(v))
            .max()
    }
}

/// `allowed_versions` is the policy in effect for this deployment: protocol versions 1 and 2. The
/// policy is fixed at build time and is not negotiated.
#[must_use]
pub fn allowed_versions() -> Policy {
    Policy::ALLOW_V1 | Policy::ALLOW_V2
}

/// `fallback_notice` returns the message to show to a peer without OTR support.
#[must_use]
pub fn fallback_notice() -> &'static str {
    FALLBACK_NOTICE
}
