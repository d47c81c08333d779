// SPDX-License-Identifier: LGPL-3.0-only

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use zeroize::Zeroize;

use crate::{identity, smp::SMPState, utils, OTRError, Policy, ProtocolStatus, PROTOCOL_XMPP};

/// `FINGERPRINT_LEN` is the length of a long-term public key fingerprint (SHA-1).
pub const FINGERPRINT_LEN: usize = 20;

/// `ConversationContext` identifies one conversation between a local account and one peer, within
/// the protocol namespace `xmpp`.
///
/// The context is shared between the session manager and the crypto engine. The engine maintains
/// the protocol status and the active fingerprint, the SMP tracker maintains the SMP expectation.
pub struct ConversationContext {
    account: String,
    peer: String,
    protocol: &'static str,
    policy: Policy,
    status: ProtocolStatus,
    smp: SMPState,
    smp_requested: bool,
    fingerprint: Option<Fingerprint>,
}

impl ConversationContext {
    pub(crate) fn new(account: String, peer: String, policy: Policy) -> Self {
        Self {
            account,
            peer,
            protocol: PROTOCOL_XMPP,
            policy,
            status: ProtocolStatus::Plaintext,
            smp: SMPState::Expect1,
            smp_requested: false,
            fingerprint: None,
        }
    }

    /// `account` is the bare address of the local account.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// `peer` is the bare address of the other party.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[must_use]
    pub fn protocol(&self) -> &str {
        self.protocol
    }

    #[must_use]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    #[must_use]
    pub fn status(&self) -> ProtocolStatus {
        self.status
    }

    /// `set_status` records the message state. Intended for the crypto engine, which owns the
    /// transitions between plaintext, encrypted and finished.
    pub fn set_status(&mut self, status: ProtocolStatus) {
        log::debug!(
            "{} -> {}: protocol status {:?} -> {:?}",
            self.account,
            self.peer,
            self.status,
            status
        );
        self.status = status;
    }

    /// `smp` is the SMP message that is expected next.
    #[must_use]
    pub fn smp(&self) -> SMPState {
        self.smp
    }

    /// `expect` is the single point where the SMP expectation changes. Only the SMP tracker and the
    /// session manager's local SMP actions move the state. Any transition settles an outstanding
    /// request of the peer.
    pub(crate) fn expect(&mut self, next: SMPState) {
        self.smp_requested = false;
        if self.smp != next {
            log::debug!(
                "{} -> {}: SMP expectation {:?} -> {:?}",
                self.account,
                self.peer,
                self.smp,
                next
            );
        }
        self.smp = next;
    }

    /// `smp_requested` indicates that the peer initiated SMP in this conversation and awaits our
    /// answer.
    #[must_use]
    pub fn smp_requested(&self) -> bool {
        self.smp_requested
    }

    /// `request_smp` records the peer's SMP request. Must follow the transition of the request.
    pub(crate) fn request_smp(&mut self) {
        self.smp_requested = true;
    }

    #[must_use]
    pub fn active_fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    /// `set_active_fingerprint` installs the fingerprint (and its trust) of the key the peer
    /// authenticated with. Intended for the crypto engine.
    pub fn set_active_fingerprint(&mut self, fingerprint: Fingerprint) {
        self.fingerprint = Some(fingerprint);
    }

    /// `is_trusted` indicates whether the peer's active fingerprint carries a non-empty trust
    /// token, i.e. the peer's identity has been authenticated.
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.fingerprint.as_ref().map_or(false, Fingerprint::is_trusted)
    }
}

impl fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationContext")
            .field("account", &self.account)
            .field("peer", &self.peer)
            .field("protocol", &self.protocol)
            .field("status", &self.status)
            .field("smp", &self.smp)
            .field("smp_requested", &self.smp_requested)
            .field("trusted", &self.is_trusted())
            .finish()
    }
}

/// `Fingerprint` is the fingerprint of a peer's long-term public key together with its trust
/// record. The trust token is set by the crypto engine (typically on successful SMP) and is
/// read-only to the session manager.
pub struct Fingerprint {
    hash: [u8; FINGERPRINT_LEN],
    trust: Option<String>,
}

impl Drop for Fingerprint {
    fn drop(&mut self) {
        self.hash.zeroize();
        self.trust.zeroize();
    }
}

impl Fingerprint {
    /// Construct a fingerprint record.
    ///
    /// # Errors
    /// In case the fingerprint consists of only zero-bytes, which is never a valid hash.
    pub fn new(hash: [u8; FINGERPRINT_LEN], trust: Option<String>) -> Result<Self, OTRError> {
        if utils::bytes::all_zero(&hash) {
            return Err(OTRError::ProtocolViolation("fingerprint is all zeroes"));
        }
        Ok(Self { hash, trust })
    }

    #[must_use]
    pub fn hash(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.hash
    }

    #[must_use]
    pub fn trust(&self) -> Option<&str> {
        self.trust.as_deref()
    }

    /// `is_trusted` is true for a present, non-empty trust token.
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.trust.as_ref().map_or(false, |t| !t.is_empty())
    }

    /// `human` renders the fingerprint as five space-separated groups of eight upper-case hex
    /// digits, the form users compare out-of-band.
    #[must_use]
    pub fn human(&self) -> String {
        self.hash
            .chunks(4)
            .map(hex::encode_upper)
            .collect::<Vec<String>>()
            .join(" ")
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprint")
            .field("hash", &self.human())
            .field("trust", &self.trust)
            .finish()
    }
}

#[derive(PartialEq, Eq, Hash, Debug, Clone)]
struct ContextKey {
    account: String,
    peer: String,
}

/// `ContextRegistry` holds the conversation contexts, exactly one per (account, peer) pair.
///
/// Contexts are created lazily on first contact and are never removed: ending a session returns
/// the context to plaintext, but its trust record stays relevant.
pub struct ContextRegistry {
    policy: Policy,
    contexts: HashMap<ContextKey, Rc<RefCell<ConversationContext>>>,
}

impl ContextRegistry {
    /// Create an empty registry. New contexts receive the provided policy.
    #[must_use]
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            contexts: HashMap::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// `find_or_create` looks up the context for account and peer, creating it if none exists yet.
    ///
    /// # Errors
    /// `InvalidIdentity` in case account or peer is not a well-formed address.
    pub fn find_or_create(
        &mut self,
        account: &str,
        peer: &str,
    ) -> Result<Rc<RefCell<ConversationContext>>, OTRError> {
        let key = Self::key(account, peer)?;
        let policy = self.policy;
        let context = self.contexts.entry(key).or_insert_with_key(|key| {
            log::debug!("{} -> {}: new conversation context", key.account, key.peer);
            Rc::new(RefCell::new(ConversationContext::new(
                key.account.clone(),
                key.peer.clone(),
                policy,
            )))
        });
        Ok(Rc::clone(context))
    }

    /// `find` looks up the context for account and peer, without creating it.
    ///
    /// # Errors
    /// `InvalidIdentity` in case account or peer is not a well-formed address.
    pub fn find(
        &self,
        account: &str,
        peer: &str,
    ) -> Result<Option<Rc<RefCell<ConversationContext>>>, OTRError> {
        let key = Self::key(account, peer)?;
        Ok(self.contexts.get(&key).map(Rc::clone))
    }

    /// `len` is the number of registered contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    fn key(account: &str, peer: &str) -> Result<ContextKey, OTRError> {
        Ok(ContextKey {
            account: identity::verify(account)?,
            peer: identity::verify(peer)?,
        })
    }
}
