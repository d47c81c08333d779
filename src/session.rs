// SPDX-License-Identifier: LGPL-3.0-only

use std::{cell::RefCell, rc::Rc};

use crate::{
    context::{ContextRegistry, ConversationContext},
    engine::{CryptoEngine, Decrypted},
    messages,
    smp::{self, SMPInitiators, SMPState},
    utils, Host, OTRError, Policy, ProtocolStatus,
};

/// `Session` is the session manager. It owns the conversation contexts and routes every message
/// through the crypto engine, while keeping track of the SMP exchange per context.
pub struct Session {
    host: Rc<dyn Host>,
    engine: Box<dyn CryptoEngine>,
    registry: ContextRegistry,
    initiators: SMPInitiators,
}

impl Session {
    #[must_use]
    pub fn new(host: Rc<dyn Host>, engine: Box<dyn CryptoEngine>, policy: Policy) -> Self {
        Self {
            host,
            engine,
            registry: ContextRegistry::new(policy),
            initiators: SMPInitiators::default(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> Policy {
        self.registry.policy()
    }

    /// `query` is the query message advertising the versions allowed by policy.
    #[must_use]
    pub fn query(&self) -> Option<String> {
        messages::query(&self.policy().versions())
    }

    /// `context` returns the conversation context for account and peer, creating it on first
    /// contact.
    ///
    /// # Errors
    /// `InvalidIdentity` in case account or peer is malformed.
    pub fn context(
        &mut self,
        account: &str,
        peer: &str,
    ) -> Result<Rc<RefCell<ConversationContext>>, OTRError> {
        self.registry.find_or_create(account, peer)
    }

    /// `find_context` returns the conversation context for account and peer, if one exists.
    ///
    /// # Errors
    /// `InvalidIdentity` in case account or peer is malformed.
    pub fn find_context(
        &self,
        account: &str,
        peer: &str,
    ) -> Result<Option<Rc<RefCell<ConversationContext>>>, OTRError> {
        self.registry.find(account, peer)
    }

    /// Query status (protocol status) for a conversation. Returns status if the context is known.
    #[must_use]
    pub fn status(&self, account: &str, peer: &str) -> Option<ProtocolStatus> {
        self.known(account, peer)
            .map(|context| context.borrow().status())
    }

    /// `fingerprint` is the human-readable fingerprint of the peer's active key, if any.
    #[must_use]
    pub fn fingerprint(&self, account: &str, peer: &str) -> Option<String> {
        self.known(account, peer).and_then(|context| {
            context
                .borrow()
                .active_fingerprint()
                .map(crate::Fingerprint::human)
        })
    }

    #[must_use]
    pub fn is_trusted(&self, account: &str, peer: &str) -> bool {
        self.known(account, peer)
            .map_or(false, |context| context.borrow().is_trusted())
    }

    #[must_use]
    pub fn smp_initiators(&self) -> &SMPInitiators {
        &self.initiators
    }

    pub fn smp_initiators_mut(&mut self) -> &mut SMPInitiators {
        &mut self.initiators
    }

    /// `send` prepares outgoing plaintext for the transport. NUL characters are removed first, as
    /// they separate the message from its TLVs.
    ///
    /// # Errors
    /// `InvalidIdentity` for malformed addresses, `EncryptionFailure` with the engine's code.
    pub fn send(&mut self, account: &str, peer: &str, plaintext: &str) -> Result<String, OTRError> {
        let plaintext = utils::string::drop_by_value(plaintext, '\0');
        let context = self.registry.find_or_create(account, peer)?;
        let mut context = context.borrow_mut();
        self.engine
            .send(self.host.as_ref(), &mut context, &plaintext)
            .map_err(|code| {
                log::warn!("{}: failed to prepare message (code {})", context.peer(), code.0);
                OTRError::EncryptionFailure(code)
            })
    }

    /// `receive` processes an incoming message. The embedded TLVs are routed to the SMP tracker
    /// before the result is returned. SMP violations are resolved internally and never fail this
    /// call.
    ///
    /// # Errors
    /// `InvalidIdentity` for malformed addresses, `DecryptionFailure` with the engine's code.
    pub fn receive(
        &mut self,
        account: &str,
        peer: &str,
        message: &str,
    ) -> Result<Decrypted, OTRError> {
        let context = self.registry.find_or_create(account, peer)?;
        let mut context = context.borrow_mut();
        let decrypted = self
            .engine
            .receive(self.host.as_ref(), &mut context, message)
            .map_err(|code| {
                log::warn!("{}: failed to process message (code {})", context.peer(), code.0);
                OTRError::DecryptionFailure(code)
            })?;
        smp::handle_tlvs(
            self.engine.as_mut(),
            self.host.as_ref(),
            &mut context,
            &decrypted.tlvs,
            &mut self.initiators,
        );
        Ok(decrypted)
    }

    /// `end_session` terminates the session with the peer. The context is kept, with any SMP
    /// exchange discarded. Without a context there is nothing to end.
    ///
    /// # Errors
    /// `InvalidIdentity` in case account or peer is malformed.
    pub fn end_session(&mut self, account: &str, peer: &str) -> Result<(), OTRError> {
        let Some(context) = self.registry.find(account, peer)? else {
            log::debug!("{account} -> {peer}: no conversation to end");
            return Ok(());
        };
        let mut context = context.borrow_mut();
        self.engine.disconnect(self.host.as_ref(), &mut context);
        context.expect(SMPState::Expect1);
        log::info!("{} -> {}: session ended", context.account(), context.peer());
        Ok(())
    }

    /// `initiate_smp` starts authentication of the peer with the shared secret, optionally asking
    /// the peer a question.
    ///
    /// # Errors
    /// `UnknownContext` without conversation, `IncorrectState` without encrypted session,
    /// `SMPInProgress` if an exchange is already running, `SMPFailure` with the engine's code.
    pub fn initiate_smp(
        &mut self,
        account: &str,
        peer: &str,
        secret: &[u8],
        question: Option<&str>,
    ) -> Result<(), OTRError> {
        let context = self.existing(account, peer)?;
        let mut context = context.borrow_mut();
        if context.status() != ProtocolStatus::Encrypted {
            return Err(OTRError::IncorrectState(
                "SMP requires an encrypted session.",
            ));
        }
        if context.smp() != SMPState::Expect1 {
            return Err(OTRError::SMPInProgress);
        }
        self.engine
            .initiate_smp(self.host.as_ref(), &mut context, question, secret)
            .map_err(OTRError::SMPFailure)?;
        context.expect(SMPState::Expect2);
        Ok(())
    }

    /// `respond_smp` answers the SMP exchange the peer initiated, with the shared secret.
    ///
    /// # Errors
    /// `UnknownContext` without conversation, `IncorrectState` without encrypted session or if the
    /// peer has no outstanding SMP request in this conversation, `SMPFailure` with the engine's
    /// code.
    pub fn respond_smp(&mut self, account: &str, peer: &str, secret: &[u8]) -> Result<(), OTRError> {
        let context = self.existing(account, peer)?;
        let mut context = context.borrow_mut();
        if context.status() != ProtocolStatus::Encrypted {
            return Err(OTRError::IncorrectState(
                "SMP requires an encrypted session.",
            ));
        }
        if !context.smp_requested() {
            return Err(OTRError::IncorrectState(
                "Peer has not initiated SMP.",
            ));
        }
        self.engine
            .respond_smp(self.host.as_ref(), &mut context, secret)
            .map_err(OTRError::SMPFailure)?;
        context.expect(SMPState::Expect3);
        Ok(())
    }

    /// `abort_smp` aborts the SMP exchange. The local state is reset even if the engine fails to
    /// notify the peer.
    ///
    /// # Errors
    /// `UnknownContext` without conversation, `SMPFailure` with the engine's code.
    pub fn abort_smp(&mut self, account: &str, peer: &str) -> Result<(), OTRError> {
        let context = self.existing(account, peer)?;
        let mut context = context.borrow_mut();
        let result = self.engine.abort_smp(self.host.as_ref(), &mut context);
        context.expect(SMPState::Expect1);
        self.host.on_debug(smp::NOTICE_SMP_ABORTED);
        result.map_err(OTRError::SMPFailure)
    }

    fn existing(
        &self,
        account: &str,
        peer: &str,
    ) -> Result<Rc<RefCell<ConversationContext>>, OTRError> {
        self.registry
            .find(account, peer)?
            .ok_or(OTRError::UnknownContext)
    }

    fn known(&self, account: &str, peer: &str) -> Option<Rc<RefCell<ConversationContext>>> {
        self.registry.find(account, peer).ok().flatten()
    }
}
