// SPDX-License-Identifier: LGPL-3.0-only

//! Test-only host and engine, recording everything the session manager asks of them.

use std::{
    cell::{Ref, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use crate::{
    context::{ConversationContext, Fingerprint},
    engine::{CryptoEngine, Decrypted, ErrorCode},
    Host, Policy,
};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn context(account: &str, peer: &str) -> ConversationContext {
    init();
    ConversationContext::new(account.to_owned(), peer.to_owned(), Policy::default())
}

pub fn fingerprint(trust: Option<&str>) -> Fingerprint {
    Fingerprint::new([0xa5u8; 20], trust.map(str::to_owned)).unwrap()
}

#[derive(Default)]
pub struct TestHost {
    errors: RefCell<Vec<String>>,
    debugs: RefCell<Vec<String>>,
}

impl TestHost {
    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    pub fn debugs(&self) -> Vec<String> {
        self.debugs.borrow().clone()
    }
}

impl Host for TestHost {
    fn on_error(&self, message: &str) {
        self.errors.borrow_mut().push(message.to_owned());
    }

    fn on_debug(&self, message: &str) {
        self.debugs.borrow_mut().push(message.to_owned());
    }
}

/// `Journal` records the calls into the engine.
#[derive(Default, Debug)]
pub struct Journal {
    pub sent: Vec<(String, String)>,
    pub received: Vec<(String, String)>,
    pub disconnects: Vec<String>,
    pub aborts: usize,
    pub initiated: Vec<(Option<String>, Vec<u8>)>,
    pub responded: Vec<Vec<u8>>,
}

/// `TestEngine` is a scripted engine. Sending wraps the plaintext in a recognizable envelope.
/// Receiving returns the scripted results in order, and passes the message through as plaintext
/// once the script is exhausted.
#[derive(Default)]
pub struct TestEngine {
    journal: Rc<RefCell<Journal>>,
    receive_script: VecDeque<Result<Decrypted, ErrorCode>>,
    pending_trust: Option<String>,
    send_error: Option<ErrorCode>,
    smp_error: Option<ErrorCode>,
    abort_error: Option<ErrorCode>,
}

impl TestEngine {
    pub fn journal(&self) -> Ref<Journal> {
        self.journal.borrow()
    }

    pub fn shared_journal(&self) -> Rc<RefCell<Journal>> {
        Rc::clone(&self.journal)
    }

    pub fn script(&mut self, result: Result<Decrypted, ErrorCode>) {
        self.receive_script.push_back(result);
    }

    /// `trust_on_receive` installs a fingerprint with the provided trust during the next receive,
    /// as the engine does when an SMP exchange concludes.
    pub fn trust_on_receive(&mut self, trust: &str) {
        self.pending_trust = Some(trust.to_owned());
    }

    pub fn fail_send(&mut self, code: ErrorCode) {
        self.send_error = Some(code);
    }

    pub fn fail_smp(&mut self, code: ErrorCode) {
        self.smp_error = Some(code);
    }

    pub fn fail_abort(&mut self) {
        self.abort_error = Some(ErrorCode(99));
    }
}

impl CryptoEngine for TestEngine {
    fn send(
        &mut self,
        _host: &dyn Host,
        context: &mut ConversationContext,
        plaintext: &str,
    ) -> Result<String, ErrorCode> {
        self.journal
            .borrow_mut()
            .sent
            .push((context.peer().to_owned(), plaintext.to_owned()));
        match self.send_error {
            Some(code) => Err(code),
            None => Ok(format!("?OTR:{plaintext}.")),
        }
    }

    fn receive(
        &mut self,
        _host: &dyn Host,
        context: &mut ConversationContext,
        message: &str,
    ) -> Result<Decrypted, ErrorCode> {
        self.journal
            .borrow_mut()
            .received
            .push((context.peer().to_owned(), message.to_owned()));
        if let Some(trust) = self.pending_trust.take() {
            context.set_active_fingerprint(fingerprint(Some(&trust)));
        }
        self.receive_script.pop_front().unwrap_or_else(|| {
            Ok(Decrypted {
                plaintext: Some(message.to_owned()),
                tlvs: Vec::new(),
            })
        })
    }

    fn disconnect(&mut self, _host: &dyn Host, context: &mut ConversationContext) {
        self.journal
            .borrow_mut()
            .disconnects
            .push(context.peer().to_owned());
        context.set_status(crate::ProtocolStatus::Plaintext);
    }

    fn abort_smp(
        &mut self,
        _host: &dyn Host,
        _context: &mut ConversationContext,
    ) -> Result<(), ErrorCode> {
        self.journal.borrow_mut().aborts += 1;
        match self.abort_error {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn initiate_smp(
        &mut self,
        _host: &dyn Host,
        _context: &mut ConversationContext,
        question: Option<&str>,
        secret: &[u8],
    ) -> Result<(), ErrorCode> {
        if let Some(code) = self.smp_error {
            return Err(code);
        }
        self.journal
            .borrow_mut()
            .initiated
            .push((question.map(str::to_owned), secret.to_vec()));
        Ok(())
    }

    fn respond_smp(
        &mut self,
        _host: &dyn Host,
        _context: &mut ConversationContext,
        secret: &[u8],
    ) -> Result<(), ErrorCode> {
        if let Some(code) = self.smp_error {
            return Err(code);
        }
        self.journal.borrow_mut().responded.push(secret.to_vec());
        Ok(())
    }
}
