// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::HashSet;

use crate::{
    encoding::{OTRDecoder, TLV},
    ConversationContext, CryptoEngine, Host, TLVType,
};

const TLV_SMP_MESSAGE_1: TLVType = 2;
const TLV_SMP_MESSAGE_2: TLVType = 3;
const TLV_SMP_MESSAGE_3: TLVType = 4;
const TLV_SMP_MESSAGE_4: TLVType = 5;
const TLV_SMP_ABORT: TLVType = 6;
/// TLV similar to message 1 but includes a user-specified question (null-terminated) in the payload.
const TLV_SMP_MESSAGE_1Q: TLVType = 7;

pub const NOTICE_SMP_SUCCESSFUL: &str = "SMP successful";
pub const NOTICE_SMP_UNSUCCESSFUL: &str = "SMP unsuccessful";
pub const NOTICE_SMP_ABORTED: &str = "SMP aborted";

/// `SMPState` is the SMP message that is expected next. Each party alternates between the
/// expected-message slots; any message arriving outside its slot is a protocol violation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SMPState {
    Expect1,
    Expect2,
    Expect3,
    Expect4,
}

/// `Tag` classifies the TLVs relevant to SMP.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Tag {
    SMP1,
    SMP1Q,
    SMP2,
    SMP3,
    SMP4,
    Abort,
}

impl Tag {
    /// `SCAN_ORDER` is the order in which the tags are looked up in a payload.
    pub const SCAN_ORDER: [Tag; 6] = [
        Tag::SMP1,
        Tag::SMP1Q,
        Tag::SMP2,
        Tag::SMP3,
        Tag::SMP4,
        Tag::Abort,
    ];

    #[must_use]
    pub fn from_type(typ: TLVType) -> Option<Tag> {
        match typ {
            TLV_SMP_MESSAGE_1 => Some(Tag::SMP1),
            TLV_SMP_MESSAGE_1Q => Some(Tag::SMP1Q),
            TLV_SMP_MESSAGE_2 => Some(Tag::SMP2),
            TLV_SMP_MESSAGE_3 => Some(Tag::SMP3),
            TLV_SMP_MESSAGE_4 => Some(Tag::SMP4),
            TLV_SMP_ABORT => Some(Tag::Abort),
            _ => None,
        }
    }

    #[must_use]
    pub fn tlv_type(self) -> TLVType {
        match self {
            Tag::SMP1 => TLV_SMP_MESSAGE_1,
            Tag::SMP1Q => TLV_SMP_MESSAGE_1Q,
            Tag::SMP2 => TLV_SMP_MESSAGE_2,
            Tag::SMP3 => TLV_SMP_MESSAGE_3,
            Tag::SMP4 => TLV_SMP_MESSAGE_4,
            Tag::Abort => TLV_SMP_ABORT,
        }
    }
}

#[must_use]
pub fn is_smp_tlv(tlv: &TLV) -> bool {
    Tag::from_type(tlv.0).is_some()
}

/// `Action` is the response to an incoming SMP record.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Action {
    /// The peer initiated SMP. Remember the peer as initiator and ask the user for the secret.
    Initiated,
    /// The record is accepted. The engine sends our next SMP message.
    Proceed,
    /// The exchange is complete. Report the outcome according to the peer's trust.
    Conclude,
    /// The record arrived outside its slot. Abort the exchange.
    Abort,
    /// The peer aborted. Reset without further action.
    Reset,
}

/// `transition` determines the action and next state for an incoming SMP record, given the state
/// the exchange is in.
#[must_use]
pub fn transition(expected: SMPState, tag: Tag) -> (Action, SMPState) {
    match (expected, tag) {
        // A fresh SMP1 does not advance the state: that happens once the local secret is provided
        // and SMP2 is sent.
        (SMPState::Expect1, Tag::SMP1 | Tag::SMP1Q) => (Action::Initiated, SMPState::Expect1),
        (SMPState::Expect2, Tag::SMP2) => (Action::Proceed, SMPState::Expect4),
        (SMPState::Expect3, Tag::SMP3) | (SMPState::Expect4, Tag::SMP4) => {
            (Action::Conclude, SMPState::Expect1)
        }
        (_, Tag::Abort) => (Action::Reset, SMPState::Expect1),
        (
            SMPState::Expect2 | SMPState::Expect3 | SMPState::Expect4,
            Tag::SMP1 | Tag::SMP1Q,
        )
        | (SMPState::Expect1 | SMPState::Expect3 | SMPState::Expect4, Tag::SMP2)
        | (SMPState::Expect1 | SMPState::Expect2 | SMPState::Expect4, Tag::SMP3)
        | (SMPState::Expect1 | SMPState::Expect2 | SMPState::Expect3, Tag::SMP4) => {
            (Action::Abort, SMPState::Expect1)
        }
    }
}

/// `SMPInitiators` remembers the peers that initiated an SMP exchange with us, such that a secret
/// provided by the user is an answer to their request instead of a new request of our own.
#[derive(Debug, Default)]
pub struct SMPInitiators(HashSet<String>);

impl SMPInitiators {
    #[must_use]
    pub fn contains(&self, peer: &str) -> bool {
        self.0.contains(peer)
    }

    /// `remove` forgets the peer as initiator. The session manager never removes initiators: that
    /// is left to the client, e.g. once the request is answered or dismissed.
    pub fn remove(&mut self, peer: &str) -> bool {
        self.0.remove(peer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, peer: &str) {
        self.0.insert(peer.to_owned());
    }
}

/// `handle_tlvs` processes the SMP records among the TLVs of one incoming message.
///
/// Each tag is looked up independently, in `Tag::SCAN_ORDER`, and is checked against the state the
/// exchange was in before this message. A message is not assumed to carry at most one SMP record.
/// Violations are resolved by aborting the exchange and are never reported as errors.
pub fn handle_tlvs(
    engine: &mut dyn CryptoEngine,
    host: &dyn Host,
    context: &mut ConversationContext,
    tlvs: &[TLV],
    initiators: &mut SMPInitiators,
) {
    let expected = context.smp();
    for tag in Tag::SCAN_ORDER {
        let Some(tlv) = tlvs.iter().find(|t| t.0 == tag.tlv_type()) else {
            continue;
        };
        let (action, next) = transition(expected, tag);
        log::trace!("SMP {:?} in state {:?}: {:?}", tag, expected, action);
        match action {
            Action::Initiated => {
                initiators.insert(context.peer());
                host.on_debug(&initiated_notice(context.peer(), tag, tlv));
            }
            Action::Proceed => {}
            Action::Conclude => {
                if context.is_trusted() {
                    log::info!("{}: SMP completed, peer authenticated", context.peer());
                    host.on_debug(NOTICE_SMP_SUCCESSFUL);
                } else {
                    log::info!("{}: SMP completed, peer not authenticated", context.peer());
                    host.on_debug(NOTICE_SMP_UNSUCCESSFUL);
                }
            }
            Action::Abort => {
                log::warn!(
                    "{}: SMP {:?} received while expecting {:?}, aborting SMP",
                    context.peer(),
                    tag,
                    expected
                );
                if let Err(code) = engine.abort_smp(host, context) {
                    log::warn!("{}: failed to abort SMP (code {})", context.peer(), code.0);
                }
            }
            Action::Reset => {
                host.on_debug(NOTICE_SMP_ABORTED);
            }
        }
        context.expect(next);
        if action == Action::Initiated {
            context.request_smp();
        }
    }
}

fn initiated_notice(peer: &str, tag: Tag, tlv: &TLV) -> String {
    if tag == Tag::SMP1Q {
        if !tlv.1.contains(&0) {
            log::warn!("{peer}: SMP question is not terminated, ignoring question");
            return format!("{peer} initiated SMP with secret");
        }
        let mut decoder = OTRDecoder::new(&tlv.1);
        let question = decoder.read_bytes_null_terminated();
        // The remainder is SMP data for the engine.
        decoder.skip();
        if !question.is_empty() {
            return format!(
                "{peer} initiated SMP with question: {}",
                String::from_utf8_lossy(&question)
            );
        }
    }
    format!("{peer} initiated SMP with secret")
}

#[cfg(test)]
mod tests {
    use crate::{
        encoding::{OTREncoder, TLV},
        testing::{self, TestEngine, TestHost},
        ConversationContext, TLV_TYPE_0_PADDING, TLV_TYPE_1_DISCONNECT,
    };

    use super::{
        handle_tlvs, is_smp_tlv, transition, Action, SMPInitiators, SMPState, Tag,
        NOTICE_SMP_ABORTED, NOTICE_SMP_SUCCESSFUL, NOTICE_SMP_UNSUCCESSFUL,
    };

    const STATES: [SMPState; 4] = [
        SMPState::Expect1,
        SMPState::Expect2,
        SMPState::Expect3,
        SMPState::Expect4,
    ];

    fn matching(state: SMPState, tag: Tag) -> bool {
        matches!(
            (state, tag),
            (SMPState::Expect1, Tag::SMP1 | Tag::SMP1Q)
                | (SMPState::Expect2, Tag::SMP2)
                | (SMPState::Expect3, Tag::SMP3)
                | (SMPState::Expect4, Tag::SMP4)
        )
    }

    fn tlv(tag: Tag) -> TLV {
        TLV(tag.tlv_type(), vec![0u8; 8])
    }

    struct Fixture {
        engine: TestEngine,
        host: TestHost,
        context: ConversationContext,
        initiators: SMPInitiators,
    }

    impl Fixture {
        fn new(state: SMPState) -> Self {
            let mut context = testing::context("alice@example.org", "bob@example.org");
            context.expect(state);
            Self {
                engine: TestEngine::default(),
                host: TestHost::default(),
                context,
                initiators: SMPInitiators::default(),
            }
        }

        fn handle(&mut self, tlvs: &[TLV]) {
            handle_tlvs(
                &mut self.engine,
                &self.host,
                &mut self.context,
                tlvs,
                &mut self.initiators,
            );
        }

        fn aborts(&self) -> usize {
            self.engine.journal().aborts
        }
    }

    #[test]
    fn test_tag_classification() {
        for tag in Tag::SCAN_ORDER {
            assert_eq!(Some(tag), Tag::from_type(tag.tlv_type()));
            assert!(is_smp_tlv(&tlv(tag)));
        }
        assert_eq!(None, Tag::from_type(TLV_TYPE_0_PADDING));
        assert_eq!(None, Tag::from_type(TLV_TYPE_1_DISCONNECT));
        assert_eq!(None, Tag::from_type(8));
    }

    #[test]
    fn test_transition_table() {
        for state in STATES {
            for tag in Tag::SCAN_ORDER {
                let (action, next) = transition(state, tag);
                let expected = match (state, tag) {
                    (_, Tag::Abort) => (Action::Reset, SMPState::Expect1),
                    (SMPState::Expect1, Tag::SMP1 | Tag::SMP1Q) => {
                        (Action::Initiated, SMPState::Expect1)
                    }
                    (SMPState::Expect2, Tag::SMP2) => (Action::Proceed, SMPState::Expect4),
                    (SMPState::Expect3, Tag::SMP3) | (SMPState::Expect4, Tag::SMP4) => {
                        (Action::Conclude, SMPState::Expect1)
                    }
                    _ => (Action::Abort, SMPState::Expect1),
                };
                assert_eq!(expected, (action, next), "{state:?} + {tag:?}");
            }
        }
    }

    #[test]
    fn test_matching_tag_never_aborts() {
        for state in STATES {
            for tag in Tag::SCAN_ORDER.into_iter().filter(|t| matching(state, *t)) {
                let mut fixture = Fixture::new(state);
                fixture.handle(&[tlv(tag)]);
                assert_eq!(0, fixture.aborts(), "{state:?} + {tag:?}");
                assert_eq!(transition(state, tag).1, fixture.context.smp());
            }
        }
    }

    #[test]
    fn test_mismatched_tag_aborts_once() {
        for state in STATES {
            for tag in Tag::SCAN_ORDER
                .into_iter()
                .filter(|t| *t != Tag::Abort && !matching(state, *t))
            {
                let mut fixture = Fixture::new(state);
                fixture.handle(&[tlv(tag)]);
                assert_eq!(1, fixture.aborts(), "{state:?} + {tag:?}");
                assert_eq!(SMPState::Expect1, fixture.context.smp());
                assert!(fixture.initiators.is_empty());
                assert!(fixture.host.debugs().is_empty());
            }
        }
    }

    #[test]
    fn test_abort_record_resets_without_abort() {
        for state in STATES {
            let mut fixture = Fixture::new(state);
            fixture.handle(&[tlv(Tag::Abort)]);
            assert_eq!(0, fixture.aborts());
            assert_eq!(SMPState::Expect1, fixture.context.smp());
            assert_eq!(vec![NOTICE_SMP_ABORTED.to_owned()], fixture.host.debugs());
        }
    }

    #[test]
    fn test_consecutive_abort_records() {
        let mut fixture = Fixture::new(SMPState::Expect3);
        fixture.handle(&[tlv(Tag::Abort)]);
        assert_eq!(SMPState::Expect1, fixture.context.smp());
        fixture.handle(&[tlv(Tag::Abort)]);
        assert_eq!(SMPState::Expect1, fixture.context.smp());
        assert_eq!(0, fixture.aborts());
    }

    #[test]
    fn test_smp1_marks_initiator() {
        let mut fixture = Fixture::new(SMPState::Expect1);
        fixture.handle(&[tlv(Tag::SMP1)]);
        assert!(fixture.initiators.contains("bob@example.org"));
        assert_eq!(SMPState::Expect1, fixture.context.smp());
        assert_eq!(0, fixture.aborts());
        assert_eq!(
            vec!["bob@example.org initiated SMP with secret".to_owned()],
            fixture.host.debugs()
        );
    }

    #[test]
    fn test_smp1q_reports_question() {
        let mut fixture = Fixture::new(SMPState::Expect1);
        let content = OTREncoder::new()
            .write_bytes_null_terminated(b"Where did we meet?")
            .write(&[0u8, 0, 0, 6, 1, 2, 3])
            .to_vec();
        fixture.handle(&[TLV(Tag::SMP1Q.tlv_type(), content)]);
        assert!(fixture.initiators.contains("bob@example.org"));
        assert_eq!(
            vec!["bob@example.org initiated SMP with question: Where did we meet?".to_owned()],
            fixture.host.debugs()
        );
    }

    #[test]
    fn test_smp1q_without_terminator() {
        let mut fixture = Fixture::new(SMPState::Expect1);
        fixture.handle(&[TLV(Tag::SMP1Q.tlv_type(), vec![0xc3, 0x28, 0xff, 0x17, 0x42])]);
        assert!(fixture.initiators.contains("bob@example.org"));
        assert_eq!(
            vec!["bob@example.org initiated SMP with secret".to_owned()],
            fixture.host.debugs()
        );
    }

    #[test]
    fn test_smp1_request_pending_until_next_transition() {
        let mut fixture = Fixture::new(SMPState::Expect1);
        fixture.handle(&[tlv(Tag::SMP1)]);
        assert!(fixture.context.smp_requested());
        fixture.handle(&[tlv(Tag::Abort)]);
        assert!(!fixture.context.smp_requested());
        assert!(fixture.initiators.contains("bob@example.org"));
    }

    #[test]
    fn test_smp1_with_abort_record_not_pending() {
        let mut fixture = Fixture::new(SMPState::Expect1);
        fixture.handle(&[tlv(Tag::SMP1), tlv(Tag::Abort)]);
        assert!(!fixture.context.smp_requested());
        assert_eq!(SMPState::Expect1, fixture.context.smp());
    }

    #[test]
    fn test_smp2_in_expect2() {
        let mut fixture = Fixture::new(SMPState::Expect2);
        fixture.handle(&[tlv(Tag::SMP2)]);
        assert_eq!(SMPState::Expect4, fixture.context.smp());
        assert_eq!(0, fixture.aborts());
        assert!(fixture.host.debugs().is_empty());
    }

    #[test]
    fn test_smp2_in_expect3() {
        let mut fixture = Fixture::new(SMPState::Expect3);
        fixture.handle(&[tlv(Tag::SMP2)]);
        assert_eq!(1, fixture.aborts());
        assert_eq!(SMPState::Expect1, fixture.context.smp());
    }

    #[test]
    fn test_smp4_trusted_success() {
        let mut fixture = Fixture::new(SMPState::Expect4);
        fixture
            .context
            .set_active_fingerprint(testing::fingerprint(Some("smp")));
        fixture.handle(&[tlv(Tag::SMP4)]);
        assert_eq!(SMPState::Expect1, fixture.context.smp());
        assert_eq!(vec![NOTICE_SMP_SUCCESSFUL.to_owned()], fixture.host.debugs());
    }

    #[test]
    fn test_smp3_untrusted_unsuccessful() {
        let mut fixture = Fixture::new(SMPState::Expect3);
        fixture
            .context
            .set_active_fingerprint(testing::fingerprint(Some("")));
        fixture.handle(&[tlv(Tag::SMP3)]);
        assert_eq!(SMPState::Expect1, fixture.context.smp());
        assert_eq!(vec![NOTICE_SMP_UNSUCCESSFUL.to_owned()], fixture.host.debugs());
    }

    #[test]
    fn test_smp4_without_fingerprint_unsuccessful() {
        let mut fixture = Fixture::new(SMPState::Expect4);
        fixture.handle(&[tlv(Tag::SMP4)]);
        assert_eq!(vec![NOTICE_SMP_UNSUCCESSFUL.to_owned()], fixture.host.debugs());
    }

    #[test]
    fn test_unrelated_tlvs_ignored() {
        let mut fixture = Fixture::new(SMPState::Expect2);
        fixture.handle(&[
            TLV(TLV_TYPE_0_PADDING, vec![0u8; 32]),
            TLV(TLV_TYPE_1_DISCONNECT, Vec::new()),
            TLV(42, vec![1, 2, 3]),
        ]);
        assert_eq!(SMPState::Expect2, fixture.context.smp());
        assert_eq!(0, fixture.aborts());
        assert!(fixture.host.debugs().is_empty());
    }

    #[test]
    fn test_tags_checked_against_initial_state() {
        // SMP1 is out of place and aborts, but SMP2 is still evaluated against Expect2.
        let mut fixture = Fixture::new(SMPState::Expect2);
        fixture.handle(&[tlv(Tag::SMP2), tlv(Tag::SMP1)]);
        assert_eq!(1, fixture.aborts());
        assert_eq!(SMPState::Expect4, fixture.context.smp());
    }

    #[test]
    fn test_abort_record_processed_last() {
        let mut fixture = Fixture::new(SMPState::Expect2);
        fixture.handle(&[tlv(Tag::Abort), tlv(Tag::SMP2)]);
        assert_eq!(0, fixture.aborts());
        assert_eq!(SMPState::Expect1, fixture.context.smp());
        assert_eq!(vec![NOTICE_SMP_ABORTED.to_owned()], fixture.host.debugs());
    }

    #[test]
    fn test_each_tag_looked_up_once() {
        let mut fixture = Fixture::new(SMPState::Expect3);
        fixture.handle(&[tlv(Tag::SMP2), tlv(Tag::SMP2)]);
        assert_eq!(1, fixture.aborts());
    }

    #[test]
    fn test_failed_abort_still_resets() {
        let mut fixture = Fixture::new(SMPState::Expect4);
        fixture.engine.fail_abort();
        fixture.handle(&[tlv(Tag::SMP3)]);
        assert_eq!(1, fixture.aborts());
        assert_eq!(SMPState::Expect1, fixture.context.smp());
    }
}
