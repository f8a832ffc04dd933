//! Association tests over an in-memory transport.
use std::io::{Cursor, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use matches::assert_matches;
use rstest::rstest;

use super::*;
use crate::pdu::{
    read_pdu, write_pdu, AssociationRJResult, AssociationRJServiceUserReason, AssociationRJSource,
    AssociationRQ, PDataValue, PresentationContextProposed, PresentationContextResult,
    PresentationContextResultReason, APPLICATION_CONTEXT_NAME, MINIMUM_PDU_SIZE,
};

const VERIFICATION: &str = "1.2.840.10008.1.1";
const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";

/// A scripted transport.
///
/// Reads are served from a fixed inbound script,
/// writes are captured,
/// and every call to `close` is counted.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    inbound: Arc<Mutex<Cursor<Vec<u8>>>>,
    outbound: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
    /// time out instead of reporting end of stream once the script runs out
    stall: bool,
}

impl MockTransport {
    pub(crate) fn new(pdus: &[Pdu]) -> Self {
        let mut inbound = Vec::new();
        for pdu in pdus {
            write_pdu(&mut inbound, pdu).unwrap();
        }
        Self::from_bytes(inbound)
    }

    pub(crate) fn from_bytes(inbound: Vec<u8>) -> Self {
        MockTransport {
            inbound: Arc::new(Mutex::new(Cursor::new(inbound))),
            ..Default::default()
        }
    }

    pub(crate) fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// All PDUs written so far.
    pub(crate) fn sent(&self) -> Vec<Pdu> {
        let bytes = self.outbound.lock().unwrap().clone();
        let mut reader = &bytes[..];
        let mut pdus = Vec::new();
        while !reader.is_empty() {
            pdus.push(read_pdu(&mut reader, MAXIMUM_PDU_SIZE, false).unwrap());
        }
        pdus
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut inbound = self.inbound.lock().unwrap();
        if inbound.position() as usize >= inbound.get_ref().len() && self.stall {
            return Err(ErrorKind::WouldBlock.into());
        }
        inbound.read(buf)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.outbound.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn close(&mut self) -> std::io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> std::io::Result<()> {
        Ok(())
    }
}

pub(crate) fn echo_request(max_pdu_length: u32) -> Pdu {
    Pdu::AssociationRQ(AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "THIS-SCP".to_string(),
        application_context_name: APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![PresentationContextProposed {
            id: 1,
            abstract_syntax: VERIFICATION.to_string(),
            transfer_syntaxes: vec![IMPLICIT_VR_LE.to_string()],
        }],
        user_variables: vec![UserVariableItem::MaxLength(max_pdu_length)],
    })
}

fn echo_accept() -> Pdu {
    Pdu::AssociationAC(AssociationAC {
        protocol_version: 1,
        calling_ae_title: "THIS-SCU".to_string(),
        called_ae_title: "ANY-SCP".to_string(),
        application_context_name: APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![PresentationContextResult {
            id: 1,
            reason: PresentationContextResultReason::Acceptance,
            transfer_syntax: IMPLICIT_VR_LE.to_string(),
        }],
        user_variables: vec![UserVariableItem::MaxLength(MINIMUM_PDU_SIZE)],
    })
}

fn scp() -> ServerAssociationOptions<'static> {
    ServerAssociationOptions::new().with_abstract_syntax(VERIFICATION)
}

fn scu() -> ClientAssociationOptions<'static> {
    ClientAssociationOptions::new().with_presentation_context(VERIFICATION, vec![IMPLICIT_VR_LE])
}

fn data(len: usize) -> Pdu {
    Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![0; len],
        }],
    }
}

#[test]
fn acceptor_accepts_and_releases() {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE), Pdu::ReleaseRQ]);
    let mut association = scp().receive_request(transport.clone()).unwrap();
    assert_eq!(association.state(), State::Requesting);
    assert_eq!(association.peer_ae_title(), "STORE-SCU");
    assert_eq!(association.peer_max_pdu_length(), MINIMUM_PDU_SIZE);

    association.accept().unwrap();
    assert_eq!(association.state(), State::Open);
    assert_eq!(association.accepted_presentation_contexts().count(), 1);

    assert_eq!(association.receive().unwrap(), Pdu::ReleaseRQ);
    assert_eq!(association.state(), State::Releasing);
    association.respond_release().unwrap();
    assert_eq!(association.state(), State::Closed);
    drop(association);

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_matches!(&sent[0], Pdu::AssociationAC(ac) if ac.presentation_contexts.len() == 1);
    assert_eq!(sent[1], Pdu::ReleaseRP);
    assert_eq!(transport.closes(), 1);
}

/// Bring an acceptor association to the given state.
fn acceptor_in(state: State, transport: &MockTransport) -> Association<MockTransport> {
    let mut association = scp().receive_request(transport.clone()).unwrap();
    if state == State::Requesting {
        return association;
    }
    association.accept().unwrap();
    if state == State::Releasing {
        association.receive().unwrap();
    }
    assert_eq!(association.state(), state);
    association
}

#[rstest]
#[case(State::Requesting)]
#[case(State::Open)]
#[case(State::Releasing)]
fn abort_is_idempotent(#[case] state: State) {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE), Pdu::ReleaseRQ]);
    let mut association = acceptor_in(state, &transport);

    association.abort().unwrap();
    assert_eq!(association.state(), State::Closed);
    association.abort().unwrap();
    assert_eq!(association.state(), State::Closed);
    drop(association);

    assert_eq!(transport.closes(), 1);
    let aborts = transport
        .sent()
        .into_iter()
        .filter(|pdu| matches!(pdu, Pdu::AbortRQ { .. }))
        .count();
    assert_eq!(aborts, 1);
    assert_eq!(
        transport.sent().last(),
        Some(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser
        })
    );
}

#[test]
fn dropping_an_open_association_aborts_it() {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE)]);
    let association = acceptor_in(State::Open, &transport);
    drop(association);
    assert_eq!(transport.closes(), 1);
    assert_matches!(transport.sent().last(), Some(Pdu::AbortRQ { .. }));
}

#[test]
fn artim_expiry_while_awaiting_request() {
    let transport = MockTransport::default().stalling();
    let err = scp().receive_request(transport.clone()).unwrap_err();
    assert_matches!(
        err,
        Error::ArtimExpired {
            state: State::Idle,
            ..
        }
    );
    assert_eq!(transport.closes(), 1);
    assert!(transport.sent().is_empty());
}

#[test]
fn artim_expiry_while_requesting() {
    let transport = MockTransport::default().stalling();
    let err = scu().establish_with(transport.clone()).unwrap_err();
    assert_matches!(
        err,
        Error::ArtimExpired {
            state: State::Requesting,
            ..
        }
    );
    assert_eq!(transport.closes(), 1);
    let sent = transport.sent();
    assert_matches!(sent[0], Pdu::AssociationRQ(_));
    assert_matches!(sent[1], Pdu::AbortRQ { .. });
}

#[test]
fn dimse_timeout_keeps_association_open() {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE)]).stalling();
    let mut association = scp()
        .dimse_timeout(Some(Duration::from_millis(10)))
        .establish(transport.clone())
        .unwrap();
    assert_matches!(association.receive(), Err(Error::DimseTimeout { .. }));
    assert_eq!(association.state(), State::Open);
    assert_eq!(transport.closes(), 0);
}

#[test]
fn unexpected_pdu_aborts() {
    let transport = MockTransport::new(&[
        echo_request(MINIMUM_PDU_SIZE),
        echo_request(MINIMUM_PDU_SIZE),
    ]);
    let mut association = scp().establish(transport.clone()).unwrap();
    let err = association.receive().unwrap_err();
    assert!(err.is_protocol_violation());
    assert_matches!(
        err,
        Error::UnexpectedPdu {
            state: State::Open,
            ..
        }
    );
    assert_eq!(association.state(), State::Closed);
    assert_eq!(transport.closes(), 1);
    assert_eq!(
        transport.sent().last(),
        Some(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu)
        })
    );
}

#[test]
fn malformed_pdu_aborts() {
    let mut inbound = Vec::new();
    write_pdu(&mut inbound, &echo_request(MINIMUM_PDU_SIZE)).unwrap();
    inbound.extend_from_slice(&[
        0x04, 0x00, 0x00, 0x00, 0x00, 0x06, //
        0x00, 0x00, 0x00, 0x01, 0x01, 0x03,
    ]);
    let transport = MockTransport::from_bytes(inbound);
    let mut association = scp().establish(transport.clone()).unwrap();
    assert_matches!(association.receive(), Err(Error::MalformedPdu { .. }));
    assert_eq!(association.state(), State::Closed);
    assert_eq!(transport.closes(), 1);
    assert_matches!(transport.sent().last(), Some(Pdu::AbortRQ { .. }));
}

#[test]
fn peer_abort_closes() {
    let transport = MockTransport::new(&[
        echo_request(MINIMUM_PDU_SIZE),
        Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        },
    ]);
    let mut association = scp().establish(transport.clone()).unwrap();
    assert_matches!(association.receive(), Ok(Pdu::AbortRQ { .. }));
    assert_eq!(association.state(), State::Closed);
    assert_matches!(association.receive(), Err(Error::Closed { .. }));
    drop(association);
    assert_eq!(transport.closes(), 1);
}

#[test]
fn connection_closed_by_peer() {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE)]);
    let mut association = scp().establish(transport.clone()).unwrap();
    let err = association.receive().unwrap_err();
    assert!(err.is_network_error());
    assert_eq!(association.state(), State::Closed);
    assert_eq!(transport.closes(), 1);
}

#[test]
fn oversized_pdu_is_refused() {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE)]);
    let mut association = scp().establish(transport.clone()).unwrap();
    assert_matches!(
        association.send(&data(MINIMUM_PDU_SIZE as usize)),
        Err(Error::SendTooLongPdu {
            max_pdu_length: MINIMUM_PDU_SIZE,
            ..
        })
    );
    assert_eq!(association.state(), State::Open);

    // the same payload goes through once fragmented
    association
        .send_pdata(1, PDataValueType::Data, &[0; 10_000])
        .unwrap();
    let pdus = transport.sent();
    assert_eq!(pdus.len(), 1 + 3);
}

#[test]
fn send_pdata_on_unknown_context() {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE)]);
    let mut association = scp().establish(transport).unwrap();
    assert_matches!(
        association.send_pdata(3, PDataValueType::Command, &[1, 2]),
        Err(Error::UnknownPresentationContext { id: 3, .. })
    );
}

#[test]
fn called_ae_title_mismatch_is_rejected() {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE)]);
    let err = scp()
        .ae_title("OTHER-SCP")
        .accept_called_ae_title()
        .establish(transport.clone())
        .unwrap_err();
    let expected = AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAeTitleNotRecognized,
        ),
    };
    assert_matches!(err, Error::Rejected { association_rj, .. } if association_rj == expected);
    assert_eq!(transport.sent(), vec![Pdu::AssociationRJ(expected)]);
    assert_eq!(transport.closes(), 1);
}

#[test]
fn rejects_without_accepted_contexts_when_asked() {
    let transport = MockTransport::new(&[echo_request(MINIMUM_PDU_SIZE)]);
    let err = ServerAssociationOptions::new()
        .with_abstract_syntax("1.2.840.10008.5.1.4.1.1.7")
        .reject_without_accepted_contexts(true)
        .establish(transport.clone())
        .unwrap_err();
    assert_matches!(err, Error::Rejected { .. });
    assert_matches!(transport.sent().as_slice(), [Pdu::AssociationRJ(_)]);
    assert_eq!(transport.closes(), 1);
}

#[test]
fn requestor_establishes_and_releases() {
    let transport = MockTransport::new(&[echo_accept(), Pdu::ReleaseRP]);
    let mut association = scu().establish_with(transport.clone()).unwrap();
    assert_eq!(association.state(), State::Open);
    assert_eq!(association.peer_max_pdu_length(), MINIMUM_PDU_SIZE);
    assert_eq!(
        association.presentation_context(1).map(|pc| pc.abstract_syntax.as_str()),
        Some(VERIFICATION)
    );

    association.release().unwrap();
    assert_eq!(association.state(), State::Closed);
    drop(association);

    let sent = transport.sent();
    assert_matches!(&sent[0], Pdu::AssociationRQ(rq) if rq.presentation_contexts[0].id == 1);
    assert_eq!(sent[1], Pdu::ReleaseRQ);
    assert_eq!(transport.closes(), 1);
}

#[test]
fn requestor_rejected() {
    let association_rj = AssociationRJ {
        result: AssociationRJResult::Transient,
        source: AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::NoReasonGiven),
    };
    let transport = MockTransport::new(&[Pdu::AssociationRJ(association_rj)]);
    let err = scu().establish_with(transport.clone()).unwrap_err();
    assert_matches!(err, Error::Rejected { association_rj: rj, .. } if rj == association_rj);
    assert_eq!(transport.closes(), 1);
}

#[test]
fn requestor_release_interrupted_by_data() {
    let transport = MockTransport::new(&[echo_accept(), data(4)]);
    let mut association = scu().establish_with(transport.clone()).unwrap();
    assert_matches!(association.release(), Err(Error::UnexpectedPdu { .. }));
    assert_eq!(association.state(), State::Closed);
    assert_eq!(transport.closes(), 1);
}
