use matches::assert_matches;
use pacsnet_dimse::{
    message::send_message, verify, AssociateDecision, Command, DimseClient, DispatchOutcome,
    Error, Handler, Server, Status, VerificationFailureReason,
};
use pacsnet_ul::association::{AcceptAny, AccessControl};
use pacsnet_ul::pdu::{
    AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason, AssociationRJSource,
};
use pacsnet_ul::{ClientAssociationOptions, ServerAssociationOptions};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

static SCU_AE_TITLE: &str = "STORE-SCU";
static SCP_AE_TITLE: &str = "STORE-SCP";

static IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
static VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";
static CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

fn scp_options() -> ServerAssociationOptions<'static, AcceptAny> {
    ServerAssociationOptions::new()
        .ae_title(SCP_AE_TITLE)
        .with_presentation_context(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])
        .with_presentation_context(CT_IMAGE_STORAGE, vec![IMPLICIT_VR_LE])
}

fn scu_options() -> ClientAssociationOptions<'static> {
    ClientAssociationOptions::new()
        .calling_ae_title(SCU_AE_TITLE)
        .called_ae_title(SCP_AE_TITLE)
}

/// Serve a single connection on a background thread.
fn spawn_scp<A, F>(
    options: ServerAssociationOptions<'static, A>,
    handler_factory: F,
) -> (JoinHandle<DispatchOutcome>, SocketAddr)
where
    A: AccessControl + Send + Sync + 'static,
    F: Fn() -> Handler + Send + Sync + 'static,
{
    let listener = TcpListener::bind("localhost:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(options, handler_factory);
    let handle = std::thread::spawn(move || {
        let (stream, _addr) = listener.accept().unwrap();
        server.handle_connection(stream)
    });
    (handle, addr)
}

#[test]
fn echo_against_verification_handler() {
    let (scp, addr) = spawn_scp(scp_options(), Handler::verification);

    let status = verify(scu_options(), addr).unwrap();
    assert_eq!(status, Status::SUCCESS);

    assert_eq!(scp.join().unwrap(), DispatchOutcome::Released);
}

#[test]
fn verification_with_wrong_called_ae_title() {
    let options = scp_options().accept_called_ae_title();
    let (scp, addr) = spawn_scp(options, Handler::verification);

    let failure = verify(scu_options().called_ae_title("SOMEONE-ELSE"), addr).unwrap_err();
    assert_eq!(failure.reason(), VerificationFailureReason::AssociationRejected);

    assert_eq!(scp.join().unwrap(), DispatchOutcome::Rejected);
}

#[test]
fn handler_rejects_association() {
    let (scp, addr) = spawn_scp(scp_options(), || {
        Handler::verification().on_associate_request(|parameters| {
            assert_eq!(parameters.calling_ae_title, SCU_AE_TITLE);
            AssociateDecision::Reject(AssociationRJ {
                result: AssociationRJResult::Transient,
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::NoReasonGiven,
                ),
            })
        })
    });

    let failure = verify(scu_options(), addr).unwrap_err();
    assert_eq!(failure.reason(), VerificationFailureReason::AssociationRejected);
    assert_eq!(scp.join().unwrap(), DispatchOutcome::Rejected);
}

#[test]
fn verification_without_accepted_context() {
    let options = ServerAssociationOptions::new()
        .ae_title(SCP_AE_TITLE)
        .with_abstract_syntax(CT_IMAGE_STORAGE)
        .reject_without_accepted_contexts(true);
    let (scp, addr) = spawn_scp(options, Handler::verification);

    let failure = verify(scu_options(), addr).unwrap_err();
    assert_eq!(failure.reason(), VerificationFailureReason::AssociationRejected);
    assert_eq!(scp.join().unwrap(), DispatchOutcome::Rejected);
}

#[test]
fn failure_status_is_a_verification_fault() {
    let (scp, addr) = spawn_scp(scp_options(), || {
        Handler::new().on_request(|ctx, message| ctx.respond(&message, Status::PROCESSING_FAILURE))
    });

    let failure = verify(scu_options(), addr).unwrap_err();
    assert_eq!(
        failure.reason(),
        VerificationFailureReason::FailureStatus(0x0110)
    );
    assert_eq!(scp.join().unwrap(), DispatchOutcome::Released);
}

#[test]
fn store_then_echo_on_one_association() {
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    let (scp, addr) = spawn_scp(scp_options(), move || {
        let tx = tx.lock().unwrap().clone();
        Handler::new().on_request(move |ctx, message| {
            if message.command.command_field()? == pacsnet_dimse::CommandField::CStoreRq {
                assert_eq!(
                    ctx.transfer_syntax(message.presentation_context_id),
                    Some(IMPLICIT_VR_LE)
                );
                tx.send((
                    message.command.affected_sop_instance_uid(),
                    message.dataset.clone(),
                ))
                .unwrap();
            }
            ctx.respond(&message, Status::SUCCESS)
        })
    });

    let association = scu_options()
        .with_presentation_context(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])
        .with_presentation_context(CT_IMAGE_STORAGE, vec![IMPLICIT_VR_LE])
        .max_pdu_length(4096)
        .establish(addr)
        .unwrap();
    let mut client = DimseClient::new(association);

    let ct = client.presentation_context_for(CT_IMAGE_STORAGE).unwrap();
    assert_eq!(ct, 3);
    let dataset: Vec<u8> = (0..10_000_u32).map(|x| x as u8).collect();
    let status = client
        .store(ct, CT_IMAGE_STORAGE, "1.2.3.4.5", &dataset)
        .unwrap();
    assert_eq!(status, Status::SUCCESS);
    assert!(client.pending_requests().is_empty());

    assert_eq!(client.echo().unwrap(), Status::SUCCESS);
    client.release().unwrap();

    let (sop_instance_uid, received) = rx.recv().unwrap();
    assert_eq!(sop_instance_uid.as_deref(), Some("1.2.3.4.5"));
    assert_eq!(received, Some(dataset));
    assert_eq!(scp.join().unwrap(), DispatchOutcome::Released);
}

#[test]
fn unmatched_response_is_not_delivered() {
    let responses = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&responses);
    let (scp, addr) = spawn_scp(scp_options(), move || {
        let counter = Arc::clone(&counter);
        Handler::verification().on_response(move |_ctx, _message| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let mut association = scu_options()
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .establish(addr)
        .unwrap();
    // answer a request which was never made
    let stray = Command::response_to(&Command::echo_rq(42), Status::SUCCESS, false).unwrap();
    send_message(&mut association, 1, &stray, None).unwrap();

    let mut client = DimseClient::new(association);
    assert_eq!(client.echo().unwrap(), Status::SUCCESS);
    client.release().unwrap();

    assert_eq!(scp.join().unwrap(), DispatchOutcome::Released);
    assert_eq!(responses.load(Ordering::SeqCst), 0);
}

#[test]
fn abort_is_reported_once() {
    let aborts = Arc::new(AtomicUsize::new(0));
    let network_errors = Arc::new(AtomicUsize::new(0));
    let (a, n) = (Arc::clone(&aborts), Arc::clone(&network_errors));
    let (scp, addr) = spawn_scp(scp_options(), move || {
        let (a, n) = (Arc::clone(&a), Arc::clone(&n));
        Handler::verification()
            .on_abort(move |_source| {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .on_network_error(move |_e| {
                n.fetch_add(1, Ordering::SeqCst);
            })
    });

    let association = scu_options()
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .establish(addr)
        .unwrap();
    DimseClient::new(association).abort().unwrap();

    assert_eq!(scp.join().unwrap(), DispatchOutcome::Aborted);
    assert_eq!(aborts.load(Ordering::SeqCst), 1);
    assert_eq!(network_errors.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_callback_after_abort_is_an_abort() {
    let aborts = Arc::new(AtomicUsize::new(0));
    let network_errors = Arc::new(AtomicUsize::new(0));
    let (a, n) = (Arc::clone(&aborts), Arc::clone(&network_errors));
    let (scp, addr) = spawn_scp(scp_options(), move || {
        let (a, n) = (Arc::clone(&a), Arc::clone(&n));
        Handler::new()
            .on_request(|ctx, message| {
                ctx.abort();
                // the association is gone, so this fails
                ctx.respond(&message, Status::SUCCESS)
            })
            .on_abort(move |_source| {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .on_network_error(move |_e| {
                n.fetch_add(1, Ordering::SeqCst);
            })
    });

    let association = scu_options()
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .establish(addr)
        .unwrap();
    let mut client = DimseClient::new(association);
    assert!(client.echo().is_err());

    assert_eq!(scp.join().unwrap(), DispatchOutcome::Aborted);
    assert_eq!(aborts.load(Ordering::SeqCst), 1);
    assert_eq!(network_errors.load(Ordering::SeqCst), 0);
}

#[test]
fn request_reusing_pending_message_id_is_refused() {
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let (scp, addr) = spawn_scp(scp_options(), move || {
        let counter = Arc::clone(&counter);
        // never answers, so every request stays pending
        Handler::new().on_request(move |_ctx, _message| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let mut association = scu_options()
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .establish(addr)
        .unwrap();
    send_message(&mut association, 1, &Command::echo_rq(7), None).unwrap();

    let mut client = DimseClient::new(association);
    let status = client.echo_with_message_id(7).unwrap();
    assert_eq!(status, Status::DUPLICATE_INVOCATION);
    client.release().unwrap();

    assert_eq!(scp.join().unwrap(), DispatchOutcome::Released);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[test]
fn lost_connection_is_a_network_error() {
    let network_errors = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&network_errors);
    let (scp, addr) = spawn_scp(scp_options(), move || {
        let n = Arc::clone(&n);
        Handler::verification().on_network_error(move |_e| {
            n.fetch_add(1, Ordering::SeqCst);
        })
    });

    let stream = TcpStream::connect(addr).unwrap();
    let raw = stream.try_clone().unwrap();
    let association = scu_options()
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .establish_with(stream)
        .unwrap();
    raw.shutdown(Shutdown::Both).unwrap();

    assert_eq!(scp.join().unwrap(), DispatchOutcome::NetworkError);
    assert_eq!(network_errors.load(Ordering::SeqCst), 1);
    drop(association);
}

#[test]
fn dimse_timeout_keeps_association_open() {
    let timeouts = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&timeouts);
    let options = scp_options().dimse_timeout(Some(Duration::from_millis(100)));
    let (scp, addr) = spawn_scp(options, move || {
        let t = Arc::clone(&t);
        Handler::verification().on_dimse_timeout(move || {
            t.fetch_add(1, Ordering::SeqCst);
        })
    });

    let association = scu_options()
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .establish(addr)
        .unwrap();
    let mut client = DimseClient::new(association);
    std::thread::sleep(Duration::from_millis(350));
    assert_eq!(client.echo().unwrap(), Status::SUCCESS);
    client.release().unwrap();

    assert_eq!(scp.join().unwrap(), DispatchOutcome::Released);
    assert!(timeouts.load(Ordering::SeqCst) >= 1);
}

#[test]
fn store_without_negotiated_context() {
    let (scp, addr) = spawn_scp(scp_options(), Handler::verification);

    let association = scu_options()
        .with_abstract_syntax(VERIFICATION_SOP_CLASS)
        .establish(addr)
        .unwrap();
    let client = DimseClient::new(association);
    assert_matches!(
        client.presentation_context_for(CT_IMAGE_STORAGE),
        Err(Error::NoPresentationContext { .. })
    );
    client.release().unwrap();
    assert_eq!(scp.join().unwrap(), DispatchOutcome::Released);
}

#[test]
fn server_accepts_concurrent_associations() {
    let listener = TcpListener::bind("localhost:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(scp_options(), Handler::verification);

    let clients: Vec<_> = (0..3)
        .map(|_| std::thread::spawn(move || verify(scu_options(), addr).map_err(|e| e.reason())))
        .collect();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let (stream, _addr) = listener.accept().unwrap();
        handles.push(server.spawn(stream).unwrap());
    }
    for client in clients {
        assert_eq!(client.join().unwrap().unwrap(), Status::SUCCESS);
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), DispatchOutcome::Released);
    }
}
