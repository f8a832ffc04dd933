//! Accepting associations, one thread each.
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use pacsnet_ul::association::{
    AcceptAny, AccessControl, Error as UlError, ServerAssociationOptions, Transport,
};
use snafu::{IntoError, Report, ResultExt};
use tracing::{debug, error, info, warn};

use crate::dispatch::{abort_source_for, AssociateDecision, DispatchOutcome, Dispatcher, Handler};
use crate::{AcceptConnectionSnafu, AssociationSnafu, Result, SpawnThreadSnafu};

/// A DIMSE service class provider.
///
/// Every incoming connection is negotiated with the same options
/// and served by a fresh handler from the factory,
/// on its own thread.
/// Associations do not wait for each other,
/// and the listener never waits for an association.
pub struct Server<A = AcceptAny, F = fn() -> Handler> {
    options: Arc<ServerAssociationOptions<'static, A>>,
    handler_factory: Arc<F>,
    connections: AtomicUsize,
}

impl<A, F> Server<A, F>
where
    A: AccessControl + Send + Sync + 'static,
    F: Fn() -> Handler<TcpStream> + Send + Sync + 'static,
{
    pub fn new(options: ServerAssociationOptions<'static, A>, handler_factory: F) -> Self {
        Server {
            options: Arc::new(options),
            handler_factory: Arc::new(handler_factory),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn options(&self) -> &ServerAssociationOptions<'static, A> {
        &self.options
    }

    /// Accept connections until the listener fails for good.
    ///
    /// Failing to accept one connection
    /// or to start its thread is logged
    /// and does not stop the server.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(
                "{} listening on: tcp://{}",
                self.options.get_ae_title(),
                addr
            );
        }
        for stream in listener.incoming() {
            let stream = match stream.context(AcceptConnectionSnafu) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("{}", Report::from_error(e));
                    continue;
                }
            };
            if let Err(e) = self.spawn(stream) {
                error!("{}", Report::from_error(e));
            }
        }
        Ok(())
    }

    /// Serve one connection on a new thread.
    ///
    /// The thread yields the outcome of the association.
    pub fn spawn(&self, stream: TcpStream) -> Result<JoinHandle<DispatchOutcome>> {
        let n = self.connections.fetch_add(1, Ordering::Relaxed);
        let options = Arc::clone(&self.options);
        let handler_factory = Arc::clone(&self.handler_factory);
        std::thread::Builder::new()
            .name(format!("association-{}", n))
            .spawn(move || run_association(&*options, stream, (*handler_factory)()))
            .context(SpawnThreadSnafu)
    }

    /// Serve one connection on the calling thread.
    pub fn handle_connection(&self, stream: TcpStream) -> DispatchOutcome {
        run_association(&*self.options, stream, (*self.handler_factory)())
    }
}

/// Negotiate an association over the given transport
/// and dispatch its messages to the handler until it ends.
///
/// The handler is told about the association request
/// only if it passed negotiation.
/// A failed negotiation is reported through
/// the abort or network error callbacks.
pub fn run_association<A, S>(
    options: &ServerAssociationOptions<'_, A>,
    transport: S,
    mut handler: Handler<S>,
) -> DispatchOutcome
where
    A: AccessControl,
    S: Transport,
{
    let mut association = match options.receive_request(transport) {
        Ok(association) => association,
        Err(UlError::Rejected { .. }) => return DispatchOutcome::Rejected,
        Err(UlError::Aborted { abort_source, .. }) => {
            handler.notify_abort(&abort_source);
            return DispatchOutcome::Aborted;
        }
        Err(e) if e.is_protocol_violation() => {
            warn!("Invalid association request: {}", Report::from_error(&e));
            handler.notify_abort(&abort_source_for(&e));
            return DispatchOutcome::ProtocolError;
        }
        Err(e) => {
            let e = AssociationSnafu.into_error(e);
            warn!("Could not receive association request: {}", Report::from_error(&e));
            handler.notify_network_error(&e);
            return DispatchOutcome::NetworkError;
        }
    };

    info!(
        "Association request from {} ({} accepted presentation contexts)",
        association.peer_ae_title(),
        association.accepted_presentation_contexts().count()
    );

    let decision = match options.rejection_for(&association) {
        Some(association_rj) => AssociateDecision::Reject(association_rj),
        None => handler.associate_request(association.parameters()),
    };

    match decision {
        AssociateDecision::Accept => {
            if let Err(e) = association.accept() {
                let e = AssociationSnafu.into_error(e);
                handler.notify_network_error(&e);
                return DispatchOutcome::NetworkError;
            }
        }
        AssociateDecision::Reject(association_rj) => {
            debug!("Association rejected by the handler or the options");
            return match association.reject(association_rj) {
                Ok(()) => DispatchOutcome::Rejected,
                Err(e) => {
                    let e = AssociationSnafu.into_error(e);
                    handler.notify_network_error(&e);
                    DispatchOutcome::NetworkError
                }
            };
        }
    }

    let outcome = Dispatcher::new(association, handler).run();
    debug!("Association ended: {:?}", outcome);
    outcome
}
