//! The association state machine.
//!
//! [`StateMachine`] only knows about states and events.
//! It never touches the transport:
//! [`Association`](super::Association) feeds it one event
//! for each PDU sent, received, timer expiry or transport failure,
//! and refuses to act on any event the table does not admit.
use snafu::Snafu;
use std::fmt;
use tracing::debug;

/// The lifecycle state of an association.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum State {
    /// Transport connected, nothing exchanged yet.
    Idle,
    /// A-ASSOCIATE-RQ sent or received, awaiting the outcome.
    Requesting,
    /// Association established, data may flow.
    Open,
    /// A-RELEASE-RQ sent or received, awaiting completion.
    Releasing,
    /// Abort in progress.
    Aborting,
    /// Terminal state. The transport has been released.
    Closed,
}

impl State {
    /// Whether the association can still exchange PDUs.
    pub fn is_live(self) -> bool {
        !matches!(self, State::Closed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "Idle",
            State::Requesting => "Requesting",
            State::Open => "Open",
            State::Releasing => "Releasing",
            State::Aborting => "Aborting",
            State::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// An input of the state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    /// This node sent an A-ASSOCIATE-RQ.
    RequestSent,
    /// This node received an A-ASSOCIATE-RQ.
    RequestReceived,
    /// An A-ASSOCIATE-AC was sent or received.
    Accepted,
    /// An A-ASSOCIATE-RJ was sent or received.
    Rejected,
    /// A P-DATA-TF was sent or received.
    Data,
    /// An A-RELEASE-RQ was sent or received.
    ReleaseRequested,
    /// An A-RELEASE-RP was sent or received.
    ReleaseCompleted,
    /// This node decided to abort.
    Abort,
    /// The peer sent an A-ABORT.
    AbortReceived,
    /// The ARTIM timer fired while awaiting the peer.
    ArtimExpired,
    /// The transport was closed or failed.
    TransportClosed,
}

/// An event which the current state does not admit.
#[derive(Debug, Snafu)]
#[snafu(display("invalid transition from {} on {:?}", state, event))]
pub struct InvalidTransition {
    pub state: State,
    pub event: Event,
}

/// The transition table of an association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachine { state: State::Idle }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Compute the state following `event`, without applying it.
    pub fn next(&self, event: Event) -> Result<State, InvalidTransition> {
        use Event::*;
        use State::*;
        let next = match (self.state, event) {
            (Idle, RequestSent | RequestReceived) => Requesting,
            (Requesting, Accepted) => Open,
            (Requesting, Rejected) => Closed,
            (Open, Data) => Open,
            (Open, ReleaseRequested) => Releasing,
            (Releasing, ReleaseCompleted) => Closed,
            (Idle, Abort) => Closed,
            (Requesting | Open | Releasing | Aborting, Abort) => Aborting,
            (Requesting | Open | Releasing, AbortReceived) => Closed,
            (Requesting | Releasing, ArtimExpired) => Aborting,
            (_, TransportClosed) => Closed,
            (state, event) => return InvalidTransitionSnafu { state, event }.fail(),
        };
        Ok(next)
    }

    /// Apply `event`, returning the new state.
    pub fn apply(&mut self, event: Event) -> Result<State, InvalidTransition> {
        let next = self.next(event)?;
        if next != self.state {
            debug!("Association state {} -> {} on {:?}", self.state, next, event);
        }
        self.state = next;
        Ok(next)
    }

    /// Whether `event` is admitted in the current state.
    pub fn admits(&self, event: Event) -> bool {
        self.next(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn machine_in(path: &[Event]) -> StateMachine {
        let mut machine = StateMachine::new();
        for event in path {
            machine.apply(*event).unwrap();
        }
        machine
    }

    #[test]
    fn full_lifecycle() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.apply(Event::RequestSent).unwrap(), State::Requesting);
        assert_eq!(machine.apply(Event::Accepted).unwrap(), State::Open);
        assert_eq!(machine.apply(Event::Data).unwrap(), State::Open);
        assert_eq!(machine.apply(Event::ReleaseRequested).unwrap(), State::Releasing);
        assert_eq!(machine.apply(Event::ReleaseCompleted).unwrap(), State::Closed);
    }

    #[rstest]
    #[case(&[], State::Closed)]
    #[case(&[Event::RequestReceived], State::Aborting)]
    #[case(&[Event::RequestSent, Event::Accepted], State::Aborting)]
    #[case(&[Event::RequestSent, Event::Accepted, Event::ReleaseRequested], State::Aborting)]
    fn abort_from_any_live_state(#[case] path: &[Event], #[case] expected: State) {
        let mut machine = machine_in(path);
        assert_eq!(machine.apply(Event::Abort).unwrap(), expected);
        assert_eq!(machine.apply(Event::TransportClosed).unwrap(), State::Closed);
    }

    #[rstest]
    #[case(&[Event::RequestSent], Event::Data)]
    #[case(&[Event::RequestSent, Event::Accepted], Event::Accepted)]
    #[case(&[Event::RequestSent, Event::Accepted, Event::ReleaseRequested], Event::Data)]
    #[case(&[Event::RequestSent, Event::Accepted], Event::ArtimExpired)]
    fn unexpected_events_are_refused(#[case] path: &[Event], #[case] event: Event) {
        let mut machine = machine_in(path);
        let before = machine.state();
        assert!(!machine.admits(event));
        let err = machine.apply(event).unwrap_err();
        assert_eq!(err.state, before);
        assert_eq!(err.event, event);
        assert_eq!(machine.state(), before);
    }

    #[test]
    fn artim_expiry_while_requesting() {
        let mut machine = machine_in(&[Event::RequestSent]);
        assert_eq!(machine.apply(Event::ArtimExpired).unwrap(), State::Aborting);
        assert_eq!(machine.apply(Event::TransportClosed).unwrap(), State::Closed);
    }

    #[test]
    fn closed_is_terminal() {
        let mut machine = machine_in(&[Event::RequestSent, Event::Rejected]);
        assert_eq!(machine.state(), State::Closed);
        assert!(!machine.admits(Event::Abort));
        assert!(!machine.admits(Event::Data));
        assert_eq!(machine.apply(Event::TransportClosed).unwrap(), State::Closed);
    }
}
