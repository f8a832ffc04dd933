//! Presentation context negotiation.
//!
//! The acceptor side matches each proposed presentation context
//! against a [`PresentationContextPolicy`],
//! yielding exactly one result per context.
//! The proposer's order of transfer syntaxes is authoritative:
//! the first proposed syntax which the policy allows wins.
//!
//! The requestor side reconciles the results received
//! in an A-ASSOCIATE-AC with its own proposal
//! through [`reconcile`].
use crate::pdu::{
    PresentationContextNegotiated, PresentationContextProposed, PresentationContextResult,
    PresentationContextResultReason,
};
use pacsnet_transfer_syntax_registry::{entries, trim_uid, TransferSyntaxRegistry};
use std::collections::HashSet;
use tracing::{debug, warn};

/// The local acceptance policy:
/// which abstract syntaxes are supported,
/// and which transfer syntaxes are acceptable for each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentationContextPolicy {
    abstract_syntaxes: Vec<(String, Vec<String>)>,
    promiscuous: bool,
}

impl PresentationContextPolicy {
    /// Create an empty policy, which supports nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Support an abstract syntax with the given transfer syntaxes.
    ///
    /// An empty list of transfer syntaxes means
    /// any transfer syntax known to the registry
    /// which carries pixel data natively.
    /// Registering the same abstract syntax again
    /// replaces its list of transfer syntaxes.
    pub fn with_abstract_syntax<T, I>(
        mut self,
        abstract_syntax: impl Into<String>,
        transfer_syntaxes: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let uid = abstract_syntax.into();
        let uid = trim_uid(&uid).to_string();
        let transfer_syntaxes: Vec<String> = transfer_syntaxes
            .into_iter()
            .map(|ts| {
                let ts: String = ts.into();
                trim_uid(&ts).to_string()
            })
            .collect();
        match self.abstract_syntaxes.iter_mut().find(|(a, _)| *a == uid) {
            Some((_, list)) => *list = transfer_syntaxes,
            None => self.abstract_syntaxes.push((uid, transfer_syntaxes)),
        }
        self
    }

    /// Accept any abstract syntax proposed,
    /// with any native transfer syntax known to the registry.
    ///
    /// Explicitly supported abstract syntaxes keep their own lists.
    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    /// Whether the policy supports no abstract syntax at all.
    pub fn is_empty(&self) -> bool {
        self.abstract_syntaxes.is_empty() && !self.promiscuous
    }

    /// Iterate over the supported abstract syntaxes
    /// and their acceptable transfer syntaxes.
    pub fn abstract_syntaxes(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.abstract_syntaxes
            .iter()
            .map(|(a, ts)| (a.as_str(), ts.as_slice()))
    }

    fn transfer_syntaxes_for(&self, abstract_syntax: &str) -> Option<&[String]> {
        let abstract_syntax = trim_uid(abstract_syntax);
        self.abstract_syntaxes
            .iter()
            .find(|(a, _)| a == abstract_syntax)
            .map(|(_, ts)| ts.as_slice())
            .or(if self.promiscuous { Some(&[][..]) } else { None })
    }

    /// Whether the given transfer syntax is acceptable
    /// under this abstract syntax's list.
    fn allows(&self, list: &[String], registry: &TransferSyntaxRegistry, ts_uid: &str) -> bool {
        let Some(ts) = registry.get(ts_uid) else {
            return false;
        };
        if list.is_empty() {
            ts.is_native()
        } else {
            list.iter().any(|allowed| allowed == ts.uid())
        }
    }
}

/// Negotiate the proposed presentation contexts under the given policy.
///
/// Returns one result per proposed context, in proposal order.
/// Rejected contexts carry Implicit VR Little Endian
/// as their transfer syntax field.
/// The outcome never aborts the association,
/// even if no context was accepted.
pub fn negotiate(
    policy: &PresentationContextPolicy,
    registry: &TransferSyntaxRegistry,
    proposed: &[PresentationContextProposed],
) -> Vec<PresentationContextNegotiated> {
    let mut seen_ids = HashSet::new();
    proposed
        .iter()
        .map(|pc| {
            let first_use = seen_ids.insert(pc.id);
            let (reason, transfer_syntax) = if pc.id % 2 == 0 || !first_use {
                warn!("Invalid presentation context ID {}", pc.id);
                (PresentationContextResultReason::NoReason, None)
            } else {
                negotiate_one(policy, registry, pc)
            };
            let negotiated = PresentationContextNegotiated {
                id: pc.id,
                reason,
                abstract_syntax: trim_uid(&pc.abstract_syntax).to_string(),
                transfer_syntax: transfer_syntax
                    .unwrap_or_else(|| entries::IMPLICIT_VR_LITTLE_ENDIAN.uid().to_string()),
            };
            debug!(
                "Presentation context {} ({}): {} {}",
                negotiated.id, negotiated.abstract_syntax, negotiated.reason, negotiated.transfer_syntax
            );
            negotiated
        })
        .collect()
}

fn negotiate_one(
    policy: &PresentationContextPolicy,
    registry: &TransferSyntaxRegistry,
    pc: &PresentationContextProposed,
) -> (PresentationContextResultReason, Option<String>) {
    let Some(list) = policy.transfer_syntaxes_for(&pc.abstract_syntax) else {
        return (
            PresentationContextResultReason::AbstractSyntaxNotSupported,
            None,
        );
    };
    pc.transfer_syntaxes
        .iter()
        .map(|ts| trim_uid(ts))
        .find(|ts| policy.allows(list, registry, ts))
        .map(|ts| (PresentationContextResultReason::Acceptance, Some(ts.to_string())))
        .unwrap_or((
            PresentationContextResultReason::TransferSyntaxesNotSupported,
            None,
        ))
}

/// Combine the requestor's proposal with the acceptor's results.
///
/// Results with unknown IDs are dropped with a warning.
/// A proposed context without a result is considered rejected,
/// and so is one accepted with a transfer syntax
/// that was not proposed for it.
pub fn reconcile(
    proposed: &[PresentationContextProposed],
    results: &[PresentationContextResult],
) -> Vec<PresentationContextNegotiated> {
    for result in results {
        if !proposed.iter().any(|pc| pc.id == result.id) {
            warn!(
                "Ignoring result for unknown presentation context {}",
                result.id
            );
        }
    }
    proposed
        .iter()
        .map(|pc| match results.iter().find(|r| r.id == pc.id) {
            Some(result) => {
                let transfer_syntax = trim_uid(&result.transfer_syntax);
                let was_proposed = pc
                    .transfer_syntaxes
                    .iter()
                    .any(|ts| trim_uid(ts) == transfer_syntax);
                if result.reason == PresentationContextResultReason::Acceptance && !was_proposed {
                    warn!(
                        "Presentation context {} accepted with unproposed transfer syntax {}",
                        pc.id, transfer_syntax
                    );
                    PresentationContextNegotiated {
                        id: pc.id,
                        reason: PresentationContextResultReason::TransferSyntaxesNotSupported,
                        abstract_syntax: pc.abstract_syntax.clone(),
                        transfer_syntax: entries::IMPLICIT_VR_LITTLE_ENDIAN.uid().to_string(),
                    }
                } else {
                    PresentationContextNegotiated {
                        id: pc.id,
                        reason: result.reason,
                        abstract_syntax: pc.abstract_syntax.clone(),
                        transfer_syntax: transfer_syntax.to_string(),
                    }
                }
            }
            None => PresentationContextNegotiated {
                id: pc.id,
                reason: PresentationContextResultReason::NoReason,
                abstract_syntax: pc.abstract_syntax.clone(),
                transfer_syntax: entries::IMPLICIT_VR_LITTLE_ENDIAN.uid().to_string(),
            },
        })
        .collect()
}
