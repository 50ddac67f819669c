use std::error::Error;
use std::fmt;

use crate::ast::{PredicateKey, Term};

/// An error escaping the engine, carried as an ISO-shaped `error/2` term.
/// The core only originates these; interception (`catch/3` and friends) is
/// host territory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineError {
    stub: Term,
}

impl MachineError {
    /// `existence_error(procedure, Name/Arity)`, raised by dispatch when the
    /// unknown action is `error`.
    pub(crate) fn existence_error_procedure(key: &PredicateKey) -> Self {
        let pi = pi_as_term(key);
        MachineError {
            stub: Term::compound(
                "error",
                [
                    Term::compound("existence_error", [Term::atom("procedure"), pi.clone()]),
                    pi,
                ],
            ),
        }
    }

    /// `type_error(callable, Culprit)`, raised by the clause compiler on
    /// non-callable heads and goals.
    pub(crate) fn type_error_callable(culprit: Term) -> Self {
        MachineError {
            stub: Term::compound(
                "error",
                [
                    Term::compound("type_error", [Term::atom("callable"), culprit.clone()]),
                    culprit,
                ],
            ),
        }
    }

    /// Engine invariants: corrupted tapes, oversized tables, wrong host
    /// arity. Reachable only through a bug in the compiler or the host.
    pub(crate) fn system_error(context: &str) -> Self {
        MachineError {
            stub: Term::compound("error", [Term::atom("system_error"), Term::atom(context)]),
        }
    }

    /// The host's cancellation token fired between promise forces.
    pub(crate) fn interrupted() -> Self {
        Self::system_error("interrupted")
    }

    /// Wraps a host-built error term. Host predicates model their own
    /// errors (instantiation, domain, evaluation) as terms the same way the
    /// engine does.
    pub fn from_term(stub: Term) -> Self {
        MachineError { stub }
    }

    pub fn as_term(&self) -> &Term {
        &self.stub
    }

    pub fn into_term(self) -> Term {
        self.stub
    }
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.stub)
    }
}

impl Error for MachineError {}

pub(crate) fn pi_as_term(key: &PredicateKey) -> Term {
    Term::compound(
        "/",
        [Term::atom(key.0.clone()), Term::integer(key.1 as i64)],
    )
}
