use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use indexmap::IndexMap;

use super::machine_state::MachineState;
use super::Machine;

/// What dispatch does when a goal names a procedure the table does not have.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Unknown {
    /// Raise `existence_error(procedure, Name/Arity)`. The ISO default.
    #[default]
    Error,
    /// Fail silently.
    Fail,
    /// Emit a warning, then fail.
    Warning,
}

impl fmt::Display for Unknown {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unknown::Error => write!(f, "error"),
            Unknown::Fail => write!(f, "fail"),
            Unknown::Warning => write!(f, "warning"),
        }
    }
}

/// Describes how a [`Machine`](super::Machine) will be configured.
#[derive(Debug, Default)]
pub struct MachineBuilder {
    unknown: Unknown,
}

impl MachineBuilder {
    /// Creates a default configuration.
    pub fn new() -> Self {
        Default::default()
    }

    /// Uses the given unknown-procedure action in this configuration.
    pub fn with_unknown(mut self, unknown: Unknown) -> Self {
        self.unknown = unknown;
        self
    }

    /// Builds the [`Machine`](super::Machine) from this configuration.
    pub fn build(self) -> Machine {
        Machine {
            machine_st: MachineState::new(),
            procedures: IndexMap::default(),
            unknown: self.unknown,
            interrupt: Arc::new(AtomicBool::new(false)),
            warnings: Vec::new(),
        }
    }
}
