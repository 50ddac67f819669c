//! An embeddable Prolog execution engine.
//!
//! Clauses are compiled to a small bytecode whose head instructions consume
//! a logical argument list, and queries run under SLD resolution with
//! depth-first, left-to-right backtracking. Solutions come back as a lazy
//! stream driven by a promise trampoline, so deep right recursion never
//! grows the host stack. The reader, writer, operator tables and builtin
//! predicate library are left to the embedder, which reaches the engine
//! through [`Machine::consult`], [`Machine::solve`] and the
//! `register0`..`register5` host-predicate hooks.

pub mod ast;
pub mod codegen;
mod instructions;
pub mod machine;

pub use ast::{Atom, PredicateKey, Term, Var};
pub use machine::config::{MachineBuilder, Unknown};
pub use machine::machine_errors::MachineError;
pub use machine::machine_state::MachineState;
pub use machine::solutions::{Cont, LeafAnswer, Promise, Solutions};
pub use machine::Machine;
