pub mod config;
pub mod machine_errors;
pub mod machine_state;
pub mod solutions;


use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fxhash::FxBuildHasher;
use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::ast::{Atom, PredicateKey, Term, Var};
use crate::codegen::{compile_clause, compile_query, Clause, XrEntry};
use crate::instructions::{exit_program, Instruction};

use config::Unknown;
use machine_errors::MachineError;
use machine_state::MachineState;
use solutions::{Cont, Promise, Solutions};

type HostFn = Rc<dyn Fn(&mut Machine, &[Term], Cont) -> Promise>;

/// A procedure is either a list of compiled clauses tried in source order,
/// or a host-provided predicate of fixed arity.
#[derive(Clone)]
enum Procedure {
    Clauses(Vec<Rc<Clause>>),
    Host { arity: usize, f: HostFn },
}

/// The resolution engine: binding environment, procedure table and the
/// bytecode interpreter. One machine serves one query at a time; hosts that
/// want parallelism run independent machines.
pub struct Machine {
    pub machine_st: MachineState,
    procedures: IndexMap<PredicateKey, Procedure, FxBuildHasher>,
    unknown: Unknown,
    interrupt: Arc<AtomicBool>,
    warnings: Vec<PredicateKey>,
}

impl Machine {
    /// A clone of the interrupt flag. Setting it from any thread cancels the
    /// running query at its next suspension point.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn set_unknown(&mut self, unknown: Unknown) {
        self.unknown = unknown;
    }

    /// The procedure indicators warned about under [`Unknown::Warning`]
    /// since the last call.
    pub fn take_warnings(&mut self) -> Vec<PredicateKey> {
        std::mem::take(&mut self.warnings)
    }

    /// Compiles each clause term and appends it to its procedure. A clause
    /// consulted over a host predicate supersedes it.
    pub fn consult(&mut self, clauses: impl IntoIterator<Item = Term>) -> Result<(), MachineError> {
        for term in clauses {
            let clause = Rc::new(compile_clause(&self.machine_st, &term)?);
            match self.procedures.entry(clause.key.clone()) {
                Entry::Occupied(mut entry) => match entry.get_mut() {
                    Procedure::Clauses(cs) => cs.push(clause),
                    host => *host = Procedure::Clauses(vec![clause]),
                },
                Entry::Vacant(entry) => {
                    entry.insert(Procedure::Clauses(vec![clause]));
                }
            }
        }
        Ok(())
    }

    pub fn register0(&mut self, name: &str, f: impl Fn(&mut Machine, Cont) -> Promise + 'static) {
        self.register(name, 0, Rc::new(move |m, _, k| f(m, k)));
    }

    pub fn register1(
        &mut self,
        name: &str,
        f: impl Fn(&mut Machine, Term, Cont) -> Promise + 'static,
    ) {
        self.register(name, 1, Rc::new(move |m, ts, k| f(m, ts[0].clone(), k)));
    }

    pub fn register2(
        &mut self,
        name: &str,
        f: impl Fn(&mut Machine, Term, Term, Cont) -> Promise + 'static,
    ) {
        self.register(
            name,
            2,
            Rc::new(move |m, ts, k| f(m, ts[0].clone(), ts[1].clone(), k)),
        );
    }

    pub fn register3(
        &mut self,
        name: &str,
        f: impl Fn(&mut Machine, Term, Term, Term, Cont) -> Promise + 'static,
    ) {
        self.register(
            name,
            3,
            Rc::new(move |m, ts, k| f(m, ts[0].clone(), ts[1].clone(), ts[2].clone(), k)),
        );
    }

    pub fn register4(
        &mut self,
        name: &str,
        f: impl Fn(&mut Machine, Term, Term, Term, Term, Cont) -> Promise + 'static,
    ) {
        self.register(
            name,
            4,
            Rc::new(move |m, ts, k| {
                f(m, ts[0].clone(), ts[1].clone(), ts[2].clone(), ts[3].clone(), k)
            }),
        );
    }

    pub fn register5(
        &mut self,
        name: &str,
        f: impl Fn(&mut Machine, Term, Term, Term, Term, Term, Cont) -> Promise + 'static,
    ) {
        self.register(
            name,
            5,
            Rc::new(move |m, ts, k| {
                f(
                    m,
                    ts[0].clone(),
                    ts[1].clone(),
                    ts[2].clone(),
                    ts[3].clone(),
                    ts[4].clone(),
                    k,
                )
            }),
        );
    }

    // registration replaces any prior binding for the indicator
    fn register(&mut self, name: &str, arity: usize, f: HostFn) {
        self.procedures
            .insert((Atom::from(name), arity), Procedure::Host { arity, f });
    }

    /// Starts resolving `goal`, returning its lazy answer stream.
    pub fn solve(&mut self, goal: &Term) -> Solutions<'_> {
        let mark = self.machine_st.mark();
        let vars = self.goal_variables(goal);
        let initial = match compile_query(&self.machine_st, goal) {
            Ok(clause) => {
                let clause = Rc::new(clause);
                Promise::delay1(Cont::frame(Cont::done(), move |m, k| {
                    // a query's recorded variables are executed in place, so
                    // the caller can read their bindings back
                    let slots: Rc<[Term]> = clause.vars.iter().map(|&v| Term::Var(v)).collect();
                    m.exec(
                        clause.bytecode.clone(),
                        0,
                        clause.xr_table.clone(),
                        slots,
                        k.clone(),
                        Term::nil(),
                        Term::nil(),
                    )
                }))
            }
            Err(e) => Promise::Error(e),
        };
        Solutions::new(self, initial, vars, mark)
    }

    /// The named, distinct variables of a goal in first-occurrence order.
    fn goal_variables(&self, goal: &Term) -> Vec<(String, Var)> {
        let mut seen: Vec<Var> = Vec::new();
        let mut named = Vec::new();
        let mut stack = vec![goal.clone()];
        while let Some(term) = stack.pop() {
            match self.machine_st.deref(&term) {
                Term::Var(v) => {
                    if !seen.contains(&v) {
                        seen.push(v);
                        if let Some(name) = self.machine_st.var_name(v) {
                            named.push((name.to_string(), v));
                        }
                    }
                }
                Term::Compound(c) => {
                    for arg in c.args.iter().rev() {
                        stack.push(arg.clone());
                    }
                }
                _ => {}
            }
        }
        named
    }

    /// Dispatches a call to `key` with `args`, the packed argument list.
    /// Lookup failure follows the unknown action; a hit defers procedure
    /// entry behind a delay so deeply nested calls trampoline instead of
    /// growing the host stack.
    fn arrive(&mut self, key: PredicateKey, args: Term, k: Cont) -> Promise {
        if self.procedures.contains_key(&key) {
            return Promise::delay1(Cont::frame(k, move |m, k| {
                m.call_procedure(&key, args.clone(), k.clone())
            }));
        }
        match self.unknown {
            Unknown::Error => Promise::Error(MachineError::existence_error_procedure(&key)),
            Unknown::Warning => {
                tracing::warn!(name = %key.0, arity = key.1 as u64, "unknown procedure");
                self.warnings.push(key);
                Promise::False
            }
            Unknown::Fail => Promise::False,
        }
    }

    fn call_procedure(&mut self, key: &PredicateKey, args: Term, k: Cont) -> Promise {
        let procedure = match self.procedures.get(key) {
            Some(p) => p.clone(),
            // retracted between dispatch and entry
            None => return Promise::False,
        };
        match procedure {
            Procedure::Clauses(clauses) => self.call_clauses(&clauses, args, k),
            Procedure::Host { arity, f } => self.call_host(arity, &f, args, k),
        }
    }

    /// Activates a user-defined procedure: one alternative per clause, in
    /// source order, joined into a single choice point. This is the sole
    /// source of nondeterminism in the engine.
    fn call_clauses(&mut self, clauses: &[Rc<Clause>], args: Term, k: Cont) -> Promise {
        if clauses.is_empty() {
            return Promise::False;
        }

        let mark = self.machine_st.mark();
        let mut ks: VecDeque<Cont> = VecDeque::with_capacity(clauses.len());
        for clause in clauses {
            let clause = clause.clone();
            let args = args.clone();
            ks.push_back(Cont::frame(k.clone(), move |m, k| {
                // every alternative starts from the environment the
                // activation saw
                m.machine_st.unwind_trail(mark);
                let slots: Rc<[Term]> = (0..clause.vars.len())
                    .map(|_| m.machine_st.fresh_var())
                    .collect();
                m.exec(
                    clause.bytecode.clone(),
                    0,
                    clause.xr_table.clone(),
                    slots,
                    k.clone(),
                    args.clone(),
                    Term::nil(),
                )
            }));
        }
        Promise::Delay(ks)
    }

    /// Activates a host predicate: unpack the argument list into fresh
    /// variables and hand them over together with a continuation that
    /// threads back into the caller through a one-instruction program.
    fn call_host(&mut self, arity: usize, f: &HostFn, args: Term, k: Cont) -> Promise {
        let params: Vec<Term> = (0..arity).map(|_| self.machine_st.fresh_var()).collect();
        if !self
            .machine_st
            .unify(&args, &Term::list(params.iter().cloned()))
        {
            return Promise::Error(MachineError::system_error("wrong number of arguments"));
        }

        let exit = exit_program();
        let resume = Cont::frame(k, move |m, k| {
            let xr: Rc<[XrEntry]> = Vec::new().into();
            let slots: Rc<[Term]> = Vec::new().into();
            m.exec(exit.clone(), 0, xr, slots, k.clone(), Term::nil(), Term::nil())
        });
        f(self, &params, resume)
    }

    /// Runs a clause's bytecode from `pc`. Head instructions consume the
    /// logical argument list `args`, descending into nested compounds via
    /// `astack`; after `enter` the same pair accumulates the next goal's
    /// arguments. Unification failure fails the whole activation; `call` and
    /// `exit` suspend into the promise stream.
    #[allow(clippy::too_many_arguments)]
    fn exec(
        &mut self,
        code: Rc<[u8]>,
        mut pc: usize,
        xr: Rc<[XrEntry]>,
        slots: Rc<[Term]>,
        k: Cont,
        mut args: Term,
        mut astack: Term,
    ) -> Promise {
        loop {
            let (instruction, next) = match Instruction::decode(&code, pc) {
                Some(decoded) => decoded,
                None => {
                    let what = if pc < code.len() {
                        "unknown opcode"
                    } else {
                        "non-exit end of bytecode"
                    };
                    return Promise::Error(MachineError::system_error(what));
                }
            };

            match instruction {
                Instruction::Void => {}
                Instruction::Const(i) => {
                    let constant = match xr.get(i as usize) {
                        Some(XrEntry::Constant(t)) => t.clone(),
                        _ => return Promise::Error(MachineError::system_error("not a constant")),
                    };
                    let rest = self.machine_st.fresh_var();
                    if !self
                        .machine_st
                        .unify(&args, &Term::cons(constant, rest.clone()))
                    {
                        return Promise::False;
                    }
                    args = rest;
                }
                Instruction::Var(i) => {
                    let slot = match slots.get(i as usize) {
                        Some(t) => t.clone(),
                        None => {
                            return Promise::Error(MachineError::system_error(
                                "variable slot out of range",
                            ))
                        }
                    };
                    let rest = self.machine_st.fresh_var();
                    if !self.machine_st.unify(&args, &Term::cons(slot, rest.clone())) {
                        return Promise::False;
                    }
                    args = rest;
                }
                Instruction::Functor(i) => {
                    let (functor, arity) = match xr.get(i as usize) {
                        Some(XrEntry::Indicator(pi)) => pi.clone(),
                        _ => {
                            return Promise::Error(MachineError::system_error(
                                "not a principal functor",
                            ))
                        }
                    };
                    let arg = self.machine_st.fresh_var();
                    let rest = self.machine_st.fresh_var();
                    if !self
                        .machine_st
                        .unify(&args, &Term::cons(arg.clone(), rest.clone()))
                    {
                        return Promise::False;
                    }
                    let fresh: Vec<Term> =
                        (0..arity).map(|_| self.machine_st.fresh_var()).collect();
                    if !self
                        .machine_st
                        .unify(&arg, &Term::compound(functor, fresh.iter().cloned()))
                    {
                        return Promise::False;
                    }
                    astack = Term::cons(rest, astack);
                    args = Term::list(fresh);
                }
                Instruction::Pop => {
                    if !self.machine_st.unify(&args, &Term::nil()) {
                        return Promise::False;
                    }
                    let head = self.machine_st.fresh_var();
                    let rest = self.machine_st.fresh_var();
                    if !self
                        .machine_st
                        .unify(&astack, &Term::cons(head.clone(), rest.clone()))
                    {
                        // only a corrupted tape runs out of argument stack
                        return Promise::Error(MachineError::system_error(
                            "argument stack exhausted",
                        ));
                    }
                    args = head;
                    astack = rest;
                }
                Instruction::Enter => {
                    if !self.machine_st.unify(&args, &Term::nil()) {
                        return Promise::False;
                    }
                    if !self.machine_st.unify(&astack, &Term::nil()) {
                        return Promise::False;
                    }
                    // head and body share the accumulator: astack keeps the
                    // whole goal argument list while args walks its tail
                    let goals = self.machine_st.fresh_var();
                    args = goals.clone();
                    astack = goals;
                }
                Instruction::Call(i) => {
                    let key = match xr.get(i as usize) {
                        Some(XrEntry::Indicator(pi)) => pi.clone(),
                        _ => {
                            return Promise::Error(MachineError::system_error(
                                "not a principal functor",
                            ))
                        }
                    };
                    if !self.machine_st.unify(&args, &Term::nil()) {
                        return Promise::False;
                    }

                    let code = code.clone();
                    let xr = xr.clone();
                    let slots = slots.clone();
                    let goal_args = astack;
                    return Promise::delay1(Cont::frame(k, move |m, k| {
                        let resume = {
                            let code = code.clone();
                            let xr = xr.clone();
                            let slots = slots.clone();
                            Cont::frame(k.clone(), move |m, k| {
                                let code = code.clone();
                                let xr = xr.clone();
                                let slots = slots.clone();
                                let goals = m.machine_st.fresh_var();
                                Promise::delay1(Cont::frame(k.clone(), move |m, k| {
                                    m.exec(
                                        code.clone(),
                                        next,
                                        xr.clone(),
                                        slots.clone(),
                                        k.clone(),
                                        goals.clone(),
                                        goals.clone(),
                                    )
                                }))
                            })
                        };
                        m.arrive(key.clone(), goal_args.clone(), resume)
                    }));
                }
                Instruction::Exit => return Promise::delay1(k),
            }

            pc = next;
        }
    }
}
