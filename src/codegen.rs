use std::rc::Rc;

use fxhash::FxBuildHasher;
use indexmap::IndexSet;

use crate::ast::{Atom, PredicateKey, Term, Var};
use crate::instructions::Instruction;
use crate::machine::machine_errors::MachineError;
use crate::machine::machine_state::MachineState;

/// An external-reference table entry: a ground constant or the principal
/// functor of a compound, referred to by index from the bytecode. `const`
/// operands must name a constant; `functor` and `call` operands must name an
/// indicator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum XrEntry {
    Constant(Term),
    Indicator(PredicateKey),
}

/// One compiled clause. `vars` records the distinct source variables in
/// first-occurrence order; activations allocate that many fresh slots, so
/// the recorded identities (and their display names) never leak into
/// execution.
#[derive(Debug)]
pub struct Clause {
    pub key: PredicateKey,
    pub raw: Term,
    pub xr_table: Rc<[XrEntry]>,
    pub vars: Vec<Var>,
    pub bytecode: Rc<[u8]>,
}

/// Lowers a clause term (`Head`, or `Head :- Body`) into bytecode.
pub fn compile_clause(machine_st: &MachineState, term: &Term) -> Result<Clause, MachineError> {
    let term = machine_st.resolve(term);
    let (head, body) = match &term {
        Term::Compound(c) if &*c.functor == ":-" && c.args.len() == 2 => {
            (c.args[0].clone(), Some(c.args[1].clone()))
        }
        _ => (term.clone(), None),
    };

    let key = match &head {
        Term::Atom(name) => (name.clone(), 0),
        Term::Compound(c) => (c.functor.clone(), c.args.len()),
        _ => return Err(MachineError::type_error_callable(head)),
    };

    let mut compiler = ClauseCompiler::new();
    compiler.compile_head(&head)?;
    if let Some(body) = &body {
        compiler.compile_body(body)?;
    }
    Instruction::Exit.encode(&mut compiler.code);
    Ok(compiler.into_clause(key, term))
}

/// Lowers a goal into a body-only clause. This is the query path: goal
/// arguments travel through the same argument compiler as program clauses,
/// and the recorded variables are executed in place so the caller can read
/// their bindings back.
pub fn compile_query(machine_st: &MachineState, goal: &Term) -> Result<Clause, MachineError> {
    let goal = machine_st.resolve(goal);
    let mut compiler = ClauseCompiler::new();
    compiler.compile_body(&goal)?;
    Instruction::Exit.encode(&mut compiler.code);
    Ok(compiler.into_clause((Atom::from("?-"), 0), goal))
}

struct ClauseCompiler {
    xr: IndexSet<XrEntry, FxBuildHasher>,
    vars: IndexSet<Var, FxBuildHasher>,
    code: Vec<u8>,
}

impl ClauseCompiler {
    fn new() -> Self {
        ClauseCompiler {
            xr: IndexSet::default(),
            vars: IndexSet::default(),
            code: Vec::new(),
        }
    }

    fn compile_head(&mut self, head: &Term) -> Result<(), MachineError> {
        match head {
            Term::Atom(_) => Ok(()),
            Term::Compound(c) => {
                for arg in &c.args {
                    self.compile_arg(arg)?;
                }
                Ok(())
            }
            _ => Err(MachineError::type_error_callable(head.clone())),
        }
    }

    fn compile_body(&mut self, body: &Term) -> Result<(), MachineError> {
        Instruction::Enter.encode(&mut self.code);
        let mut goal = body;
        // walk the right-leaning conjunction spine
        while let Term::Compound(c) = goal {
            if &*c.functor != "," || c.args.len() != 2 {
                break;
            }
            self.compile_pred(&c.args[0])?;
            goal = &c.args[1];
        }
        self.compile_pred(goal)
    }

    fn compile_pred(&mut self, goal: &Term) -> Result<(), MachineError> {
        match goal {
            Term::Atom(name) => {
                let i = self.xr_offset(XrEntry::Indicator((name.clone(), 0)))?;
                Instruction::Call(i).encode(&mut self.code);
                Ok(())
            }
            Term::Compound(c) => {
                for arg in &c.args {
                    self.compile_arg(arg)?;
                }
                let i = self.xr_offset(XrEntry::Indicator((c.functor.clone(), c.args.len())))?;
                Instruction::Call(i).encode(&mut self.code);
                Ok(())
            }
            _ => Err(MachineError::type_error_callable(goal.clone())),
        }
    }

    fn compile_arg(&mut self, arg: &Term) -> Result<(), MachineError> {
        match arg {
            Term::Var(v) => {
                let i = self.var_offset(*v)?;
                Instruction::Var(i).encode(&mut self.code);
                Ok(())
            }
            Term::Atom(_) | Term::Integer(_) | Term::Float(_) => {
                let i = self.xr_offset(XrEntry::Constant(arg.clone()))?;
                Instruction::Const(i).encode(&mut self.code);
                Ok(())
            }
            Term::Compound(c) => {
                let i = self.xr_offset(XrEntry::Indicator((c.functor.clone(), c.args.len())))?;
                Instruction::Functor(i).encode(&mut self.code);
                for arg in &c.args {
                    self.compile_arg(arg)?;
                }
                Instruction::Pop.encode(&mut self.code);
                Ok(())
            }
        }
    }

    fn xr_offset(&mut self, entry: XrEntry) -> Result<u8, MachineError> {
        let (i, _) = self.xr.insert_full(entry);
        u8::try_from(i).map_err(|_| MachineError::system_error("xr table overflow"))
    }

    fn var_offset(&mut self, v: Var) -> Result<u8, MachineError> {
        let (i, _) = self.vars.insert_full(v);
        u8::try_from(i).map_err(|_| MachineError::system_error("variable table overflow"))
    }

    fn into_clause(self, key: PredicateKey, raw: Term) -> Clause {
        Clause {
            key,
            raw,
            xr_table: self.xr.into_iter().collect::<Vec<_>>().into(),
            vars: self.vars.into_iter().collect(),
            bytecode: self.code.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::Instruction as I;

    fn compile(state: &MachineState, term: &Term) -> Clause {
        compile_clause(state, term).unwrap()
    }

    #[test]
    fn compiles_a_ground_fact() {
        let state = MachineState::new();
        let fact = Term::compound(
            "p",
            [Term::atom("a"), Term::integer(2), Term::float(3.5)],
        );
        let clause = compile(&state, &fact);

        assert_eq!(clause.key, (crate::ast::Atom::from("p"), 3));
        assert_eq!(
            &clause.bytecode[..],
            &[I::CONST, 0, I::CONST, 1, I::CONST, 2, I::EXIT]
        );
        assert_eq!(
            &clause.xr_table[..],
            &[
                XrEntry::Constant(Term::atom("a")),
                XrEntry::Constant(Term::integer(2)),
                XrEntry::Constant(Term::float(3.5)),
            ]
        );
        assert!(clause.vars.is_empty());
    }

    #[test]
    fn compiles_an_atom_fact_to_bare_exit() {
        let state = MachineState::new();
        let clause = compile(&state, &Term::atom("halting"));
        assert_eq!(clause.key.1, 0);
        assert_eq!(&clause.bytecode[..], &[I::EXIT]);
    }

    #[test]
    fn compiles_a_rule_with_nested_arguments() {
        let mut state = MachineState::new();
        let h = state.fresh_var();
        let t = state.fresh_var();
        let l = state.fresh_var();
        let r = state.fresh_var();
        // append([H|T], L, [H|R]) :- append(T, L, R).
        let rule = Term::compound(
            ":-",
            [
                Term::compound(
                    "append",
                    [
                        Term::cons(h.clone(), t.clone()),
                        l.clone(),
                        Term::cons(h.clone(), r.clone()),
                    ],
                ),
                Term::compound("append", [t.clone(), l.clone(), r.clone()]),
            ],
        );
        let clause = compile(&state, &rule);

        assert_eq!(
            &clause.bytecode[..],
            &[
                I::FUNCTOR, 0, I::VAR, 0, I::VAR, 1, I::POP, // [H|T]
                I::VAR, 2, // L
                I::FUNCTOR, 0, I::VAR, 0, I::VAR, 3, I::POP, // [H|R]
                I::ENTER,
                I::VAR, 1, I::VAR, 2, I::VAR, 3, I::CALL, 1, // append(T, L, R)
                I::EXIT,
            ]
        );
        // '.'/2 and append/3 each appear once in the xr table
        assert_eq!(
            &clause.xr_table[..],
            &[
                XrEntry::Indicator((crate::ast::Atom::from("."), 2)),
                XrEntry::Indicator((crate::ast::Atom::from("append"), 3)),
            ]
        );
        assert_eq!(clause.vars.len(), 4);
    }

    #[test]
    fn deduplicates_repeated_constants() {
        let state = MachineState::new();
        let clause = compile(
            &state,
            &Term::compound("p", [Term::atom("a"), Term::atom("a")]),
        );
        assert_eq!(&clause.bytecode[..], &[I::CONST, 0, I::CONST, 0, I::EXIT]);
        assert_eq!(clause.xr_table.len(), 1);
    }

    #[test]
    fn walks_conjunction_spines_left_to_right() {
        let state = MachineState::new();
        let rule = Term::compound(
            ":-",
            [
                Term::atom("p"),
                Term::conjunction([Term::atom("a"), Term::atom("b"), Term::atom("c")]),
            ],
        );
        let clause = compile(&state, &rule);
        assert_eq!(
            &clause.bytecode[..],
            &[I::ENTER, I::CALL, 0, I::CALL, 1, I::CALL, 2, I::EXIT]
        );
    }

    #[test]
    fn compiles_queries_body_only() {
        let mut state = MachineState::new();
        let x = state.fresh_var();
        let clause = compile_query(&state, &Term::compound("p", [x.clone()])).unwrap();
        assert_eq!(&clause.bytecode[..], &[I::ENTER, I::VAR, 0, I::CALL, 0, I::EXIT]);
    }

    #[test]
    fn rejects_non_callable_heads_and_goals() {
        let state = MachineState::new();
        assert_eq!(
            compile_clause(&state, &Term::integer(3)).unwrap_err(),
            MachineError::type_error_callable(Term::integer(3))
        );

        let rule = Term::compound(":-", [Term::atom("p"), Term::float(1.0)]);
        assert_eq!(
            compile_clause(&state, &rule).unwrap_err(),
            MachineError::type_error_callable(Term::float(1.0))
        );
    }

    #[test]
    fn compiles_bound_variables_as_their_values() {
        let mut state = MachineState::new();
        let x = state.fresh_var();
        assert!(state.unify(&x, &Term::atom("a")));
        let clause = compile(&state, &Term::compound("p", [x]));
        assert_eq!(&clause.bytecode[..], &[I::CONST, 0, I::EXIT]);
        assert_eq!(&clause.xr_table[..], &[XrEntry::Constant(Term::atom("a"))]);
    }

    #[test]
    fn overflowing_the_xr_table_fails() {
        let state = MachineState::new();
        let wide = Term::compound("p", (0..300).map(Term::integer));
        assert_eq!(
            compile_clause(&state, &wide).unwrap_err(),
            MachineError::system_error("xr table overflow")
        );
    }

    #[test]
    fn overflowing_the_variable_table_fails() {
        let mut state = MachineState::new();
        let vars: Vec<_> = (0..300).map(|_| state.fresh_var()).collect();
        let wide = Term::compound("p", vars);
        assert_eq!(
            compile_clause(&state, &wide).unwrap_err(),
            MachineError::system_error("variable table overflow")
        );
    }
}
