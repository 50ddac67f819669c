use crate::ast::{Atom, Term, Var};

/// The binding environment: an arena of variable cells plus the trail of
/// bindings made since each checkpoint. Backtracking rewinds the trail; the
/// cells themselves are never deallocated during a query.
#[derive(Debug, Default)]
pub struct MachineState {
    bindings: Vec<Option<Term>>,
    names: Vec<Option<Atom>>,
    trail: Vec<Var>,
}

impl MachineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an unbound, unnamed variable.
    pub fn fresh_var(&mut self) -> Term {
        let v = self.bindings.len();
        self.bindings.push(None);
        self.names.push(None);
        Term::Var(v)
    }

    /// Allocates an unbound variable carrying a display name. The name is
    /// cosmetic: it is reported in answer bindings and never consulted by
    /// unification.
    pub fn named_var(&mut self, name: impl Into<Atom>) -> Term {
        let v = self.bindings.len();
        self.bindings.push(None);
        self.names.push(Some(name.into()));
        Term::Var(v)
    }

    pub fn var_name(&self, v: Var) -> Option<&Atom> {
        self.names.get(v).and_then(|name| name.as_ref())
    }

    fn binding(&self, v: Var) -> Option<&Term> {
        self.bindings.get(v).and_then(|cell| cell.as_ref())
    }

    /// Follows variable bindings until a non-variable or an unbound variable.
    pub fn deref(&self, term: &Term) -> Term {
        let mut term = term.clone();
        loop {
            match term {
                Term::Var(v) => match self.binding(v) {
                    Some(next) => term = next.clone(),
                    None => return Term::Var(v),
                },
                _ => return term,
            }
        }
    }

    fn bind(&mut self, v: Var, term: Term) {
        debug_assert!(self.bindings[v].is_none());
        self.bindings[v] = Some(term);
        self.trail.push(v);
    }

    /// The current trail position, for a later [`unwind_trail`](Self::unwind_trail).
    pub fn mark(&self) -> usize {
        self.trail.len()
    }

    /// Undoes every binding made since `mark`.
    pub fn unwind_trail(&mut self, mark: usize) {
        for v in self.trail.drain(mark..) {
            self.bindings[v] = None;
        }
    }

    /// Unifies two terms without the occurs check, the default for head
    /// unification and everything the machine does internally.
    pub fn unify(&mut self, a: &Term, b: &Term) -> bool {
        self.unify_terms(a, b, false)
    }

    /// Unifies two terms, failing if a variable would be bound to a term
    /// containing it.
    pub fn unify_with_occurs_check(&mut self, a: &Term, b: &Term) -> bool {
        self.unify_terms(a, b, true)
    }

    fn unify_terms(&mut self, a: &Term, b: &Term, occurs_check: bool) -> bool {
        let mut pdl = vec![(a.clone(), b.clone())];

        while let Some((a, b)) = pdl.pop() {
            let d1 = self.deref(&a);
            let d2 = self.deref(&b);

            match (d1, d2) {
                (Term::Var(v1), Term::Var(v2)) => {
                    if v1 != v2 {
                        self.bind(v1, Term::Var(v2));
                    }
                }
                (Term::Var(v), t) | (t, Term::Var(v)) => {
                    if occurs_check && self.occurs(v, &t) {
                        return false;
                    }
                    self.bind(v, t);
                }
                (Term::Atom(x), Term::Atom(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Term::Integer(m), Term::Integer(n)) => {
                    if m != n {
                        return false;
                    }
                }
                (Term::Float(x), Term::Float(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Term::Compound(c1), Term::Compound(c2)) => {
                    if c1.functor != c2.functor || c1.args.len() != c2.args.len() {
                        return false;
                    }
                    // pushed in reverse so the pairs pop off left to right
                    for (x, y) in c1.args.iter().zip(c2.args.iter()).rev() {
                        pdl.push((x.clone(), y.clone()));
                    }
                }
                _ => return false,
            }
        }

        true
    }

    fn occurs(&self, v: Var, term: &Term) -> bool {
        let mut stack = vec![term.clone()];
        while let Some(term) = stack.pop() {
            match self.deref(&term) {
                Term::Var(w) => {
                    if w == v {
                        return true;
                    }
                }
                Term::Compound(c) => stack.extend(c.args.iter().cloned()),
                _ => {}
            }
        }
        false
    }

    /// Substitutes bindings all the way down, producing a term that no longer
    /// depends on this state. Runs on an explicit stack so deep lists cannot
    /// overflow, and cuts cycles (only constructible with the occurs check
    /// off) by leaving the looping variable in place.
    pub fn resolve(&self, term: &Term) -> Term {
        enum Task {
            Walk(Term),
            Leave,
            Build(Atom, usize),
        }

        let mut tasks = vec![Task::Walk(term.clone())];
        let mut out: Vec<Term> = Vec::new();
        let mut path: Vec<Var> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Walk(term) => match term {
                    Term::Var(v) => match self.binding(v) {
                        Some(next) if !path.contains(&v) => {
                            path.push(v);
                            tasks.push(Task::Leave);
                            tasks.push(Task::Walk(next.clone()));
                        }
                        _ => out.push(Term::Var(v)),
                    },
                    Term::Compound(c) => {
                        tasks.push(Task::Build(c.functor.clone(), c.args.len()));
                        for arg in c.args.iter().rev() {
                            tasks.push(Task::Walk(arg.clone()));
                        }
                    }
                    term => out.push(term),
                },
                Task::Leave => {
                    path.pop();
                }
                Task::Build(functor, arity) => {
                    let args = out.split_off(out.len() - arity);
                    out.push(Term::compound(functor, args));
                }
            }
        }

        out.pop().unwrap_or_else(|| term.clone())
    }
}
