use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use crate::ast::{Term, Var};

use super::machine_errors::MachineError;
use super::Machine;

/// "What remains after this goal succeeds": a step to run plus the rest of
/// the continuation. The rest is a dedicated field rather than a closure
/// capture so the chain can be torn down iteratively; a deep right
/// recursion builds one frame per call, and unlinking those through nested
/// closure drops would recurse just as deep.
pub struct Cont(Rc<ContFrame>);

type Step = Box<dyn Fn(&mut Machine, &Cont) -> Promise>;

struct ContFrame {
    step: Option<Step>,
    // vacated only during teardown
    rest: Option<Cont>,
}

impl Cont {
    /// The terminal continuation: the whole resolution succeeded.
    pub fn done() -> Cont {
        Cont(Rc::new(ContFrame {
            step: None,
            rest: None,
        }))
    }

    /// Prepends a step to `rest`.
    pub(crate) fn frame(rest: Cont, step: impl Fn(&mut Machine, &Cont) -> Promise + 'static) -> Cont {
        Cont(Rc::new(ContFrame {
            step: Some(Box::new(step)),
            rest: Some(rest),
        }))
    }

    pub fn call(&self, machine: &mut Machine) -> Promise {
        match &self.0.step {
            None => Promise::True,
            Some(step) => {
                let rest = self.0.rest.clone().unwrap_or_else(Cont::done);
                step(machine, &rest)
            }
        }
    }
}

impl Clone for Cont {
    fn clone(&self) -> Cont {
        Cont(self.0.clone())
    }
}

impl Drop for ContFrame {
    fn drop(&mut self) {
        let mut rest = self.rest.take();
        while let Some(cont) = rest {
            rest = match Rc::try_unwrap(cont.0) {
                Ok(mut frame) => frame.rest.take(),
                Err(_) => None,
            };
        }
    }
}

impl fmt::Debug for Cont {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut depth = 0usize;
        let mut frame = &self.0;
        while let Some(rest) = &frame.rest {
            depth += 1;
            frame = &rest.0;
        }
        write!(f, "Cont(<{} frames>)", depth)
    }
}

/// One step of the resolution search. `Delay` holds the untried
/// alternatives; forcing pops the first and keeps the rest pending, which is
/// the entire choice-point mechanism of the engine.
pub enum Promise {
    True,
    False,
    Error(MachineError),
    Delay(VecDeque<Cont>),
}

impl Promise {
    pub(crate) fn delay1(k: Cont) -> Promise {
        Promise::Delay(VecDeque::from([k]))
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Promise::True => write!(f, "True"),
            Promise::False => write!(f, "False"),
            Promise::Error(e) => write!(f, "Error({})", e),
            Promise::Delay(ks) => write!(f, "Delay(<{}>)", ks.len()),
        }
    }
}

/// One answer from a solution stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeafAnswer {
    /// The goal succeeded and had no named variables to report.
    True,
    /// The goal produced no answers at all.
    False,
    /// The goal succeeded under these bindings.
    Match { bindings: BTreeMap<String, Term> },
}

impl LeafAnswer {
    /// Creates an answer from an iterator of name/term pairs.
    pub fn from_bindings<S: Into<String>>(bindings: impl IntoIterator<Item = (S, Term)>) -> Self {
        LeafAnswer::Match {
            bindings: bindings
                .into_iter()
                .map(|(name, term)| (name.into(), term))
                .collect(),
        }
    }
}

/// Lazy stream of answers for one query. Dropping it rewinds the trail to
/// where the query began, so the machine can be reused.
pub struct Solutions<'a> {
    machine: &'a mut Machine,
    stack: Vec<Promise>,
    vars: Vec<(String, Var)>,
    mark: usize,
    yielded: bool,
    finished: bool,
}

impl<'a> Solutions<'a> {
    pub(crate) fn new(
        machine: &'a mut Machine,
        initial: Promise,
        vars: Vec<(String, Var)>,
        mark: usize,
    ) -> Self {
        Solutions {
            machine,
            stack: vec![initial],
            vars,
            mark,
            yielded: false,
            finished: false,
        }
    }

    /// Materializes the current bindings; answers must not alias the trail,
    /// which the next alternative will rewind.
    fn answer(&self) -> LeafAnswer {
        if self.vars.is_empty() {
            return LeafAnswer::True;
        }
        let bindings = self
            .vars
            .iter()
            .map(|(name, v)| (name.clone(), self.machine.machine_st.resolve(&Term::Var(*v))))
            .collect();
        LeafAnswer::Match { bindings }
    }

    fn finish(&mut self) {
        self.stack.clear();
        self.machine.machine_st.unwind_trail(self.mark);
        self.finished = true;
    }
}

impl Iterator for Solutions<'_> {
    type Item = Result<LeafAnswer, MachineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            // cancellation is observed only between forces, never mid-clause
            if self.machine.interrupt.swap(false, Ordering::Relaxed) {
                self.finish();
                return Some(Err(MachineError::interrupted()));
            }

            let Some(promise) = self.stack.pop() else {
                break;
            };

            match promise {
                Promise::True => {
                    let answer = self.answer();
                    self.yielded = true;
                    return Some(Ok(answer));
                }
                Promise::False => {}
                Promise::Error(e) => {
                    self.finish();
                    return Some(Err(e));
                }
                Promise::Delay(mut ks) => {
                    if let Some(k) = ks.pop_front() {
                        if !ks.is_empty() {
                            self.stack.push(Promise::Delay(ks));
                        }
                        let next = k.call(self.machine);
                        self.stack.push(next);
                    }
                }
            }
        }

        self.finished = true;
        self.machine.machine_st.unwind_trail(self.mark);
        if !self.yielded {
            self.yielded = true;
            return Some(Ok(LeafAnswer::False));
        }
        None
    }
}

impl Drop for Solutions<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.machine.machine_st.unwind_trail(self.mark);
        }
    }
}
