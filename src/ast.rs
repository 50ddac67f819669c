use std::fmt;
use std::mem;
use std::rc::Rc;

use ordered_float::OrderedFloat;

pub type Atom = Rc<str>;

/// Index of a variable cell in the machine state's binding arena. Identity
/// is the index; display names are kept in the arena and never take part in
/// unification.
pub type Var = usize;

/// The dispatch key of a procedure: name and arity.
pub type PredicateKey = (Atom, usize);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    Atom(Atom),
    Integer(i64),
    Float(OrderedFloat<f64>),
    Compound(Rc<Compound>),
    Var(Var),
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Compound {
    pub functor: Atom,
    pub args: Vec<Term>,
}

impl Term {
    pub fn atom(name: impl Into<Atom>) -> Term {
        Term::Atom(name.into())
    }

    pub fn integer(value: i64) -> Term {
        Term::Integer(value)
    }

    pub fn float(value: f64) -> Term {
        Term::Float(OrderedFloat(value))
    }

    pub fn compound(functor: impl Into<Atom>, args: impl IntoIterator<Item = Term>) -> Term {
        Term::Compound(Rc::new(Compound {
            functor: functor.into(),
            args: args.into_iter().collect(),
        }))
    }

    /// The empty list atom `[]`.
    pub fn nil() -> Term {
        Term::atom("[]")
    }

    /// A list cell `'.'(Head, Tail)`.
    pub fn cons(head: Term, tail: Term) -> Term {
        Term::compound(".", [head, tail])
    }

    /// A proper list of `items`.
    pub fn list(items: impl IntoIterator<Item = Term>) -> Term {
        Term::list_with_tail(items, Term::nil())
    }

    /// A list of `items` followed by `tail`.
    pub fn list_with_tail(items: impl IntoIterator<Item = Term>, tail: Term) -> Term {
        let items: Vec<Term> = items.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(tail, |tail, item| Term::cons(item, tail))
    }

    /// A right-leaning `','/2` spine over `goals`, or the atom `true` if
    /// `goals` is empty.
    pub fn conjunction(goals: impl IntoIterator<Item = Term>) -> Term {
        let mut goals: Vec<Term> = goals.into_iter().collect();
        match goals.pop() {
            None => Term::atom("true"),
            Some(last) => goals
                .into_iter()
                .rev()
                .fold(last, |spine, goal| Term::compound(",", [goal, spine])),
        }
    }

    pub fn name(&self) -> Option<&Atom> {
        match self {
            Term::Atom(name) => Some(name),
            Term::Compound(c) => Some(&c.functor),
            _ => None,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Term::Compound(c) => c.args.len(),
            _ => 0,
        }
    }
}

impl Compound {
    pub fn is_cons(&self) -> bool {
        &*self.functor == "." && self.args.len() == 2
    }
}

// Deep list spines would otherwise recurse once per element when the last
// strong reference goes away.
impl Drop for Compound {
    fn drop(&mut self) {
        let mut args = mem::take(&mut self.args);
        while let Some(term) = args.pop() {
            if let Term::Compound(rc) = term {
                if let Ok(mut inner) = Rc::try_unwrap(rc) {
                    args.append(&mut inner.args);
                }
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Term::Atom(name) => write!(f, "{}", name),
            Term::Integer(n) => write!(f, "{}", n),
            Term::Float(x) => write!(f, "{}", x),
            Term::Var(v) => write!(f, "_G{}", v),
            Term::Compound(c) if c.is_cons() => {
                write!(f, "[{}", c.args[0])?;
                let mut tail = &c.args[1];
                loop {
                    match tail {
                        Term::Compound(d) if d.is_cons() => {
                            write!(f, ",{}", d.args[0])?;
                            tail = &d.args[1];
                        }
                        Term::Atom(a) if &**a == "[]" => break,
                        partial => {
                            write!(f, "|{}", partial)?;
                            break;
                        }
                    }
                }
                write!(f, "]")
            }
            Term::Compound(c) if &*c.functor == "/" && c.args.len() == 2 => {
                // procedure indicators read much better infix
                write!(f, "{}/{}", c.args[0], c.args[1])
            }
            Term::Compound(c) => {
                write!(f, "{}(", c.functor)?;
                for (i, arg) in c.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_construction() {
        let l = Term::list([Term::integer(1), Term::integer(2)]);
        assert_eq!(
            l,
            Term::cons(
                Term::integer(1),
                Term::cons(Term::integer(2), Term::nil())
            )
        );
        assert_eq!(l.to_string(), "[1,2]");
    }

    #[test]
    fn partial_list_display() {
        let l = Term::list_with_tail([Term::integer(1)], Term::Var(0));
        assert_eq!(l.to_string(), "[1|_G0]");
    }

    #[test]
    fn conjunction_spine_leans_right() {
        let g = Term::conjunction([Term::atom("a"), Term::atom("b"), Term::atom("c")]);
        assert_eq!(
            g,
            Term::compound(
                ",",
                [
                    Term::atom("a"),
                    Term::compound(",", [Term::atom("b"), Term::atom("c")])
                ]
            )
        );
        assert_eq!(Term::conjunction([]), Term::atom("true"));
    }

    #[test]
    fn name_and_arity() {
        let t = Term::compound("f", [Term::atom("a"), Term::atom("b")]);
        assert_eq!(t.name().map(|a| &**a), Some("f"));
        assert_eq!(t.arity(), 2);
        assert_eq!(Term::atom("f").arity(), 0);
        assert_eq!(Term::integer(3).name(), None);
    }

    #[test]
    fn deep_list_drops_without_recursion() {
        let _ = Term::list((0..200_000).map(Term::integer));
    }
}
