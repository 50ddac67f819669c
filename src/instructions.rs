use std::rc::Rc;

/// One decoded bytecode instruction. The byte layout is one opcode byte,
/// followed by a one-byte table index for the instructions that take one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Instruction {
    Void,
    Enter,
    Call(u8),
    Exit,
    Const(u8),
    Var(u8),
    Functor(u8),
    Pop,
}

impl Instruction {
    pub(crate) const VOID: u8 = 0;
    pub(crate) const ENTER: u8 = 1;
    pub(crate) const CALL: u8 = 2;
    pub(crate) const EXIT: u8 = 3;
    pub(crate) const CONST: u8 = 4;
    pub(crate) const VAR: u8 = 5;
    pub(crate) const FUNCTOR: u8 = 6;
    pub(crate) const POP: u8 = 7;

    pub(crate) fn encode(self, code: &mut Vec<u8>) {
        match self {
            Instruction::Void => code.push(Self::VOID),
            Instruction::Enter => code.push(Self::ENTER),
            Instruction::Call(i) => {
                code.push(Self::CALL);
                code.push(i);
            }
            Instruction::Exit => code.push(Self::EXIT),
            Instruction::Const(i) => {
                code.push(Self::CONST);
                code.push(i);
            }
            Instruction::Var(i) => {
                code.push(Self::VAR);
                code.push(i);
            }
            Instruction::Functor(i) => {
                code.push(Self::FUNCTOR);
                code.push(i);
            }
            Instruction::Pop => code.push(Self::POP),
        }
    }

    /// Decodes the instruction at `pc`, returning it with the next program
    /// counter. `None` means an unknown opcode or a truncated tape, which the
    /// machine reports as a system error.
    pub(crate) fn decode(code: &[u8], pc: usize) -> Option<(Instruction, usize)> {
        let opcode = *code.get(pc)?;
        Some(match opcode {
            Self::VOID => (Instruction::Void, pc + 1),
            Self::ENTER => (Instruction::Enter, pc + 1),
            Self::CALL => (Instruction::Call(*code.get(pc + 1)?), pc + 2),
            Self::EXIT => (Instruction::Exit, pc + 1),
            Self::CONST => (Instruction::Const(*code.get(pc + 1)?), pc + 2),
            Self::VAR => (Instruction::Var(*code.get(pc + 1)?), pc + 2),
            Self::FUNCTOR => (Instruction::Functor(*code.get(pc + 1)?), pc + 2),
            Self::POP => (Instruction::Pop, pc + 1),
            _ => return None,
        })
    }
}

/// The single-instruction program host predicates continue through.
pub(crate) fn exit_program() -> Rc<[u8]> {
    Rc::from(vec![Instruction::EXIT])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let instructions = [
            Instruction::Void,
            Instruction::Functor(3),
            Instruction::Const(0),
            Instruction::Var(1),
            Instruction::Pop,
            Instruction::Enter,
            Instruction::Call(2),
            Instruction::Exit,
        ];

        let mut code = Vec::new();
        for instruction in instructions {
            instruction.encode(&mut code);
        }

        let mut pc = 0;
        let mut decoded = Vec::new();
        while pc < code.len() {
            let (instruction, next) = Instruction::decode(&code, pc).unwrap();
            decoded.push(instruction);
            pc = next;
        }

        assert_eq!(&decoded[..], &instructions[..]);
    }

    #[test]
    fn rejects_unknown_opcode_and_truncated_operand() {
        assert_eq!(Instruction::decode(&[0xff], 0), None);
        assert_eq!(Instruction::decode(&[Instruction::CALL], 0), None);
    }
}
