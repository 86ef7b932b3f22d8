use crate::error::Error;

/// A single interpreter instruction.
///
/// Operands are taken from, and results pushed onto, the value stack. Jump targets are absolute
/// instruction indices within the same prototype.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Nil,
    True,
    False,
    Int(i64),
    /// Push a new string; allocates on every execution.
    Str(Vec<u8>),
    Pop,
    Dup,
    GetLocal(u8),
    SetLocal(u8),
    GetGlobal(String),
    SetGlobal(String),
    Add,
    Sub,
    Lt,
    Eq,
    Not,
    Concat,
    Jump(usize),
    JumpIfFalse(usize),
    /// Call the function below `argc` arguments; pushes its first result, or nil.
    Call(u8),
    /// Like `Call`, but pushes `true, result` on success and `false, message` on error.
    PCall(u8),
    /// Return the top `n` values, where `n` is 0 or 1.
    Return(u8),
}

impl Op {
    pub fn str<S: AsRef<[u8]>>(s: S) -> Op {
        Op::Str(s.as_ref().to_vec())
    }

    pub fn get_global<S: Into<String>>(name: S) -> Op {
        Op::GetGlobal(name.into())
    }

    pub fn set_global<S: Into<String>>(name: S) -> Op {
        Op::SetGlobal(name.into())
    }
}

/// A function prototype.
#[derive(Debug)]
pub struct Proto {
    name: String,
    params: u8,
    locals: u8,
    code: Vec<Op>,
}

impl Proto {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> u8 {
        self.params
    }

    /// Local slots, including parameters.
    pub fn locals(&self) -> u8 {
        self.locals
    }

    pub fn code(&self) -> &[Op] {
        &self.code
    }
}

/// Assembles a [`Proto`], checking operands when built.
pub struct ProtoBuilder {
    name: String,
    params: u8,
    locals: u8,
    code: Vec<Op>,
}

impl ProtoBuilder {
    pub fn new<S: Into<String>>(name: S) -> Self {
        ProtoBuilder {
            name: name.into(),
            params: 0,
            locals: 0,
            code: vec![],
        }
    }

    pub fn with_params(mut self, params: u8) -> Self {
        self.params = params;
        self
    }

    pub fn with_locals(mut self, locals: u8) -> Self {
        self.locals = locals;
        self
    }

    pub fn with_op(mut self, op: Op) -> Self {
        self.code.push(op);
        self
    }

    pub fn with_ops<I: IntoIterator<Item = Op>>(mut self, ops: I) -> Self {
        self.code.extend(ops);
        self
    }

    /// The index the next instruction will occupy.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn build(self) -> Result<Proto, Error> {
        let locals = self.locals.max(self.params);
        let len = self.code.len();
        for (pc, op) in self.code.iter().enumerate() {
            match op {
                Op::Jump(target) | Op::JumpIfFalse(target) => {
                    tether_ensure!(
                        *target <= len,
                        "{}: jump at {} targets {}, past the end of {} instructions",
                        self.name,
                        pc,
                        target,
                        len
                    );
                }
                Op::GetLocal(slot) | Op::SetLocal(slot) => {
                    tether_ensure!(
                        *slot < locals,
                        "{}: local {} at {} out of range ({} locals)",
                        self.name,
                        slot,
                        pc,
                        locals
                    );
                }
                Op::Return(n) => {
                    tether_ensure!(*n <= 1, "{}: return of {} values at {}", self.name, n, pc);
                }
                _ => (),
            }
        }
        Ok(Proto {
            name: self.name,
            params: self.params,
            locals,
            code: self.code,
        })
    }
}
