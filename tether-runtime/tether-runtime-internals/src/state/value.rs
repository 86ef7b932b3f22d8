use crate::error::Error;
use crate::state::heap::Str;
use crate::state::proto::Proto;
use crate::state::State;
use std::fmt;
use std::rc::Rc;

/// The signature of a native host function.
///
/// Natives run on the interpreter thread and reach no safepoints of their own.
pub type NativeFn = dyn Fn(&mut State, Vec<Value>) -> Result<Vec<Value>, Error>;

pub struct Native {
    pub(crate) name: String,
    pub(crate) func: Box<NativeFn>,
}

impl Native {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone)]
pub enum Function {
    Script(Rc<Proto>),
    Native(Rc<Native>),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Script(proto) => proto.name(),
            Function::Native(native) => native.name(),
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Function) -> bool {
        match (self, other) {
            (Function::Script(a), Function::Script(b)) => Rc::ptr_eq(a, b),
            (Function::Native(a), Function::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// An interpreter value.
///
/// Values are bound to the state that created them and never leave the interpreter thread.
#[derive(Clone, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    String(Rc<Str>),
    Function(Function),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// Everything except `nil` and `false` is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Value {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Integer(i)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Function(func) => write!(f, "function: {}", func.name()),
        }
    }
}
