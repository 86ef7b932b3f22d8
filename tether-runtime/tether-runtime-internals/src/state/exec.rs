use crate::error::Error;
use crate::hook::HookEvent;
use crate::state::heap::Str;
use crate::state::{Function, Op, Proto, State, Value};
use std::rc::Rc;

impl State {
    /// Run a function body between its call and return safepoints.
    pub(super) fn enter(&mut self, func: &Function, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        self.safepoint(HookEvent::Call)?;
        let results = match func {
            Function::Script(proto) => self.execute(proto, args)?,
            Function::Native(native) => (native.func)(self, args)?,
        };
        self.safepoint(HookEvent::Return)?;
        Ok(results)
    }

    fn execute(&mut self, proto: &Rc<Proto>, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        let base = self.stack.len();
        let locals = proto.locals() as usize;
        if base + locals > self.limits.max_stack_size {
            return Err(self.runtime_error("stack overflow"));
        }
        let mut args = args.into_iter();
        for slot in 0..locals {
            let value = if slot < proto.params() as usize {
                args.next().unwrap_or(Value::Nil)
            } else {
                Value::Nil
            };
            self.stack.push(value);
        }

        let caller_floor = std::mem::replace(&mut self.frame_floor, base + locals);
        let res = self.run_frame(proto, base);
        self.frame_floor = caller_floor;
        self.stack.truncate(base);
        res
    }

    fn run_frame(&mut self, proto: &Proto, base: usize) -> Result<Vec<Value>, Error> {
        let code = proto.code();
        let mut pc = 0;
        while let Some(op) = code.get(pc) {
            pc += 1;
            self.instructions += 1;
            self.safepoint(HookEvent::Count)?;

            match op {
                Op::Nil => self.push(Value::Nil)?,
                Op::True => self.push(Value::Boolean(true))?,
                Op::False => self.push(Value::Boolean(false))?,
                Op::Int(i) => self.push(Value::Integer(*i))?,
                Op::Str(bytes) => {
                    let s = self.new_bytes(bytes)?;
                    self.push(s)?;
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    let top = self.peek()?.clone();
                    self.push(top)?;
                }
                Op::GetLocal(slot) => {
                    let value = self.stack[base + *slot as usize].clone();
                    self.push(value)?;
                }
                Op::SetLocal(slot) => {
                    let value = self.pop()?;
                    self.stack[base + *slot as usize] = value;
                }
                Op::GetGlobal(name) => {
                    let value = self.get_global(name);
                    self.push(value)?;
                }
                Op::SetGlobal(name) => {
                    let value = self.pop()?;
                    self.set_global(name, value);
                }
                Op::Add | Op::Sub => {
                    let (a, b) = self.pop2()?;
                    let res = match (&a, &b) {
                        (Value::Integer(a), Value::Integer(b)) if *op == Op::Add => {
                            a.wrapping_add(*b)
                        }
                        (Value::Integer(a), Value::Integer(b)) => a.wrapping_sub(*b),
                        _ => {
                            let culprit = if a.as_integer().is_none() { &a } else { &b };
                            return Err(self.runtime_error(&format!(
                                "attempt to perform arithmetic on a {} value",
                                culprit.type_name()
                            )));
                        }
                    };
                    self.push(Value::Integer(res))?;
                }
                Op::Lt => {
                    let (a, b) = self.pop2()?;
                    let res = match (&a, &b) {
                        (Value::Integer(a), Value::Integer(b)) => a < b,
                        (Value::String(a), Value::String(b)) => a.as_bytes() < b.as_bytes(),
                        _ => {
                            return Err(self.runtime_error(&format!(
                                "attempt to compare {} with {}",
                                a.type_name(),
                                b.type_name()
                            )))
                        }
                    };
                    self.push(Value::Boolean(res))?;
                }
                Op::Eq => {
                    let (a, b) = self.pop2()?;
                    self.push(Value::Boolean(a == b))?;
                }
                Op::Not => {
                    let value = self.pop()?;
                    self.push(Value::Boolean(!value.is_truthy()))?;
                }
                Op::Concat => {
                    let (a, b) = self.pop2()?;
                    let (a, b) = (self.concat_operand(&a)?, self.concat_operand(&b)?);
                    let s = Str::concat(&self.heap, &a, &b)?;
                    self.push(Value::String(Rc::new(s)))?;
                }
                Op::Jump(target) => pc = *target,
                Op::JumpIfFalse(target) => {
                    if !self.pop()?.is_truthy() {
                        pc = *target;
                    }
                }
                Op::Call(argc) => {
                    let (func, args) = self.pop_call(*argc)?;
                    let first = self.call(&func, args)?.into_iter().next();
                    self.push(first.unwrap_or(Value::Nil))?;
                }
                Op::PCall(argc) => {
                    let (func, args) = self.pop_call(*argc)?;
                    let top = self.stack.len();
                    match self.call(&func, args) {
                        Ok(results) => {
                            self.push(Value::Boolean(true))?;
                            self.push(results.into_iter().next().unwrap_or(Value::Nil))?;
                        }
                        Err(e) if e.is_catchable() => {
                            self.stack.truncate(top);
                            let msg = self.message_value(&e)?;
                            self.push(Value::Boolean(false))?;
                            self.push(msg)?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Op::Return(0) => return Ok(vec![]),
                Op::Return(_) => return Ok(vec![self.pop()?]),
            }
        }
        Ok(vec![])
    }

    fn push(&mut self, value: Value) -> Result<(), Error> {
        if self.stack.len() >= self.limits.max_stack_size {
            return Err(self.runtime_error("stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop a temporary of the running frame. Locals and caller values are never popped.
    fn pop(&mut self) -> Result<Value, Error> {
        if self.stack.len() <= self.frame_floor {
            tether_bail!("value stack underflow");
        }
        self.stack
            .pop()
            .ok_or_else(|| tether_format_err!("value stack underflow"))
    }

    fn peek(&self) -> Result<&Value, Error> {
        if self.stack.len() <= self.frame_floor {
            tether_bail!("value stack underflow");
        }
        self.stack
            .last()
            .ok_or_else(|| tether_format_err!("value stack underflow"))
    }

    /// Pop `b`, then `a`, for a binary operation `a op b`.
    fn pop2(&mut self) -> Result<(Value, Value), Error> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn pop_call(&mut self, argc: u8) -> Result<(Value, Vec<Value>), Error> {
        let argc = argc as usize;
        if self.stack.len() < self.frame_floor + argc + 1 {
            tether_bail!("value stack underflow calling with {} arguments", argc);
        }
        let args = self.stack.split_off(self.stack.len() - argc);
        let func = self.pop()?;
        Ok((func, args))
    }

    fn concat_operand(&self, value: &Value) -> Result<Vec<u8>, Error> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Integer(i) => Ok(i.to_string().into_bytes()),
            other => Err(self.runtime_error(&format!(
                "attempt to concatenate a {} value",
                other.type_name()
            ))),
        }
    }
}
