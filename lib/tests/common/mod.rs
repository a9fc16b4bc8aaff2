//! Reference evaluator for method bodies, just precise enough to observe what a preamble does

#![allow(dead_code)]

use ilpatch::il::code::{Body, BranchCondition, InsnId, Instruction};
use ilpatch::il::{MethodRef, TypeSig};
use ilpatch::inject::PatchRegistry;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Boxed(TypeSig, Box<Value>),
    Array(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    pub fn boxed(ty: TypeSig, value: Value) -> Value {
        Value::Boxed(ty, Box::new(value))
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            _ => true,
        }
    }
}

/// Registry double: records every query and dispatch
#[derive(Default)]
pub struct FakeRegistry {
    pub patched: HashSet<(String, String)>,
    pub result: Option<Value>,
    pub checks: Vec<(String, String)>,
    pub dispatches: Vec<(String, String, Vec<Value>)>,
}

impl FakeRegistry {
    pub fn patch(type_name: &str, method_name: &str, result: Value) -> FakeRegistry {
        let mut registry = FakeRegistry::default();
        registry
            .patched
            .insert((type_name.to_owned(), method_name.to_owned()));
        registry.result = Some(result);
        registry
    }
}

pub struct Outcome {
    /// Value left by `ret`, for methods that return one
    pub returned: Option<Value>,

    /// Instructions executed, with the stack depth just before each one
    pub trace: Vec<(InsnId, usize)>,

    /// Names of the methods called, other than the registry entry points
    pub calls: Vec<String>,

    /// Arguments when the method returned
    pub arguments: Vec<Value>,
}

impl Outcome {
    pub fn executed(&self, id: InsnId) -> bool {
        self.trace.iter().any(|(executed, _)| *executed == id)
    }

    pub fn depth_at(&self, id: InsnId) -> Option<usize> {
        self.trace
            .iter()
            .find(|(executed, _)| *executed == id)
            .map(|(_, depth)| *depth)
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, String> {
    stack.pop().ok_or_else(|| String::from("stack underflow"))
}

fn pop_int(stack: &mut Vec<Value>) -> Result<i64, String> {
    match pop(stack)? {
        Value::Int(n) => Ok(n),
        other => Err(format!("expected an integer, found {:?}", other)),
    }
}

fn pop_str(stack: &mut Vec<Value>) -> Result<String, String> {
    match pop(stack)? {
        Value::Str(s) => Ok(s),
        other => Err(format!("expected a string, found {:?}", other)),
    }
}

/// Run a body to completion
pub fn execute(
    body: &Body,
    mut arguments: Vec<Value>,
    returns_value: bool,
    contract: &PatchRegistry,
    registry: &mut FakeRegistry,
) -> Result<Outcome, String> {
    let mut stack: Vec<Value> = vec![];
    let mut locals: Vec<Value> = vec![Value::Null; body.locals.len()];
    let mut trace = vec![];
    let mut calls = vec![];

    let mut position = 0;
    loop {
        let id = body
            .id_at(position)
            .ok_or_else(|| String::from("fell off the end of the method"))?;
        let instruction = body
            .instruction(id)
            .ok_or_else(|| format!("{:?} is missing", id))?;
        if trace.len() > 10_000 {
            return Err(String::from("step limit exceeded"));
        }
        trace.push((id, stack.len()));
        position += 1;

        match instruction {
            Instruction::Nop => (),
            Instruction::LdArg(idx) => stack.push(
                arguments
                    .get(*idx as usize)
                    .cloned()
                    .ok_or_else(|| format!("no argument {}", idx))?,
            ),
            Instruction::StArg(idx) => {
                let value = pop(&mut stack)?;
                *arguments
                    .get_mut(*idx as usize)
                    .ok_or_else(|| format!("no argument {}", idx))? = value;
            }
            Instruction::LdLoc(idx) => stack.push(
                locals
                    .get(*idx as usize)
                    .cloned()
                    .ok_or_else(|| format!("no local {}", idx))?,
            ),
            Instruction::StLoc(idx) => {
                let value = pop(&mut stack)?;
                *locals
                    .get_mut(*idx as usize)
                    .ok_or_else(|| format!("no local {}", idx))? = value;
            }
            Instruction::LdNull => stack.push(Value::Null),
            Instruction::LdcI4(n) => stack.push(Value::Int(*n as i64)),
            Instruction::LdcI8(n) => stack.push(Value::Int(*n)),
            Instruction::LdcR4(f) => stack.push(Value::Float(*f as f64)),
            Instruction::LdcR8(f) => stack.push(Value::Float(*f)),
            Instruction::LdStr(s) => stack.push(Value::Str(s.clone())),
            Instruction::Dup => {
                let value = pop(&mut stack)?;
                stack.push(value.clone());
                stack.push(value);
            }
            Instruction::Pop => {
                pop(&mut stack)?;
            }
            Instruction::Add | Instruction::Sub | Instruction::Mul => {
                let rhs = pop_int(&mut stack)?;
                let lhs = pop_int(&mut stack)?;
                stack.push(Value::Int(match instruction {
                    Instruction::Add => lhs.wrapping_add(rhs),
                    Instruction::Sub => lhs.wrapping_sub(rhs),
                    _ => lhs.wrapping_mul(rhs),
                }));
            }
            Instruction::Ceq | Instruction::Cgt | Instruction::Clt => {
                let rhs = pop_int(&mut stack)?;
                let lhs = pop_int(&mut stack)?;
                let result = match instruction {
                    Instruction::Ceq => lhs == rhs,
                    Instruction::Cgt => lhs > rhs,
                    _ => lhs < rhs,
                };
                stack.push(Value::Int(result as i64));
            }
            Instruction::Branch(cond, target) | Instruction::ShortBranch(cond, target) => {
                let taken = match cond {
                    BranchCondition::Always => true,
                    BranchCondition::False => !pop(&mut stack)?.truthy(),
                    BranchCondition::True => pop(&mut stack)?.truthy(),
                    _ => {
                        let rhs = pop_int(&mut stack)?;
                        let lhs = pop_int(&mut stack)?;
                        match cond {
                            BranchCondition::Eq => lhs == rhs,
                            BranchCondition::Ge => lhs >= rhs,
                            BranchCondition::Gt => lhs > rhs,
                            BranchCondition::Le => lhs <= rhs,
                            BranchCondition::Lt => lhs < rhs,
                            _ => lhs != rhs,
                        }
                    }
                };
                if taken {
                    position = body
                        .position(*target)
                        .ok_or_else(|| format!("branch to unknown {:?}", target))?;
                }
            }
            Instruction::Call(method) | Instruction::CallVirt(method) => {
                call(method, contract, registry, &mut stack, &mut calls)?
            }
            Instruction::NewArr(_) => {
                let len = pop_int(&mut stack)?;
                let elements = vec![Value::Null; len as usize];
                stack.push(Value::Array(Rc::new(RefCell::new(elements))));
            }
            Instruction::StElemRef => {
                let value = pop(&mut stack)?;
                let index = pop_int(&mut stack)? as usize;
                match pop(&mut stack)? {
                    Value::Array(elements) => {
                        *elements
                            .borrow_mut()
                            .get_mut(index)
                            .ok_or_else(|| format!("index {} out of range", index))? = value;
                    }
                    other => return Err(format!("stelem.ref on {:?}", other)),
                }
            }
            Instruction::LdElemRef => {
                let index = pop_int(&mut stack)? as usize;
                match pop(&mut stack)? {
                    Value::Array(elements) => stack.push(
                        elements
                            .borrow()
                            .get(index)
                            .cloned()
                            .ok_or_else(|| format!("index {} out of range", index))?,
                    ),
                    other => return Err(format!("ldelem.ref on {:?}", other)),
                }
            }
            Instruction::LdLen => match pop(&mut stack)? {
                Value::Array(elements) => stack.push(Value::Int(elements.borrow().len() as i64)),
                other => return Err(format!("ldlen on {:?}", other)),
            },
            Instruction::Box(ty) => {
                let value = pop(&mut stack)?;
                stack.push(Value::boxed(ty.clone(), value));
            }
            Instruction::UnboxAny(ty) => {
                let value = pop(&mut stack)?;
                if ty.is_value_type() {
                    match value {
                        Value::Boxed(boxed_ty, inner) if boxed_ty == *ty => stack.push(*inner),
                        other => return Err(format!("cannot unbox {:?} as {:?}", other, ty)),
                    }
                } else {
                    stack.push(value);
                }
            }
            Instruction::Ret => {
                let returned = if returns_value {
                    Some(pop(&mut stack)?)
                } else {
                    None
                };
                if !stack.is_empty() {
                    return Err(format!("stack not empty on return: {:?}", stack));
                }
                return Ok(Outcome {
                    returned,
                    trace,
                    calls,
                    arguments,
                });
            }
            Instruction::Throw => return Err(String::from("exception thrown")),
            other => return Err(format!("unsupported instruction {}", other)),
        }
    }
}

fn call(
    method: &MethodRef,
    contract: &PatchRegistry,
    registry: &mut FakeRegistry,
    stack: &mut Vec<Value>,
    calls: &mut Vec<String>,
) -> Result<(), String> {
    if *method == contract.has_patch {
        let method_name = pop_str(stack)?;
        let type_name = pop_str(stack)?;
        let key = (type_name, method_name);
        let patched = registry.patched.contains(&key);
        registry.checks.push(key);
        stack.push(Value::Int(patched as i64));
    } else if *method == contract.call_patch {
        let args = match pop(stack)? {
            Value::Array(elements) => elements.borrow().clone(),
            other => return Err(format!("CallPatch arguments are {:?}", other)),
        };
        let method_name = pop_str(stack)?;
        let type_name = pop_str(stack)?;
        registry.dispatches.push((type_name, method_name, args));
        stack.push(registry.result.clone().unwrap_or(Value::Null));
    } else {
        for _ in 0..method.signature.argument_slots() {
            pop(stack)?;
        }
        if !method.signature.return_type.is_void() {
            stack.push(Value::Null);
        }
        calls.push(method.name.clone());
    }
    Ok(())
}
