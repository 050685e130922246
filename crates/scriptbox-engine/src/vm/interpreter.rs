//! Stack interpreter for decoded method bodies
//!
//! A [`Frame`] is one activation: its code, operand stack and local slots
//! (arguments first). [`Machine`] executes frames against an
//! [`ExecContext`]; nested calls recurse through the machine and share its
//! step budget, so one top-level invocation can never exceed `max_steps`
//! instructions in total.

use super::coroutine::Coroutine;
use super::object::Instance;
use super::ExecContext;
use crate::error::{MemberKind, ScriptError, ScriptResult};
use crate::image::Instr;
use crate::reflect::{MethodDescriptor, ModuleType};
use scriptbox_sdk::{SequenceHandle, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Deepest nesting of script-to-script calls
pub const MAX_CALL_DEPTH: usize = 128;

/// Why a frame stopped running
#[derive(Debug)]
pub(crate) enum Step {
    /// A sequence method suspended with a value
    Yield(Value),
    /// The method returned
    Return(Value),
}

/// One method activation
pub(crate) struct Frame {
    ty: Arc<ModuleType>,
    this: Option<Arc<Instance>>,
    method: Arc<MethodDescriptor>,
    code: Arc<[Instr]>,
    pc: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
}

impl Frame {
    /// Prepare a frame; `args` must already be bound
    pub(crate) fn new(
        ty: Arc<ModuleType>,
        this: Option<Arc<Instance>>,
        method: Arc<MethodDescriptor>,
        mut args: Vec<Value>,
    ) -> ScriptResult<Self> {
        let code = ty.body(method.index)?;
        args.resize(method.slot_count, Value::Null);
        Ok(Self {
            ty,
            this,
            method,
            code,
            pc: 0,
            stack: Vec::with_capacity(8),
            locals: args,
        })
    }

    pub(crate) fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    fn fail(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::invocation(self.ty.full_name(), &self.method.name, message)
    }

    fn pop(&mut self) -> ScriptResult<Value> {
        match self.stack.pop() {
            Some(v) => Ok(v),
            None => Err(self.fail("stack underflow")),
        }
    }

    fn pop_n(&mut self, n: usize) -> ScriptResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(self.fail("stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn string(&self, idx: u32) -> ScriptResult<String> {
        match self.ty.image().string(idx) {
            Some(s) => Ok(s.to_string()),
            None => Err(self.fail(format!("invalid string index {}", idx))),
        }
    }

    fn this(&self) -> ScriptResult<&Arc<Instance>> {
        self.this
            .as_ref()
            .ok_or_else(|| self.fail("no instance in a static method"))
    }
}

/// Check arity and coerce arguments to the declared parameter types
pub(crate) fn bind_args(
    ty: &ModuleType,
    method: &MethodDescriptor,
    has_this: bool,
    args: Vec<Value>,
) -> ScriptResult<Vec<Value>> {
    let fail = |message: String| ScriptError::invocation(ty.full_name(), &method.name, message);
    if !method.is_static && !has_this {
        return Err(fail("instance method called without an instance".to_string()));
    }
    if args.len() != method.params.len() {
        return Err(fail(format!(
            "expected {} argument(s), got {}",
            method.params.len(),
            args.len()
        )));
    }
    args.into_iter()
        .zip(&method.params)
        .map(|(arg, param)| {
            let got = arg.value_type();
            param.ty.coerce(arg).ok_or_else(|| {
                fail(format!(
                    "argument '{}' expects {}, got {}",
                    param.name,
                    param.ty.name(),
                    got
                ))
            })
        })
        .collect()
}

/// Invoke a method from outside the interpreter
///
/// Sequence methods do not run here; they come back as a
/// `Value::Sequence` for the caller (or the host) to resume.
pub(crate) fn invoke(
    ty: &Arc<ModuleType>,
    this: Option<&Arc<Instance>>,
    method: &Arc<MethodDescriptor>,
    args: Vec<Value>,
) -> ScriptResult<Value> {
    let ctx = ty.exec_context()?;
    let this = if method.is_static { None } else { this.cloned() };
    let args = bind_args(ty, method, this.is_some(), args)?;
    let frame = Frame::new(ty.clone(), this, method.clone(), args)?;
    if method.is_sequence {
        return Ok(Value::Sequence(SequenceHandle::new(Box::new(Coroutine::new(
            ctx, frame,
        )))));
    }
    Machine::new(&ctx).complete(frame)
}

/// Executes frames with a shared step budget
pub(crate) struct Machine<'a> {
    ctx: &'a ExecContext,
    remaining: u64,
    depth: usize,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(ctx: &'a ExecContext) -> Self {
        Self {
            ctx,
            remaining: ctx.max_steps,
            depth: 0,
        }
    }

    /// Run a non-sequence frame to its return value
    fn complete(&mut self, mut frame: Frame) -> ScriptResult<Value> {
        match self.run(&mut frame)? {
            Step::Return(value) => coerce_return(&frame, value),
            Step::Yield(_) => Err(frame.fail("yield outside a sequence method")),
        }
    }

    /// Nested script-to-script call
    fn call(
        &mut self,
        ty: &Arc<ModuleType>,
        this: Option<Arc<Instance>>,
        method: Arc<MethodDescriptor>,
        args: Vec<Value>,
    ) -> ScriptResult<Value> {
        let this = if method.is_static { None } else { this };
        let args = bind_args(ty, &method, this.is_some(), args)?;
        let frame = Frame::new(ty.clone(), this, method.clone(), args)?;
        if method.is_sequence {
            return Ok(Value::Sequence(SequenceHandle::new(Box::new(Coroutine::new(
                self.ctx.clone(),
                frame,
            )))));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(frame.fail("call depth exceeded"));
        }
        self.depth += 1;
        let result = self.complete(frame);
        self.depth -= 1;
        result
    }

    /// Run until the frame returns or yields
    pub(crate) fn run(&mut self, frame: &mut Frame) -> ScriptResult<Step> {
        loop {
            if self.remaining == 0 {
                return Err(frame.fail("step budget exhausted"));
            }
            self.remaining -= 1;

            let instr = match frame.code.get(frame.pc) {
                Some(instr) => *instr,
                None => return Ok(Step::Return(Value::Null)),
            };
            frame.pc += 1;

            match instr {
                Instr::Nop => {}
                Instr::Pop => {
                    frame.pop()?;
                }
                Instr::Dup => {
                    let top = frame.pop()?;
                    frame.stack.push(top.clone());
                    frame.stack.push(top);
                }
                Instr::PushNull => frame.stack.push(Value::Null),
                Instr::PushBool(b) => frame.stack.push(Value::Bool(b)),
                Instr::PushInt(i) => frame.stack.push(Value::Int(i)),
                Instr::PushFloat(f) => frame.stack.push(Value::Float(f)),
                Instr::PushStr(idx) => {
                    let s = frame.string(idx)?;
                    frame.stack.push(Value::str(s));
                }
                Instr::LoadThis => {
                    let this = frame.this()?.to_value();
                    frame.stack.push(this);
                }

                Instr::Load(slot) => match frame.locals.get(slot as usize) {
                    Some(v) => {
                        let v = v.clone();
                        frame.stack.push(v);
                    }
                    None => return Err(frame.fail(format!("invalid local slot {}", slot))),
                },
                Instr::Store(slot) => {
                    let value = frame.pop()?;
                    match frame.locals.get_mut(slot as usize) {
                        Some(cell) => *cell = value,
                        None => return Err(frame.fail(format!("invalid local slot {}", slot))),
                    }
                }
                Instr::LoadField(idx) => {
                    let name = frame.string(idx)?;
                    let field = frame
                        .ty
                        .field(&name, false)
                        .ok_or_else(|| ScriptError::not_found(frame.ty.full_name(), MemberKind::Field, &name))?;
                    let value = frame.this()?.get_slot(field.slot).unwrap_or_default();
                    frame.stack.push(value);
                }
                Instr::StoreField(idx) => {
                    let name = frame.string(idx)?;
                    let field = frame
                        .ty
                        .field(&name, false)
                        .ok_or_else(|| ScriptError::not_found(frame.ty.full_name(), MemberKind::Field, &name))?;
                    let value = frame.pop()?;
                    let got = value.value_type();
                    let value = field.ty.coerce(value).ok_or_else(|| {
                        frame.fail(format!(
                            "cannot store {} in {} field '{}'",
                            got,
                            field.ty.name(),
                            name
                        ))
                    })?;
                    frame.this()?.set_slot(field.slot, value);
                }
                Instr::LoadStatic(idx) => {
                    let name = frame.string(idx)?;
                    let field = frame
                        .ty
                        .field(&name, true)
                        .ok_or_else(|| ScriptError::not_found(frame.ty.full_name(), MemberKind::Field, &name))?;
                    let value = frame.ty.load_static(field.slot);
                    frame.stack.push(value);
                }
                Instr::StoreStatic(idx) => {
                    let name = frame.string(idx)?;
                    let field = frame
                        .ty
                        .field(&name, true)
                        .ok_or_else(|| ScriptError::not_found(frame.ty.full_name(), MemberKind::Field, &name))?;
                    let value = frame.pop()?;
                    let got = value.value_type();
                    let value = field.ty.coerce(value).ok_or_else(|| {
                        frame.fail(format!(
                            "cannot store {} in {} field '{}'",
                            got,
                            field.ty.name(),
                            name
                        ))
                    })?;
                    frame.ty.store_static(field.slot, value);
                }

                Instr::Add | Instr::Sub | Instr::Mul | Instr::Div | Instr::Rem => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    let result = arithmetic(instr, a, b).map_err(|m| frame.fail(m))?;
                    frame.stack.push(result);
                }
                Instr::Neg => {
                    let v = frame.pop()?;
                    let result = match v {
                        Value::Int(i) => Value::Int(i.wrapping_neg()),
                        Value::Float(f) => Value::Float(-f),
                        other => {
                            return Err(frame.fail(format!("cannot negate {}", other.value_type())))
                        }
                    };
                    frame.stack.push(result);
                }
                Instr::Not => {
                    let v = frame.pop()?;
                    frame.stack.push(Value::Bool(!v.is_truthy()));
                }

                Instr::Eq | Instr::Ne => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    let equal = a == b;
                    frame
                        .stack
                        .push(Value::Bool(if instr == Instr::Eq { equal } else { !equal }));
                }
                Instr::Lt | Instr::Le | Instr::Gt | Instr::Ge => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    let ord = compare(&a, &b).ok_or_else(|| {
                        frame.fail(format!(
                            "cannot compare {} with {}",
                            a.value_type(),
                            b.value_type()
                        ))
                    })?;
                    let result = match instr {
                        Instr::Lt => ord == Ordering::Less,
                        Instr::Le => ord != Ordering::Greater,
                        Instr::Gt => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    };
                    frame.stack.push(Value::Bool(result));
                }

                Instr::Jmp(target) => frame.pc = target as usize,
                Instr::JmpIf(target) => {
                    if frame.pop()?.is_truthy() {
                        frame.pc = target as usize;
                    }
                }
                Instr::JmpIfNot(target) => {
                    if !frame.pop()?.is_truthy() {
                        frame.pc = target as usize;
                    }
                }
                Instr::Ret => {
                    let value = frame.pop()?;
                    return Ok(Step::Return(value));
                }
                Instr::RetVoid => return Ok(Step::Return(Value::Null)),
                Instr::Throw => {
                    let message = frame.pop()?;
                    return Err(frame.fail(message.to_string()));
                }

                Instr::Call { name, argc } => {
                    let name = frame.string(name)?;
                    let args = frame.pop_n(argc as usize)?;
                    let method = match frame.this {
                        Some(_) => frame
                            .ty
                            .method(&name, false)
                            .or_else(|| frame.ty.method(&name, true)),
                        None => frame.ty.method(&name, true),
                    }
                    .ok_or_else(|| {
                        ScriptError::not_found(frame.ty.full_name(), MemberKind::Method, &name)
                    })?;
                    let ty = frame.ty.clone();
                    let result = self.call(&ty, frame.this.clone(), method, args)?;
                    frame.stack.push(result);
                }
                Instr::CallStatic {
                    type_name,
                    name,
                    argc,
                } => {
                    let type_name = frame.string(type_name)?;
                    let name = frame.string(name)?;
                    let args = frame.pop_n(argc as usize)?;
                    let module = frame.ty.module()?;
                    let target = module.find_type(&type_name).ok_or_else(|| {
                        frame.fail(format!("type '{}' not found in module", type_name))
                    })?;
                    let method = target.method(&name, true).ok_or_else(|| {
                        ScriptError::not_found(target.full_name(), MemberKind::Method, &name)
                    })?;
                    let result = self.call(&target, None, method, args)?;
                    frame.stack.push(result);
                }
                Instr::CallExtern { import, argc } => {
                    let args = frame.pop_n(argc as usize)?;
                    let def = match frame.ty.image().imports.get(import as usize) {
                        Some(def) => def.clone(),
                        None => return Err(frame.fail(format!("invalid import index {}", import))),
                    };
                    let native = self.ctx.natives.resolve(&def).ok_or_else(|| {
                        frame.fail(format!(
                            "native '{}:{}' is not registered",
                            def.library,
                            def.full_member_name()
                        ))
                    })?;
                    let result = native(&args).map_err(|e| {
                        ScriptError::invocation(def.full_type_name(), &def.member, e.to_string())
                    })?;
                    frame.stack.push(result);
                }
                Instr::Raise { name, argc } => {
                    let name = frame.string(name)?;
                    let args = frame.pop_n(argc as usize)?;
                    match &frame.this {
                        Some(this) if frame.ty.event(&name, false).is_some() => {
                            this.events().raise(&name, &args);
                        }
                        _ if frame.ty.event(&name, true).is_some() => {
                            frame.ty.static_events().raise(&name, &args);
                        }
                        _ => {
                            return Err(ScriptError::not_found(
                                frame.ty.full_name(),
                                MemberKind::Event,
                                &name,
                            ))
                        }
                    }
                }
                Instr::Yield => {
                    let value = frame.pop()?;
                    return Ok(Step::Yield(value));
                }
            }
        }
    }
}

fn coerce_return(frame: &Frame, value: Value) -> ScriptResult<Value> {
    match frame.method.returns {
        None => Ok(Value::Null),
        Some(ty) => {
            let got = value.value_type();
            ty.coerce(value)
                .ok_or_else(|| frame.fail(format!("cannot return {} as {}", got, ty.name())))
        }
    }
}

fn arithmetic(op: Instr, a: Value, b: Value) -> Result<Value, String> {
    if op == Instr::Add && (matches!(a, Value::Str(_)) || matches!(b, Value::Str(_))) {
        return Ok(Value::str(format!("{}{}", a, b)));
    }
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => {
            let (x, y) = (*x, *y);
            Ok(Value::Int(match op {
                Instr::Add => x.wrapping_add(y),
                Instr::Sub => x.wrapping_sub(y),
                Instr::Mul => x.wrapping_mul(y),
                Instr::Div if y == 0 => return Err("division by zero".to_string()),
                Instr::Div => x.wrapping_div(y),
                Instr::Rem if y == 0 => return Err("division by zero".to_string()),
                _ => x.wrapping_rem(y),
            }))
        }
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Ok(Value::Float(match op {
                Instr::Add => x + y,
                Instr::Sub => x - y,
                Instr::Mul => x * y,
                Instr::Div => x / y,
                _ => x % y,
            })),
            _ => Err(format!(
                "unsupported operands {} and {}",
                a.value_type(),
                b.value_type()
            )),
        },
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => a.as_float()?.partial_cmp(&b.as_float()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic_wraps() {
        assert_eq!(
            arithmetic(Instr::Add, Value::Int(i64::MAX), Value::Int(1)).unwrap(),
            Value::Int(i64::MIN)
        );
        assert_eq!(
            arithmetic(Instr::Rem, Value::Int(7), Value::Int(3)).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert!(arithmetic(Instr::Div, Value::Int(1), Value::Int(0)).is_err());
        assert!(arithmetic(Instr::Rem, Value::Int(1), Value::Int(0)).is_err());
        assert_eq!(
            arithmetic(Instr::Div, Value::Float(1.0), Value::Int(2)).unwrap(),
            Value::Float(0.5)
        );
    }

    #[test]
    fn test_add_concatenates_strings() {
        assert_eq!(
            arithmetic(Instr::Add, Value::str("hp: "), Value::Int(3)).unwrap(),
            Value::str("hp: 3")
        );
        assert!(arithmetic(Instr::Sub, Value::str("a"), Value::Int(3)).is_err());
    }

    #[test]
    fn test_compare() {
        assert_eq!(compare(&Value::Int(1), &Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(compare(&Value::str("b"), &Value::str("a")), Some(Ordering::Greater));
        assert_eq!(compare(&Value::str("b"), &Value::Int(1)), None);
    }
}
