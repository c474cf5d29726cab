use std::cell::Cell;
use std::rc::Rc;

use tracing::trace;

use crate::ast::*;
use crate::runtime::{Env, Failure, JsObject, Value};

type Result<T> = std::result::Result<T, Failure>;

/// Nested calls allowed before a run fails with a stack overflow. Each call
/// costs several native frames, so this stays well inside the main thread's
/// stack.
pub const MAX_CALL_DEPTH: usize = 256;

/// Number of function calls currently active, shared by every closure of a run.
type Depth = Rc<Cell<usize>>;

/// Signal that evaluation is unwinding to the enclosing function
enum Flow {
    /// Normal completion
    Value(Value),
    /// `return` seen, carrying its value
    Return(Value),
}

// Evaluate to a value, or hand a pending `return` up to the caller.
macro_rules! value {
    ($env:expr, $depth:expr, $e:expr) => {
        match eval($env, $depth, $e)? {
            Flow::Value(v) => v,
            ret @ Flow::Return(_) => return Ok(ret),
        }
    };
}

/// Evaluate a script directly against `env`. The result is the value of a
/// top-level `return`, or `undefined`.
pub fn run(script: &Script, env: &Rc<Env>) -> Result<Value> {
    let depth = Depth::default();
    match eval_block(env, &depth, &script.body)? {
        Flow::Return(v) => Ok(v),
        Flow::Value(_) => Ok(Value::Undefined),
    }
}

fn eval_block(env: &Rc<Env>, depth: &Depth, block: &Block) -> Result<Flow> {
    for e in &block.exprs {
        if let ret @ Flow::Return(_) = eval(env, depth, e)? {
            return Ok(ret);
        }
    }
    Ok(Flow::Value(Value::Undefined))
}

fn eval(env: &Rc<Env>, depth: &Depth, e: &Expr) -> Result<Flow> {
    let v = match &e.node {
        ExprKind::Literal(lit) => match lit {
            Literal::Int(n) => Value::Int(*n),
            Literal::Str(s) => Value::str(s),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Undefined => Value::Undefined,
        },
        ExprKind::Var { name } => env.lookup(name),
        ExprKind::Assign { name, value, declare } => {
            let v = value!(env, depth, value);
            if *declare {
                if env.lookup_local(name).is_some() {
                    return Err(Failure::new(format!("variable {} already defined", name)));
                }
                env.register(name, v.clone());
            } else {
                env.assign(name, v.clone());
            }
            v
        }
        ExprKind::Field { receiver, name } => match value!(env, depth, receiver) {
            Value::Object(o) => o.get(name),
            other => return Err(Failure::no_fields(name, &other)),
        },
        ExprKind::SetField { receiver, name, value } => {
            let v = value!(env, depth, value);
            match value!(env, depth, receiver) {
                Value::Object(o) => o.set(name, v.clone()),
                other => return Err(Failure::no_fields(name, &other)),
            }
            v
        }
        ExprKind::Call { callee, args } => {
            let callee = value!(env, depth, callee);
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(value!(env, depth, a));
            }
            call(&callee, &Value::Undefined, &values)?
        }
        ExprKind::MethodCall { receiver, name, args } => {
            let receiver = value!(env, depth, receiver);
            let method = match &receiver {
                Value::Object(o) => o.get(name),
                other => return Err(Failure::no_fields(name, other)),
            };
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(value!(env, depth, a));
            }
            call(&method, &receiver, &values)?
        }
        ExprKind::Function(def) => {
            let f = Value::Object(closure(env, depth, def));
            if let Some(name) = &def.name {
                env.register(name, f.clone());
            }
            f
        }
        ExprKind::Object { fields } => {
            let mut values = Vec::with_capacity(fields.len());
            for (k, e) in fields {
                values.push((k.clone(), value!(env, depth, e)));
            }
            Value::Object(JsObject::new_object(values))
        }
        ExprKind::If { condition, then_block, else_block } => {
            let branch = match value!(env, depth, condition) {
                Value::Bool(false) => else_block,
                _ => then_block,
            };
            return eval_block(env, depth, branch);
        }
        ExprKind::Return { value } => return Ok(Flow::Return(value!(env, depth, value))),
        ExprKind::Block(block) => return eval_block(env, depth, block),
    };
    Ok(Flow::Value(v))
}

fn call(callee: &Value, receiver: &Value, args: &[Value]) -> Result<Value> {
    match callee {
        Value::Object(f) if f.is_callable() => {
            trace!(function = f.name(), argc = args.len(), "call");
            f.invoke(receiver, args)
        }
        other => Err(Failure::not_a_function(other)),
    }
}

/// A function value closing over its defining scope. Each call gets a
/// fresh child scope holding `this` and the parameters.
fn closure(env: &Rc<Env>, depth: &Depth, def: &FunDef) -> Rc<JsObject> {
    let captured = Rc::clone(env);
    let depth = Rc::clone(depth);
    let def = Rc::new(def.clone());
    let name = def.display_name().to_string();
    JsObject::new_native(name.clone(), move |receiver, args| {
        if args.len() != def.params.len() {
            return Err(Failure::wrong_arity(&name, def.params.len(), args.len()));
        }
        let active = depth.get();
        if active >= MAX_CALL_DEPTH {
            return Err(Failure::new(format!(
                "stack overflow: more than {} nested calls in {}",
                MAX_CALL_DEPTH, name
            )));
        }
        let scope = Env::child(&captured);
        scope.register("this", receiver.clone());
        for (param, arg) in def.params.iter().zip(args) {
            scope.register(param, arg.clone());
        }
        depth.set(active + 1);
        let flow = eval_block(&scope, &depth, &def.body);
        depth.set(active);
        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Value(_) => Ok(Value::Undefined),
        }
    })
}
