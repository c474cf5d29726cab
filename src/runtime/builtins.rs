use std::cmp::Ordering;
use std::rc::Rc;

use super::{Env, Failure, JsObject, Sink, Value};

pub(super) fn install(env: &Rc<Env>, out: Sink) {
    env.register("print", Value::Object(print(out)));

    arithmetic(env, "+", i32::checked_add);
    arithmetic(env, "-", i32::checked_sub);
    arithmetic(env, "*", i32::checked_mul);
    arithmetic(env, "/", i32::checked_div);
    arithmetic(env, "%", i32::checked_rem);

    binary(env, "==", |a, b| Ok(Value::Bool(a == b)));
    binary(env, "!=", |a, b| Ok(Value::Bool(a != b)));
    comparison(env, "<", Ordering::is_lt);
    comparison(env, "<=", Ordering::is_le);
    comparison(env, ">", Ordering::is_gt);
    comparison(env, ">=", Ordering::is_ge);
}

fn print(out: Sink) -> Rc<JsObject> {
    JsObject::new_native("print", move |_, args| {
        let line = args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" ");
        writeln!(out.borrow_mut(), "{}", line)
            .map_err(|e| Failure::new(format!("print: {}", e)))?;
        Ok(Value::Undefined)
    })
}

fn binary(
    env: &Rc<Env>,
    name: &'static str,
    op: impl Fn(&Value, &Value) -> Result<Value, Failure> + 'static,
) {
    let f = JsObject::new_native(name, move |_, args| match args {
        [a, b] => op(a, b),
        _ => Err(Failure::wrong_arity(name, 2, args.len())),
    });
    env.register(name, Value::Object(f));
}

fn arithmetic(env: &Rc<Env>, name: &'static str, op: fn(i32, i32) -> Option<i32>) {
    binary(env, name, move |a, b| match (a, b) {
        (Value::Int(x), Value::Int(y)) => op(*x, *y).map(Value::Int).ok_or_else(|| {
            if *y == 0 && matches!(name, "/" | "%") {
                Failure::new("division by zero")
            } else {
                Failure::new(format!("integer overflow in {} {} {}", x, name, y))
            }
        }),
        _ => Err(type_error(name, a, b)),
    });
}

fn comparison(env: &Rc<Env>, name: &'static str, test: fn(Ordering) -> bool) {
    binary(env, name, move |a, b| {
        let ordering = match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            _ => return Err(type_error(name, a, b)),
        };
        Ok(Value::Bool(test(ordering)))
    });
}

fn type_error(name: &str, a: &Value, b: &Value) -> Failure {
    Failure::new(format!(
        "type error: cannot apply {} to {} and {}",
        name,
        a.type_name(),
        b.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn call(env: &Env, name: &str, args: &[Value]) -> Result<Value, Failure> {
        let f = env.lookup(name);
        f.as_object().expect("builtin").invoke(&Value::Undefined, args)
    }

    #[test]
    fn arithmetic_on_ints() {
        let env = Env::with_stdout();
        assert_eq!(call(&env, "+", &[1.into(), 2.into()]), Ok(Value::Int(3)));
        assert_eq!(call(&env, "-", &[1.into(), 2.into()]), Ok(Value::Int(-1)));
        assert_eq!(call(&env, "*", &[6.into(), 7.into()]), Ok(Value::Int(42)));
        assert_eq!(call(&env, "/", &[7.into(), 2.into()]), Ok(Value::Int(3)));
        assert_eq!(call(&env, "%", &[7.into(), 2.into()]), Ok(Value::Int(1)));
    }

    #[test]
    fn division_by_zero_fails() {
        let env = Env::with_stdout();
        let err = call(&env, "/", &[1.into(), 0.into()]).unwrap_err();
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn overflow_fails() {
        let env = Env::with_stdout();
        let err = call(&env, "+", &[i32::MAX.into(), 1.into()]).unwrap_err();
        assert!(err.message.contains("overflow"));
    }

    #[test]
    fn comparisons_return_booleans() {
        let env = Env::with_stdout();
        assert_eq!(call(&env, "<", &[3.into(), 5.into()]), Ok(Value::Bool(true)));
        assert_eq!(call(&env, ">=", &[3.into(), 5.into()]), Ok(Value::Bool(false)));
        assert_eq!(call(&env, "<", &["a".into(), "b".into()]), Ok(Value::Bool(true)));
        assert_eq!(call(&env, "==", &["a".into(), "a".into()]), Ok(Value::Bool(true)));
        assert_eq!(call(&env, "!=", &[1.into(), true.into()]), Ok(Value::Bool(true)));
    }

    #[test]
    fn type_errors() {
        let env = Env::with_stdout();
        let err = call(&env, "+", &[1.into(), "x".into()]).unwrap_err();
        assert_eq!(err.message, "type error: cannot apply + to integer and string");
        assert!(call(&env, "<", &[1.into(), "x".into()]).is_err());
    }

    #[test]
    fn builtin_arity_is_checked() {
        let env = Env::with_stdout();
        let err = call(&env, "+", &[1.into()]).unwrap_err();
        assert_eq!(err.message, "wrong number of arguments for + expected 2 but was 1");
    }

    #[test]
    fn print_joins_arguments() {
        let buffer = Rc::new(RefCell::new(Vec::<u8>::new()));
        let env = Env::global(buffer.clone());
        call(&env, "print", &[1.into(), "two".into(), Value::Undefined]).unwrap();
        call(&env, "print", &[]).unwrap();
        assert_eq!(String::from_utf8(buffer.borrow().clone()).unwrap(), "1 two undefined\n\n");
    }
}
