use std::rc::Rc;

use tracing::{debug, error, trace};

use super::code::{Code, DecodeError, Instr};
use super::dictionary::Dictionary;
use super::heap::{Heap, HeapError, ObjRef};
use super::stack::{Activation, Frame, Stack, StackError};
use super::tagged::{self, InvalidWord, Tagged, Word};
use super::{Fatal, FatalKind, StackTrace, VmError};
use crate::runtime::{Callable, Env, Failure, JsObject, Value};

/// Fixed resource bounds of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Words in the shared stack.
    pub stack_capacity: usize,
    /// Words in the object heap.
    pub heap_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { stack_capacity: 4096, heap_capacity: 4096 }
    }
}

/// Outcome of a single instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    Done(Value),
}

// What went wrong inside an instruction, before a trace is attached.
enum Fault {
    Failure(Failure),
    Fatal(FatalKind),
}

impl From<Failure> for Fault {
    fn from(f: Failure) -> Self {
        Fault::Failure(f)
    }
}

impl From<InvalidWord> for Fault {
    fn from(e: InvalidWord) -> Self {
        Fault::Fatal(FatalKind::InvalidWord(e))
    }
}

impl From<StackError> for Fault {
    fn from(e: StackError) -> Self {
        match e {
            StackError::Overflow { capacity } => Fault::Fatal(FatalKind::StackOverflow { capacity }),
            other => Fault::Fatal(FatalKind::CorruptOperand(other.to_string())),
        }
    }
}

impl From<HeapError> for Fault {
    fn from(e: HeapError) -> Self {
        match e {
            HeapError::Exhausted { requested, available } => {
                Fault::Fatal(FatalKind::HeapExhausted { requested, available })
            }
            HeapError::UnknownField(name) => {
                Fault::Failure(Failure::new(format!("invalid field {}", name)))
            }
            HeapError::Invalid(e) => Fault::Fatal(FatalKind::InvalidWord(e)),
            other => Fault::Fatal(FatalKind::CorruptOperand(other.to_string())),
        }
    }
}

impl From<DecodeError> for Fault {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::UnknownOpcode { opcode, pc } => {
                Fault::Fatal(FatalKind::UnknownOpcode { opcode, pc })
            }
            other => Fault::Fatal(FatalKind::CorruptOperand(other.to_string())),
        }
    }
}

fn corrupt(what: impl Into<String>) -> Fault {
    Fault::Fatal(FatalKind::CorruptOperand(what.into()))
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Idle,
    Running,
    Done(Value),
}

/// Field access target: a heap record, or a host object from the globals.
enum Target {
    Record(ObjRef),
    Host(Rc<JsObject>),
}

/// The dispatch loop. Owns the stack and heap; borrows the dictionary the
/// compiler filled and the global environment it reads and writes.
pub struct Engine<'a> {
    config: EngineConfig,
    dict: &'a mut Dictionary,
    globals: &'a Env,
    stack: Stack,
    heap: Heap,
    function: Rc<JsObject>,
    code: Rc<Code>,
    pc: usize,
    state: State,
}

impl<'a> Engine<'a> {
    pub fn new(config: EngineConfig, dict: &'a mut Dictionary, globals: &'a Env) -> Self {
        let idle = Code::new(0, 0, Vec::new());
        Engine {
            config,
            dict,
            globals,
            stack: Stack::with_capacity(config.stack_capacity),
            heap: Heap::with_capacity(config.heap_capacity),
            function: JsObject::new_compiled("<idle>", idle.clone()),
            code: Rc::new(idle),
            pc: 0,
            state: State::Idle,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn stack_pointer(&self) -> usize {
        self.stack.pointer()
    }

    pub fn heap_pointer(&self) -> usize {
        self.heap.pointer()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn dictionary(&self) -> &Dictionary {
        self.dict
    }

    /// Run `main` to completion and return its decoded result.
    pub fn run(&mut self, main: &Rc<JsObject>) -> Result<Value, VmError> {
        self.start(main)?;
        loop {
            if let Step::Done(value) = self.step()? {
                return Ok(value);
            }
        }
    }

    /// Set up the top-level frame for `main` without executing anything.
    /// The stack starts over; the heap keeps what earlier runs allocated.
    pub fn start(&mut self, main: &Rc<JsObject>) -> Result<(), VmError> {
        self.state = State::Idle;
        let code = main
            .code()
            .cloned()
            .ok_or_else(|| Failure::new(format!("{} is not a compiled function", main.name())))?;
        self.stack = Stack::with_capacity(self.config.stack_capacity);
        self.function = Rc::clone(main);
        self.code = Rc::clone(&code);
        self.pc = 0;

        let callee = tagged::encode(&Value::Object(Rc::clone(main)), self.dict);
        let top = Activation { saved_bp: 0, saved_pc: None, caller: Word::UNDEFINED };
        let setup = self
            .stack
            .push(callee)
            .and_then(|()| self.stack.push_frame(Frame::new(1, code.slot_count()), top));
        if let Err(e) = setup {
            return Err(self.raise(e.into()));
        }
        debug!(function = main.name(), "starting");
        self.state = State::Running;
        Ok(())
    }

    /// Fetch and execute one instruction.
    pub fn step(&mut self) -> Result<Step, VmError> {
        match &self.state {
            State::Done(value) => return Ok(Step::Done(value.clone())),
            State::Idle => return Err(self.raise(corrupt("engine has not been started"))),
            State::Running => {}
        }
        let outcome = self
            .code
            .fetch(self.pc)
            .map_err(Fault::from)
            .and_then(|instr| {
                self.pc += instr.width();
                self.execute(instr)
            });
        match outcome {
            Ok(None) => Ok(Step::Continue),
            Ok(Some(value)) => {
                self.state = State::Done(value.clone());
                Ok(Step::Done(value))
            }
            Err(fault) => {
                let err = self.raise(fault);
                self.state = State::Idle;
                Err(err)
            }
        }
    }

    fn execute(&mut self, instr: Instr) -> Result<Option<Value>, Fault> {
        match instr {
            Instr::Const(w) => self.stack.push(w)?,
            Instr::Lookup(name) => {
                let name = self.name(name)?;
                let value = self.globals.lookup(&name);
                let w = tagged::encode(&value, self.dict);
                self.stack.push(w)?;
            }
            Instr::Register(name) => {
                let name = self.name(name)?;
                let w = self.stack.pop()?;
                let value = self.decode(w)?;
                self.globals.register(&name, value);
            }
            Instr::Load(slot) => {
                let w = self.stack.slot(slot)?;
                self.stack.push(w)?;
            }
            Instr::Store(slot) => {
                let w = self.stack.pop()?;
                self.stack.set_slot(slot, w)?;
            }
            Instr::Dup => {
                let w = self.stack.peek()?;
                self.stack.push(w)?;
            }
            Instr::Pop => {
                self.stack.pop()?;
            }
            Instr::Swap => self.stack.swap()?,
            Instr::Funcall(argc) => self.call(argc)?,
            Instr::Ret => return self.ret(),
            Instr::Goto(target) => self.pc = target,
            Instr::JumpIfFalse(target) => {
                if self.stack.pop()? == Word::FALSE {
                    self.pc = target;
                }
            }
            Instr::New(class) => {
                let width = match self.decode(class)? {
                    Value::Shape(shape) => shape.len(),
                    other => return Err(corrupt(format!("NEW with non-class operand {}", other))),
                };
                let fields = self.stack.top(width)?.to_vec();
                let r = self.heap.allocate(class, &fields)?;
                self.stack.drop_top(width)?;
                self.stack.push(Word::heap(r))?;
            }
            Instr::Get(name) => {
                let name = self.name(name)?;
                let receiver = self.stack.pop()?;
                let w = match self.target(receiver, &name)? {
                    Target::Record(r) => self.heap.get_field(r, &name, self.dict)?,
                    Target::Host(o) => tagged::encode(&o.get(&name), self.dict),
                };
                self.stack.push(w)?;
            }
            Instr::Put(name) => {
                let name = self.name(name)?;
                let value = self.stack.pop()?;
                let receiver = self.stack.pop()?;
                match self.target(receiver, &name)? {
                    Target::Record(r) => self.heap.set_field(r, &name, value, self.dict)?,
                    Target::Host(o) => o.set(&name, self.decode(value)?),
                }
            }
            Instr::Print => {
                let w = self.stack.pop()?;
                let value = self.decode(w)?;
                let print = self.globals.lookup("print");
                match print.as_object() {
                    Some(f) if f.is_callable() => {
                        f.invoke(&Value::Undefined, &[value])?;
                    }
                    _ => return Err(Failure::not_a_function(&print).into()),
                }
                self.stack.push(Word::UNDEFINED)?;
            }
        }
        Ok(None)
    }

    // Stack on entry: ... callee receiver arg1 .. argN
    fn call(&mut self, argc: usize) -> Result<(), Fault> {
        let callee = self.stack.peek_at(argc + 1)?;
        let callee = self.decode(callee)?;
        let function = match &callee {
            Value::Object(f) if f.is_callable() => Rc::clone(f),
            other => return Err(Failure::not_a_function(other).into()),
        };

        match function.callable().cloned() {
            Some(Callable::Native(native)) => {
                let words = self.stack.top(argc + 1)?.to_vec();
                let receiver = self.decode(words[0])?;
                let args = words[1..]
                    .iter()
                    .map(|&w| self.decode(w))
                    .collect::<Result<Vec<_>, _>>()?;
                debug!(function = function.name(), %receiver, ?args, "native call");
                let result = native(&receiver, &args)?;
                self.stack.drop_top(argc + 2)?;
                let w = tagged::encode(&result, self.dict);
                self.stack.push(w)?;
            }
            Some(Callable::Compiled(code)) => {
                if code.parameter_count() != argc + 1 {
                    let expected = code.parameter_count().saturating_sub(1);
                    return Err(Failure::wrong_arity(function.name(), expected, argc).into());
                }
                let caller = tagged::encode(&Value::Object(Rc::clone(&self.function)), self.dict);
                let record = Activation {
                    saved_bp: self.stack.frame().base(),
                    saved_pc: Some(self.pc),
                    caller,
                };
                let bp = self.stack.pointer() - (argc + 1);
                self.stack.push_frame(Frame::new(bp, code.slot_count()), record)?;
                trace!(function = function.name(), bp, "call");
                self.code = code;
                self.function = function;
                self.pc = 0;
            }
            None => return Err(Failure::not_a_function(&callee).into()),
        }
        Ok(())
    }

    fn ret(&mut self) -> Result<Option<Value>, Fault> {
        let result = self.stack.pop()?;
        let record = self.stack.activation()?;
        let Some(pc) = record.saved_pc else {
            let value = self.decode(result)?;
            self.stack.pop_frame(Frame::new(0, 0));
            return Ok(Some(value));
        };
        let caller = self.function_of(record.caller)?;
        let code = caller
            .code()
            .cloned()
            .ok_or_else(|| corrupt(format!("caller {} has no code", caller.name())))?;
        trace!(function = self.function.name(), caller = caller.name(), "return");
        self.stack.pop_frame(Frame::new(record.saved_bp, code.slot_count()));
        self.stack.push(result)?;
        self.function = caller;
        self.code = code;
        self.pc = pc;
        Ok(None)
    }

    fn decode(&self, w: Word) -> Result<Value, Fault> {
        Ok(tagged::decode(w, self.dict, &self.heap)?)
    }

    fn name(&self, w: Word) -> Result<Rc<str>, Fault> {
        if let Ok(Tagged::Interned(index)) = w.tag() {
            if let Some(Value::Str(name)) = self.dict.get(index) {
                return Ok(Rc::clone(name));
            }
        }
        Err(corrupt(format!("expected an interned name, found {:?}", w)))
    }

    fn function_of(&self, w: Word) -> Result<Rc<JsObject>, Fault> {
        match self.decode(w)? {
            Value::Object(f) if f.code().is_some() => Ok(f),
            other => Err(corrupt(format!("activation record names {} as caller", other))),
        }
    }

    fn target(&self, w: Word, field: &str) -> Result<Target, Fault> {
        match self.decode(w)? {
            Value::Ref(r) => Ok(Target::Record(r)),
            Value::Object(o) => Ok(Target::Host(o)),
            other => Err(Failure::no_fields(field, &other).into()),
        }
    }

    /// Names of the active functions, innermost first, each frame sized by
    /// its own code.
    pub fn stack_trace(&self) -> StackTrace {
        let mut names = vec![self.function.name().to_string()];
        let mut frame = self.stack.frame();
        while let Ok(record) = self.stack.activation_of(frame) {
            if record.saved_pc.is_none() {
                break;
            }
            let Some((caller, code)) = self
                .function_of(record.caller)
                .ok()
                .and_then(|f| f.code().cloned().map(|code| (f, code)))
            else {
                names.push("<corrupt frame>".to_string());
                break;
            };
            frame = Frame::new(record.saved_bp, code.slot_count());
            names.push(caller.name().to_string());
        }
        StackTrace(names)
    }

    fn raise(&self, fault: Fault) -> VmError {
        match fault {
            Fault::Failure(failure) => VmError::Failure(failure),
            Fault::Fatal(kind) => {
                let trace = self.stack_trace();
                error!(error = %kind, pc = self.pc, function = self.function.name(), "fatal engine error");
                VmError::Fatal(Fatal { kind, trace })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::runtime::Shape;
    use crate::vm::code::CodeBuilder;

    struct Fixture {
        dict: Dictionary,
        env: Rc<Env>,
        out: Rc<RefCell<Vec<u8>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let out = Rc::new(RefCell::new(Vec::new()));
            Fixture { dict: Dictionary::new(), env: Env::global(out.clone()), out }
        }

        fn word(&mut self, value: Value) -> Word {
            tagged::encode(&value, &mut self.dict)
        }

        fn printed(&self) -> String {
            String::from_utf8(self.out.borrow().clone()).unwrap()
        }
    }

    fn function(name: &str, params: usize, slots: usize, body: &[Instr]) -> Rc<JsObject> {
        let mut b = CodeBuilder::new(params, slots);
        for &i in body {
            b.emit(i);
        }
        JsObject::new_compiled(name, b.finish())
    }

    fn add_function(fx: &mut Fixture) -> Rc<JsObject> {
        let plus = fx.word(Value::str("+"));
        function(
            "add",
            3,
            3,
            &[
                Instr::Lookup(plus),
                Instr::Const(Word::UNDEFINED),
                Instr::Load(1),
                Instr::Load(2),
                Instr::Funcall(2),
                Instr::Ret,
            ],
        )
    }

    #[test]
    fn prints_and_returns() {
        let mut fx = Fixture::new();
        let main = function(
            "main",
            1,
            1,
            &[Instr::Const(Word::from_int(3)), Instr::Print, Instr::Pop, Instr::Const(Word::TRUE), Instr::Ret],
        );
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        assert_eq!(engine.run(&main).unwrap(), Value::Bool(true));
        assert_eq!(engine.stack_pointer(), 0);
        assert_eq!(fx.printed(), "3\n");
    }

    #[test]
    fn call_leaves_exactly_one_result() {
        let mut fx = Fixture::new();
        let add = add_function(&mut fx);
        let callee = fx.word(Value::Object(add));
        let main = function(
            "main",
            1,
            1,
            &[
                Instr::Const(callee),
                Instr::Const(Word::UNDEFINED),
                Instr::Const(Word::from_int(2)),
                Instr::Const(Word::from_int(3)),
                Instr::Funcall(2),
                Instr::Ret,
            ],
        );
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        engine.start(&main).unwrap();
        let before = engine.stack_pointer();
        // four pushes, the call, then the six instructions of `add`
        for _ in 0..11 {
            assert_eq!(engine.step().unwrap(), Step::Continue);
        }
        assert_eq!(engine.stack_pointer(), before + 1);
        assert_eq!(engine.step().unwrap(), Step::Done(Value::Int(5)));
    }

    #[test]
    fn arity_is_checked_against_the_receiver_slot() {
        let mut fx = Fixture::new();
        let add = add_function(&mut fx);
        let callee = fx.word(Value::Object(add));
        let main = function(
            "main",
            1,
            1,
            &[
                Instr::Const(callee),
                Instr::Const(Word::UNDEFINED),
                Instr::Const(Word::from_int(2)),
                Instr::Funcall(1),
                Instr::Ret,
            ],
        );
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        match engine.run(&main) {
            Err(VmError::Failure(f)) => {
                assert_eq!(f.message, "wrong number of arguments for add expected 2 but was 1")
            }
            other => panic!("expected arity failure, got {:?}", other),
        }
    }

    #[test]
    fn extra_arguments_leave_the_caller_frame_alone() {
        let mut fx = Fixture::new();
        let add = add_function(&mut fx);
        let callee = fx.word(Value::Object(add));
        let main = function(
            "main",
            1,
            1,
            &[
                Instr::Const(callee),
                Instr::Const(Word::UNDEFINED),
                Instr::Const(Word::from_int(1)),
                Instr::Const(Word::from_int(2)),
                Instr::Const(Word::from_int(3)),
                Instr::Funcall(3),
                Instr::Ret,
            ],
        );
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        engine.start(&main).unwrap();
        let before = engine.stack_pointer();
        for _ in 0..5 {
            assert_eq!(engine.step().unwrap(), Step::Continue);
        }
        match engine.step() {
            Err(VmError::Failure(f)) => {
                assert_eq!(f.message, "wrong number of arguments for add expected 2 but was 3")
            }
            other => panic!("expected arity failure, got {:?}", other),
        }
        // no frame was pushed for `add`
        assert_eq!(engine.stack_pointer(), before + 5);
        assert!(engine.step().is_err());
    }

    #[test]
    fn failed_start_leaves_the_engine_idle() {
        let mut fx = Fixture::new();
        let config = EngineConfig { stack_capacity: 64, heap_capacity: 64 };
        let ok = function("main", 1, 1, &[Instr::Const(Word::from_int(1)), Instr::Ret]);
        let huge = function("huge", 1, 100, &[Instr::Const(Word::from_int(2)), Instr::Ret]);
        let mut engine = Engine::new(config, &mut fx.dict, &fx.env);
        assert_eq!(engine.run(&ok).unwrap(), Value::Int(1));
        assert_eq!(engine.step().unwrap(), Step::Done(Value::Int(1)));

        match engine.start(&huge) {
            Err(VmError::Fatal(fatal)) => {
                assert_eq!(fatal.kind, FatalKind::StackOverflow { capacity: 64 })
            }
            other => panic!("expected stack overflow, got {:?}", other),
        }
        // the previous result is gone, and nothing runs until a good start
        assert!(engine.step().is_err());
        assert_eq!(engine.run(&ok).unwrap(), Value::Int(1));
    }

    #[test]
    fn returned_records_can_be_inspected() {
        let mut fx = Fixture::new();
        let shape = Shape::new("point", vec!["x".to_string()]);
        let class = fx.word(Value::Shape(shape));
        let main = function(
            "main",
            1,
            1,
            &[Instr::Const(Word::from_int(10)), Instr::New(class), Instr::Ret],
        );
        let config = EngineConfig { stack_capacity: 128, heap_capacity: 32 };
        let mut engine = Engine::new(config, &mut fx.dict, &fx.env);
        let r = match engine.run(&main).unwrap() {
            Value::Ref(r) => r,
            other => panic!("expected a record, got {:?}", other),
        };
        assert_eq!(engine.config(), config);
        assert_eq!(engine.heap().capacity(), 32);
        assert_eq!(engine.heap().get_field(r, "x", engine.dictionary()).unwrap(), Word::from_int(10));
        assert!(engine.dictionary().len() >= 1);
    }

    #[test]
    fn calling_undefined_fails() {
        let mut fx = Fixture::new();
        let nope = fx.word(Value::str("nope"));
        let main = function(
            "main",
            1,
            1,
            &[Instr::Lookup(nope), Instr::Const(Word::UNDEFINED), Instr::Funcall(0), Instr::Ret],
        );
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        match engine.run(&main) {
            Err(VmError::Failure(f)) => assert_eq!(f.message, "Cannot call undefined as a function"),
            other => panic!("expected failure, got {:?}", other),
        }
        // the engine can be restarted from a clean stack
        let ok = function("main", 1, 1, &[Instr::Const(Word::from_int(1)), Instr::Ret]);
        assert_eq!(engine.run(&ok).unwrap(), Value::Int(1));
        assert_eq!(engine.stack_pointer(), 0);
    }

    #[test]
    fn fields_on_new_records() {
        let mut fx = Fixture::new();
        let shape = Shape::new("point", vec!["x".to_string()]);
        let class = fx.word(Value::Shape(shape));
        let x = fx.word(Value::str("x"));
        let y = fx.word(Value::str("y"));
        let main = function(
            "main",
            1,
            2,
            &[
                Instr::Const(Word::from_int(10)),
                Instr::New(class),
                Instr::Store(1),
                // o.y reads as undefined
                Instr::Load(1),
                Instr::Get(y),
                Instr::Print,
                Instr::Pop,
                // o.x = 11
                Instr::Load(1),
                Instr::Const(Word::from_int(11)),
                Instr::Put(x),
                Instr::Load(1),
                Instr::Get(x),
                Instr::Ret,
            ],
        );
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        assert_eq!(engine.run(&main).unwrap(), Value::Int(11));
        assert_eq!(engine.heap_pointer(), 3);
        drop(engine);
        assert_eq!(fx.printed(), "undefined\n");
    }

    #[test]
    fn writing_an_undeclared_field_fails() {
        let mut fx = Fixture::new();
        let shape = Shape::new("empty", vec![]);
        let class = fx.word(Value::Shape(shape));
        let z = fx.word(Value::str("z"));
        let main = function(
            "main",
            1,
            1,
            &[Instr::New(class), Instr::Const(Word::from_int(1)), Instr::Put(z), Instr::Ret],
        );
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        match engine.run(&main) {
            Err(VmError::Failure(f)) => assert_eq!(f.message, "invalid field z"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn heap_exhaustion_traces_every_frame() {
        let mut fx = Fixture::new();
        let shape = Shape::new("pair", vec!["a".to_string(), "b".to_string()]);
        let class = fx.word(Value::Shape(shape));
        // inner allocates until the heap runs out
        let inner = function(
            "inner",
            1,
            1,
            &[
                Instr::Const(Word::from_int(1)),
                Instr::Const(Word::from_int(2)),
                Instr::New(class),
                Instr::Pop,
                Instr::Goto(0),
            ],
        );
        let inner_word = fx.word(Value::Object(inner));
        let outer = function(
            "outer",
            1,
            3,
            &[Instr::Const(inner_word), Instr::Const(Word::UNDEFINED), Instr::Funcall(0), Instr::Ret],
        );
        let outer_word = fx.word(Value::Object(outer));
        let main = function(
            "main",
            1,
            1,
            &[Instr::Const(outer_word), Instr::Const(Word::UNDEFINED), Instr::Funcall(0), Instr::Ret],
        );
        let config = EngineConfig { stack_capacity: 256, heap_capacity: 10 };
        let mut engine = Engine::new(config, &mut fx.dict, &fx.env);
        match engine.run(&main) {
            Err(VmError::Fatal(fatal)) => {
                assert_eq!(fatal.kind, FatalKind::HeapExhausted { requested: 4, available: 2 });
                assert_eq!(fatal.trace.0, vec!["inner", "outer", "main"]);
                assert_eq!(fatal.trace.to_string(), "\tat inner\n\tat outer\n\tat main");
            }
            other => panic!("expected heap exhaustion, got {:?}", other),
        }
        assert_eq!(engine.heap_pointer(), 8);
    }

    #[test]
    fn unbounded_recursion_overflows_the_stack() {
        let mut fx = Fixture::new();
        let name = fx.word(Value::str("loop"));
        let looping = function(
            "loop",
            1,
            1,
            &[Instr::Lookup(name), Instr::Const(Word::UNDEFINED), Instr::Funcall(0), Instr::Ret],
        );
        fx.env.register("loop", Value::Object(looping.clone()));
        let config = EngineConfig { stack_capacity: 64, heap_capacity: 16 };
        let mut engine = Engine::new(config, &mut fx.dict, &fx.env);
        match engine.run(&looping) {
            Err(VmError::Fatal(fatal)) => {
                assert_eq!(fatal.kind, FatalKind::StackOverflow { capacity: 64 });
                assert!(fatal.trace.0.iter().all(|n| n == "loop"));
                assert!(fatal.trace.0.len() > 1);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let mut fx = Fixture::new();
        let main = JsObject::new_compiled("main", Code::new(1, 1, vec![0xff]));
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        match engine.run(&main) {
            Err(VmError::Fatal(fatal)) => {
                assert_eq!(fatal.kind, FatalKind::UnknownOpcode { opcode: 0xff, pc: 0 });
                assert_eq!(fatal.trace.0, vec!["main"]);
            }
            other => panic!("expected fatal, got {:?}", other),
        }
    }

    #[test]
    fn register_binds_any_value() {
        let mut fx = Fixture::new();
        let name = fx.word(Value::str("answer"));
        let main = function(
            "main",
            1,
            1,
            &[Instr::Const(Word::from_int(42)), Instr::Register(name), Instr::Const(Word::UNDEFINED), Instr::Ret],
        );
        let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
        engine.run(&main).unwrap();
        drop(engine);
        assert_eq!(fx.env.lookup("answer"), Value::Int(42));
    }

    #[test]
    fn jump_if_false_only_jumps_on_false() {
        let mut fx = Fixture::new();
        for (condition, expected) in [(Word::FALSE, 2), (Word::TRUE, 1), (Word::from_int(0), 1), (Word::UNDEFINED, 1)] {
            let main = function(
                "main",
                1,
                1,
                &[
                    Instr::Const(condition),
                    Instr::JumpIfFalse(7),
                    Instr::Const(Word::from_int(1)),
                    Instr::Ret,
                    Instr::Const(Word::from_int(2)),
                    Instr::Ret,
                ],
            );
            let mut engine = Engine::new(EngineConfig::default(), &mut fx.dict, &fx.env);
            assert_eq!(engine.run(&main).unwrap(), Value::Int(expected), "{:?}", condition);
        }
    }
}
