//! Lowers the AST to [`Code`] for the stack engine.
//!
//! Slot 0 of every function is the receiver (`this`), parameters follow,
//! then every `var` declared in the body. Script-level `var`s are globals.
//! Each expression leaves exactly one word on the operand stack.

use std::rc::Rc;

use tracing::debug;

use super::code::{Code, CodeBuilder, Instr};
use super::dictionary::Dictionary;
use super::tagged::{self, Word};
use crate::ast::{Block, Expr, ExprKind, FunDef, Literal, Script, Span};
use crate::runtime::{JsObject, Shape, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("duplicate parameter {name} in {function}")]
    DuplicateParameter { function: String, name: String, span: Span },
    #[error("`this` cannot be used as a parameter of {function}")]
    ThisParameter { function: String, span: Span },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::DuplicateParameter { span, .. } | CompileError::ThisParameter { span, .. } => {
                *span
            }
        }
    }
}

/// Compile a whole script into its top-level `main` function.
pub fn compile_script(script: &Script, dict: &mut Dictionary) -> Result<Rc<JsObject>, CompileError> {
    let mut compiler = FunctionCompiler::new(dict, vec!["this".to_string()], 1);
    compiler.block(&script.body)?;
    compiler.emit(Instr::Ret);
    let code = compiler.finish();
    debug!(slots = code.slot_count(), words = code.instrs().len(), "compiled main");
    Ok(JsObject::new_compiled("main", code))
}

/// Compile one function definition. Nested definitions compile eagerly.
pub fn compile_function(def: &FunDef, span: Span, dict: &mut Dictionary) -> Result<Rc<JsObject>, CompileError> {
    let name = def.display_name();
    let mut slots = vec!["this".to_string()];
    for param in &def.params {
        if param == "this" {
            return Err(CompileError::ThisParameter { function: name.to_string(), span });
        }
        if slots.contains(param) {
            return Err(CompileError::DuplicateParameter {
                function: name.to_string(),
                name: param.clone(),
                span,
            });
        }
        slots.push(param.clone());
    }
    let parameter_count = slots.len();
    let mut locals = Vec::new();
    hoist_block(&def.body, &mut locals);
    for local in locals {
        if !slots.contains(&local) {
            slots.push(local);
        }
    }

    let mut compiler = FunctionCompiler::new(dict, slots, parameter_count);
    compiler.block(&def.body)?;
    compiler.emit(Instr::Ret);
    let code = compiler.finish();
    debug!(function = name, params = parameter_count - 1, slots = code.slot_count(), "compiled function");
    Ok(JsObject::new_compiled(name, code))
}

// `var` names declared in a body, outside nested function bodies, in
// order of first appearance.
fn hoist_block(block: &Block, out: &mut Vec<String>) {
    for e in &block.exprs {
        hoist(e, out);
    }
}

fn hoist(e: &Expr, out: &mut Vec<String>) {
    match &e.node {
        ExprKind::Assign { name, value, declare } => {
            if *declare && !out.contains(name) {
                out.push(name.clone());
            }
            hoist(value, out);
        }
        ExprKind::Field { receiver, .. } => hoist(receiver, out),
        ExprKind::SetField { receiver, value, .. } => {
            hoist(receiver, out);
            hoist(value, out);
        }
        ExprKind::Call { callee, args } => {
            hoist(callee, out);
            args.iter().for_each(|a| hoist(a, out));
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            hoist(receiver, out);
            args.iter().for_each(|a| hoist(a, out));
        }
        ExprKind::Object { fields } => fields.iter().for_each(|(_, v)| hoist(v, out)),
        ExprKind::If { condition, then_block, else_block } => {
            hoist(condition, out);
            hoist_block(then_block, out);
            hoist_block(else_block, out);
        }
        ExprKind::Return { value } => hoist(value, out),
        ExprKind::Block(block) => hoist_block(block, out),
        ExprKind::Literal(_) | ExprKind::Var { .. } | ExprKind::Function(_) => {}
    }
}

struct FunctionCompiler<'d> {
    dict: &'d mut Dictionary,
    slots: Vec<String>,
    builder: CodeBuilder,
}

impl<'d> FunctionCompiler<'d> {
    fn new(dict: &'d mut Dictionary, slots: Vec<String>, parameter_count: usize) -> Self {
        let builder = CodeBuilder::new(parameter_count, slots.len());
        FunctionCompiler { dict, slots, builder }
    }

    fn finish(self) -> Code {
        self.builder.finish()
    }

    fn emit(&mut self, instr: Instr) -> usize {
        self.builder.emit(instr)
    }

    fn slot(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s == name)
    }

    fn constant(&mut self, value: Value) -> Word {
        tagged::encode(&value, self.dict)
    }

    fn name(&mut self, name: &str) -> Word {
        self.constant(Value::str(name))
    }

    /// Statements each leave a value that is dropped; the block itself
    /// evaluates to `undefined`.
    fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        for e in &block.exprs {
            self.expr(e)?;
            self.emit(Instr::Pop);
        }
        self.emit(Instr::Const(Word::UNDEFINED));
        Ok(())
    }

    fn expr(&mut self, e: &Expr) -> Result<(), CompileError> {
        match &e.node {
            ExprKind::Literal(lit) => {
                let w = match lit {
                    Literal::Int(n) => Word::from_int(*n),
                    Literal::Bool(b) => Word::from_bool(*b),
                    Literal::Undefined => Word::UNDEFINED,
                    Literal::Str(s) => self.constant(Value::str(s)),
                };
                self.emit(Instr::Const(w));
            }
            ExprKind::Var { name } => match self.slot(name) {
                Some(slot) => {
                    self.emit(Instr::Load(slot));
                }
                None => {
                    let w = self.name(name);
                    self.emit(Instr::Lookup(w));
                }
            },
            ExprKind::Assign { name, value, .. } => {
                self.expr(value)?;
                self.emit(Instr::Dup);
                match self.slot(name) {
                    Some(slot) => self.emit(Instr::Store(slot)),
                    None => {
                        let w = self.name(name);
                        self.emit(Instr::Register(w))
                    }
                };
            }
            ExprKind::Field { receiver, name } => {
                self.expr(receiver)?;
                let w = self.name(name);
                self.emit(Instr::Get(w));
            }
            ExprKind::SetField { receiver, name, value } => {
                // value value receiver -> value receiver value -> PUT leaves value
                self.expr(value)?;
                self.emit(Instr::Dup);
                self.expr(receiver)?;
                self.emit(Instr::Swap);
                let w = self.name(name);
                self.emit(Instr::Put(w));
            }
            ExprKind::Call { callee, args } => {
                if let (ExprKind::Var { name }, [arg]) = (&callee.node, args.as_slice()) {
                    if name == "print" && self.slot(name).is_none() {
                        self.expr(arg)?;
                        self.emit(Instr::Print);
                        return Ok(());
                    }
                }
                self.expr(callee)?;
                self.emit(Instr::Const(Word::UNDEFINED));
                self.args(args)?;
            }
            ExprKind::MethodCall { receiver, name, args } => {
                self.expr(receiver)?;
                self.emit(Instr::Dup);
                let w = self.name(name);
                self.emit(Instr::Get(w));
                self.emit(Instr::Swap);
                self.args(args)?;
            }
            ExprKind::Function(def) => {
                let function = compile_function(def, e.span, self.dict)?;
                let w = self.constant(Value::Object(function));
                self.emit(Instr::Const(w));
                if let Some(name) = &def.name {
                    self.emit(Instr::Dup);
                    let w = self.name(name);
                    self.emit(Instr::Register(w));
                }
            }
            ExprKind::Object { fields } => {
                let names = fields.iter().map(|(k, _)| k.clone()).collect();
                let class = self.constant(Value::Shape(Shape::new("object", names)));
                for (_, value) in fields {
                    self.expr(value)?;
                }
                self.emit(Instr::New(class));
            }
            ExprKind::If { condition, then_block, else_block } => {
                self.expr(condition)?;
                let to_else = self.emit(Instr::JumpIfFalse(0));
                self.block(then_block)?;
                let to_end = self.emit(Instr::Goto(0));
                self.builder.patch_jump_here(to_else);
                self.block(else_block)?;
                self.builder.patch_jump_here(to_end);
            }
            ExprKind::Return { value } => {
                self.expr(value)?;
                self.emit(Instr::Ret);
            }
            ExprKind::Block(block) => self.block(block)?,
        }
        Ok(())
    }

    fn args(&mut self, args: &[Expr]) -> Result<(), CompileError> {
        for a in args {
            self.expr(a)?;
        }
        self.emit(Instr::Funcall(args.len()));
        Ok(())
    }
}
