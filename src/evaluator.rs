use std::{cell::RefCell, rc::Rc};

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    env::Environment,
    parser::{FuncDecl, Node, Op},
};

#[derive(Diagnostic, Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("undefined variable `{name}`")]
    #[diagnostic(
        code(minilang::runtime::undefined_variable),
        help("declare it first with `var {name} = ...;`")
    )]
    UndefinedVariable { name: String },

    #[error("`{found}` is not callable")]
    #[diagnostic(code(minilang::runtime::not_callable))]
    NotCallable { found: String },

    #[error("`{op}` expects integers, found `{found}`")]
    #[diagnostic(code(minilang::runtime::type_mismatch))]
    TypeMismatch { op: String, found: String },

    #[error("{context} produced no value")]
    #[diagnostic(code(minilang::runtime::no_value))]
    NoValue { context: &'static str },

    #[error("division by zero")]
    #[diagnostic(code(minilang::runtime::division_by_zero))]
    DivisionByZero,

    #[error("integer overflow in `{op}`")]
    #[diagnostic(code(minilang::runtime::overflow))]
    Overflow { op: Op },

    #[error("`return` outside of a function")]
    #[diagnostic(code(minilang::runtime::return_outside_function))]
    ReturnOutsideFunction,
}

/// Functions provided by the host and bound in the global frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Builtin {
    Op(Op),
    Print,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Op(op) => op.symbol(),
            Builtin::Print => "print",
        }
    }
}

/// A function literal together with the frame that was current when it was evaluated.
#[derive(Clone)]
pub struct Closure {
    pub decl: Rc<FuncDecl>,
    pub env: Rc<RefCell<Environment>>,
}

// The captured frame may hold this closure, so neither Debug nor PartialEq look into it.
impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("params", &self.decl.params)
            .finish()
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.decl, &other.decl) && Rc::ptr_eq(&self.env, &other.env)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Closure(Closure),
    Native(Builtin),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Closure(closure) => write!(f, "<func({})>", closure.decl.params.join(", ")),
            Value::Native(builtin) => write!(f, "<native {}>", builtin.name()),
        }
    }
}

/// Renders a possibly absent value the way the output log shows it.
pub fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "none".to_string(), Value::to_string)
}

/// Result of evaluating one node: either it completed, or a `return` is unwinding
/// towards the nearest function application.
#[derive(Debug, Clone, PartialEq)]
enum Flow {
    Normal(Option<Value>),
    Return(Option<Value>),
}

/// Yields the value of an evaluated node, or hands an unwinding `return` back
/// to the caller.
macro_rules! value {
    ($flow:expr) => {
        match $flow? {
            Flow::Normal(value) => value,
            ret @ Flow::Return(_) => return Ok(ret),
        }
    };
}

/// Like [`value!`], but an absent value is an error.
macro_rules! required {
    ($context:expr, $flow:expr) => {
        match value!($flow) {
            Some(value) => value,
            None => return Err(RuntimeError::NoValue { context: $context }),
        }
    };
}

pub struct Evaluator {
    env: Rc<RefCell<Environment>>,
    out: Vec<Option<Value>>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            env: globals(),
            out: Vec::new(),
        }
    }

    /// Everything `print` has logged so far.
    pub fn output(&self) -> &[Option<Value>] {
        &self.out
    }

    pub fn take_output(&mut self) -> Vec<Option<Value>> {
        std::mem::take(&mut self.out)
    }

    pub fn clear_output(&mut self) {
        self.out.clear();
    }

    /// Evaluates a program below a freshly seeded global frame and returns its
    /// final value. Only the output log carries over between programs.
    pub fn eval(&mut self, program: &Node) -> Result<Option<Value>, RuntimeError> {
        debug!("evaluating program");
        let frame = Environment::with_parent(globals());
        let flow = self.with_env(frame, |this| this.eval_node(program))?;
        match flow {
            Flow::Normal(value) => Ok(value),
            Flow::Return(_) => Err(RuntimeError::ReturnOutsideFunction),
        }
    }

    /// Runs `f` with `env` as the current frame, restoring the previous one
    /// whatever `f` returns.
    fn with_env<T>(&mut self, env: Rc<RefCell<Environment>>, f: impl FnOnce(&mut Self) -> T) -> T {
        let prev = std::mem::replace(&mut self.env, env);
        let result = f(self);
        self.env = prev;
        result
    }

    fn eval_node(&mut self, node: &Node) -> Result<Flow, RuntimeError> {
        match node {
            Node::Int(n) => Ok(Flow::Normal(Some(Value::Int(*n)))),

            Node::Ident(name) => Ok(Flow::Normal(self.env.borrow().get(name)?)),

            Node::Block(statements) => {
                trace!(statements = statements.len(), "entering block");
                let frame = Environment::with_parent(self.env.clone());
                self.with_env(frame, |this| this.eval_statements(statements))
            }

            Node::If {
                cond,
                then,
                otherwise,
            } => {
                if self.condition(cond)? {
                    self.eval_node(then)
                } else if let Some(otherwise) = otherwise {
                    self.eval_node(otherwise)
                } else {
                    Ok(Flow::Normal(None))
                }
            }

            Node::While { cond, body } => {
                let mut last = None;
                while self.condition(cond)? {
                    last = value!(self.eval_node(body));
                }
                Ok(Flow::Normal(last))
            }

            Node::VarDecl { name, init } => {
                let value = value!(self.eval_node(init));
                self.env.borrow_mut().define(name.as_str(), value);
                Ok(Flow::Normal(None))
            }

            Node::Assign { name, value } => {
                let value = value!(self.eval_node(value));
                self.env.borrow_mut().assign(name, value)?;
                Ok(Flow::Normal(None))
            }

            Node::Func(decl) => Ok(Flow::Normal(Some(Value::Closure(Closure {
                decl: decl.clone(),
                env: self.env.clone(),
            })))),

            Node::Return(expr) => {
                let value = match expr {
                    Some(expr) => value!(self.eval_node(expr)),
                    None => None,
                };
                trace!("return unwinding");
                Ok(Flow::Return(value))
            }

            Node::Call { callee, args } => {
                let callee = required!("callee", self.eval_node(callee));
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(value!(self.eval_node(arg)));
                }
                self.apply(callee, values).map(Flow::Normal)
            }

            Node::Binary { op, left, right } => {
                let func = self
                    .env
                    .borrow()
                    .get(op.symbol())?
                    .ok_or(RuntimeError::NoValue { context: "operator" })?;
                let left = required!("left operand", self.eval_node(left));
                let right = required!("right operand", self.eval_node(right));
                self.apply(func, vec![Some(left), Some(right)])
                    .map(Flow::Normal)
            }
        }
    }

    fn eval_statements(&mut self, statements: &[Node]) -> Result<Flow, RuntimeError> {
        let mut last = None;
        for statement in statements {
            last = value!(self.eval_node(statement));
        }
        Ok(Flow::Normal(last))
    }

    fn condition(&mut self, cond: &Node) -> Result<bool, RuntimeError> {
        match self.eval_node(cond)? {
            Flow::Normal(Some(Value::Int(n))) => Ok(n != 0),
            Flow::Normal(Some(other)) => Err(RuntimeError::TypeMismatch {
                op: "condition".into(),
                found: other.to_string(),
            }),
            Flow::Normal(None) | Flow::Return(_) => Err(RuntimeError::NoValue {
                context: "condition",
            }),
        }
    }

    fn apply(
        &mut self,
        func: Value,
        args: Vec<Option<Value>>,
    ) -> Result<Option<Value>, RuntimeError> {
        match func {
            Value::Native(Builtin::Print) => {
                self.out.extend(args);
                Ok(None)
            }
            Value::Native(Builtin::Op(op)) => apply_op(op, &args).map(Some),
            Value::Closure(closure) => {
                trace!(
                    params = closure.decl.params.len(),
                    args = args.len(),
                    frame = %closure.env.borrow(),
                    "applying closure"
                );
                let frame = Environment::with_parent(closure.env.clone());
                {
                    // Pairs up to the shorter list; extra parameters stay unbound.
                    let mut frame = frame.borrow_mut();
                    for (param, arg) in closure.decl.params.iter().zip(args) {
                        frame.define(param.as_str(), arg);
                    }
                }
                match self.with_env(frame, |this| this.eval_node(&closure.decl.body))? {
                    Flow::Normal(value) | Flow::Return(value) => Ok(value),
                }
            }
            other => Err(RuntimeError::NotCallable {
                found: other.to_string(),
            }),
        }
    }
}

fn globals() -> Rc<RefCell<Environment>> {
    let globals = Environment::new();
    {
        let mut frame = globals.borrow_mut();
        for op in Op::ALL {
            frame.define(op.symbol(), Some(Value::Native(Builtin::Op(op))));
        }
        frame.define("print", Some(Value::Native(Builtin::Print)));
    }
    globals
}

fn int_operands(op: Op, args: &[Option<Value>]) -> Result<(i64, i64), RuntimeError> {
    let mismatch = |found: String| RuntimeError::TypeMismatch {
        op: op.symbol().into(),
        found,
    };
    match args {
        [Some(Value::Int(a)), Some(Value::Int(b))] => Ok((*a, *b)),
        [Some(Value::Int(_)), other] | [other, _] => Err(mismatch(describe(other.as_ref()))),
        _ => Err(mismatch(format!("{} arguments", args.len()))),
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn apply_op(op: Op, args: &[Option<Value>]) -> Result<Value, RuntimeError> {
    let (a, b) = int_operands(op, args)?;
    let result = match op {
        Op::Plus => a.checked_add(b),
        Op::Minus => a.checked_sub(b),
        Op::Star => a.checked_mul(b),
        Op::Slash => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            floor_div(a, b)
        }
        Op::Equal => Some((a == b) as i64),
        Op::NotEqual => Some((a != b) as i64),
    };
    result.map(Value::Int).ok_or(RuntimeError::Overflow { op })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn eval_input(input: &str) -> Result<Option<Value>, RuntimeError> {
        let program = Parser::new(input).parse().unwrap();
        Evaluator::new().eval(&program)
    }

    fn eval_int(input: &str) -> i64 {
        match eval_input(input) {
            Ok(Some(Value::Int(n))) => n,
            other => panic!("expected integer from {input:?}, got {other:?}"),
        }
    }

    fn output_of(input: &str) -> Vec<Option<Value>> {
        let program = Parser::new(input).parse().unwrap();
        let mut evaluator = Evaluator::new();
        evaluator.eval(&program).unwrap();
        evaluator.take_output()
    }

    fn ints(values: &[i64]) -> Vec<Option<Value>> {
        values.iter().map(|n| Some(Value::Int(*n))).collect()
    }

    #[test]
    fn test_int() {
        assert_eq!(eval_int("1;"), 1);
        assert_eq!(eval_int("9223372036854775807;"), i64::MAX);
    }

    #[test]
    fn test_block_values() {
        assert_eq!(eval_input("{}"), Ok(None));
        assert_eq!(eval_input(""), Ok(None));
        assert_eq!(eval_int("{1;}"), 1);
        assert_eq!(eval_int("{1; 2;}"), 2);
        assert_eq!(eval_input("{1; var a = 2;}"), Ok(None));
    }

    #[test]
    fn test_if() {
        assert_eq!(eval_int("if (0) 1; else 2;"), 2);
        assert_eq!(eval_int("if (1) 1; else 2;"), 1);
        assert_eq!(eval_int("if (7) 1; else 2;"), 1);
        assert_eq!(eval_input("if (0) 1;"), Ok(None));
    }

    #[test]
    fn test_calc() {
        assert_eq!(eval_int("(1 + 2) * 3;"), 9);
        assert_eq!(eval_int("6 - 3 - 2;"), 1);
        assert_eq!(eval_int("24 / 3 * 2;"), 16);
    }

    #[test]
    fn test_floor_division() {
        assert_eq!(eval_int("7 / 2;"), 3);
        assert_eq!(eval_int("(0 - 7) / 2;"), -4);
        assert_eq!(eval_int("7 / (0 - 2);"), -4);
        assert_eq!(eval_int("(0 - 8) / 2;"), -4);
        assert_eq!(eval_int("(0 - 7) / (0 - 2);"), 3);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_input("1 / 0;"), Err(RuntimeError::DivisionByZero));
    }

    #[test]
    fn test_overflow() {
        assert_eq!(
            eval_input("9223372036854775807 + 1;"),
            Err(RuntimeError::Overflow { op: Op::Plus })
        );
    }

    #[test]
    fn test_comparison_yields_integers() {
        assert_eq!(eval_int("3 = 3;"), 1);
        assert_eq!(eval_int("3 = 4;"), 0);
        assert_eq!(eval_int("3 # 4;"), 1);
    }

    #[test]
    fn test_comparison_rejects_functions() {
        assert!(matches!(
            eval_input("print = print;"),
            Err(RuntimeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_var_is_local_to_block() {
        assert!(matches!(
            eval_input("{var a = 1;} a;"),
            Err(RuntimeError::UndefinedVariable { ref name }) if name == "a"
        ));
    }

    #[test]
    fn test_scope() {
        assert_eq!(
            output_of("var a = 3; print(a); {var a = 4; print(a);} print(a);"),
            ints(&[3, 4, 3])
        );
        assert_eq!(
            output_of("var a = 3; print(a); {set a = 4; print(a);} print(a);"),
            ints(&[3, 4, 4])
        );
    }

    #[test]
    fn test_assign_undefined() {
        assert!(matches!(
            eval_input("set a = 1;"),
            Err(RuntimeError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn test_while() {
        assert_eq!(
            eval_int("var i = 0; while (i # 3) { set i = i + 1; i * 10; }"),
            30
        );
        assert_eq!(eval_input("while (0) 1;"), Ok(None));
    }

    #[test]
    fn test_print_many_arguments() {
        assert_eq!(output_of("print(1, 2 + 3, 4);"), ints(&[1, 5, 4]));
        assert_eq!(eval_input("print(1);"), Ok(None));
    }

    #[test]
    fn test_print_functions() {
        let out = output_of("print(print, func (a, b) { a; });");
        let rendered: Vec<_> = out.iter().map(|v| describe(v.as_ref())).collect();
        assert_eq!(rendered, vec!["<native print>", "<func(a, b)>"]);
    }

    #[test]
    fn test_func() {
        assert_eq!(eval_int("func (a, b) { a + b; }(2, 3);"), 5);
    }

    #[test]
    fn test_closure_uses_defining_frame() {
        let input = "
            var a = 1;
            var get_a = func () { a; };
            var call = func (f) { var a = 2; f(); };
            call(get_a);
        ";
        assert_eq!(eval_int(input), 1);
    }

    #[test]
    fn test_closures_share_captured_frame() {
        let input = "
            var make_counter = func () {
                var n = 0;
                func () { set n = n + 1; n; };
            };
            var c1 = make_counter();
            var c2 = make_counter();
            print(c1(), c1(), c2(), c1());
        ";
        assert_eq!(output_of(input), ints(&[1, 2, 1, 3]));
    }

    #[test]
    fn test_arity_mismatch_pairs_shortest() {
        assert_eq!(eval_int("func (a) { a; }(1, 2, 3);"), 1);
        assert!(matches!(
            eval_input("func (a, b) { b; }(1);"),
            Err(RuntimeError::UndefinedVariable { ref name }) if name == "b"
        ));
        assert_eq!(eval_int("func (a, b) { a; }(1);"), 1);
    }

    #[test]
    fn test_return_unwinds_nested_constructs() {
        let input = "
            var find = func (limit) {
                var i = 0;
                while (1) {
                    if (i = limit) { return i * 2; }
                    set i = i + 1;
                }
            };
            find(4);
        ";
        assert_eq!(eval_int(input), 8);
    }

    #[test]
    fn test_bare_return() {
        assert_eq!(eval_input("func () { return; 1; }();"), Ok(None));
    }

    #[test]
    fn test_return_at_top_level() {
        assert_eq!(eval_input("return 1;"), Err(RuntimeError::ReturnOutsideFunction));
        assert_eq!(eval_input("{ return; }"), Err(RuntimeError::ReturnOutsideFunction));
    }

    #[test]
    fn test_not_callable() {
        assert_eq!(
            eval_input("3(1);"),
            Err(RuntimeError::NotCallable { found: "3".into() })
        );
    }

    #[test]
    fn test_no_value_operand() {
        assert_eq!(
            eval_input("print(1) + 1;"),
            Err(RuntimeError::NoValue {
                context: "left operand"
            })
        );
        assert_eq!(
            eval_input("if (print(1)) 2;"),
            Err(RuntimeError::NoValue {
                context: "condition"
            })
        );
        assert_eq!(
            eval_input("var f = print(0); f();"),
            Err(RuntimeError::NoValue { context: "callee" })
        );
    }

    #[test]
    fn test_absent_values_are_stored_and_passed() {
        assert_eq!(
            output_of("print(print(1));"),
            vec![Some(Value::Int(1)), None]
        );
        assert_eq!(
            output_of("var a = print(0); set a = print(1); print(a, 2);"),
            vec![Some(Value::Int(0)), Some(Value::Int(1)), None, Some(Value::Int(2))]
        );
        assert_eq!(
            eval_input("var f = func () { return; }; var x = f(); 1;"),
            Ok(Some(Value::Int(1)))
        );
        assert_eq!(eval_input("var x = print(0); x;"), Ok(None));
        assert_eq!(
            eval_input("func (a) { a + 1; }(print(0));"),
            Err(RuntimeError::NoValue {
                context: "left operand"
            })
        );
    }

    #[test]
    fn test_arguments_evaluated_left_to_right() {
        let input = "
            var f = func (n) { print(n); n; };
            func (a, b, c) { a; }(f(1), f(2), f(3));
        ";
        assert_eq!(output_of(input), ints(&[1, 2, 3]));
    }

    #[test]
    fn test_error_restores_frame() {
        let mut evaluator = Evaluator::new();
        let failing = Parser::new("{ var a = 1; { undefined_name; } }").parse().unwrap();
        let before = evaluator.env.clone();
        assert!(evaluator.eval(&failing).is_err());
        assert!(Rc::ptr_eq(&before, &evaluator.env));

        let program = Parser::new("var a = 5; a;").parse().unwrap();
        assert_eq!(evaluator.eval(&program), Ok(Some(Value::Int(5))));
    }

    #[test]
    fn test_runs_do_not_share_bindings() {
        let mut evaluator = Evaluator::new();
        let define = Parser::new("var a = 1;").parse().unwrap();
        let read = Parser::new("a;").parse().unwrap();
        evaluator.eval(&define).unwrap();
        assert!(matches!(
            evaluator.eval(&read),
            Err(RuntimeError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn test_runs_get_fresh_globals() {
        let mut evaluator = Evaluator::new();
        let clobber = Parser::new("set print = 7; print;").parse().unwrap();
        assert_eq!(evaluator.eval(&clobber), Ok(Some(Value::Int(7))));

        let program = Parser::new("print(1); print;").parse().unwrap();
        assert_eq!(
            evaluator.eval(&program),
            Ok(Some(Value::Native(Builtin::Print)))
        );
        assert_eq!(evaluator.output(), ints(&[1]).as_slice());
    }

    #[test]
    fn test_output_accumulates_until_cleared() {
        let mut evaluator = Evaluator::new();
        let program = Parser::new("print(1);").parse().unwrap();
        evaluator.eval(&program).unwrap();
        evaluator.eval(&program).unwrap();
        assert_eq!(evaluator.output(), ints(&[1, 1]).as_slice());
        evaluator.clear_output();
        assert!(evaluator.output().is_empty());
    }
}
