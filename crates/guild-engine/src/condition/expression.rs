//! Condition expressions, compiled and run by a locked-down Rhai engine.
//!
//! Conditions are single Rhai expressions over the values in a
//! [`ValueEnvironment`]: comparisons, `&&`, `||`, `!`, map properties
//! (`revenue.mrr`), array indexing (`items[0]`) and `x.contains(y)` on strings
//! and arrays. Strings are double-quoted. Every identifier must name a value in
//! the environment, even on a side that short-circuits away.
//!
//! `switch` conditions are `subject => case | case` and `filter` conditions are
//! `collection where predicate`, with `item` bound per element. Both are split
//! into plain expressions by [`parse_condition`].
//!
//! Comparisons are strict: operands of different types (other than integer
//! against float) are a type mismatch, not `false`.

use std::cmp::Ordering;
use std::sync::OnceLock;

use rhai::{
    Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, ParseError, ParseErrorType,
    Scope, Variant, AST,
};
use serde_json::{Map as JsonMap, Number, Value};

use guild_core::context::ValueEnvironment;
use guild_core::error::EvaluationError;
use guild_core::types::ConditionType;

/// Nesting limit for parenthesised and chained expressions.
const MAX_EXPR_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl BinaryOp {
    const COMPARISONS: [BinaryOp; 6] = [
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
    ];

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Contains => "contains",
        }
    }
}

// Registers every comparison operator for each pair of value types, so the
// engine's lenient built-ins never answer a mixed-type comparison.
macro_rules! register_comparisons {
    (@row $engine:ident, $left:ty; $($right:ty),+) => {
        $( register_comparison::<$left, $right>(&mut $engine); )+
    };
    ($engine:ident; $($left:ty),+) => {
        $(
            register_comparisons!(
                @row $engine, $left;
                i64, f64, bool, char, ImmutableString, (), Array, Map
            );
        )+
    };
}

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(build_engine)
}

fn build_engine() -> Engine {
    let mut engine = Engine::new_raw();
    engine.set_max_operations(50_000);
    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_strict_variables(true);
    engine.set_fail_on_invalid_map_property(true);
    // Registered operators only take part when fast operators are off.
    engine.set_fast_operators(false);
    engine.on_print(|_| {});
    engine.on_debug(|_, _, _| {});

    register_comparisons!(engine; i64, f64, bool, char, ImmutableString, (), Array, Map);
    engine.register_fn("contains", |haystack: Dynamic, needle: Dynamic| {
        compare_dynamic(BinaryOp::Contains, haystack, needle)
    });
    engine
}

fn register_comparison<A: Variant + Clone, B: Variant + Clone>(engine: &mut Engine) {
    for op in BinaryOp::COMPARISONS {
        engine.register_fn(op.symbol(), move |left: A, right: B| {
            compare_dynamic(op, Dynamic::from(left), Dynamic::from(right))
        });
    }
}

fn compare_dynamic(
    op: BinaryOp,
    left: Dynamic,
    right: Dynamic,
) -> Result<bool, Box<EvalAltResult>> {
    let left = from_dynamic(left).map_err(script_error)?;
    let right = from_dynamic(right).map_err(script_error)?;
    compare(op, &left, &right).map_err(script_error)
}

fn script_error(err: EvaluationError) -> Box<EvalAltResult> {
    match err {
        EvaluationError::InvalidExpression(message) | EvaluationError::TypeMismatch(message) => {
            message.into()
        }
    }
}

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct Expr {
    source: String,
    ast: AST,
}

impl Expr {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against an environment.
    pub fn eval(&self, env: &ValueEnvironment) -> Result<Value, EvaluationError> {
        let mut scope = scope_for(env);
        let result = engine()
            .eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast)
            .map_err(eval_error)?;
        from_dynamic(result)
    }
}

/// A parsed condition, shaped by its condition type.
#[derive(Debug, Clone)]
pub enum ConditionExpr {
    /// `if` and `gate`.
    Predicate(Expr),
    /// `subject => case | case`.
    Switch { subject: Expr, cases: Vec<Expr> },
    /// `collection where predicate`, with `item` bound per element.
    Filter { collection: Expr, predicate: Expr },
}

/// Compile a plain expression. Identifiers are checked against `env`.
pub fn parse(src: &str, env: &ValueEnvironment) -> Result<Expr, EvaluationError> {
    let src = src.trim();
    if src.is_empty() {
        return Err(EvaluationError::InvalidExpression("empty expression".into()));
    }
    check_number_literals(src)?;

    let scope = scope_for(env);
    let ast = engine()
        .compile_expression_with_scope(&scope, src)
        .map_err(parse_error)?;
    Ok(Expr {
        source: src.to_string(),
        ast,
    })
}

/// Compile condition text according to its condition type.
pub fn parse_condition(
    condition_type: ConditionType,
    src: &str,
    env: &ValueEnvironment,
) -> Result<ConditionExpr, EvaluationError> {
    match condition_type {
        ConditionType::If | ConditionType::Gate => Ok(ConditionExpr::Predicate(parse(src, env)?)),
        ConditionType::Switch => {
            let (subject, cases) = src.split_once("=>").ok_or_else(|| {
                EvaluationError::InvalidExpression("switch needs `subject => case | case`".into())
            })?;
            let cases = cases
                .split('|')
                .map(|case| parse(case, env))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ConditionExpr::Switch {
                subject: parse(subject, env)?,
                cases,
            })
        }
        ConditionType::Filter => {
            let (collection, predicate) = src.split_once(" where ").ok_or_else(|| {
                EvaluationError::InvalidExpression(
                    "filter needs `collection where predicate`".into(),
                )
            })?;
            let mut scoped = env.clone();
            scoped.set("item", Value::Null);
            Ok(ConditionExpr::Filter {
                collection: parse(collection, env)?,
                predicate: parse(predicate, &scoped)?,
            })
        }
    }
}

fn scope_for(env: &ValueEnvironment) -> Scope<'static> {
    let mut scope = Scope::new();
    for (key, value) in env.data() {
        scope.push_dynamic(key.as_str(), to_dynamic(value));
    }
    scope
}

/// Number literals too large for a float are rejected up front; the engine
/// would otherwise read them as infinity.
fn check_number_literals(src: &str) -> Result<(), EvaluationError> {
    let bytes = src.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 2,
                b'"' => {
                    in_string = false;
                    i += 1;
                }
                _ => i += 1,
            }
            continue;
        }
        let after_ident = i > 0 && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_');
        if b == b'"' {
            in_string = true;
            i += 1;
        } else if b.is_ascii_digit() && !after_ident {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_digit()
                    || matches!(bytes[i], b'_' | b'.' | b'e' | b'E')
                    || (matches!(bytes[i], b'+' | b'-') && matches!(bytes[i - 1], b'e' | b'E')))
            {
                i += 1;
            }
            let literal: String = src[start..i].chars().filter(|c| *c != '_').collect();
            if literal.parse::<f64>().is_ok_and(|n| !n.is_finite()) {
                return Err(EvaluationError::InvalidExpression(format!(
                    "number literal out of range: {}",
                    &src[start..i]
                )));
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}

fn parse_error(err: ParseError) -> EvaluationError {
    match err.err_type() {
        ParseErrorType::VariableUndefined(name) => {
            EvaluationError::InvalidExpression(format!("unknown identifier '{name}'"))
        }
        ParseErrorType::ExprTooDeep => EvaluationError::InvalidExpression(format!(
            "expression nested deeper than {MAX_EXPR_DEPTH} levels"
        )),
        _ => EvaluationError::InvalidExpression(err.to_string()),
    }
}

fn eval_error(err: Box<EvalAltResult>) -> EvaluationError {
    match *err {
        EvalAltResult::ErrorVariableNotFound(name, _)
        | EvalAltResult::ErrorPropertyNotFound(name, _) => {
            EvaluationError::InvalidExpression(format!("unknown identifier '{name}'"))
        }
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            if signature.starts_with(|c: char| c.is_alphabetic() || c == '_') {
                EvaluationError::InvalidExpression(format!("unknown function {signature}"))
            } else {
                EvaluationError::TypeMismatch(format!("no operator {signature}"))
            }
        }
        EvalAltResult::ErrorRuntime(message, _) => EvaluationError::TypeMismatch(message.to_string()),
        EvalAltResult::ErrorTooManyOperations(_) | EvalAltResult::ErrorStackOverflow(_) => {
            EvaluationError::InvalidExpression("expression is too complex".into())
        }
        other => EvaluationError::TypeMismatch(other.to_string()),
    }
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else {
                Dynamic::from(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        Value::Object(map) => {
            let mut rhai_map = Map::new();
            for (key, value) in map {
                rhai_map.insert(key.as_str().into(), to_dynamic(value));
            }
            Dynamic::from_map(rhai_map)
        }
    }
}

fn from_dynamic(value: Dynamic) -> Result<Value, EvaluationError> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Ok(Value::Bool(b));
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Ok(Value::Number(Number::from(i)));
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        return Number::from_f64(f).map(Value::Number).ok_or_else(|| {
            EvaluationError::TypeMismatch(format!("expression produced non-finite number {f}"))
        });
    }
    if let Some(c) = value.clone().try_cast::<char>() {
        return Ok(Value::String(c.to_string()));
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Ok(Value::String(s));
    }
    if let Some(items) = value.clone().try_cast::<Array>() {
        return items
            .into_iter()
            .map(from_dynamic)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        let mut json_map = JsonMap::new();
        for (key, value) in map {
            json_map.insert(key.to_string(), from_dynamic(value)?);
        }
        return Ok(Value::Object(json_map));
    }
    Err(EvaluationError::TypeMismatch(format!(
        "unsupported value of type {}",
        value.type_name()
    )))
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> EvaluationError {
    EvaluationError::TypeMismatch(format!(
        "cannot apply '{}' to {} and {}",
        op.symbol(),
        type_name(left),
        type_name(right)
    ))
}

/// Strict equality: both sides must have the same JSON type.
pub(crate) fn values_equal(left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(a.as_f64() == b.as_f64()),
        (Value::String(a), Value::String(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Null, Value::Null) => Ok(true),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            Ok(left == right)
        }
        _ => Err(mismatch(BinaryOp::Eq, left, right)),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    let ordering = match op {
        BinaryOp::Eq => return values_equal(left, right),
        BinaryOp::Ne => return values_equal(left, right).map(|eq| !eq),
        BinaryOp::Contains => {
            return match (left, right) {
                (Value::String(haystack), Value::String(needle)) => {
                    Ok(haystack.contains(needle.as_str()))
                }
                (Value::Array(items), needle) => Ok(items
                    .iter()
                    .any(|item| values_equal(item, needle).unwrap_or(false))),
                _ => Err(mismatch(op, left, right)),
            }
        }
        _ => match (left, right) {
            (Value::Number(a), Value::Number(b)) => {
                let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                a.partial_cmp(&b).ok_or_else(|| mismatch(op, left, right))?
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => return Err(mismatch(op, left, right)),
        },
    };
    Ok(match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

/// Truthiness used by `gate` conditions.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> ValueEnvironment {
        ValueEnvironment::from_value(json!({
            "value": 42,
            "threshold": 10,
            "tier": "gold",
            "name": "beta",
            "flags": ["vip", "beta"],
            "approved": true,
            "revenue": {"mrr": 1200.5},
            "orders": [{"total": 40}, {"total": 140}],
        }))
    }

    fn eval(src: &str) -> Result<Value, EvaluationError> {
        parse(src, &env())?.eval(&env())
    }

    #[test]
    fn numeric_comparison() {
        assert_eq!(eval("value > threshold").unwrap(), json!(true));
        assert_eq!(eval("value <= 41").unwrap(), json!(false));
        assert_eq!(eval("revenue.mrr >= 1200").unwrap(), json!(true));
        assert_eq!(eval("value == 42.0").unwrap(), json!(true));
        assert_eq!(eval("-value < 0").unwrap(), json!(true));
        assert_eq!(eval("orders[1].total > 100").unwrap(), json!(true));
    }

    #[test]
    fn string_comparison_is_lexical() {
        assert_eq!(eval("name < \"gamma\"").unwrap(), json!(true));
        assert_eq!(eval("tier == \"gold\"").unwrap(), json!(true));
        assert_eq!(eval("tier != \"silver\"").unwrap(), json!(true));
    }

    #[test]
    fn logic_and_precedence() {
        assert_eq!(eval("value > 10 && tier == \"gold\" || false").unwrap(), json!(true));
        assert_eq!(eval("!(value > 10) || approved").unwrap(), json!(true));
        assert_eq!(eval("!approved && value > 1").unwrap(), json!(false));
    }

    #[test]
    fn unknown_identifier_on_skipped_side_is_invalid() {
        for src in ["value > 0 || ghost > 1", "value < 0 && ghost > 1"] {
            assert!(
                matches!(eval(src), Err(EvaluationError::InvalidExpression(ref msg)) if msg.contains("ghost")),
                "expected {src:?} to be rejected"
            );
        }
    }

    #[test]
    fn contains_on_strings_and_arrays() {
        assert_eq!(eval("tier.contains(\"ol\")").unwrap(), json!(true));
        assert_eq!(eval("flags.contains(\"vip\")").unwrap(), json!(true));
        assert_eq!(eval("flags.contains(\"trial\")").unwrap(), json!(false));
        assert!(matches!(
            eval("value.contains(4)"),
            Err(EvaluationError::TypeMismatch(_))
        ));
    }

    #[test]
    fn mismatched_operands() {
        assert!(matches!(eval("value > \"ten\""), Err(EvaluationError::TypeMismatch(_))));
        assert!(matches!(eval("tier == 3"), Err(EvaluationError::TypeMismatch(_))));
        assert!(matches!(eval("approved != 1"), Err(EvaluationError::TypeMismatch(_))));
        assert!(matches!(eval("value && true"), Err(EvaluationError::TypeMismatch(_))));
        assert!(matches!(eval("!tier"), Err(EvaluationError::TypeMismatch(_))));
    }

    #[test]
    fn unknown_identifier_is_invalid() {
        assert!(matches!(
            eval("velocity > 3"),
            Err(EvaluationError::InvalidExpression(ref msg)) if msg.contains("velocity")
        ));
        assert!(matches!(
            eval("revenue.arr > 3"),
            Err(EvaluationError::InvalidExpression(ref msg)) if msg.contains("arr")
        ));
    }

    #[test]
    fn deep_nesting_is_rejected_without_overflow() {
        let src = format!("{}value{} > 1", "(".repeat(5000), ")".repeat(5000));
        assert!(matches!(
            parse(&src, &env()),
            Err(EvaluationError::InvalidExpression(_))
        ));

        let shallow = format!("{}value{} > 1", "(".repeat(8), ")".repeat(8));
        assert_eq!(eval(&shallow).unwrap(), json!(true));
    }

    #[test]
    fn oversized_number_literal_is_rejected() {
        let huge = format!("value < {}", "9".repeat(400));
        assert!(matches!(
            parse(&huge, &env()),
            Err(EvaluationError::InvalidExpression(ref msg)) if msg.contains("out of range")
        ));
        assert!(matches!(
            parse("value < 1e400", &env()),
            Err(EvaluationError::InvalidExpression(_))
        ));
        // Digits inside strings are not literals.
        let quoted = format!("tier != \"{}\"", "9".repeat(400));
        assert_eq!(eval(&quoted).unwrap(), json!(true));
    }

    #[test]
    fn malformed_expressions() {
        for src in ["", "  ", "value >", "(value > 1", "value > 1)", "value # 2", "\"open"] {
            assert!(
                matches!(parse(src, &env()), Err(EvaluationError::InvalidExpression(_))),
                "expected parse failure for {src:?}"
            );
        }
    }

    #[test]
    fn switch_and_filter_shapes() {
        let parsed =
            parse_condition(ConditionType::Switch, "tier => \"gold\" | \"platinum\"", &env()).unwrap();
        assert!(matches!(parsed, ConditionExpr::Switch { ref cases, .. } if cases.len() == 2));

        let parsed =
            parse_condition(ConditionType::Filter, "orders where item.total > 100", &env()).unwrap();
        assert!(matches!(parsed, ConditionExpr::Filter { .. }));

        assert!(parse_condition(ConditionType::Switch, "tier == \"gold\"", &env()).is_err());
        assert!(parse_condition(ConditionType::Switch, "tier => \"a\" || \"b\"", &env()).is_err());
        assert!(parse_condition(ConditionType::Filter, "orders", &env()).is_err());
        assert!(parse_condition(ConditionType::If, "value => 1", &env()).is_err());
        // `item` is only bound inside a filter predicate.
        assert!(parse_condition(ConditionType::If, "item > 1", &env()).is_err());
    }
}
