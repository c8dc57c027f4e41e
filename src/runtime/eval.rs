//! 表达式求值与模式匹配。

use std::{collections::BTreeMap, fmt::Display, ops::Range, str::FromStr};

use thiserror::Error;

use crate::{
    frontend::{self, BinaryOp, Expr, ExprError, UnaryOp},
    value::Value,
};

/// 变量绑定。每个搜索分支持有自己的一份，失败就丢掉。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding(BTreeMap<String, Value>);

impl Binding {
    /// 空绑定
    pub fn new() -> Self {
        Self::default()
    }

    /// 变量的值
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// 绑定变量，返回旧值
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    /// 已绑定的变量个数
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 没有绑定任何变量
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按变量名顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// 并入另一个绑定
    pub fn extend(&mut self, other: Binding) {
        self.0.extend(other.0);
    }
}

impl FromIterator<(String, Value)> for Binding {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// 求值错误。
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unbound variable `{0}`")]
    Unbound(String),

    #[error("type mismatch: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in `{0}`")]
    Overflow(String),

    #[error("unknown function `{name}` with {arity} argument(s)")]
    UnknownFunction { name: String, arity: usize },

    #[error(transparent)]
    Syntax(#[from] ExprError),
}

fn type_error(message: impl Into<String>) -> EvalError {
    EvalError::Type(message.into())
}

/// 在绑定下对表达式求值。
pub fn evaluate(expr: &Expr, binding: &Binding) -> Result<Value, EvalError> {
    match expr {
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, binding))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Pair(fst, snd) => Ok(Value::pair(
            evaluate(fst, binding)?,
            evaluate(snd, binding)?,
        )),
        Expr::Var { name, ty } => {
            let value = binding
                .get(name)
                .ok_or_else(|| EvalError::Unbound(name.clone()))?;
            match ty {
                Some(ty) if value.value_type() != *ty => Err(type_error(format!(
                    "`{}` is annotated as {} but holds {}",
                    name, ty, value
                ))),
                _ => Ok(value.clone()),
            }
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, binding)?;
            match (op, value) {
                (UnaryOp::Neg, Value::Int(n)) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::Overflow(expr.to_string())),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (op, value) => Err(type_error(format!(
                    "cannot apply `{}` to {}",
                    op.symbol(),
                    value
                ))),
            }
        }
        Expr::Binary { op, left, right } => binary(expr, *op, left, right, binding),
        Expr::Call { name, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, binding))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, args)
        }
    }
}

fn as_bool(value: Value, op: BinaryOp) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(type_error(format!(
            "`{}` expects booleans, got {}",
            op.symbol(),
            other
        ))),
    }
}

fn binary(
    expr: &Expr,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    binding: &Binding,
) -> Result<Value, EvalError> {
    // 短路
    match op {
        BinaryOp::And | BinaryOp::Or | BinaryOp::Implies => {
            let l = as_bool(evaluate(left, binding)?, op)?;
            let decided = match op {
                BinaryOp::And => (!l).then_some(false),
                BinaryOp::Or => l.then_some(true),
                _ => (!l).then_some(true),
            };
            if let Some(result) = decided {
                return Ok(Value::Bool(result));
            }
            return Ok(Value::Bool(as_bool(evaluate(right, binding)?, op)?));
        }
        _ => {}
    }

    let l = evaluate(left, binding)?;
    let r = evaluate(right, binding)?;
    let overflow = || EvalError::Overflow(expr.to_string());

    match op {
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::Ne => Ok(Value::Bool(l != r)),
        BinaryOp::Xor => Ok(Value::Bool(as_bool(l, op)? ^ as_bool(r, op)?)),
        BinaryOp::Iff => Ok(Value::Bool(as_bool(l, op)? == as_bool(r, op)?)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => {
                    return Err(type_error(format!(
                        "cannot compare {} {} {}",
                        l,
                        op.symbol(),
                        r
                    )))
                }
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (a, b) = match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => (*a, *b),
                _ => {
                    return Err(type_error(format!(
                        "arithmetic operands must be integers, got {} {} {}",
                        l,
                        op.symbol(),
                        r
                    )))
                }
            };
            let result = match op {
                BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
                BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
                BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
                _ if b == 0 => return Err(EvalError::DivisionByZero),
                // 向零取整
                _ => a.checked_div(b).ok_or_else(overflow)?,
            };
            Ok(Value::Int(result))
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Implies => unreachable!(),
    }
}

/// `start` 为负时从末尾数起，越界的部分被截掉。
fn slice_range(total: usize, start: i64, len: i64) -> Range<usize> {
    let total = total as i64;
    let start = if start < 0 {
        (total + start).max(0)
    } else {
        start.min(total)
    };
    let end = start.saturating_add(len.max(0)).min(total);
    start as usize..end as usize
}

/// 下标 `start..end`，负数从末尾数起，`end` 不早于 `start`。
fn slice_bounds(total: usize, start: i64, end: i64) -> Range<usize> {
    let total = total as i64;
    let clamp = |i: i64| {
        if i < 0 {
            (total + i).max(0)
        } else {
            i.min(total)
        }
    };
    let start = clamp(start);
    let end = clamp(end).max(start);
    start as usize..end as usize
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let arity = args.len();
    let unknown = || EvalError::UnknownFunction {
        name: name.to_string(),
        arity,
    };
    let mut args = args.into_iter();
    let mut next = || args.next().ok_or_else(unknown);

    match (name, arity) {
        ("concat", 2) => match (next()?, next()?) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            _ => Err(type_error("concat requires two strings or two lists")),
        },
        ("substring", 3) => match (next()?, next()?, next()?) {
            (Value::Str(s), Value::Int(start), Value::Int(len)) => {
                let chars = s.chars().collect::<Vec<_>>();
                let range = slice_range(chars.len(), start, len);
                Ok(Value::Str(chars[range].iter().collect()))
            }
            _ => Err(type_error("substring requires string, int, int")),
        },
        ("length", 1) => match next()? {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            _ => Err(type_error("length requires string or list")),
        },
        ("isSubstringOf", 2) => match (next()?, next()?) {
            (Value::Str(sub), Value::Str(s)) => Ok(Value::Bool(s.contains(&sub))),
            _ => Err(type_error("isSubstringOf requires two strings")),
        },
        ("head", 1) => match next()? {
            Value::List(items) => items
                .into_iter()
                .next()
                .ok_or_else(|| type_error("head requires non-empty list")),
            _ => Err(type_error("head requires non-empty list")),
        },
        ("tail", 1) => match next()? {
            Value::List(items) => Ok(Value::List(items.into_iter().skip(1).collect())),
            _ => Err(type_error("tail requires list")),
        },
        ("append", 2) => match (next()?, next()?) {
            (Value::List(mut items), element) => {
                items.push(element);
                Ok(Value::List(items))
            }
            _ => Err(type_error("append requires list")),
        },
        ("sublist", 3) => match (next()?, next()?, next()?) {
            (Value::List(items), Value::Int(start), Value::Int(len)) => {
                let range = slice_bounds(items.len(), start, start.saturating_add(len));
                Ok(Value::List(items[range].to_vec()))
            }
            _ => Err(type_error("sublist requires list, int, int")),
        },
        ("isSublistOf", 2) => match (next()?, next()?) {
            (Value::List(sub), Value::List(items)) => Ok(Value::Bool(
                sub.is_empty() || items.windows(sub.len()).any(|window| window == sub),
            )),
            _ => Err(type_error("isSublistOf requires two lists")),
        },
        ("fst", 1) => match next()? {
            Value::Pair(fst, _) => Ok(*fst),
            _ => Err(type_error("fst requires pair")),
        },
        ("snd", 1) => match next()? {
            Value::Pair(_, snd) => Ok(*snd),
            _ => Err(type_error("snd requires pair")),
        },
        _ => Err(unknown()),
    }
}

/// 用模式匹配一个托肯值，成功时返回扩展后的绑定。
///
/// 未绑定的变量绑定到对应的结构部分，已绑定的变量要求相等，类型标注必须符合，
/// 字面量要求相等；运算和函数调用这样的子表达式在当前绑定下求值后比较。
pub fn unify(pattern: &Expr, value: &Value, binding: &Binding) -> Option<Binding> {
    let mut binding = binding.clone();
    unify_into(pattern, value, &mut binding).then_some(binding)
}

fn unify_into(pattern: &Expr, value: &Value, binding: &mut Binding) -> bool {
    match (pattern, value) {
        (Expr::Var { name, ty }, value) => {
            if ty.map_or(false, |ty| ty != value.value_type()) {
                return false;
            }
            match binding.get(name) {
                Some(bound) => bound == value,
                None => {
                    binding.insert(name.clone(), value.clone());
                    true
                }
            }
        }
        (Expr::Int(n), Value::Int(m)) => n == m,
        (Expr::Bool(a), Value::Bool(b)) => a == b,
        (Expr::Str(a), Value::Str(b)) => a == b,
        (Expr::Int(_) | Expr::Bool(_) | Expr::Str(_), _) => false,
        (Expr::Pair(p1, p2), Value::Pair(v1, v2)) => {
            unify_into(p1, v1, binding) && unify_into(p2, v2, binding)
        }
        (Expr::Pair(..), _) => false,
        (Expr::List(patterns), Value::List(values)) => {
            patterns.len() == values.len()
                && patterns
                    .iter()
                    .zip(values)
                    .all(|(pattern, value)| unify_into(pattern, value, binding))
        }
        (Expr::List(_), _) => false,
        (expr, value) => evaluate(expr, binding).map_or(false, |v| &v == value),
    }
}

/// 由闭合表达式得到值，比如 `(1, 'a')`、`[T, F]`、`-3`。
impl FromStr for Value {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        evaluate(&frontend::parse(s)?, &Binding::new())
    }
}
