//! 符号求值接口。
//!
//! 守卫里出现输入弧没有绑定的自由变量时，语法层面的求值无法决定守卫的真假，
//! 这时交给 [`Evaluator`]。调用可能很慢，所以每次都带上 [`Deadline`]。

use std::{
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use thiserror::Error;

use super::eval::{evaluate, Binding, EvalError};
use crate::{
    frontend::{check, Expr, ValueType},
    value::Value,
};

/// 取消标记，可以在其他线程中取消。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// 未取消的标记
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 时间预算加取消标记
#[derive(Debug, Clone)]
pub struct Deadline {
    expires: Option<Instant>,
    cancel: CancelToken,
}

impl Deadline {
    /// 从现在起 `timeout` 之后到期；`None` 表示不限时
    pub fn after(timeout: Option<Duration>, cancel: CancelToken) -> Self {
        Self {
            expires: timeout.map(|timeout| Instant::now() + timeout),
            cancel,
        }
    }

    /// 不限时，也不会被取消
    pub fn never() -> Self {
        Self::after(None, CancelToken::new())
    }

    /// 到期或取消时返回错误
    pub fn check(&self) -> Result<(), EvaluatorError> {
        if self.cancel.is_cancelled() {
            return Err(EvaluatorError::Cancelled);
        }
        match self.expires {
            Some(expires) if Instant::now() >= expires => Err(EvaluatorError::Timeout),
            _ => Ok(()),
        }
    }
}

/// 求解结果
#[derive(Debug, Clone, PartialEq)]
pub enum Solution {
    /// 满足守卫的一组赋值，只包含自由变量
    Assignment(Binding),
    /// 无解
    Unsatisfiable,
}

/// 求值器错误。绑定搜索把这些都当作守卫不成立。
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluatorError {
    #[error("no symbolic evaluator is available")]
    Unavailable,

    #[error("symbolic evaluation timed out")]
    Timeout,

    #[error("symbolic evaluation was cancelled")]
    Cancelled,

    #[error("symbolic evaluation failed: {0}")]
    Failed(String),
}

impl From<EvalError> for EvaluatorError {
    fn from(err: EvalError) -> Self {
        EvaluatorError::Failed(err.to_string())
    }
}

/// 外部符号求值器。
pub trait Evaluator {
    /// 判断谓词在绑定下是否成立。
    fn evaluate_predicate(
        &self,
        expr: &Expr,
        binding: &Binding,
        deadline: &Deadline,
    ) -> Result<bool, EvaluatorError>;

    /// 在绑定下计算算术表达式。
    fn evaluate_arithmetic(
        &self,
        expr: &Expr,
        binding: &Binding,
        deadline: &Deadline,
    ) -> Result<Value, EvaluatorError>;

    /// 为 `expr` 中未绑定的变量找一组使其成立的赋值。
    fn solve(
        &self,
        expr: &Expr,
        binding: &Binding,
        deadline: &Deadline,
    ) -> Result<Solution, EvaluatorError>;
}

/// 没有求值器，所有调用都返回 [`EvaluatorError::Unavailable`]。
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSolver;

impl Evaluator for NoSolver {
    fn evaluate_predicate(
        &self,
        _: &Expr,
        _: &Binding,
        _: &Deadline,
    ) -> Result<bool, EvaluatorError> {
        Err(EvaluatorError::Unavailable)
    }

    fn evaluate_arithmetic(
        &self,
        _: &Expr,
        _: &Binding,
        _: &Deadline,
    ) -> Result<Value, EvaluatorError> {
        Err(EvaluatorError::Unavailable)
    }

    fn solve(&self, _: &Expr, _: &Binding, _: &Deadline) -> Result<Solution, EvaluatorError> {
        Err(EvaluatorError::Unavailable)
    }
}

/// 进程内的有界求解器：在有限的整数区间和布尔值上枚举自由变量。
///
/// 枚举按绝对值从小到大（0, 1, -1, 2, -2, ...），所以结果是确定的。
/// 标注为字符串、二元组或列表的自由变量无法枚举。
#[derive(Debug, Clone)]
pub struct BoundedSolver {
    /// 整数变量的取值范围
    pub range: RangeInclusive<i64>,
    /// 最多允许的自由变量个数
    pub max_free: usize,
}

impl Default for BoundedSolver {
    fn default() -> Self {
        Self {
            range: -64..=64,
            max_free: 3,
        }
    }
}

impl BoundedSolver {
    fn domain(&self, name: &str, ty: Option<ValueType>) -> Result<Vec<Value>, EvaluatorError> {
        match ty {
            None | Some(ValueType::Int) => {
                let mut values = self.range.clone().collect::<Vec<_>>();
                values.sort_by_key(|n| (n.unsigned_abs(), *n < 0));
                Ok(values.into_iter().map(Value::Int).collect())
            }
            Some(ValueType::Bool) => Ok(vec![Value::Bool(false), Value::Bool(true)]),
            Some(ty) => Err(EvaluatorError::Failed(format!(
                "cannot enumerate free variable `{}` of type {}",
                name, ty
            ))),
        }
    }
}

impl Evaluator for BoundedSolver {
    fn evaluate_predicate(
        &self,
        expr: &Expr,
        binding: &Binding,
        deadline: &Deadline,
    ) -> Result<bool, EvaluatorError> {
        deadline.check()?;
        match evaluate(expr, binding) {
            Ok(Value::Bool(b)) => Ok(b),
            Ok(other) => Err(EvaluatorError::Failed(format!(
                "`{}` evaluates to {}, not a boolean",
                expr, other
            ))),
            Err(EvalError::Unbound(_)) => match self.solve(expr, binding, deadline)? {
                Solution::Assignment(_) => Ok(true),
                Solution::Unsatisfiable => Ok(false),
            },
            Err(err) => Err(err.into()),
        }
    }

    fn evaluate_arithmetic(
        &self,
        expr: &Expr,
        binding: &Binding,
        deadline: &Deadline,
    ) -> Result<Value, EvaluatorError> {
        deadline.check()?;
        Ok(evaluate(expr, binding)?)
    }

    fn solve(
        &self,
        expr: &Expr,
        binding: &Binding,
        deadline: &Deadline,
    ) -> Result<Solution, EvaluatorError> {
        let free = check::typed_variables(expr)
            .into_iter()
            .filter(|(name, _)| binding.get(name).is_none())
            .collect::<Vec<_>>();
        if free.len() > self.max_free {
            return Err(EvaluatorError::Failed(format!(
                "too many free variables in `{}`",
                expr
            )));
        }
        let domains = free
            .iter()
            .map(|(name, ty)| self.domain(name, *ty))
            .collect::<Result<Vec<_>, _>>()?;
        if domains.iter().any(Vec::is_empty) {
            return Ok(Solution::Unsatisfiable);
        }

        // 里程表式枚举
        let mut cursor = vec![0usize; domains.len()];
        loop {
            deadline.check()?;

            let mut candidate = binding.clone();
            for ((name, _), (domain, &i)) in free.iter().zip(domains.iter().zip(&cursor)) {
                candidate.insert(*name, domain[i].clone());
            }
            if let Ok(Value::Bool(true)) = evaluate(expr, &candidate) {
                let assignment = free
                    .iter()
                    .zip(domains.iter().zip(&cursor))
                    .map(|((name, _), (domain, &i))| (name.to_string(), domain[i].clone()))
                    .collect();
                return Ok(Solution::Assignment(assignment));
            }

            let mut digit = 0;
            loop {
                if digit == cursor.len() {
                    return Ok(Solution::Unsatisfiable);
                }
                cursor[digit] += 1;
                if cursor[digit] < domains[digit].len() {
                    break;
                }
                cursor[digit] = 0;
                digit += 1;
            }
        }
    }
}
