//! 运行时：把网编译成 [`Program`] 并执行。
use std::fmt::Display;

use colorized::{Color, Colors};
use thiserror::Error;

use crate::{
    frontend::{check, Expr, ExprError},
    net::{Direction, Index, NetMode},
};

pub mod builder;
pub mod eval;
pub mod resolver;
pub mod simulator;
pub mod solver;

pub use builder::ProgramBuilder;
pub use eval::{evaluate, unify, Binding, EvalError};
pub use resolver::{Firing, Produced, Reservations, Resolver, TokenRef};
pub use simulator::{
    FireError, FiredTransition, HaltReason, RunOutcome, SimState, Simulator, StepObserver,
    StepOutcome, StepSnapshot,
};
pub use solver::{
    BoundedSolver, CancelToken, Deadline, Evaluator, EvaluatorError, NoSolver, Solution,
};

/// 编译错误：某个守卫、绑定或动作无法解析。
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("in guard of transition {transition}: {error}")]
    Guard {
        transition: String,
        text: String,
        #[source]
        error: ExprError,
    },

    #[error("in binding {position} of arc {arc}: {error}")]
    Binding {
        arc: String,
        position: usize,
        text: String,
        #[source]
        error: ExprError,
    },

    #[error("in action of transition {transition}: {error}")]
    Action {
        transition: String,
        text: String,
        #[source]
        error: ExprError,
    },

    #[error("place {place} holds {tokens} tokens, more than the limit of {limit}")]
    Marking {
        place: String,
        tokens: usize,
        limit: usize,
    },
}

impl BuildError {
    /// 底层的表达式错误
    pub fn expr_error(&self) -> Option<&ExprError> {
        match self {
            BuildError::Guard { error, .. }
            | BuildError::Binding { error, .. }
            | BuildError::Action { error, .. } => Some(error),
            BuildError::Marking { .. } => None,
        }
    }

    /// 渲染成带源码标注的错误信息。与表达式无关的错误只有一行。
    pub fn to_snippet(&self) -> String {
        let (origin, text, error) = match self {
            BuildError::Guard {
                transition,
                text,
                error,
            } => (format!("guard of transition {}", transition), text, error),
            BuildError::Binding {
                arc,
                position,
                text,
                error,
            } => (format!("binding {} of arc {}", position, arc), text, error),
            BuildError::Action {
                transition,
                text,
                error,
            } => (format!("action of transition {}", transition), text, error),
            BuildError::Marking { .. } => return self.to_string(),
        };
        error.to_snippet(text, &origin)
    }
}

/// 编译后的变迁
#[derive(Clone, Debug)]
pub struct CompiledTransition {
    /// 标识
    pub id: String,
    /// 守卫，缺省为真
    pub guard: Option<Expr>,
    /// 动作中的赋值，按书写顺序执行
    pub actions: Vec<(String, Expr)>,
}

/// 编译后的弧
#[derive(Clone, Debug)]
pub struct CompiledArc {
    /// 标识
    pub id: String,
    /// 权重
    pub weight: usize,
    /// 绑定表达式
    pub bindings: Vec<Expr>,
}

/// Program
///
/// 守卫和绑定文本只在这里解析一次；文本变了就整个重新编译。
#[derive(Clone, Debug)]
pub struct Program {
    /// 网的种类
    pub mode: NetMode,
    /// 拓扑索引
    pub index: Index,
    /// 变迁，与 `Net::transitions` 一一对应
    pub transitions: Vec<CompiledTransition>,
    /// 弧，与 `Net::arcs` 一一对应
    pub arcs: Vec<CompiledArc>,
}

impl Program {
    fn patterns(&self, arcs: &[crate::net::ArcId]) -> Vec<&Expr> {
        arcs.iter()
            .flat_map(|arc| self.arcs[arc.0].bindings.iter())
            .collect()
    }

    /// 静态检查：输出弧或守卫中没有被输入弧绑定的变量。只用于诊断。
    pub fn diagnostics(&self) -> Vec<String> {
        let mut messages = vec![];
        for (i, transition) in self.transitions.iter().enumerate() {
            let id = crate::net::TransitionId(i);
            let inputs = self.patterns(self.index.inputs(id));
            let outputs = self.patterns(self.index.outputs(id));
            let assigned = transition
                .actions
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>();

            if let Some(guard) = &transition.guard {
                if let Err(e) = check::check_guard_variables(&inputs, guard) {
                    messages.push(format!("transition {}: {}", transition.id, e));
                }
            }
            if let Err(e) = check::check_output_variables(&inputs, &assigned, &outputs) {
                messages.push(format!("transition {}: {}", transition.id, e));
            }
        }
        messages
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, transition) in self.transitions.iter().enumerate() {
            let id = crate::net::TransitionId(i);
            write!(f, "transition {}", transition.id)?;
            if let Some(guard) = &transition.guard {
                write!(f, " [{}]", guard)?;
            }
            writeln!(f, " {{")?;
            for (name, value) in &transition.actions {
                writeln!(f, "    let {} = {};", name, value)?;
            }
            for &arc in self.index.inputs(id).iter().chain(self.index.outputs(id)) {
                let compiled = &self.arcs[arc.0];
                let direction = match self.index.ends(arc).map(|ends| ends.direction) {
                    Some(Direction::PlaceToTransition) => "take",
                    _ => "give",
                };
                let tokens = if compiled.bindings.is_empty() {
                    format!("{} token(s)", compiled.weight)
                } else {
                    compiled
                        .bindings
                        .iter()
                        .map(|b| b.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                writeln!(f, "    {} {}; // {}", direction, tokens, compiled.id)?;
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

/// 输出一行跟踪信息。
pub(crate) fn trace(message: impl Display) {
    let trace = message.to_string().color(Colors::BrightBlackFg);
    eprintln!("{trace}");
}

/// 输出一行警告。
pub(crate) fn warn(message: impl Display) {
    eprintln!("{}: {}", "warning".color(Colors::YellowFg), message);
}
