//! 表达式语言前端
//!
//! 守卫、弧上的绑定模式以及变迁动作共用同一套表达式语言。
//! [`parse`] 把文本变成 [`Expr`]，`Expr` 的 [`Display`] 实现把它写回完全加括号的文本，
//! 对解析得到的表达式有 `parse(&expr.to_string()) == Ok(expr)`。

use std::fmt::Display;

use annotate_snippets::{
    display_list::{DisplayList, FormatOptions},
    snippet::{Annotation, AnnotationType, Snippet},
};
use thiserror::Error;

use crate::utils::Span;

pub mod check;
pub mod parser;

pub use parser::{parse, parse_actions};

/// 类型标注
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// 整数
    Int,
    /// 布尔值
    Bool,
    /// 字符串
    String,
    /// 二元组
    Pair,
    /// 列表
    List,
}

impl ValueType {
    /// 类型的名字，与类型标注中的写法一致。
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::String => "string",
            ValueType::Pair => "pair",
            ValueType::List => "list",
        }
    }

    /// 从类型标注解析，不区分大小写。
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "int" => Some(ValueType::Int),
            "bool" => Some(ValueType::Bool),
            "string" => Some(ValueType::String),
            "pair" => Some(ValueType::Pair),
            "list" => Some(ValueType::List),
            _ => None,
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 一元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
}

impl UnaryOp {
    /// 序列化时使用的符号
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// 二元运算符
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Implies,
    Iff,
}

impl BinaryOp {
    /// 序列化时使用的符号。`=` 统一写成 `==`。
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Xor => "^",
            BinaryOp::Implies => "->",
            BinaryOp::Iff => "<->",
        }
    }
}

/// 表达式
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// 整数字面量
    Int(i64),
    /// 布尔字面量，`T`/`F`/`true`/`false`
    Bool(bool),
    /// 字符串字面量
    Str(String),
    /// 列表字面量
    List(Vec<Expr>),
    /// 二元组字面量
    Pair(Box<Expr>, Box<Expr>),
    /// 变量，可以带类型标注
    Var {
        /// 变量名
        name: String,
        /// 类型标注
        ty: Option<ValueType>,
    },
    /// 一元运算
    Unary {
        /// 运算符
        op: UnaryOp,
        /// 操作数
        operand: Box<Expr>,
    },
    /// 二元运算
    Binary {
        /// 运算符
        op: BinaryOp,
        /// 左操作数
        left: Box<Expr>,
        /// 右操作数
        right: Box<Expr>,
    },
    /// 函数调用
    Call {
        /// 函数名
        name: String,
        /// 参数
        args: Vec<Expr>,
    },
}

impl Expr {
    /// 无类型标注的变量
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var {
            name: name.into(),
            ty: None,
        }
    }

    /// 二元组
    pub fn pair(fst: Expr, snd: Expr) -> Self {
        Expr::Pair(Box::new(fst), Box::new(snd))
    }

    /// 一元运算
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// 二元运算
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

fn write_list(f: &mut std::fmt::Formatter<'_>, items: &[Expr]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{}", n),
            Expr::Bool(b) => f.write_str(if *b { "T" } else { "F" }),
            Expr::Str(s) => f.write_str(&quote(s)),
            Expr::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expr::Pair(fst, snd) => write!(f, "({}, {})", fst, snd),
            Expr::Var { name, ty: None } => f.write_str(name),
            Expr::Var { name, ty: Some(ty) } => write!(f, "{}:{}", name, ty),
            Expr::Unary { op, operand } => write!(f, "({}{})", op.symbol(), operand),
            Expr::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
        }
    }
}

/// 给字符串加上单引号并转义，与解析器的转义规则对称。
pub(crate) fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// 表达式解析错误，位置以字符计。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// 语法错误
    #[error("{message} at position {position}")]
    Syntax {
        /// 错误信息
        message: String,
        /// 出错的字符位置
        position: usize,
    },
    /// 语法正确但不合法，比如大写开头的变量名
    #[error("{message} at position {position}")]
    Validation {
        /// 错误信息
        message: String,
        /// 出错的字符位置
        position: usize,
    },
}

impl ExprError {
    pub(crate) fn syntax(message: impl Into<String>, position: usize) -> Self {
        ExprError::Syntax {
            message: message.into(),
            position,
        }
    }

    pub(crate) fn validation(message: impl Into<String>, position: usize) -> Self {
        ExprError::Validation {
            message: message.into(),
            position,
        }
    }

    /// 错误信息，不含位置。
    pub fn message(&self) -> &str {
        match self {
            ExprError::Syntax { message, .. } | ExprError::Validation { message, .. } => message,
        }
    }

    /// 出错的字符位置。
    pub fn position(&self) -> usize {
        match self {
            ExprError::Syntax { position, .. } | ExprError::Validation { position, .. } => {
                *position
            }
        }
    }

    /// 渲染成带源码标注的错误信息。`origin` 说明表达式来自哪里，比如 `guard of T1`。
    pub fn to_snippet(&self, source: &str, origin: &str) -> String {
        let title = match self {
            ExprError::Syntax { .. } => "syntax error",
            ExprError::Validation { .. } => "invalid expression",
        };
        let position = self.position();
        let message = self.to_string();
        let slices = Span::new(origin, source, position, position + 1)
            .lines()
            .map(|lines| vec![lines.as_annotation(self.message(), AnnotationType::Error)])
            .unwrap_or_default();

        let snippet = Snippet {
            title: Some(Annotation {
                id: None,
                label: Some(&message),
                annotation_type: AnnotationType::Error,
            }),
            footer: vec![Annotation {
                id: None,
                label: Some(title),
                annotation_type: AnnotationType::Note,
            }],
            slices,
            opt: FormatOptions {
                color: true,
                ..Default::default()
            },
        };

        DisplayList::from(snippet).to_string()
    }
}
