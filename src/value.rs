//! 托肯携带的值。

use std::fmt::Display;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::frontend::{quote, ValueType};

/// 有类型的值。相等是结构化的，并且区分类型：整数 `1` 不等于字符串 `'1'`。
///
/// 派生的全序先比较种类（Int < Bool < Str < Pair < List），再比较内容，
/// 用于把托肯多重集规范化。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// 整数
    Int(i64),
    /// 布尔值
    Bool(bool),
    /// 字符串
    Str(String),
    /// 二元组
    Pair(Box<Value>, Box<Value>),
    /// 列表
    List(Vec<Value>),
}

impl Value {
    /// 整数
    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    /// 布尔值
    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    /// 字符串
    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// 二元组
    pub fn pair(fst: Value, snd: Value) -> Self {
        Value::Pair(Box::new(fst), Box::new(snd))
    }

    /// 列表
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    /// 值的类型
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::Str(_) => ValueType::String,
            Value::Pair(..) => ValueType::Pair,
            Value::List(_) => ValueType::List,
        }
    }

    /// 从 JSON 解码。`{"__pair__": true, "fst", "snd"}` 和 `{"fst", "snd"}` 都是二元组；
    /// 无法解码时返回 `None`。
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e18)
                        .map(|f| f as i64)
                })
                .map(Value::Int),
            serde_json::Value::String(s) => Some(Value::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            serde_json::Value::Object(map) => {
                let fst = Value::from_json(map.get("fst")?)?;
                let snd = Value::from_json(map.get("snd")?)?;
                Some(Value::pair(fst, snd))
            }
            serde_json::Value::Null => None,
        }
    }

    /// 编码为 JSON，与 [`Value::from_json`] 对称。
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Pair(fst, snd) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("__pair__", &true)?;
                map.serialize_entry("fst", fst)?;
                map.serialize_entry("snd", snd)?;
                map.end()
            }
            Value::List(items) => serializer.collect_seq(items),
        }
    }
}

/// 结构化、区分类型的相等
pub fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// 把托肯多重集排成规范顺序，便于比较两个标识。
pub fn canonical_multiset(tokens: &[Value]) -> Vec<Value> {
    let mut sorted = tokens.to_vec();
    sorted.sort();
    sorted
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => f.write_str(if *b { "T" } else { "F" }),
            Value::Str(s) => f.write_str(&quote(s)),
            Value::Pair(fst, snd) => write!(f, "({}, {})", fst, snd),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}
