//! 网的规范表示。
//!
//! 松散的 JSON 描述经 [`normalize`] 变成这里的结构；[`Net::to_json`] 写回规范形状，
//! 并且 `normalize(&net.to_json()) == net`。

use serde::{
    ser::{SerializeMap, Serializer},
    Serialize,
};

use crate::value::Value;

pub mod index;
pub mod normalize;

pub use index::{ArcId, ArcEnds, Direction, Index, PlaceId, TransitionId};
pub use normalize::normalize;

/// 一个库所最多的托肯数。更大的个数在整理时被截断。
pub const MAX_TOKENS: usize = 1_000_000;

/// 库所中的托肯
#[derive(Debug, Clone, PartialEq)]
pub enum Marking {
    /// 普通网：只有个数
    Count(usize),
    /// 代数网：每个托肯带一个值
    Values(Vec<Value>),
}

impl Marking {
    /// 托肯个数
    pub fn len(&self) -> usize {
        match self {
            Marking::Count(n) => *n,
            Marking::Values(values) => values.len(),
        }
    }

    /// 没有托肯
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 托肯值；普通网没有值
    pub fn values(&self) -> Option<&[Value]> {
        match self {
            Marking::Count(_) => None,
            Marking::Values(values) => Some(values),
        }
    }
}

/// 写成 `tokens`，代数网再加上 `valueTokens`
impl Serialize for Marking {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("tokens", &self.len())?;
        if let Marking::Values(values) = self {
            map.serialize_entry("valueTokens", values)?;
        }
        map.end()
    }
}

impl Default for Marking {
    fn default() -> Self {
        Marking::Count(0)
    }
}

/// 库所
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Place {
    /// 唯一标识
    pub id: String,
    /// 显示名
    pub label: String,
    /// `label` 的别名
    pub name: String,
    /// 界面坐标
    pub x: f64,
    /// 界面坐标
    pub y: f64,
    /// 托肯
    #[serde(flatten)]
    pub marking: Marking,
}

impl Place {
    /// 带有 `marking` 的库所
    pub fn new(id: impl Into<String>, marking: Marking) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            name: id.clone(),
            id,
            marking,
            ..Default::default()
        }
    }

    /// 普通网库所
    pub fn with_count(id: impl Into<String>, tokens: usize) -> Self {
        Self::new(id, Marking::Count(tokens))
    }

    /// 代数网库所
    pub fn with_values(id: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::new(id, Marking::Values(values.into_iter().collect()))
    }

    /// 托肯个数
    pub fn tokens(&self) -> usize {
        self.marking.len()
    }
}

/// 变迁
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Transition {
    /// 唯一标识
    pub id: String,
    /// 显示名
    pub label: String,
    /// `label` 的别名
    pub name: String,
    /// 界面坐标
    pub x: f64,
    /// 界面坐标
    pub y: f64,
    /// 守卫，缺省为真
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// 动作，形如 `y = x + 1, z = x - 1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Transition {
    /// 没有守卫的变迁
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            name: id.clone(),
            id,
            ..Default::default()
        }
    }

    /// 设置守卫
    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    /// 设置动作
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// 弧，连接一个库所和一个变迁，方向由哪一端是库所决定。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Arc {
    /// 唯一标识
    pub id: String,
    /// 起点
    pub source: String,
    /// 终点
    pub target: String,
    /// 权重，至少为 1
    pub weight: usize,
    /// 绑定表达式，每个对应一个托肯
    pub bindings: Vec<String>,
}

impl Arc {
    /// 权重为 1、没有绑定的弧
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            weight: 1,
            bindings: vec![],
        }
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: usize) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// 追加一个绑定表达式
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.bindings.push(binding.into());
        self
    }
}

/// Petri 网
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Net {
    /// 库所，顺序即声明顺序
    pub places: Vec<Place>,
    /// 变迁
    pub transitions: Vec<Transition>,
    /// 弧
    pub arcs: Vec<Arc>,
}

impl Net {
    /// 空网
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加库所
    pub fn with_place(mut self, place: Place) -> Self {
        self.places.push(place);
        self
    }

    /// 添加变迁
    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// 添加弧
    pub fn with_arc(mut self, arc: Arc) -> Self {
        self.arcs.push(arc);
        self
    }

    /// 按标识查找库所
    pub fn place(&self, id: &str) -> Option<&Place> {
        self.places.iter().find(|place| place.id == id)
    }

    /// 按标识查找变迁
    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transitions.iter().find(|transition| transition.id == id)
    }

    /// 写回规范形状的 JSON。
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// 网的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetMode {
    /// 普通网
    PlaceTransition,
    /// 代数网
    Algebraic,
}

impl NetMode {
    /// 有守卫、动作、绑定或带值托肯的网是代数网。
    pub fn detect(net: &Net) -> Self {
        let algebraic = net
            .transitions
            .iter()
            .any(|t| t.guard.is_some() || t.action.is_some())
            || net.arcs.iter().any(|a| !a.bindings.is_empty())
            || net
                .places
                .iter()
                .any(|p| matches!(p.marking, Marking::Values(_)));
        if algebraic {
            NetMode::Algebraic
        } else {
            NetMode::PlaceTransition
        }
    }
}
