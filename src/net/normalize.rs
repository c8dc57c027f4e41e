//! 把松散的网描述整理成规范形状。

use serde_json::{Map, Value as Json};

use super::{Arc, Marking, Net, Place, Transition, MAX_TOKENS};
use crate::value::Value;

/// 整理网描述。不会失败：缺失或格式不对的字段取默认值，无法解码的托肯被丢弃。
///
/// - `x`/`y` 缺省为 0；
/// - `label` 与 `name` 互为别名；
/// - 有 `valueTokens` 时托肯个数由它决定；
/// - `sourceId`/`targetId` 是 `source`/`target` 的别名；
/// - `weight` 缺省或小于 1 时为 1；
/// - 托肯数和权重不超过 [`MAX_TOKENS`]；
/// - 单个的 `binding` 变成只有一个元素的 `bindings`。
pub fn normalize(json: &Json) -> Net {
    let list = |key: &str| {
        json.get(key)
            .and_then(Json::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(Json::as_object)
    };

    Net {
        places: list("places").map(normalize_place).collect(),
        transitions: list("transitions").map(normalize_transition).collect(),
        arcs: list("arcs").map(normalize_arc).collect(),
    }
}

fn text(object: &Map<String, Json>, key: &str) -> Option<String> {
    match object.get(key)? {
        Json::String(s) if !s.is_empty() => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(object: &Map<String, Json>, key: &str) -> Option<f64> {
    let n = match object.get(key)? {
        Json::Number(n) => n.as_f64()?,
        Json::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn count(object: &Map<String, Json>, key: &str) -> Option<usize> {
    number(object, key)
        .filter(|n| *n >= 0.0)
        .map(|n| n.trunc().min(MAX_TOKENS as f64) as usize)
}

/// `label` 与 `name` 互补
fn names(object: &Map<String, Json>) -> (String, String) {
    let label = text(object, "label");
    let name = text(object, "name");
    let label_or_name = label.clone().or_else(|| name.clone()).unwrap_or_default();
    (label_or_name, name.or(label).unwrap_or_default())
}

fn guard_text(object: &Map<String, Json>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Json::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn normalize_place(object: &Map<String, Json>) -> Place {
    let (label, name) = names(object);
    let marking = match object.get("valueTokens").and_then(Json::as_array) {
        Some(tokens) => Marking::Values(tokens.iter().filter_map(Value::from_json).collect()),
        None => Marking::Count(count(object, "tokens").unwrap_or(0)),
    };

    Place {
        id: text(object, "id").unwrap_or_default(),
        label,
        name,
        x: number(object, "x").unwrap_or(0.0),
        y: number(object, "y").unwrap_or(0.0),
        marking,
    }
}

fn normalize_transition(object: &Map<String, Json>) -> Transition {
    let (label, name) = names(object);

    Transition {
        id: text(object, "id").unwrap_or_default(),
        label,
        name,
        x: number(object, "x").unwrap_or(0.0),
        y: number(object, "y").unwrap_or(0.0),
        guard: guard_text(object, "guard"),
        action: guard_text(object, "action"),
    }
}

fn normalize_arc(object: &Map<String, Json>) -> Arc {
    let bindings = match (object.get("bindings"), object.get("binding")) {
        (Some(Json::Array(bindings)), _) => bindings
            .iter()
            .filter_map(Json::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect(),
        (_, Some(Json::String(binding))) if !binding.trim().is_empty() => {
            vec![binding.clone()]
        }
        _ => vec![],
    };

    Arc {
        id: text(object, "id").unwrap_or_default(),
        source: text(object, "source")
            .or_else(|| text(object, "sourceId"))
            .unwrap_or_default(),
        target: text(object, "target")
            .or_else(|| text(object, "targetId"))
            .unwrap_or_default(),
        weight: count(object, "weight").filter(|w| *w >= 1).unwrap_or(1),
        bindings,
    }
}
