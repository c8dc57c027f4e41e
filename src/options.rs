//! 运行时选项。

use std::time::Duration;

/// 每一步选择哪些变迁发生。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// 声明顺序中第一个使能的变迁
    #[default]
    Single,
    /// 极大步：互不冲突的变迁一起发生
    Maximal,
}

impl SelectionPolicy {
    /// 从 `"single"` / `"maximal"` 解析，不区分大小写。
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "single" => Some(SelectionPolicy::Single),
            "maximal" => Some(SelectionPolicy::Maximal),
            _ => None,
        }
    }
}

/// 运行时选项。
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// 每个库所最多容纳的托肯数，多出的被丢弃。
    pub max_tokens_per_place: usize,
    /// 选择策略。
    pub selection_policy: SelectionPolicy,
    /// 随机种子。目前的选择都是确定的，不会用到。
    pub rng_seed: Option<u64>,
    /// 跟踪发生过程。
    pub debug: bool,
    /// 输出效率信息。
    pub timing: bool,
    /// `run` 最多执行的步数。
    pub max_steps: usize,
    /// 每次绑定搜索最多尝试的合一次数。
    pub search_budget: usize,
    /// 每次调用求值器的时限。
    pub solver_timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_tokens_per_place: 20,
            selection_policy: SelectionPolicy::Single,
            rng_seed: None,
            debug: false,
            timing: false,
            max_steps: 200_000,
            search_budget: 100_000,
            solver_timeout: Some(Duration::from_millis(500)),
        }
    }
}

impl Options {
    /// 从宿主提供的 JSON 读取选项。缺失或不合法的字段取默认值，`5.0` 这样的小数向下取整。
    pub fn from_json(json: &serde_json::Value) -> Self {
        let defaults = Self::default();
        let count = |key: &str| json.get(key).and_then(whole_number);
        let flag = |key: &str| json.get(key).and_then(serde_json::Value::as_bool);

        Self {
            max_tokens_per_place: count("maxTokensPerPlace")
                .map_or(defaults.max_tokens_per_place, |n| n as usize),
            selection_policy: json
                .get("selectionPolicy")
                .and_then(serde_json::Value::as_str)
                .and_then(SelectionPolicy::from_name)
                .unwrap_or(defaults.selection_policy),
            rng_seed: count("rngSeed"),
            debug: flag("debug").unwrap_or(defaults.debug),
            timing: flag("timing").unwrap_or(defaults.timing),
            max_steps: count("maxSteps").map_or(defaults.max_steps, |n| n as usize),
            search_budget: count("searchBudget")
                .filter(|&n| n > 0)
                .map_or(defaults.search_budget, |n| n as usize),
            solver_timeout: match json.get("solverTimeoutMs") {
                Some(serde_json::Value::Null) => None,
                Some(ms) => whole_number(ms)
                    .map(Duration::from_millis)
                    .or(defaults.solver_timeout),
                None => defaults.solver_timeout,
            },
        }
    }
}

fn whole_number(json: &serde_json::Value) -> Option<u64> {
    json.as_u64().or_else(|| {
        json.as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.floor() as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_known_keys() {
        let options = Options::from_json(&json!({
            "maxTokensPerPlace": 5,
            "selectionPolicy": "Maximal",
            "rngSeed": 7,
            "debug": true,
            "maxSteps": 10,
            "solverTimeoutMs": 20,
        }));
        assert_eq!(options.max_tokens_per_place, 5);
        assert_eq!(options.selection_policy, SelectionPolicy::Maximal);
        assert_eq!(options.rng_seed, Some(7));
        assert!(options.debug);
        assert_eq!(options.max_steps, 10);
        assert_eq!(options.solver_timeout, Some(Duration::from_millis(20)));
        assert_eq!(options.search_budget, Options::default().search_budget);
    }

    #[test]
    fn fractional_counts_are_floored() {
        let options = Options::from_json(&json!({
            "maxTokensPerPlace": 5.0,
            "maxSteps": 2.5,
            "searchBudget": 0.5,
            "solverTimeoutMs": 1e3,
        }));
        assert_eq!(options.max_tokens_per_place, 5);
        assert_eq!(options.max_steps, 2);
        assert_eq!(options.search_budget, Options::default().search_budget);
        assert_eq!(options.solver_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn invalid_values_fall_back() {
        let options = Options::from_json(&json!({
            "maxTokensPerPlace": -1,
            "selectionPolicy": "random",
            "debug": "yes",
            "searchBudget": 0,
        }));
        assert_eq!(options, Options::default());
        assert_eq!(Options::from_json(&json!(null)), Options::default());
        assert_eq!(
            Options::from_json(&json!({ "solverTimeoutMs": null })).solver_timeout,
            None
        );
    }
}
