//! 绑定搜索。
//!
//! 按声明顺序遍历输入弧，回溯地为每个绑定模式挑一个托肯。
//! 每个分支有自己的绑定和已占用托肯列表，失败时直接丢弃，不需要撤销。

use std::{ops::ControlFlow, rc::Rc, time::Duration};

use crate::{
    frontend::Expr,
    net::{Marking, Place, PlaceId, TransitionId},
    value::Value,
};

use super::{
    eval::{evaluate, unify, Binding, EvalError},
    solver::{CancelToken, Deadline, Evaluator, Solution},
    trace, warn, Program,
};

/// 某个库所中的第几个托肯
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct TokenRef {
    /// 库所
    pub place: PlaceId,
    /// 托肯在库所中的位置
    pub index: usize,
}

/// 已占用的托肯，不可变的链表，分支之间共享前缀。
#[derive(Clone, Debug, Default)]
pub struct Reservations(Option<Rc<Node>>);

#[derive(Debug)]
struct Node {
    token: TokenRef,
    next: Reservations,
}

impl Reservations {
    /// 空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 加上一个托肯，原集合不变
    pub fn with(&self, token: TokenRef) -> Self {
        Reservations(Some(Rc::new(Node {
            token,
            next: self.clone(),
        })))
    }

    /// 是否已占用
    pub fn contains(&self, token: TokenRef) -> bool {
        self.iter().any(|t| t == token)
    }

    /// 从最后加入的开始遍历
    pub fn iter(&self) -> impl Iterator<Item = TokenRef> + '_ {
        let mut node = self.0.as_deref();
        std::iter::from_fn(move || {
            let current = node?;
            node = current.next.0.as_deref();
            Some(current.token)
        })
    }

    /// 托肯个数
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// 一条输出弧产生的托肯
#[derive(Debug, Clone, PartialEq)]
pub enum Produced {
    /// 普通网的匿名托肯
    Count(usize),
    /// 带值托肯
    Values(Vec<Value>),
}

impl Produced {
    /// 托肯个数
    pub fn len(&self) -> usize {
        match self {
            Produced::Count(n) => *n,
            Produced::Values(values) => values.len(),
        }
    }

    /// 是否没有托肯
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 转成带值托肯，匿名托肯的值是 `1`
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Produced::Count(n) => vec![Value::Int(1); n],
            Produced::Values(values) => values,
        }
    }
}

/// 一次完整的发生：绑定、消耗的托肯和产生的托肯。
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    /// 变迁
    pub transition: TransitionId,
    /// 包括守卫求解和动作得到的变量
    pub binding: Binding,
    /// 按输入弧的声明顺序
    pub consumed: Vec<TokenRef>,
    /// 按输出弧的声明顺序
    pub produced: Vec<(PlaceId, Produced)>,
}

/// 需要一个托肯的位置：一个绑定模式，或者无绑定弧上的一份权重
struct Slot<'p> {
    place: PlaceId,
    pattern: Option<&'p Expr>,
}

struct Goal<'a, 'p> {
    transition: TransitionId,
    slots: &'a [Slot<'p>],
    reserved: &'a Reservations,
}

type Visit<'v> = dyn FnMut(Firing) -> ControlFlow<()> + 'v;

/// 绑定搜索器。
pub struct Resolver<'p> {
    program: &'p Program,
    places: &'p [Place],
    evaluator: &'p dyn Evaluator,
    timeout: Option<Duration>,
    cancel: CancelToken,
    budget: usize,
    remaining: usize,
    exhausted: bool,
    trace: bool,
}

impl<'p> Resolver<'p> {
    /// 在 `places` 的当前标识上搜索。`places` 与 `program` 来自同一张网。
    pub fn new(program: &'p Program, places: &'p [Place], evaluator: &'p dyn Evaluator) -> Self {
        Self {
            program,
            places,
            evaluator,
            timeout: None,
            cancel: CancelToken::new(),
            budget: usize::MAX,
            remaining: usize::MAX,
            exhausted: false,
            trace: false,
        }
    }

    /// 每次搜索最多尝试的合一次数
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// 每次调用求值器的时限与取消标记
    pub fn with_deadline(mut self, timeout: Option<Duration>, cancel: CancelToken) -> Self {
        self.timeout = timeout;
        self.cancel = cancel;
        self
    }

    /// 输出跟踪信息
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// 上一次搜索是否因为预算耗尽而中止
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// 第一个完整的绑定。`reserved` 中的托肯不可使用。
    pub fn find_first(
        &mut self,
        transition: TransitionId,
        reserved: &Reservations,
    ) -> Option<Firing> {
        let mut found = None;
        self.run(transition, reserved, &mut |firing| {
            found = Some(firing);
            ControlFlow::Break(())
        });
        found
    }

    /// 所有不同的绑定，最多 `limit` 个。
    pub fn find_all(
        &mut self,
        transition: TransitionId,
        reserved: &Reservations,
        limit: usize,
    ) -> Vec<Firing> {
        let mut found: Vec<Firing> = vec![];
        if limit == 0 {
            return found;
        }
        self.run(transition, reserved, &mut |firing| {
            if !found.iter().any(|seen| seen.binding == firing.binding) {
                found.push(firing);
            }
            if found.len() >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        found
    }

    fn transition_id(&self, transition: TransitionId) -> &'p str {
        &self.program.transitions[transition.0].id
    }

    fn slots(&self, transition: TransitionId) -> Vec<Slot<'p>> {
        let program = self.program;
        let mut slots = vec![];
        for &arc in program.index.inputs(transition) {
            let Some(ends) = program.index.ends(arc) else {
                continue;
            };
            let compiled = &program.arcs[arc.0];
            if compiled.bindings.is_empty() {
                slots.extend((0..compiled.weight).map(|_| Slot {
                    place: ends.place,
                    pattern: None,
                }));
            } else {
                slots.extend(compiled.bindings.iter().map(|pattern| Slot {
                    place: ends.place,
                    pattern: Some(pattern),
                }));
            }
        }
        slots
    }

    fn run(&mut self, transition: TransitionId, reserved: &Reservations, visit: &mut Visit<'_>) {
        if transition.0 >= self.program.transitions.len() {
            return;
        }
        self.remaining = self.budget;
        self.exhausted = false;

        let slots = self.slots(transition);
        let goal = Goal {
            transition,
            slots: &slots,
            reserved,
        };
        let _ = self.search(&goal, 0, Binding::new(), Reservations::new(), visit);

        if self.exhausted && self.trace {
            warn(format!(
                "search budget of {} exhausted for transition {}",
                self.budget,
                self.transition_id(transition)
            ));
        }
    }

    fn search(
        &mut self,
        goal: &Goal<'_, 'p>,
        depth: usize,
        binding: Binding,
        taken: Reservations,
        visit: &mut Visit<'_>,
    ) -> ControlFlow<()> {
        let Some(slot) = goal.slots.get(depth) else {
            return match self.accept(goal.transition, binding, &taken) {
                Some(firing) => visit(firing),
                None => ControlFlow::Continue(()),
            };
        };

        let place = slot.place;
        let places = self.places;
        let free = |token: &TokenRef| !taken.contains(*token) && !goal.reserved.contains(*token);

        match &places[place.0].marking {
            Marking::Count(n) => {
                // 匿名托肯都一样，试第一个空闲的就够了
                let Some(token) = (0..*n).map(|index| TokenRef { place, index }).find(free) else {
                    return ControlFlow::Continue(());
                };
                self.attempt(goal, depth, &binding, &taken, token, &Value::Int(1), visit)
            }
            Marking::Values(values) => {
                let mut tried: Vec<&Value> = vec![];
                for (index, value) in values.iter().enumerate() {
                    let token = TokenRef { place, index };
                    if !free(&token) || tried.contains(&value) {
                        continue;
                    }
                    tried.push(value);
                    self.attempt(goal, depth, &binding, &taken, token, value, visit)?;
                }
                ControlFlow::Continue(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt(
        &mut self,
        goal: &Goal<'_, 'p>,
        depth: usize,
        binding: &Binding,
        taken: &Reservations,
        token: TokenRef,
        value: &Value,
        visit: &mut Visit<'_>,
    ) -> ControlFlow<()> {
        if self.remaining == 0 {
            self.exhausted = true;
            return ControlFlow::Break(());
        }
        self.remaining -= 1;

        let next = match goal.slots[depth].pattern {
            None => Some(binding.clone()),
            Some(pattern) => unify(pattern, value, binding),
        };
        match next {
            Some(next) => self.search(goal, depth + 1, next, taken.with(token), visit),
            None => ControlFlow::Continue(()),
        }
    }

    /// 所有输入弧都匹配之后：守卫、动作、输出弧依次求值，任何一步失败都拒绝这个绑定。
    fn accept(
        &mut self,
        transition: TransitionId,
        binding: Binding,
        taken: &Reservations,
    ) -> Option<Firing> {
        let mut binding = self.check_guard(transition, binding)?;

        for (name, expr) in &self.program.transitions[transition.0].actions {
            match evaluate(expr, &binding) {
                Ok(value) => {
                    binding.insert(name.clone(), value);
                }
                Err(err) => {
                    self.note(transition, format!("action `{} = {}`: {}", name, expr, err));
                    return None;
                }
            }
        }

        let produced = self.produce(transition, &binding)?;
        let mut consumed = taken.iter().collect::<Vec<_>>();
        consumed.reverse();

        Some(Firing {
            transition,
            binding,
            consumed,
            produced,
        })
    }

    fn check_guard(&mut self, transition: TransitionId, binding: Binding) -> Option<Binding> {
        let Some(guard) = &self.program.transitions[transition.0].guard else {
            return Some(binding);
        };
        let deadline = Deadline::after(self.timeout, self.cancel.clone());

        match evaluate(guard, &binding) {
            Ok(Value::Bool(satisfied)) => satisfied.then_some(binding),
            // 不是闭合的布尔项，交给求值器
            Ok(_) => match self
                .evaluator
                .evaluate_predicate(guard, &binding, &deadline)
            {
                Ok(satisfied) => satisfied.then_some(binding),
                Err(err) => {
                    self.warn(transition, format!("guard `{}`: {}", guard, err));
                    None
                }
            },
            Err(EvalError::Unbound(_)) => match self.evaluator.solve(guard, &binding, &deadline) {
                Ok(Solution::Assignment(assignment)) => {
                    let mut extended = binding;
                    extended.extend(assignment);
                    match evaluate(guard, &extended) {
                        Ok(Value::Bool(true)) => Some(extended),
                        _ => {
                            self.warn(
                                transition,
                                format!(
                                    "solver assignment {} does not satisfy `{}`",
                                    extended, guard
                                ),
                            );
                            None
                        }
                    }
                }
                Ok(Solution::Unsatisfiable) => None,
                Err(err) => {
                    self.warn(transition, format!("guard `{}`: {}", guard, err));
                    None
                }
            },
            Err(err) => {
                self.note(transition, format!("guard `{}`: {}", guard, err));
                None
            }
        }
    }

    fn produce(
        &self,
        transition: TransitionId,
        binding: &Binding,
    ) -> Option<Vec<(PlaceId, Produced)>> {
        let program = self.program;
        let mut produced = vec![];
        for &arc in program.index.outputs(transition) {
            let Some(ends) = program.index.ends(arc) else {
                continue;
            };
            let compiled = &program.arcs[arc.0];
            let count_place = matches!(self.places[ends.place.0].marking, Marking::Count(_));

            let tokens = if compiled.bindings.is_empty() {
                if count_place {
                    Produced::Count(compiled.weight)
                } else {
                    Produced::Values(vec![Value::Int(1); compiled.weight])
                }
            } else {
                let values = compiled
                    .bindings
                    .iter()
                    .map(|expr| evaluate(expr, binding))
                    .collect::<Result<Vec<_>, _>>();
                match values {
                    Ok(values) if count_place => Produced::Count(values.len()),
                    Ok(values) => Produced::Values(values),
                    Err(err) => {
                        self.note(transition, format!("output arc {}: {}", compiled.id, err));
                        return None;
                    }
                }
            };
            produced.push((ends.place, tokens));
        }
        Some(produced)
    }

    /// 预期之内的拒绝，只在跟踪时输出
    fn note(&self, transition: TransitionId, message: String) {
        if self.trace {
            trace(format!(
                "{}: rejected binding, {}",
                self.transition_id(transition),
                message
            ));
        }
    }

    fn warn(&self, transition: TransitionId, message: String) {
        if self.trace {
            warn(format!("{}: {}", self.transition_id(transition), message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        net::{Arc, Net, Transition},
        runtime::solver::{BoundedSolver, NoSolver},
    };

    fn program(net: &Net) -> Program {
        Program::build(net).unwrap()
    }

    fn values(text: &[&str]) -> Vec<Value> {
        text.iter().map(|t| t.parse().unwrap()).collect()
    }

    #[test]
    fn reservations_are_persistent() {
        let a = TokenRef {
            place: PlaceId(0),
            index: 0,
        };
        let b = TokenRef {
            place: PlaceId(0),
            index: 1,
        };
        let empty = Reservations::new();
        let one = empty.with(a);
        let two = one.with(b);
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert!(!one.contains(b));
        assert_eq!(two.iter().collect::<Vec<_>>(), vec![b, a]);
    }

    #[test]
    fn shared_variables_must_agree_across_arcs() {
        let net = Net::new()
            .with_place(Place::with_values("P1", values(&["1", "2"])))
            .with_place(Place::with_values("P2", values(&["3", "2"])))
            .with_place(Place::with_values("P3", []))
            .with_transition(Transition::new("T1"))
            .with_arc(Arc::new("A1", "P1", "T1").with_binding("x"))
            .with_arc(Arc::new("A2", "P2", "T1").with_binding("x"))
            .with_arc(Arc::new("A3", "T1", "P3").with_binding("(x, x)"));
        let program = program(&net);
        let mut resolver = Resolver::new(&program, &net.places, &NoSolver);

        let firing = resolver
            .find_first(TransitionId(0), &Reservations::new())
            .unwrap();
        assert_eq!(firing.binding.get("x"), Some(&Value::int(2)));
        assert_eq!(
            firing.consumed,
            vec![
                TokenRef {
                    place: PlaceId(0),
                    index: 1
                },
                TokenRef {
                    place: PlaceId(1),
                    index: 1
                },
            ]
        );
        assert_eq!(
            firing.produced,
            vec![(PlaceId(2), Produced::Values(values(&["(2, 2)"])))]
        );
    }

    #[test]
    fn one_token_per_binding() {
        let net = Net::new()
            .with_place(Place::with_values("P1", values(&["1", "1", "2"])))
            .with_transition(Transition::new("T1").with_guard("a != b"))
            .with_arc(
                Arc::new("A1", "P1", "T1")
                    .with_binding("a")
                    .with_binding("b"),
            );
        let program = program(&net);
        let mut resolver = Resolver::new(&program, &net.places, &NoSolver);
        let all = resolver.find_all(TransitionId(0), &Reservations::new(), 10);
        let bindings = all
            .iter()
            .map(|f| (f.binding.get("a").cloned(), f.binding.get("b").cloned()))
            .collect::<Vec<_>>();
        assert_eq!(
            bindings,
            vec![
                (Some(Value::int(1)), Some(Value::int(2))),
                (Some(Value::int(2)), Some(Value::int(1))),
            ]
        );
    }

    #[test]
    fn reserved_tokens_are_skipped() {
        let net = Net::new()
            .with_place(Place::with_count("P1", 2))
            .with_transition(Transition::new("T1"))
            .with_arc(Arc::new("A1", "P1", "T1").with_weight(2));
        let program = program(&net);
        let mut resolver = Resolver::new(&program, &net.places, &NoSolver);
        assert!(resolver
            .find_first(TransitionId(0), &Reservations::new())
            .is_some());

        let reserved = Reservations::new().with(TokenRef {
            place: PlaceId(0),
            index: 0,
        });
        assert!(resolver.find_first(TransitionId(0), &reserved).is_none());
    }

    #[test]
    fn free_guard_variables_go_to_the_evaluator() {
        let net = Net::new()
            .with_place(Place::with_values("P1", values(&["1"])))
            .with_place(Place::with_values("P2", []))
            .with_transition(Transition::new("T1").with_guard("x + y == 5"))
            .with_arc(Arc::new("A1", "P1", "T1").with_binding("x"))
            .with_arc(Arc::new("A2", "T1", "P2").with_binding("y"));
        let program = program(&net);

        let mut without = Resolver::new(&program, &net.places, &NoSolver);
        assert!(without
            .find_first(TransitionId(0), &Reservations::new())
            .is_none());

        let solver = BoundedSolver::default();
        let mut with = Resolver::new(&program, &net.places, &solver);
        let firing = with
            .find_first(TransitionId(0), &Reservations::new())
            .unwrap();
        assert_eq!(firing.binding.get("y"), Some(&Value::int(4)));
        assert_eq!(
            firing.produced,
            vec![(PlaceId(1), Produced::Values(vec![Value::int(4)]))]
        );
    }

    #[test]
    fn evaluation_errors_reject_the_binding() {
        let net = Net::new()
            .with_place(Place::with_values("P1", values(&["0", "2"])))
            .with_place(Place::with_values("P2", []))
            .with_transition(Transition::new("T1").with_guard("10 / x > 1"))
            .with_arc(Arc::new("A1", "P1", "T1").with_binding("x"))
            .with_arc(Arc::new("A2", "T1", "P2").with_binding("x"));
        let program = program(&net);
        let mut resolver = Resolver::new(&program, &net.places, &NoSolver);
        let firing = resolver
            .find_first(TransitionId(0), &Reservations::new())
            .unwrap();
        assert_eq!(firing.binding.get("x"), Some(&Value::int(2)));
    }

    #[test]
    fn unevaluable_outputs_reject_the_binding() {
        let net = Net::new()
            .with_place(Place::with_values("P1", values(&["'a'", "[1]"])))
            .with_place(Place::with_values("P2", []))
            .with_transition(Transition::new("T1"))
            .with_arc(Arc::new("A1", "P1", "T1").with_binding("x"))
            .with_arc(Arc::new("A2", "T1", "P2").with_binding("head(x)"));
        let program = program(&net);
        let mut resolver = Resolver::new(&program, &net.places, &NoSolver);
        let firing = resolver
            .find_first(TransitionId(0), &Reservations::new())
            .unwrap();
        assert_eq!(firing.binding.get("x"), Some(&"[1]".parse().unwrap()));
    }

    #[test]
    fn actions_extend_the_binding() {
        let net = Net::new()
            .with_place(Place::with_values("P1", values(&["4"])))
            .with_place(Place::with_values("P2", []))
            .with_transition(Transition::new("T1").with_action("y = x + 1, z = y * 2"))
            .with_arc(Arc::new("A1", "P1", "T1").with_binding("x"))
            .with_arc(Arc::new("A2", "T1", "P2").with_binding("(y, z)"));
        let program = program(&net);
        let mut resolver = Resolver::new(&program, &net.places, &NoSolver);
        let firing = resolver
            .find_first(TransitionId(0), &Reservations::new())
            .unwrap();
        assert_eq!(
            firing.produced,
            vec![(PlaceId(1), Produced::Values(values(&["(5, 10)"])))]
        );
    }

    #[test]
    fn exhausted_budget_fails_closed() {
        let net = Net::new()
            .with_place(Place::with_values("P1", values(&["1", "2", "3", "4"])))
            .with_transition(Transition::new("T1").with_guard("a + b + c == 100"))
            .with_arc(
                Arc::new("A1", "P1", "T1")
                    .with_binding("a")
                    .with_binding("b")
                    .with_binding("c"),
            );
        let program = program(&net);
        let mut resolver = Resolver::new(&program, &net.places, &NoSolver).with_budget(5);
        assert!(resolver
            .find_first(TransitionId(0), &Reservations::new())
            .is_none());
        assert!(resolver.exhausted());
    }
}
