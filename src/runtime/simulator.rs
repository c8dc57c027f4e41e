//! 发生引擎。
//!
//! [`Simulator`] 拥有网的标识，每一步先用 [`Resolver`] 规划要发生的绑定，
//! 再一次性地消耗和产生托肯。一步之内要么全部生效，要么什么都不变。

use std::{collections::BTreeMap, fmt::Display, time::Instant};

use thiserror::Error;

use crate::{
    net::{Marking, Net, NetMode, PlaceId, TransitionId, MAX_TOKENS},
    options::{Options, SelectionPolicy},
    value::Value,
};

use super::{
    eval::Binding,
    resolver::{Firing, Reservations, Resolver},
    solver::{BoundedSolver, CancelToken, Evaluator},
    trace, warn, BuildError, Program,
};

/// 发生错误
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FireError {
    #[error("transition {transition} is not enabled")]
    InvalidFire { transition: String },
}

/// 停机原因
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Deadlock,
    IterationLimitReached { steps: usize },
    Cancelled,
}

impl Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::Deadlock => write!(f, "deadlock, no transition is enabled"),
            HaltReason::IterationLimitReached { steps } => {
                write!(f, "iteration limit reached after {} steps", steps)
            }
            HaltReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 模拟器状态
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Idle,
    Ready,
    Firing,
    Halted(HaltReason),
}

/// 一次发生
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTransition {
    /// 变迁标识
    pub transition: String,
    /// 使用的绑定
    pub binding: Binding,
}

/// 一步的结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    /// 这一步中发生的变迁，按声明顺序
    pub fired: Vec<FiredTransition>,
    /// 因为容量限制被丢弃的托肯数
    pub dropped: usize,
}

/// `run` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// 这次运行执行的步数
    pub steps: usize,
    /// 停机原因
    pub reason: HaltReason,
}

/// 每一步之后交给观察者的快照
#[derive(Debug)]
pub struct StepSnapshot<'a> {
    /// 从 1 开始的步号
    pub step: usize,
    /// 这一步中发生的变迁
    pub fired: &'a [FiredTransition],
    /// 这一步之后的网
    pub net: &'a Net,
    /// 被丢弃的托肯数
    pub dropped: usize,
}

/// 步观察者
pub trait StepObserver {
    /// 每一步之后调用
    fn on_step(&mut self, snapshot: &StepSnapshot<'_>);
}

impl<F: FnMut(&StepSnapshot<'_>)> StepObserver for F {
    fn on_step(&mut self, snapshot: &StepSnapshot<'_>) {
        self(snapshot)
    }
}

/// 模拟器
pub struct Simulator {
    net: Net,
    program: Program,
    options: Options,
    evaluator: Box<dyn Evaluator>,
    observers: Vec<Box<dyn StepObserver>>,
    state: SimState,
    steps: usize,
}

impl Simulator {
    /// 编译网并创建模拟器。任何表达式无法解析都会失败。
    ///
    /// 代数网中只有个数的库所变成同样多个值为 `1` 的托肯，个数超过 [`MAX_TOKENS`] 时失败。
    pub fn new(mut net: Net, options: Options) -> Result<Self, BuildError> {
        let program = Program::build(&net)?;

        if program.mode == NetMode::Algebraic {
            for place in &mut net.places {
                if let Marking::Count(n) = place.marking {
                    if n > MAX_TOKENS {
                        return Err(BuildError::Marking {
                            place: place.id.clone(),
                            tokens: n,
                            limit: MAX_TOKENS,
                        });
                    }
                    place.marking = Marking::Values(vec![Value::Int(1); n]);
                }
            }
        }

        if options.debug {
            for message in program.diagnostics() {
                warn(message);
            }
            trace(&program);
        }

        Ok(Self {
            net,
            program,
            options,
            evaluator: Box::new(BoundedSolver::default()),
            observers: vec![],
            state: SimState::Idle,
            steps: 0,
        })
    }

    /// 替换守卫求值器
    pub fn with_evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    /// 注册一个步观察者
    pub fn add_observer(&mut self, observer: impl StepObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// 当前的网
    pub fn net(&self) -> &Net {
        &self.net
    }

    /// 取回网
    pub fn into_net(self) -> Net {
        self.net
    }

    /// 编译结果
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// 当前状态
    pub fn state(&self) -> SimState {
        self.state
    }

    /// 已执行的步数
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn resolver(&self, cancel: &CancelToken) -> Resolver<'_> {
        Resolver::new(&self.program, &self.net.places, self.evaluator.as_ref())
            .with_budget(self.options.search_budget)
            .with_deadline(self.options.solver_timeout, cancel.clone())
            .with_trace(self.options.debug)
    }

    fn transition_ids(&self) -> impl Iterator<Item = TransitionId> {
        (0..self.program.transitions.len()).map(TransitionId)
    }

    /// 当前使能的变迁，按声明顺序。
    pub fn enabled_transitions(&mut self) -> Vec<String> {
        let cancel = CancelToken::new();
        let mut resolver = self.resolver(&cancel);
        let enabled = self
            .transition_ids()
            .filter(|&t| resolver.find_first(t, &Reservations::new()).is_some())
            .map(|t| self.program.transitions[t.0].id.clone())
            .collect::<Vec<_>>();

        self.state = if enabled.is_empty() {
            SimState::Halted(HaltReason::Deadlock)
        } else {
            SimState::Ready
        };
        enabled
    }

    /// 变迁是否使能。未知的变迁不使能。
    pub fn is_enabled(&self, id: &str) -> bool {
        let Some(transition) = self.program.index.transition(id) else {
            return false;
        };
        self.resolver(&CancelToken::new())
            .find_first(transition, &Reservations::new())
            .is_some()
    }

    /// 变迁当前所有不同的绑定，最多 `limit` 个。
    pub fn bindings(&self, id: &str, limit: usize) -> Vec<Binding> {
        let Some(transition) = self.program.index.transition(id) else {
            return vec![];
        };
        self.resolver(&CancelToken::new())
            .find_all(transition, &Reservations::new(), limit)
            .into_iter()
            .map(|firing| firing.binding)
            .collect()
    }

    /// 让指定的变迁发生一次。
    pub fn fire(&mut self, id: &str) -> Result<StepOutcome, FireError> {
        let firing = self.program.index.transition(id).and_then(|transition| {
            self.resolver(&CancelToken::new())
                .find_first(transition, &Reservations::new())
        });
        match firing {
            Some(firing) => Ok(self.commit(vec![firing])),
            None => Err(FireError::InvalidFire {
                transition: id.to_string(),
            }),
        }
    }

    /// 按选择策略执行一步。没有变迁使能时返回 `None`。
    pub fn step(&mut self) -> Option<StepOutcome> {
        self.step_with(&CancelToken::new())
    }

    /// 同 [`Simulator::step`]，求值器调用会观察 `cancel`。
    pub fn step_with(&mut self, cancel: &CancelToken) -> Option<StepOutcome> {
        let firings = self.plan(cancel);
        if firings.is_empty() {
            self.state = SimState::Halted(HaltReason::Deadlock);
            return None;
        }
        Some(self.commit(firings))
    }

    fn plan(&self, cancel: &CancelToken) -> Vec<Firing> {
        let mut resolver = self.resolver(cancel);
        match self.options.selection_policy {
            SelectionPolicy::Single => self
                .transition_ids()
                .filter_map(|t| resolver.find_first(t, &Reservations::new()))
                .take(1)
                .collect(),
            SelectionPolicy::Maximal => {
                let mut reserved = Reservations::new();
                let mut firings = vec![];
                for t in self.transition_ids() {
                    if let Some(firing) = resolver.find_first(t, &reserved) {
                        for &token in &firing.consumed {
                            reserved = reserved.with(token);
                        }
                        firings.push(firing);
                    }
                }
                firings
            }
        }
    }

    fn commit(&mut self, firings: Vec<Firing>) -> StepOutcome {
        self.state = SimState::Firing;

        let mut consumed: BTreeMap<PlaceId, Vec<usize>> = BTreeMap::new();
        for token in firings.iter().flat_map(|firing| &firing.consumed) {
            consumed.entry(token.place).or_default().push(token.index);
        }
        for (place, mut indices) in consumed {
            match &mut self.net.places[place.0].marking {
                Marking::Count(n) => *n = n.saturating_sub(indices.len()),
                Marking::Values(values) => {
                    indices.sort_unstable_by(|a, b| b.cmp(a));
                    for index in indices {
                        values.remove(index);
                    }
                }
            }
        }

        let capacity = self.options.max_tokens_per_place;
        let mut dropped = 0;
        let mut fired = vec![];
        for firing in firings {
            for (place, produced) in firing.produced {
                let place = &mut self.net.places[place.0];
                let room = capacity.saturating_sub(place.marking.len());
                let wanted = produced.len();
                let accepted = wanted.min(room);
                match &mut place.marking {
                    Marking::Count(n) => *n += accepted,
                    Marking::Values(values) => {
                        values.extend(produced.into_values().into_iter().take(accepted))
                    }
                }
                if accepted < wanted {
                    dropped += wanted - accepted;
                    if self.options.debug {
                        warn(format!(
                            "place {} is full, dropped {} token(s)",
                            place.id,
                            wanted - accepted
                        ));
                    }
                }
            }
            fired.push(FiredTransition {
                transition: self.program.transitions[firing.transition.0].id.clone(),
                binding: firing.binding,
            });
        }

        self.steps += 1;
        if self.options.debug {
            for f in &fired {
                trace(format!("[{}] {} {}", self.steps, f.transition, f.binding));
            }
        }
        self.state = SimState::Ready;

        let snapshot = StepSnapshot {
            step: self.steps,
            fired: &fired,
            net: &self.net,
            dropped,
        };
        for observer in &mut self.observers {
            observer.on_step(&snapshot);
        }

        StepOutcome { fired, dropped }
    }

    /// 一直执行到死锁、达到步数上限或被取消。
    pub fn run(&mut self, cancel: &CancelToken) -> RunOutcome {
        let start_time = Instant::now();
        let mut steps = 0;

        let reason = loop {
            if cancel.is_cancelled() {
                break HaltReason::Cancelled;
            }
            if steps >= self.options.max_steps {
                break HaltReason::IterationLimitReached { steps };
            }
            if self.step_with(cancel).is_none() {
                break if cancel.is_cancelled() {
                    HaltReason::Cancelled
                } else {
                    HaltReason::Deadlock
                };
            }
            steps += 1;
        };
        self.state = SimState::Halted(reason);

        if self.options.timing {
            let time = (Instant::now() - start_time).as_secs_f64();
            let steps_per_second = steps as f64 / time;
            eprintln!("\n[Steps: {steps}, CPU time: {time}, S/s: {steps_per_second}]");
        }

        RunOutcome { steps, reason }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::net::{Arc, Place, Transition};

    fn producer() -> Net {
        Net::new()
            .with_place(Place::with_count("P1", 1))
            .with_place(Place::with_count("P2", 0))
            .with_transition(Transition::new("T1"))
            .with_arc(Arc::new("A1", "P1", "T1"))
            .with_arc(Arc::new("A2", "T1", "P1"))
            .with_arc(Arc::new("A3", "T1", "P2").with_weight(3))
    }

    #[test]
    fn state_follows_the_lifecycle() {
        let mut sim = Simulator::new(producer(), Options::default()).unwrap();
        assert_eq!(sim.state(), SimState::Idle);
        assert_eq!(sim.enabled_transitions(), vec!["T1".to_string()]);
        assert_eq!(sim.state(), SimState::Ready);
        sim.step().unwrap();
        assert_eq!(sim.state(), SimState::Ready);
        assert_eq!(sim.steps(), 1);

        let mut dead = Simulator::new(
            Net::new()
                .with_place(Place::with_count("P1", 0))
                .with_transition(Transition::new("T1"))
                .with_arc(Arc::new("A1", "P1", "T1")),
            Options::default(),
        )
        .unwrap();
        assert!(dead.enabled_transitions().is_empty());
        assert_eq!(dead.state(), SimState::Halted(HaltReason::Deadlock));
    }

    #[test]
    fn production_is_clamped_at_capacity() {
        let options = Options {
            max_tokens_per_place: 5,
            ..Options::default()
        };
        let mut sim = Simulator::new(producer(), options).unwrap();
        assert_eq!(sim.step().unwrap().dropped, 0);
        let outcome = sim.step().unwrap();
        assert_eq!(outcome.dropped, 1);
        assert_eq!(sim.net().places[1].tokens(), 5);
        assert_eq!(sim.net().places[0].tokens(), 1);
    }

    #[test]
    fn invalid_fire_changes_nothing() {
        let mut sim = Simulator::new(producer(), Options::default()).unwrap();
        assert_eq!(
            sim.fire("T9"),
            Err(FireError::InvalidFire {
                transition: "T9".to_string()
            })
        );

        let mut empty = producer();
        empty.places[0].marking = Marking::Count(0);
        let mut sim = Simulator::new(empty.clone(), Options::default()).unwrap();
        assert!(sim.fire("T1").is_err());
        assert_eq!(sim.net(), &empty);
        assert_eq!(sim.steps(), 0);
    }

    #[test]
    fn count_places_are_promoted_in_algebraic_nets() {
        let net = Net::new()
            .with_place(Place::with_count("P1", 2))
            .with_place(Place::with_values("P2", []))
            .with_transition(Transition::new("T1"))
            .with_arc(Arc::new("A1", "P1", "T1").with_binding("x"))
            .with_arc(Arc::new("A2", "T1", "P2").with_binding("x + 1"));
        let mut sim = Simulator::new(net, Options::default()).unwrap();
        assert_eq!(
            sim.net().places[0].marking,
            Marking::Values(vec![Value::int(1), Value::int(1)])
        );
        assert_eq!(sim.bindings("T1", 10).len(), 1);
        sim.fire("T1").unwrap();
        assert_eq!(
            sim.net().places[1].marking,
            Marking::Values(vec![Value::int(2)])
        );
    }

    #[test]
    fn huge_anonymous_markings_are_rejected() {
        let net = Net::new()
            .with_place(Place::with_count("P1", MAX_TOKENS + 1))
            .with_transition(Transition::new("T1").with_guard("T"))
            .with_arc(Arc::new("A1", "P1", "T1"));
        let err = Simulator::new(net, Options::default()).err().unwrap();
        assert_eq!(
            err,
            BuildError::Marking {
                place: "P1".to_string(),
                tokens: MAX_TOKENS + 1,
                limit: MAX_TOKENS,
            }
        );
        assert_eq!(err.expr_error(), None);
        assert!(err.to_snippet().starts_with("place P1 holds"));

        let net = crate::net::normalize(&serde_json::json!({
            "places": [{"id": "P1", "tokens": 1e30}],
            "transitions": [{"id": "T1", "guard": "T"}],
            "arcs": [{"id": "A1", "source": "P1", "target": "T1"}]
        }));
        let sim = Simulator::new(net, Options::default()).unwrap();
        assert_eq!(sim.net().places[0].tokens(), MAX_TOKENS);
    }

    #[test]
    fn value_production_is_clamped_at_capacity() {
        let net = Net::new()
            .with_place(Place::with_values("P1", [Value::int(1)]))
            .with_place(Place::with_values("P2", []))
            .with_transition(Transition::new("T1"))
            .with_arc(Arc::new("A1", "P1", "T1").with_binding("x"))
            .with_arc(Arc::new("A2", "T1", "P1").with_binding("x"))
            .with_arc(
                Arc::new("A3", "T1", "P2")
                    .with_binding("x")
                    .with_binding("x + 1"),
            );
        let options = Options {
            max_tokens_per_place: 3,
            ..Options::default()
        };
        let mut sim = Simulator::new(net, options).unwrap();
        assert_eq!(sim.step().unwrap().dropped, 0);
        assert_eq!(
            sim.net().places[1].marking,
            Marking::Values(vec![Value::int(1), Value::int(2)])
        );

        let outcome = sim.step().unwrap();
        assert_eq!(outcome.dropped, 1);
        assert_eq!(
            sim.net().places[1].marking,
            Marking::Values(vec![Value::int(1), Value::int(2), Value::int(1)])
        );
        assert_eq!(
            sim.net().places[0].marking,
            Marking::Values(vec![Value::int(1)])
        );
    }

    #[test]
    fn observers_see_every_step() {
        let seen = Rc::new(RefCell::new(vec![]));
        let mut sim = Simulator::new(
            producer(),
            Options {
                max_steps: 3,
                ..Options::default()
            },
        )
        .unwrap();
        let log = seen.clone();
        sim.add_observer(move |snapshot: &StepSnapshot<'_>| {
            log.borrow_mut()
                .push((snapshot.step, snapshot.fired.len(), snapshot.net.places[1].tokens()));
        });
        let outcome = sim.run(&CancelToken::new());
        assert_eq!(outcome.reason, HaltReason::IterationLimitReached { steps: 3 });
        assert_eq!(*seen.borrow(), vec![(1, 1, 3), (2, 1, 6), (3, 1, 9)]);
    }

    #[test]
    fn cancelled_runs_stop_before_stepping() {
        let mut sim = Simulator::new(producer(), Options::default()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = sim.run(&cancel);
        assert_eq!(
            outcome,
            RunOutcome {
                steps: 0,
                reason: HaltReason::Cancelled
            }
        );
        assert_eq!(sim.state(), SimState::Halted(HaltReason::Cancelled));
    }

    #[test]
    fn cancelling_between_steps_stops_the_run() {
        let mut sim = Simulator::new(producer(), Options::default()).unwrap();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        sim.add_observer(move |snapshot: &StepSnapshot<'_>| {
            if snapshot.step == 2 {
                token.cancel();
            }
        });
        let outcome = sim.run(&cancel);
        assert_eq!(
            outcome,
            RunOutcome {
                steps: 2,
                reason: HaltReason::Cancelled
            }
        );
        assert_eq!(sim.steps(), 2);
        assert_eq!(sim.net().places[1].tokens(), 6);
    }
}
