//! 运行时构建器。

use crate::{
    frontend::{parse, parse_actions},
    net::{Arc, Index, Net, NetMode, Transition},
};

use super::{BuildError, CompiledArc, CompiledTransition, Program};

/// 用于构建 [`Program`] 的构建器。
#[derive(Default)]
pub struct ProgramBuilder {
    transitions: Vec<CompiledTransition>,
    arcs: Vec<CompiledArc>,
}

impl ProgramBuilder {
    /// 创建一个新的 `ProgramBuilder`。
    pub fn new() -> Self {
        Default::default()
    }

    /// 编译一个变迁的守卫和动作。
    pub fn transition(&mut self, transition: &Transition) -> Result<&mut Self, BuildError> {
        let guard = match &transition.guard {
            Some(text) => Some(parse(text).map_err(|error| BuildError::Guard {
                transition: transition.id.clone(),
                text: text.clone(),
                error,
            })?),
            None => None,
        };
        let actions = match &transition.action {
            Some(text) => parse_actions(text).map_err(|error| BuildError::Action {
                transition: transition.id.clone(),
                text: text.clone(),
                error,
            })?,
            None => vec![],
        };

        self.transitions.push(CompiledTransition {
            id: transition.id.clone(),
            guard,
            actions,
        });
        Ok(self)
    }

    /// 编译一条弧上的绑定。
    pub fn arc(&mut self, arc: &Arc) -> Result<&mut Self, BuildError> {
        let bindings = arc
            .bindings
            .iter()
            .enumerate()
            .map(|(position, text)| {
                parse(text).map_err(|error| BuildError::Binding {
                    arc: arc.id.clone(),
                    position,
                    text: text.clone(),
                    error,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.arcs.push(CompiledArc {
            id: arc.id.clone(),
            weight: arc.weight.max(1),
            bindings,
        });
        Ok(self)
    }

    /// 构建 `Program`。`net` 必须是逐个添加过的那张网。
    pub fn build(self, net: &Net) -> Program {
        Program {
            mode: NetMode::detect(net),
            index: Index::build(net),
            transitions: self.transitions,
            arcs: self.arcs,
        }
    }
}

impl Program {
    /// 编译整张网。遇到第一个无法解析的表达式就停下。
    pub fn build(net: &Net) -> Result<Self, BuildError> {
        let mut builder = ProgramBuilder::new();
        for transition in &net.transitions {
            builder.transition(transition)?;
        }
        for arc in &net.arcs {
            builder.arc(arc)?;
        }
        Ok(builder.build(net))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::{Expr, ExprError},
        net::Place,
    };

    fn net() -> Net {
        Net::new()
            .with_place(Place::with_values("P1", []))
            .with_place(Place::with_values("P2", []))
            .with_transition(
                Transition::new("T1")
                    .with_guard("x > 0")
                    .with_action("y = x + 1"),
            )
            .with_arc(Arc::new("A1", "P1", "T1").with_binding("x"))
            .with_arc(Arc::new("A2", "T1", "P2").with_binding("y"))
    }

    #[test]
    fn compiles_expressions_once() {
        let program = Program::build(&net()).unwrap();
        assert_eq!(program.mode, NetMode::Algebraic);
        assert!(program.transitions[0].guard.is_some());
        assert_eq!(program.transitions[0].actions[0].0, "y");
        assert_eq!(program.arcs[1].bindings, vec![Expr::var("y")]);
        assert!(program.diagnostics().is_empty());
        assert!(program.to_string().contains("transition T1 [(x > 0)]"));
    }

    #[test]
    fn parse_errors_name_the_element() {
        let bad = net().with_arc(Arc::new("A3", "P1", "T1").with_binding("[1 2]"));
        let err = Program::build(&bad).unwrap_err();
        assert_eq!(
            err,
            BuildError::Binding {
                arc: "A3".to_string(),
                position: 0,
                text: "[1 2]".to_string(),
                error: ExprError::syntax("Expected ',' or ']'", 3),
            }
        );
        assert!(err.to_snippet().contains("binding 0 of arc A3"));

        let mut bad_guard = net();
        bad_guard.transitions[0].guard = Some("X + 1".to_string());
        assert!(matches!(
            Program::build(&bad_guard),
            Err(BuildError::Guard { .. })
        ));
    }

    #[test]
    fn diagnostics_report_unbound_outputs() {
        let mut loose = net();
        loose.arcs[1].bindings = vec!["z".to_string()];
        let program = Program::build(&loose).unwrap();
        let diagnostics = program.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("variable `z`"));
    }
}
