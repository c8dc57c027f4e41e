//! 网的拓扑索引。

use std::collections::HashMap;
use std::fmt::Display;

use super::Net;

/// 库所在 [`Net::places`] 中的位置
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct PlaceId(pub usize);

/// 变迁在 [`Net::transitions`] 中的位置
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct TransitionId(pub usize);

/// 弧在 [`Net::arcs`] 中的位置
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ArcId(pub usize);

impl Display for PlaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl Display for ArcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// 弧的方向
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// 库所到变迁，输入弧
    PlaceToTransition,
    /// 变迁到库所，输出弧
    TransitionToPlace,
}

/// 弧的两端
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArcEnds {
    /// 库所
    pub place: PlaceId,
    /// 变迁
    pub transition: TransitionId,
    /// 方向
    pub direction: Direction,
}

/// 拓扑索引，一次遍历建成。邻接表中的弧保持声明顺序。
///
/// 两端不是一个库所和一个变迁的弧仍可按标识查到，但不出现在任何邻接表中。
#[derive(Debug, Clone, Default)]
pub struct Index {
    places: HashMap<String, PlaceId>,
    transitions: HashMap<String, TransitionId>,
    arcs: HashMap<String, ArcId>,
    ends: Vec<Option<ArcEnds>>,
    transition_inputs: Vec<Vec<ArcId>>,
    transition_outputs: Vec<Vec<ArcId>>,
    place_inputs: Vec<Vec<ArcId>>,
    place_outputs: Vec<Vec<ArcId>>,
}

impl Index {
    /// 建立索引。标识重复时后出现的覆盖先出现的。
    pub fn build(net: &Net) -> Self {
        let places = net
            .places
            .iter()
            .enumerate()
            .map(|(i, place)| (place.id.clone(), PlaceId(i)))
            .collect::<HashMap<_, _>>();
        let transitions = net
            .transitions
            .iter()
            .enumerate()
            .map(|(i, transition)| (transition.id.clone(), TransitionId(i)))
            .collect::<HashMap<_, _>>();

        let mut index = Self {
            places,
            transitions,
            arcs: HashMap::new(),
            ends: Vec::with_capacity(net.arcs.len()),
            transition_inputs: vec![vec![]; net.transitions.len()],
            transition_outputs: vec![vec![]; net.transitions.len()],
            place_inputs: vec![vec![]; net.places.len()],
            place_outputs: vec![vec![]; net.places.len()],
        };

        for (i, arc) in net.arcs.iter().enumerate() {
            let id = ArcId(i);
            index.arcs.insert(arc.id.clone(), id);

            let ends = match (
                index.places.get(&arc.source),
                index.transitions.get(&arc.target),
                index.transitions.get(&arc.source),
                index.places.get(&arc.target),
            ) {
                (Some(&place), Some(&transition), _, _) => Some(ArcEnds {
                    place,
                    transition,
                    direction: Direction::PlaceToTransition,
                }),
                (_, _, Some(&transition), Some(&place)) => Some(ArcEnds {
                    place,
                    transition,
                    direction: Direction::TransitionToPlace,
                }),
                _ => None,
            };

            match ends {
                Some(ArcEnds {
                    place,
                    transition,
                    direction: Direction::PlaceToTransition,
                }) => {
                    index.place_outputs[place.0].push(id);
                    index.transition_inputs[transition.0].push(id);
                }
                Some(ArcEnds {
                    place,
                    transition,
                    direction: Direction::TransitionToPlace,
                }) => {
                    index.transition_outputs[transition.0].push(id);
                    index.place_inputs[place.0].push(id);
                }
                None => {}
            }
            index.ends.push(ends);
        }

        index
    }

    /// 按标识查找库所
    pub fn place(&self, id: &str) -> Option<PlaceId> {
        self.places.get(id).copied()
    }

    /// 按标识查找变迁
    pub fn transition(&self, id: &str) -> Option<TransitionId> {
        self.transitions.get(id).copied()
    }

    /// 按标识查找弧
    pub fn arc(&self, id: &str) -> Option<ArcId> {
        self.arcs.get(id).copied()
    }

    /// 弧的两端；连接不合法的弧没有
    pub fn ends(&self, arc: ArcId) -> Option<ArcEnds> {
        self.ends.get(arc.0).copied().flatten()
    }

    /// 变迁的输入弧
    pub fn inputs(&self, transition: TransitionId) -> &[ArcId] {
        self.transition_inputs
            .get(transition.0)
            .map_or(&[][..], Vec::as_slice)
    }

    /// 变迁的输出弧
    pub fn outputs(&self, transition: TransitionId) -> &[ArcId] {
        self.transition_outputs
            .get(transition.0)
            .map_or(&[][..], Vec::as_slice)
    }

    /// 指向库所的弧
    pub fn place_inputs(&self, place: PlaceId) -> &[ArcId] {
        self.place_inputs.get(place.0).map_or(&[][..], Vec::as_slice)
    }

    /// 从库所出发的弧
    pub fn place_outputs(&self, place: PlaceId) -> &[ArcId] {
        self.place_outputs.get(place.0).map_or(&[][..], Vec::as_slice)
    }

    /// 按标识查找变迁的输入弧，未知的变迁没有弧
    pub fn arcs_into_transition(&self, id: &str) -> &[ArcId] {
        self.transition(id).map_or(&[][..], |t| self.inputs(t))
    }

    /// 按标识查找变迁的输出弧
    pub fn arcs_out_of_transition(&self, id: &str) -> &[ArcId] {
        self.transition(id).map_or(&[][..], |t| self.outputs(t))
    }

    /// 按标识查找指向库所的弧
    pub fn arcs_into_place(&self, id: &str) -> &[ArcId] {
        self.place(id).map_or(&[][..], |p| self.place_inputs(p))
    }

    /// 按标识查找从库所出发的弧
    pub fn arcs_out_of_place(&self, id: &str) -> &[ArcId] {
        self.place(id).map_or(&[][..], |p| self.place_outputs(p))
    }
}
