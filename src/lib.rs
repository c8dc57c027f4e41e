//! An execution engine for place/transition and algebraic Petri nets.
//!
//! Nets are read from a loose JSON description ([`net::normalize`]); guards,
//! arc bindings and actions are written in a small expression language
//! ([`frontend`]) and compiled once into a [`runtime::Program`]. The
//! [`runtime::Simulator`] then searches bindings and fires transitions step by
//! step.

#![deny(missing_docs)]

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub mod frontend;
pub mod net;
pub mod options;
pub mod runtime;
pub(crate) mod utils;
pub mod value;

use anyhow::{Context as _, Result};
use net::Net;
use options::Options;
use runtime::{CancelToken, RunOutcome, Simulator};

/// 模拟上下文
#[derive(Default)]
pub struct Context {
    net: Option<Net>,
    options: Options,
}

impl Context {
    /// 创建一个新的模拟上下文。
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置运行时选项。
    pub fn set_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// 读取 JSON 网描述。
    pub fn add_json(mut self, filename: &str, source: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(source)
            .with_context(|| format!("{} is not a valid net description", filename))?;
        self.net = Some(net::normalize(&json));
        Ok(self)
    }

    /// 直接使用构造好的网。
    pub fn add_net(mut self, net: Net) -> Self {
        self.net = Some(net);
        self
    }

    /// 编译并创建模拟器。
    pub fn simulator(self) -> Result<Simulator> {
        let Some(net) = self.net else {
            anyhow::bail!("no net was added");
        };
        match Simulator::new(net, self.options) {
            Ok(simulator) => Ok(simulator),
            Err(e) => anyhow::bail!("{}", e.to_snippet()),
        }
    }

    /// 运行到停机，返回最终的网。
    pub fn run(self) -> Result<(Net, RunOutcome)> {
        let mut simulator = self.simulator()?;
        let outcome = simulator.run(&CancelToken::new());
        Ok((simulator.into_net(), outcome))
    }
}
