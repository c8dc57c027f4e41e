use anyhow::Result;
use clap::{Parser, ValueEnum};
use colorized::{Color, Colors};
use petrinet::{
    options::{Options, SelectionPolicy},
    Context,
};
use std::io::{Read, Write};

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Fire the first enabled transition
    Single,
    /// Fire a maximal set of non-conflicting transitions
    Maximal,
}

impl From<Policy> for SelectionPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Single => SelectionPolicy::Single,
            Policy::Maximal => SelectionPolicy::Maximal,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Net description in JSON, or pass "-" to read from stdin
    #[clap(short, long, value_parser)]
    file: clio::Input,

    /// Output file for the final net, or pass "-" to write to stdout
    #[clap(short, long, value_parser, default_value = "-")]
    output: clio::Output,

    /// Transition selection policy
    #[clap(long, value_enum, default_value_t = Policy::Single)]
    policy: Policy,

    /// Maximum number of steps to run
    #[clap(long)]
    max_steps: Option<usize>,

    /// Maximum number of tokens per place
    #[clap(long)]
    capacity: Option<usize>,

    /// Fire the listed transitions in order instead of running
    #[clap(long = "fire", value_name = "ID")]
    fire: Vec<String>,

    /// Trace every firing
    #[clap(long)]
    trace: bool,

    /// Print timing information
    #[clap(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let mut args = Cli::parse();

    let mut source = String::new();
    args.file.read_to_string(&mut source)?;

    let defaults = Options::default();
    let options = Options {
        selection_policy: args.policy.into(),
        max_steps: args.max_steps.unwrap_or(defaults.max_steps),
        max_tokens_per_place: args.capacity.unwrap_or(defaults.max_tokens_per_place),
        debug: args.trace,
        timing: args.timing,
        ..defaults
    };

    let context = Context::new()
        .set_options(options)
        .add_json(&args.file.path().to_string(), &source)?;

    let net = if args.fire.is_empty() {
        let (net, outcome) = context.run()?;
        let report = format!("halted after {} step(s): {}", outcome.steps, outcome.reason);
        eprintln!("{}", report.color(Colors::BrightBlackFg));
        net
    } else {
        let mut simulator = context.simulator()?;
        for id in &args.fire {
            simulator.fire(id)?;
        }
        simulator.into_net()
    };

    serde_json::to_writer_pretty(&mut args.output, &net)?;
    writeln!(args.output)?;

    Ok(())
}
