//! State transition graphs: the scheduled finite state machines handed to
//! the HDL generator.
use crate::{BlockIdx, Expr};
use polyhls_utils::Id;

/// Register holding the value returned by a scope.
pub const RETURN_REG: &str = "return_reg";

#[derive(Clone, Debug, PartialEq)]
pub enum ActionKind {
    /// `dst <= src` when `register`, a continuous `dst = src` otherwise.
    Assign { dst: Expr, src: Expr, register: bool },
    /// A call or system call evaluated for its effect.
    Eval(Expr),
    MemRead { dst: Expr, mem: Expr, offset: Expr },
    MemWrite { mem: Expr, offset: Expr, value: Expr },
    PortRead { dst: Option<Expr>, port: Expr },
    PortWrite { port: Expr, value: Expr },
    /// Start a sub-module or a called function unit.
    Start { callee: Id, args: Vec<Expr>, dst: Option<Expr> },
    /// Deassert busy and assert done.
    Done,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    /// Optional enable condition, from `CMOVE`/`CEXPR` or a pipeline stage.
    pub guard: Option<Expr>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Action { kind, guard: None }
    }

    pub fn guarded(kind: ActionKind, guard: Option<Expr>) -> Self {
        Action { kind, guard }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Goto(usize),
    /// Case over conditions; the first true arm wins. A `None` condition is
    /// the default arm.
    Branch(Vec<(Option<Expr>, usize)>),
    /// Stay in the final state.
    Finish,
}

impl Transition {
    pub fn targets(&self) -> Vec<usize> {
        match self {
            Transition::Goto(t) => vec![*t],
            Transition::Branch(arms) => arms.iter().map(|(_, t)| *t).collect(),
            Transition::Finish => vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct State {
    pub name: String,
    /// Block the state was generated from.
    pub block: Option<BlockIdx>,
    /// Cycle of the state relative to the start of its block.
    pub step: u32,
    /// Pipeline stage, for states of a pipelined loop.
    pub stage: Option<u32>,
    pub actions: Vec<Action>,
    pub next: Transition,
}

impl State {
    pub fn new(name: String, block: Option<BlockIdx>, step: u32) -> Self {
        State {
            name,
            block,
            step,
            stage: None,
            actions: vec![],
            next: Transition::Finish,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stg {
    pub name: Id,
    /// The main STG of a scope; others belong to pipelined loops.
    pub is_main: bool,
    /// Initiation interval of a pipelined STG.
    pub ii: Option<u32>,
    /// One-bit registers driven by the graph besides its state register.
    pub control: Vec<Id>,
    pub states: Vec<State>,
}

impl Stg {
    pub fn new(name: Id, is_main: bool) -> Self {
        Stg {
            name,
            is_main,
            ii: None,
            control: vec![],
            states: vec![],
        }
    }

    pub fn add_state(&mut self, state: State) -> usize {
        self.states.push(state);
        self.states.len() - 1
    }

    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s.name == name)
    }

    /// The state ending the machine, if any.
    pub fn finish_state(&self) -> Option<usize> {
        self.states
            .iter()
            .position(|s| matches!(s.next, Transition::Finish))
    }
}
