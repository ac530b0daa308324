//! Descriptions of the hardware modules handed to the HDL generator.
use itertools::Itertools;
use polyhls_ir::{
    self as ir, Direction, Expr, Printer, RETURN_REG, Scope, Stg, StmKind, SymTags, Transition,
    Type, TypeKind,
};
use polyhls_utils::{HlsResult, Id, bits_needed_for};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize),
    serde(rename_all = "lowercase")
)]
pub enum SignalKind {
    Input,
    Output,
    Register,
    Wire,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::Input => "input",
            SignalKind::Output => "output",
            SignalKind::Register => "reg",
            SignalKind::Wire => "wire",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Signal {
    pub name: String,
    pub width: u32,
    pub signed: bool,
    pub kind: SignalKind,
}

impl Signal {
    fn new(name: impl Into<String>, width: u32, kind: SignalKind) -> Self {
        Signal {
            name: name.into(),
            width,
            signed: false,
            kind,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize),
    serde(rename_all = "lowercase")
)]
pub enum InstanceKind {
    /// A module object created by `new`.
    Module,
    /// A function unit started from a state.
    Function,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Instance {
    pub name: String,
    /// Qualified name of the instantiated scope.
    pub module: String,
    pub kind: InstanceKind,
}

/// A RAM port-maker for one array symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Ram {
    pub name: String,
    pub width: u32,
    /// `None` when the length is not known statically.
    pub length: Option<u64>,
    pub rom: bool,
    /// Passed in by the caller rather than owned by the module.
    pub external: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct NextState {
    /// `None` for an unconditional or default transition.
    pub cond: Option<String>,
    pub target: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct StateInfo {
    pub name: String,
    pub stage: Option<u32>,
    pub actions: Vec<String>,
    /// Empty for the final state.
    pub next: Vec<NextState>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct StgInfo {
    pub name: String,
    pub main: bool,
    pub ii: Option<u32>,
    pub states: Vec<StateInfo>,
}

impl From<&Stg> for StgInfo {
    fn from(stg: &Stg) -> Self {
        let name_of = |i: usize| stg.states.get(i).map_or_else(String::new, |s| s.name.clone());
        let states = stg
            .states
            .iter()
            .map(|s| StateInfo {
                name: s.name.clone(),
                stage: s.stage,
                actions: s.actions.iter().map(Printer::action_to_string).collect(),
                next: match &s.next {
                    Transition::Goto(t) => vec![NextState {
                        cond: None,
                        target: name_of(*t),
                    }],
                    Transition::Branch(arms) => arms
                        .iter()
                        .map(|(c, t)| NextState {
                            cond: c.as_ref().map(Expr::to_string),
                            target: name_of(*t),
                        })
                        .collect(),
                    Transition::Finish => vec![],
                },
            })
            .collect();
        StgInfo {
            name: stg.name.to_string(),
            main: stg.is_main,
            ii: stg.ii,
            states,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize),
    serde(rename_all = "lowercase")
)]
pub enum ModuleKind {
    Function,
    Module,
}

/// Everything the HDL generator needs to emit one module.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ModuleInfo {
    pub name: String,
    pub kind: ModuleKind,
    pub interface: Vec<Signal>,
    pub signals: Vec<Signal>,
    pub instances: Vec<Instance>,
    pub rams: Vec<Ram>,
    pub stgs: Vec<StgInfo>,
}

/// Width of a value of type `typ`.
fn width_of(typ: &Type, ctx: &ir::Context) -> u32 {
    typ.width().unwrap_or(ctx.config.default_int_width)
}

/// Symbols that name neither hardware state nor a wire.
const NOT_HARDWARE: SymTags = SymTags::PARAM
    .union(SymTags::BUILTIN)
    .union(SymTags::IMPORTED)
    .union(SymTags::PREDEFINED)
    .union(SymTags::SELF)
    .union(SymTags::FIELD);

impl ModuleInfo {
    fn new(name: Id, kind: ModuleKind) -> Self {
        let mut interface = vec![
            Signal::new("clk", 1, SignalKind::Input),
            Signal::new("rst", 1, SignalKind::Input),
        ];
        let base = name.base();
        if kind == ModuleKind::Function {
            interface.extend([
                Signal::new(format!("{base}_ready"), 1, SignalKind::Input),
                Signal::new(format!("{base}_accept"), 1, SignalKind::Input),
                Signal::new(format!("{base}_valid"), 1, SignalKind::Output),
                Signal::new(format!("{base}_done"), 1, SignalKind::Output),
            ]);
        }
        ModuleInfo {
            name: name.to_string(),
            kind,
            interface,
            signals: vec![],
            instances: vec![],
            rams: vec![],
            stgs: vec![],
        }
    }

    /// Collect the locals, memories, instances and STGs of one scope.
    fn add_body(&mut self, scope: &Scope, ctx: &ir::Context) {
        for sym in scope.symbols.values() {
            if sym.typ.is_list() && !sym.is_alias() {
                self.rams.push(Ram {
                    name: sym.name.to_string(),
                    width: sym.typ.element().map_or(1, |e| width_of(e, ctx)),
                    length: sym.typ.length(),
                    rom: sym.typ.is_rom(),
                    external: sym.is_param(),
                });
                continue;
            }
            if !sym.typ.is_scalar() || sym.tags.intersects(NOT_HARDWARE) {
                continue;
            }
            let kind = if sym.is_alias() {
                SignalKind::Wire
            } else {
                SignalKind::Register
            };
            self.signals.push(Signal {
                name: sym.name.to_string(),
                width: width_of(&sym.typ, ctx),
                signed: sym.typ.is_signed(),
                kind,
            });
        }

        for (_, stm) in scope.all_stms() {
            if let StmKind::Move {
                dst,
                src: Expr::New { class, .. },
            } = &stm.kind
            {
                let is_module = ctx
                    .get_scope(*class)
                    .is_some_and(|c| c.try_borrow().is_ok_and(|c| c.is_module()));
                if is_module {
                    self.instances.push(Instance {
                        name: dst.to_string(),
                        module: class.to_string(),
                        kind: InstanceKind::Module,
                    });
                }
            }
        }

        let callees = scope
            .stgs
            .iter()
            .flat_map(|s| &s.states)
            .flat_map(|s| &s.actions)
            .filter_map(|a| match &a.kind {
                ir::ActionKind::Start { callee, .. } if ctx.has_scope(*callee) => Some(*callee),
                _ => None,
            })
            .unique();
        for callee in callees {
            self.instances.push(Instance {
                name: format!("{}_inst", callee.base()),
                module: callee.to_string(),
                kind: InstanceKind::Function,
            });
        }
        for stg in &scope.stgs {
            let width = bits_needed_for(stg.states.len() as u64) as u32;
            self.signals.push(Signal::new(
                format!("{}_state", stg.name.base()),
                width,
                SignalKind::Register,
            ));
            for c in &stg.control {
                self.signals
                    .push(Signal::new(c.to_string(), 1, SignalKind::Register));
            }
        }
        self.stgs.extend(scope.stgs.iter().map(StgInfo::from));
    }

    /// The interface of a function: one input per scalar parameter and the
    /// returned value.
    fn function(scope: &Scope, ctx: &ir::Context) -> Self {
        let mut info = ModuleInfo::new(scope.name, ModuleKind::Function);
        let base = scope.name.base();
        for p in &scope.params {
            let Some(sym) = scope.sym(p.sym) else { continue };
            if sym.typ.is_scalar() {
                info.interface.push(Signal {
                    name: format!("{base}_in_{}", sym.orig_name()),
                    width: width_of(&sym.typ, ctx),
                    signed: sym.typ.is_signed(),
                    kind: SignalKind::Input,
                });
            }
        }
        if let Some(ret) = scope.return_sym().and_then(|r| scope.sym(r)) {
            if ret.typ.is_scalar() {
                let width = width_of(&ret.typ, ctx);
                info.interface
                    .push(Signal::new(format!("{base}_out_0"), width, SignalKind::Output));
                info.signals
                    .push(Signal::new(RETURN_REG, width, SignalKind::Register));
            }
        }
        info.add_body(scope, ctx);
        info
    }

    /// A module class: its port fields form the interface, its constructor
    /// and workers provide the body.
    fn module(class: &Scope, ctx: &ir::Context) -> HlsResult<Self> {
        let mut info = ModuleInfo::new(class.name, ModuleKind::Module);
        for sym in class.symbols.values() {
            let TypeKind::Port {
                dtype, direction, ..
            } = &sym.typ.kind
            else {
                continue;
            };
            let kind = match direction {
                Direction::Input => SignalKind::Input,
                Direction::Output => SignalKind::Output,
                Direction::Any => {
                    log::debug!("{}: port {} is internal", class.name, sym.name);
                    SignalKind::Wire
                }
            };
            let mut signal = Signal::new(sym.name.to_string(), width_of(dtype, ctx), kind);
            signal.signed = dtype.is_signed();
            if kind == SignalKind::Wire {
                info.signals.push(signal);
            } else {
                info.interface.push(signal);
            }
        }
        for child in &class.children {
            let rc = ctx.scope(*child)?;
            let c = rc.borrow();
            if c.is_ctor() || c.is_worker() {
                info.add_body(&c, ctx);
            }
        }
        Ok(info)
    }

    /// Describe every compiled module of the program in definition order.
    /// Testbenches and library scopes are not hardware.
    pub fn collect(ctx: &ir::Context) -> HlsResult<Vec<ModuleInfo>> {
        let mut out = vec![];
        for name in ctx.user_scopes() {
            let rc = ctx.scope(name)?;
            let scope = rc.borrow();
            if scope.is_testbench() {
                continue;
            }
            if scope.is_module() {
                out.push(ModuleInfo::module(&scope, ctx)?);
                continue;
            }
            let in_module = scope
                .parent
                .and_then(|p| ctx.get_scope(p))
                .is_some_and(|p| p.borrow().is_module());
            if scope.is_function_like() && !scope.stgs.is_empty() && !in_module {
                out.push(ModuleInfo::function(&scope, ctx));
            }
        }
        Ok(out)
    }

    /// Number of states over all STGs.
    pub fn state_count(&self) -> usize {
        self.stgs.iter().map(|s| s.states.len()).sum()
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ModuleKind::Function => "function",
            ModuleKind::Module => "module",
        };
        writeln!(f, "{kind} {} {{", self.name)?;
        for s in self.interface.iter().chain(&self.signals) {
            let sign = if s.signed { " signed" } else { "" };
            writeln!(f, "  {} {}: {}{sign};", s.kind, s.name, s.width)?;
        }
        for r in &self.rams {
            let len = r.length.map_or_else(|| "?".to_string(), |l| l.to_string());
            let kind = if r.rom { "rom" } else { "ram" };
            let ext = if r.external { " external" } else { "" };
            writeln!(f, "  {kind} {}: {}[{len}]{ext};", r.name, r.width)?;
        }
        for i in &self.instances {
            let kind = match i.kind {
                InstanceKind::Module => "instance",
                InstanceKind::Function => "unit",
            };
            writeln!(f, "  {kind} {}: {};", i.name, i.module)?;
        }
        for stg in &self.stgs {
            write!(f, "  stg {}", stg.name)?;
            if stg.main {
                write!(f, " main")?;
            }
            if let Some(ii) = stg.ii {
                write!(f, " ii={ii}")?;
            }
            writeln!(f, " {{")?;
            for state in &stg.states {
                write!(f, "    state {}", state.name)?;
                if let Some(s) = state.stage {
                    write!(f, " stage={s}")?;
                }
                writeln!(f, " {{")?;
                for a in &state.actions {
                    writeln!(f, "      {a}")?;
                }
                if state.next.is_empty() {
                    writeln!(f, "      finish")?;
                }
                for n in &state.next {
                    match &n.cond {
                        Some(c) => writeln!(f, "      if {c} goto {}", n.target)?,
                        None if state.next.len() > 1 => {
                            writeln!(f, "      else goto {}", n.target)?
                        }
                        None => writeln!(f, "      goto {}", n.target)?,
                    }
                }
                writeln!(f, "    }}")?;
            }
            writeln!(f, "  }}")?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};
    use polyhls_opt::passes::{AliasVarDetector, Scheduler, StgBuilder};
    use polyhls_opt::traversal::Visitor;

    const SRC: &str = r#"
scope @top [namespace] {}
scope @top.add [function] {
  param a: int32;
  param b: int32;
  param m: list<int8>[4];
  sym t: int32;
  sym @t#0: int32 [temp];
  sym @return: int32 [return];
  block b0 entry exit {
    @t#0 = (a + b);
    t = m[0];
    @return = (@t#0 + t);
    ret @return;
  }
}
scope @top.main [function, testbench] {
  block b0 entry exit {
    ret None;
  }
}
"#;

    fn compile() -> ir::Context {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        AliasVarDetector::do_pass_default(&mut ctx).unwrap();
        Scheduler::do_pass_default(&mut ctx).unwrap();
        StgBuilder::do_pass_default(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn function_module() {
        let ctx = compile();
        let modules = ModuleInfo::collect(&ctx).unwrap();
        assert_eq!(modules.len(), 1);
        let m = &modules[0];
        assert_eq!(m.name, "@top.add");
        assert_eq!(m.kind, ModuleKind::Function);

        let names: Vec<_> = m.interface.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "clk",
                "rst",
                "add_ready",
                "add_accept",
                "add_valid",
                "add_done",
                "add_in_a",
                "add_in_b",
                "add_out_0"
            ]
        );
        let kind_of = |n: &str| m.signals.iter().find(|s| s.name == n).map(|s| s.kind);
        assert_eq!(kind_of("@t#0"), Some(SignalKind::Wire));
        assert_eq!(kind_of("t"), Some(SignalKind::Register));
        assert_eq!(kind_of(RETURN_REG), Some(SignalKind::Register));
        assert_eq!(kind_of("a"), None);
        assert_eq!(kind_of("add_state"), Some(SignalKind::Register));

        assert_eq!(
            m.rams,
            vec![Ram {
                name: "m".to_string(),
                width: 8,
                length: Some(4),
                rom: false,
                external: true,
            }]
        );
        assert_eq!(m.stgs.len(), 1);
        assert!(m.stgs[0].main);
        let last = m.stgs[0].states.last().unwrap();
        assert_eq!(last.actions, vec!["done".to_string()]);
        assert!(last.next.is_empty());
    }

    #[test]
    fn text_form() {
        let ctx = compile();
        let modules = ModuleInfo::collect(&ctx).unwrap();
        let text = modules[0].to_string();
        assert!(text.starts_with("function @top.add {\n  input clk: 1;\n"));
        assert!(text.contains("  ram m: 8[4] external;\n"));
        assert!(text.contains("  stg @top.add main {\n"));
        assert!(text.contains("      finish\n"));
    }
}
