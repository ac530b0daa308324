//! Implements a formatter for the in-memory representation of scopes.
//! The printed form is the textual IR accepted by the frontend.
use crate::{
    Block, BlockIdx, Context, Expr, JumpKind, Length, Scope, Stm, StmKind, Stg, Transition, Type,
    TypeKind, Action, ActionKind,
};
use itertools::Itertools;
use std::fmt::{self, Display};
use std::io;

/// Printer for the IR.
pub struct Printer;

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr], kwargs: &[(polyhls_utils::Id, Expr)]) -> fmt::Result {
    let pos = args.iter().map(|a| a.to_string());
    let kw = kwargs.iter().map(|(k, v)| format!("{k}={v}"));
    write!(f, "{}", pos.chain(kw).join(", "))
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Unop(op, e) => write!(f, "({op}{e})"),
            Expr::Binop(op, l, r) => write!(f, "({l} {op} {r})"),
            Expr::Relop(op, l, r) => write!(f, "({l} {op} {r})"),
            Expr::Condop(c, l, r) => write!(f, "({c} ? {l} : {r})"),
            Expr::Polyop(op, vs) => write!(f, "poly{op}({})", vs.iter().join(", ")),
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Temp(n) => write!(f, "{n}"),
            Expr::Attr(e, a) => write!(f, "{e}.{a}"),
            Expr::Mref(m, o) => write!(f, "{m}[{o}]"),
            Expr::Mstore(m, o, v) => write!(f, "mstore({m}, {o}, {v})"),
            Expr::Array {
                items,
                repeat,
                mutable,
            } => {
                let kind = if *mutable { "list" } else { "tuple" };
                write!(f, "{kind}[{}]", items.iter().join(", "))?;
                if repeat.as_int() != Some(1) {
                    write!(f, " * {repeat}")?;
                }
                Ok(())
            }
            Expr::Call { func, args, kwargs } => {
                write!(f, "{func}(")?;
                write_args(f, args, kwargs)?;
                write!(f, ")")
            }
            Expr::Syscall { name, args, kwargs } => {
                write!(f, "syscall {name}(")?;
                write_args(f, args, kwargs)?;
                write!(f, ")")
            }
            Expr::New {
                class,
                args,
                kwargs,
            } => {
                write!(f, "new {class}(")?;
                write_args(f, args, kwargs)?;
                write!(f, ")")
            }
        }
    }
}

impl Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Any => write!(f, "?"),
            Length::Const(n) => write!(f, "{n}"),
            Length::Expr(e) => write!(f, "{e}"),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Undef => write!(f, "undef")?,
            TypeKind::Int {
                width,
                signed: true,
            } => write!(f, "int{width}")?,
            TypeKind::Int {
                width,
                signed: false,
            } => write!(f, "uint{width}")?,
            TypeKind::Bool => write!(f, "bool")?,
            TypeKind::Str => write!(f, "str")?,
            TypeKind::None => write!(f, "none")?,
            TypeKind::Generic => write!(f, "generic")?,
            TypeKind::List { elm, length, ro } => {
                let kind = if *ro { "rom" } else { "list" };
                write!(f, "{kind}<{elm}>[{length}]")?
            }
            TypeKind::Tuple { elm, length } => write!(f, "tuple<{elm}>[{length}]")?,
            TypeKind::Object { scope } => write!(f, "object<{scope}>")?,
            TypeKind::Class { scope, typeargs } => {
                write!(f, "class<{scope}")?;
                for t in typeargs {
                    write!(f, ", {t}")?;
                }
                write!(f, ">")?
            }
            TypeKind::Namespace { scope } => write!(f, "namespace<{scope}>")?,
            TypeKind::Function { scope, ret, params } => {
                write!(f, "function<{scope}>")?;
                if !params.is_empty() || !ret.is_undef() {
                    write!(f, "({}) -> {ret}", params.iter().join(", "))?;
                }
            }
            TypeKind::Port {
                scope,
                dtype,
                direction,
                init,
                assigned,
                ..
            } => {
                write!(f, "port<{scope}, {dtype}, {direction}")?;
                if *assigned {
                    write!(f, ", frozen")?;
                }
                if let Some(i) = init {
                    write!(f, ", init={i}")?;
                }
                write!(f, ">")?
            }
            TypeKind::Expr(e) => write!(f, "expr({e})")?,
        }
        if self.explicit {
            write!(f, "!")?;
        }
        Ok(())
    }
}

impl Display for Stm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StmKind::Expr(e) => write!(f, "{e}"),
            StmKind::Move { dst, src } => write!(f, "{dst} = {src}"),
            StmKind::CExpr { cond, exp } => write!(f, "cexpr {cond} ? {exp}"),
            StmKind::CMove { cond, dst, src } => write!(f, "cmove {cond} ? {dst} = {src}"),
            StmKind::CJump { cond, t, f: fb } => write!(f, "cjump {cond} ? {t} : {fb}"),
            StmKind::MCJump { conds, targets } => write!(
                f,
                "mcjump({})",
                conds
                    .iter()
                    .zip(targets)
                    .map(|(c, t)| format!("{c} -> {t}"))
                    .join(", ")
            ),
            StmKind::Jump { target, kind } => match kind {
                JumpKind::Plain => write!(f, "jump {target}"),
                k => write!(f, "jump {target} {k}"),
            },
            StmKind::Ret(e) => write!(f, "ret {e}"),
            StmKind::Phi(phi) => {
                let args = if phi.ps.len() == phi.args.len() {
                    phi.args
                        .iter()
                        .zip(&phi.ps)
                        .map(|(a, p)| format!("{a} ? {p}"))
                        .join(", ")
                } else {
                    phi.args.iter().join(", ")
                };
                write!(f, "{} = {}({args})", phi.var, phi.kind)
            }
        }
    }
}

impl Printer {
    /// Format a statement with its line prefix.
    pub fn stm_to_str(stm: &Stm) -> String {
        if stm.loc.is_known() {
            format!("{}: {stm};", stm.loc.line())
        } else {
            format!("{stm};")
        }
    }

    fn write_block<F: io::Write>(
        scope: &Scope,
        idx: BlockIdx,
        blk: &Block,
        f: &mut F,
    ) -> io::Result<()> {
        write!(f, "  block {idx}")?;
        if scope.entry == Some(idx) {
            write!(f, " entry")?;
        }
        if scope.exit == Some(idx) {
            write!(f, " exit")?;
        }
        write!(f, " preds({})", blk.preds.iter().join(", "))?;
        if blk.synth_params != scope.synth_params {
            write!(f, " synth({})", blk.synth_params)?;
        }
        writeln!(f, " {{")?;
        for stm in &blk.stms {
            writeln!(f, "    {}", Self::stm_to_str(stm))?;
        }
        writeln!(f, "  }}")
    }

    /// Format a scope in the textual IR.
    pub fn write_scope<F: io::Write>(scope: &Scope, f: &mut F) -> io::Result<()> {
        write!(f, "scope {}", scope.name)?;
        if !scope.tags.is_empty() {
            write!(f, " [{}]", scope.tags.names().join(", "))?;
        }
        if !scope.bases.is_empty() {
            write!(f, " bases({})", scope.bases.iter().join(", "))?;
        }
        writeln!(f, " {{")?;
        for p in &scope.params {
            let typ = scope.sym(p.sym).map(|s| s.typ.clone()).unwrap_or_default();
            write!(f, "  param {}: {typ}", p.sym)?;
            if let Some(d) = &p.default {
                write!(f, " = {d}")?;
            }
            writeln!(f, ";")?;
        }
        if !scope.return_type.is_undef() {
            writeln!(f, "  return: {};", scope.return_type)?;
        }
        for sym in scope.symbols.values().filter(|s| !s.is_param()) {
            write!(f, "  sym {}: {}", sym.name, sym.typ)?;
            if !sym.tags.is_empty() {
                write!(f, " [{}]", sym.tags.names().join(", "))?;
            }
            writeln!(f, ";")?;
        }
        writeln!(f, "  synth {};", scope.synth_params)?;
        for (idx, blk) in scope.blocks.iter().filter(|(_, b)| !b.removed) {
            Self::write_block(scope, idx, blk, f)?;
        }
        writeln!(f, "}}")
    }

    /// Format every user scope of the context.
    pub fn write_context<F: io::Write>(ctx: &Context, f: &mut F) -> io::Result<()> {
        for name in ctx.user_scopes() {
            if let Some(scope) = ctx.get_scope(name) {
                Self::write_scope(&scope.borrow(), f)?;
                writeln!(f)?;
            }
        }
        Ok(())
    }

    pub fn scope_to_string(scope: &Scope) -> String {
        let mut buf = vec![];
        // Writing into a vector cannot fail.
        let _ = Self::write_scope(scope, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Format a state transition graph for debugging and the text backend.
    /// One action of a state, e.g. `if c: x <= (a + 1)`.
    pub fn action_to_string(act: &Action) -> String {
        let body = match &act.kind {
            ActionKind::Assign {
                dst,
                src,
                register: true,
            } => format!("{dst} <= {src}"),
            ActionKind::Assign { dst, src, .. } => format!("{dst} := {src}"),
            ActionKind::Eval(e) => format!("eval {e}"),
            ActionKind::MemRead { dst, mem, offset } => format!("{dst} <= {mem}[{offset}]"),
            ActionKind::MemWrite { mem, offset, value } => format!("{mem}[{offset}] <= {value}"),
            ActionKind::PortRead { dst: Some(d), port } => format!("{d} := {port}.rd()"),
            ActionKind::PortRead { dst: None, port } => format!("{port}.rd()"),
            ActionKind::PortWrite { port, value } => format!("{port}.wr({value})"),
            ActionKind::Start { callee, args, dst } => {
                let call = format!("start {callee}({})", args.iter().join(", "));
                match dst {
                    Some(d) => format!("{d} <= {call}"),
                    None => call,
                }
            }
            ActionKind::Done => "done".to_string(),
        };
        match &act.guard {
            Some(g) => format!("if {g}: {body}"),
            None => body,
        }
    }

    pub fn write_stg<F: io::Write>(stg: &Stg, f: &mut F) -> io::Result<()> {
        write!(f, "stg {}", stg.name)?;
        if stg.is_main {
            write!(f, " main")?;
        }
        if let Some(ii) = stg.ii {
            write!(f, " ii={ii}")?;
        }
        if !stg.control.is_empty() {
            write!(f, " control({})", stg.control.iter().join(", "))?;
        }
        writeln!(f, " {{")?;
        for state in &stg.states {
            write!(f, "  state {}", state.name)?;
            if let Some(s) = state.stage {
                write!(f, " stage={s}")?;
            }
            writeln!(f, " {{")?;
            for act in &state.actions {
                writeln!(f, "    {}", Printer::action_to_string(act))?;
            }
            match &state.next {
                Transition::Goto(t) => writeln!(f, "    goto {}", stg.states[*t].name)?,
                Transition::Branch(arms) => {
                    for (c, t) in arms {
                        match c {
                            Some(c) => writeln!(f, "    if {c} goto {}", stg.states[*t].name)?,
                            None => writeln!(f, "    else goto {}", stg.states[*t].name)?,
                        }
                    }
                }
                Transition::Finish => writeln!(f, "    finish")?,
            }
            writeln!(f, "  }}")?;
        }
        writeln!(f, "}}")
    }
}
