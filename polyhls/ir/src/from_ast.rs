//! Lowering of the parsed textual IR into scopes.
//!
//! Lowering runs in phases: every scope is declared first so that bodies
//! can refer to scopes defined later in the file; bodies are lowered next;
//! finally every referenced name is resolved.
use crate::{
    BlockIdx, Config, Const, Context, Expr, JumpKind, Length, Param, Phi, PhiKind, Scope,
    ScopeTags, StmKind, SymTags, Type, TypeKind, builtins, cfg,
};
use polyhls_frontend::ast;
use polyhls_utils::{Error, ErrorCode, HlsResult, Id, Loc};
use std::collections::HashMap;
use std::str::FromStr;

/// Construct the IR context from a parsed program.
pub fn ast_to_ir(prog: ast::Program, config: Config, file: Option<&str>) -> HlsResult<Context> {
    let mut ctx = Context::new(config);
    ctx.file = file.map(str::to_string);
    let mut defs = prog.scopes;
    // Parents before children.
    defs.sort_by_key(|d| d.name.as_ref().matches('.').count());

    for def in &defs {
        declare_scope(&mut ctx, def)?;
    }
    for def in &defs {
        declare_in_parent(&mut ctx, def.name)?;
    }
    for def in defs {
        let name = def.name;
        let rc = ctx.scope(name)?;
        let mut scope = rc.borrow_mut();
        Lowerer {
            ctx: &ctx,
            file,
            scope_name: name,
        }
        .lower_body(&mut scope, def)?;
    }
    for name in ctx.user_scopes() {
        let rc = ctx.scope(name)?;
        let mut scope = rc.borrow_mut();
        resolve_names(&ctx, &mut scope)?;
    }
    Ok(ctx)
}

fn declare_scope(ctx: &mut Context, def: &ast::ScopeDef) -> HlsResult<()> {
    if ctx.has_scope(def.name) {
        return Err(Error::already_bound(def.name, "a scope"));
    }
    if let Some(parent) = def.name.parent() {
        if !ctx.has_scope(parent) {
            return Err(Error::undefined(parent, "parent scope"));
        }
    }
    let mut tags = ScopeTags::empty();
    for t in &def.tags {
        tags |= ScopeTags::from_tag(t.as_ref())?;
    }
    let mut scope = Scope::new(def.name, tags);
    scope.bases = def.bases.clone();
    for (k, v) in &def.synth {
        scope.synth_params.set(k.as_ref(), v)?;
    }
    ctx.add_scope(scope);
    Ok(())
}

/// Make a child scope visible by name from its parent.
fn declare_in_parent(ctx: &mut Context, name: Id) -> HlsResult<()> {
    let Some(parent) = name.parent() else {
        return Ok(());
    };
    let rc = ctx.scope(name)?;
    let child = rc.borrow();
    let typ = if child.is_class() {
        Type::class(name)
    } else if child.is_namespace() {
        Type::namespace(name)
    } else {
        Type::function(name)
    };
    let prc = ctx.scope(parent)?;
    let mut p = prc.borrow_mut();
    let base = Id::new(name.base());
    if !p.has_sym(base) {
        p.add_sym(base, typ, SymTags::empty());
    }
    Ok(())
}

struct Lowerer<'a> {
    ctx: &'a Context,
    file: Option<&'a str>,
    scope_name: Id,
}

impl Lowerer<'_> {
    fn loc(&self, line: Option<u32>) -> Loc {
        match line {
            Some(l) => Loc::new(self.file.unwrap_or("<input>"), l),
            None => Loc::unknown(),
        }
    }

    fn lower_body(&self, scope: &mut Scope, def: ast::ScopeDef) -> HlsResult<()> {
        for p in def.params {
            let typ = self.typ(&p.typ)?;
            scope.add_sym(p.name, typ, SymTags::PARAM);
            let default = p.default.as_ref().map(|d| self.expr(d, None)).transpose()?;
            scope.params.push(Param {
                sym: p.name,
                default,
            });
        }
        if let Some(ret) = &def.ret {
            scope.return_type = self.typ(ret)?;
        }
        for s in def.syms {
            let typ = self.typ(&s.typ)?;
            let mut tags = SymTags::empty();
            for t in &s.tags {
                tags |= SymTags::from_tag(t.as_ref())?;
            }
            if let Some(existing) = scope.sym_mut(s.name) {
                // Declared implicitly for a child scope; the explicit
                // declaration wins.
                existing.typ = typ;
                existing.tags = tags;
            } else {
                scope.add_sym(s.name, typ, tags);
            }
        }
        self.lower_blocks(scope, def.blocks)
    }

    fn lower_blocks(&self, scope: &mut Scope, blocks: Vec<ast::BlockDef>) -> HlsResult<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let mut labels: HashMap<Id, BlockIdx> = HashMap::new();
        for b in &blocks {
            let idx = scope.new_block();
            if labels.insert(b.label, idx).is_some() {
                return Err(Error::already_bound(b.label, "a block"));
            }
        }
        let label = |l: Id| -> HlsResult<BlockIdx> {
            labels
                .get(&l)
                .copied()
                .ok_or_else(|| Error::undefined(l, "block"))
        };
        let mut declared_preds = vec![];
        for b in blocks {
            let idx = label(b.label)?;
            if b.entry {
                scope.entry = Some(idx);
            }
            if b.exit {
                scope.exit = Some(idx);
            }
            let mut synth = scope.synth_params;
            for (k, v) in &b.synth {
                synth.set(k.as_ref(), v)?;
            }
            scope.block_mut(idx).synth_params = synth;
            let preds = b
                .preds
                .iter()
                .map(|p| label(*p))
                .collect::<HlsResult<Vec<_>>>()?;
            declared_preds.push((idx, preds));
            for s in b.stms {
                let loc = self.loc(s.line);
                let kind = self.stm(s.kind, loc, &label)?;
                let stm = scope.mk_stm(kind, loc);
                scope.block_mut(idx).stms.push(stm);
            }
        }
        if scope.entry.is_none() {
            scope.entry = Some(BlockIdx(0));
        }
        if scope.exit.is_none() {
            scope.exit = scope.live_blocks().into_iter().rev().find(|b| {
                scope
                    .block(*b)
                    .stms
                    .iter()
                    .any(|s| matches!(s.kind, StmKind::Ret(_)))
            });
        }
        self.connect_edges(scope, declared_preds)?;
        cfg::mark_back_edges(scope);
        Ok(())
    }

    /// Derive edges from jump statements. Declared predecessor lists fix
    /// the order of predecessors; undeclared ones are appended.
    fn connect_edges(
        &self,
        scope: &mut Scope,
        declared: Vec<(BlockIdx, Vec<BlockIdx>)>,
    ) -> HlsResult<()> {
        let mut edge_preds: HashMap<BlockIdx, Vec<BlockIdx>> = HashMap::new();
        for idx in scope.live_blocks() {
            let targets = scope.block(idx).terminator().map(|t| t.targets()).unwrap_or_default();
            for t in targets {
                let blk = scope.block_mut(idx);
                if !blk.succs.contains(&t) {
                    blk.succs.push(t);
                    edge_preds.entry(t).or_default().push(idx);
                }
            }
        }
        for (idx, preds) in declared {
            let actual = edge_preds.remove(&idx).unwrap_or_default();
            for p in &preds {
                if !actual.contains(p) {
                    return Err(Error::malformed(format!(
                        "`{p}' is declared as a predecessor of `{idx}' in `{}' but does not jump to it",
                        self.scope_name
                    )));
                }
            }
            let extra: Vec<_> = actual.into_iter().filter(|p| !preds.contains(p)).collect();
            let mut all = preds;
            all.extend(extra);
            let blk = scope.block_mut(idx);
            for stm in &blk.stms {
                if let Some(phi) = stm.as_phi() {
                    if phi.kind != PhiKind::UPhi && phi.args.len() != all.len() {
                        return Err(Error::malformed(format!(
                            "phi for `{}' in `{idx}' has {} arguments but the block has {} predecessors",
                            phi.var,
                            phi.args.len(),
                            all.len()
                        ))
                        .with_loc(stm.loc));
                    }
                }
            }
            blk.preds = all;
        }
        Ok(())
    }

    fn stm(
        &self,
        kind: ast::StmKindDef,
        loc: Loc,
        label: &dyn Fn(Id) -> HlsResult<BlockIdx>,
    ) -> HlsResult<StmKind> {
        use ast::StmKindDef as S;
        let e = |x: &ast::ExprDef| self.expr(x, Some(loc));
        Ok(match kind {
            S::Expr(x) => StmKind::Expr(e(&x)?),
            S::Move(d, s) => StmKind::Move {
                dst: e(&d)?,
                src: e(&s)?,
            },
            S::CExpr(c, x) => StmKind::CExpr {
                cond: e(&c)?,
                exp: e(&x)?,
            },
            S::CMove(c, d, s) => StmKind::CMove {
                cond: e(&c)?,
                dst: e(&d)?,
                src: e(&s)?,
            },
            S::CJump(c, t, f) => StmKind::CJump {
                cond: e(&c)?,
                t: label(t)?,
                f: label(f)?,
            },
            S::MCJump(arms) => {
                let mut conds = vec![];
                let mut targets = vec![];
                for (c, t) in arms {
                    conds.push(e(&c)?);
                    targets.push(label(t)?);
                }
                StmKind::MCJump { conds, targets }
            }
            S::Jump(t, k) => StmKind::Jump {
                target: label(t)?,
                kind: match k {
                    Some(k) => JumpKind::from_str(&k)
                        .map_err(|_| Error::undefined(Id::new(&k), "jump kind"))?,
                    None => JumpKind::Plain,
                },
            },
            S::Ret(x) => StmKind::Ret(e(&x)?),
            S::Phi { kind, var, args } => {
                let kind = PhiKind::from_str(&kind)
                    .map_err(|_| Error::undefined(Id::new(&kind), "phi kind"))?;
                let with_ps = !args.is_empty() && args.iter().all(|(_, p)| p.is_some());
                let mut phi = Phi::new(kind, e(&var)?, vec![]);
                for (a, p) in args {
                    phi.args.push(e(&a)?);
                    if let (true, Some(p)) = (with_ps, p) {
                        phi.ps.push(e(&p)?);
                    }
                }
                StmKind::Phi(phi)
            }
        })
    }

    fn exprs(&self, es: &[ast::ExprDef], loc: Option<Loc>) -> HlsResult<Vec<Expr>> {
        es.iter().map(|e| self.expr(e, loc)).collect()
    }

    fn kwargs(&self, kws: &[(Id, ast::ExprDef)], loc: Option<Loc>) -> HlsResult<Vec<(Id, Expr)>> {
        kws.iter()
            .map(|(k, v)| Ok((*k, self.expr(v, loc)?)))
            .collect()
    }

    fn expr(&self, e: &ast::ExprDef, loc: Option<Loc>) -> HlsResult<Expr> {
        use crate::{BinOp, RelOp, UnOp};
        use ast::ExprDef as E;
        let loc_ = loc.unwrap_or_default();
        let b = |x: &ast::ExprDef| self.expr(x, loc).map(Box::new);
        Ok(match e {
            E::Unop(op, x) => {
                let op = UnOp::from_str(op).map_err(|_| {
                    Error::fail(loc_, ErrorCode::UnsupportedBinaryOperator, &[op])
                })?;
                Expr::Unop(op, b(x)?)
            }
            E::Binop(op, l, r) => {
                if let Ok(bop) = BinOp::from_str(op) {
                    Expr::Binop(bop, b(l)?, b(r)?)
                } else if let Ok(rop) = RelOp::from_str(op) {
                    Expr::Relop(rop, b(l)?, b(r)?)
                } else {
                    return Err(Error::fail(loc_, ErrorCode::UnsupportedBinaryOperator, &[op]));
                }
            }
            E::Condop(c, l, r) => Expr::Condop(b(c)?, b(l)?, b(r)?),
            E::Polyop(op, vs) => {
                let bop = BinOp::from_str(op).map_err(|_| {
                    Error::fail(loc_, ErrorCode::UnsupportedBinaryOperator, &[op])
                })?;
                Expr::Polyop(bop, self.exprs(vs, loc)?)
            }
            E::Int(v) => Expr::Const(Const::Int(*v)),
            E::Bool(v) => Expr::Const(Const::Bool(*v)),
            E::Str(s) => Expr::Const(Const::Str(s.clone())),
            E::None => Expr::Const(Const::None),
            E::Name(n) => Expr::Temp(*n),
            E::Attr(x, a) => Expr::Attr(b(x)?, *a),
            E::Subscript(m, o) => Expr::Mref(b(m)?, b(o)?),
            E::Mstore(m, o, v) => Expr::Mstore(b(m)?, b(o)?, b(v)?),
            E::Array {
                items,
                repeat,
                mutable,
            } => Expr::Array {
                items: self.exprs(items, loc)?,
                repeat: match repeat {
                    Some(r) => b(r)?,
                    None => Box::new(Expr::int(1)),
                },
                mutable: *mutable,
            },
            E::Call { func, args, kwargs } => Expr::Call {
                func: b(func)?,
                args: self.exprs(args, loc)?,
                kwargs: self.kwargs(kwargs, loc)?,
            },
            E::Syscall { name, args, kwargs } => {
                if !builtins::is_syscall(*name) {
                    return Err(Error::undefined(*name, "system call").with_loc(loc_));
                }
                Expr::Syscall {
                    name: *name,
                    args: self.exprs(args, loc)?,
                    kwargs: self.kwargs(kwargs, loc)?,
                }
            }
            E::New {
                class,
                args,
                kwargs,
            } => Expr::New {
                class: self.resolve_scope(*class).with_loc_err(loc_)?,
                args: self.exprs(args, loc)?,
                kwargs: self.kwargs(kwargs, loc)?,
            },
        })
    }

    /// Resolve a scope name written relative to the current scope or any
    /// of its ancestors.
    fn resolve_scope(&self, name: Id) -> HlsResult<Id> {
        if self.ctx.has_scope(name) {
            return Ok(name);
        }
        let mut cur = Some(self.scope_name);
        while let Some(c) = cur {
            let cand = c.child(name);
            if self.ctx.has_scope(cand) {
                return Ok(cand);
            }
            cur = c.parent();
        }
        Err(Error::undefined(name, "class"))
    }

    fn typ(&self, t: &ast::TypeDef) -> HlsResult<Type> {
        use ast::TypeKindDef as T;
        let kind = match &t.kind {
            T::Int(w) => TypeKind::Int {
                width: *w,
                signed: true,
            },
            T::UInt(w) => TypeKind::Int {
                width: *w,
                signed: false,
            },
            T::Bool => TypeKind::Bool,
            T::Str => TypeKind::Str,
            T::None => TypeKind::None,
            T::Undef => TypeKind::Undef,
            T::Generic => TypeKind::Generic,
            T::List { elm, len, ro } => TypeKind::List {
                elm: Box::new(self.typ(elm)?),
                length: match len {
                    ast::LengthDef::Any => Length::Any,
                    ast::LengthDef::Num(n) => Length::Const(*n),
                    ast::LengthDef::Expr(e) => Length::Expr(Box::new(self.expr(e, None)?)),
                },
                ro: *ro,
            },
            T::Tuple { elm, len } => TypeKind::Tuple {
                elm: Box::new(self.typ(elm)?),
                length: *len,
            },
            T::Object(s) => TypeKind::Object {
                scope: self.resolve_scope(*s)?,
            },
            T::Class(s, args) => TypeKind::Class {
                scope: self.resolve_scope(*s)?,
                typeargs: args.iter().map(|a| self.typ(a)).collect::<HlsResult<_>>()?,
            },
            T::Namespace(s) => TypeKind::Namespace {
                scope: self.resolve_scope(*s)?,
            },
            T::Function { scope, sig } => {
                let (params, ret) = match sig {
                    Some((ps, r)) => (
                        ps.iter().map(|p| self.typ(p)).collect::<HlsResult<_>>()?,
                        self.typ(r)?,
                    ),
                    None => (vec![], Type::undef()),
                };
                TypeKind::Function {
                    scope: self.resolve_scope(*scope)?,
                    ret: Box::new(ret),
                    params,
                }
            }
            T::Port {
                class,
                dtype,
                direction,
                frozen,
                init,
            } => TypeKind::Port {
                scope: self.resolve_scope(*class)?,
                dtype: Box::new(self.typ(dtype)?),
                direction: direction
                    .as_ref()
                    .parse()
                    .map_err(|_| Error::undefined(*direction, "port direction"))?,
                init: *init,
                assigned: *frozen,
                root: None,
            },
            T::Expr(e) => TypeKind::Expr(Box::new(self.expr(e, None)?)),
        };
        Ok(Type {
            kind,
            explicit: t.explicit,
        })
    }
}

trait WithLocErr<T> {
    fn with_loc_err(self, loc: Loc) -> HlsResult<T>;
}

impl<T> WithLocErr<T> for HlsResult<T> {
    fn with_loc_err(self, loc: Loc) -> HlsResult<T> {
        self.map_err(|e| e.with_loc(loc))
    }
}

/// Check that every name read or written in the scope resolves. Names that
/// are only assigned locally are declared on the fly.
fn resolve_names(ctx: &Context, scope: &mut Scope) -> HlsResult<()> {
    let mut undeclared = vec![];
    for (_, stm) in scope.all_stms() {
        if let Some(Expr::Temp(d)) = stm.dst() {
            if ctx.lookup_sym(scope, *d).is_none() && !undeclared.contains(d) {
                undeclared.push(*d);
            }
        }
    }
    for d in undeclared {
        let tags = if d.as_ref().starts_with("@t") {
            SymTags::TEMP
        } else {
            SymTags::empty()
        };
        scope.add_sym(d, Type::undef(), tags);
    }
    for (_, stm) in scope.all_stms() {
        for q in stm.use_qsyms() {
            if ctx.lookup_sym(scope, q[0]).is_none() {
                return Err(Error::fail(stm.loc, ErrorCode::ReferencedBeforeAssign, &[q[0]]));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;

    const SRC: &str = r#"
scope @top [namespace] {
}
scope @top.f [function, returnable] {
  param a: int32!;
  return: int32;
  sym @return: int32 [return];
  block b1 entry {
    1: x = (a + 1);
    2: cjump (x > 0) ? b2 : b3;
  }
  block b2 {
    jump b4;
  }
  block b3 {
    x = 0;
    jump b4;
  }
  block b4 exit preds(b3, b2) {
    y = phi(x, x);
    @return = y;
    ret @return;
  }
}
"#;

    #[test]
    fn lowers_blocks_and_edges() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let ctx = ast_to_ir(prog, Config::default(), Some("t.py")).unwrap();
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        let f = f.borrow();
        assert_eq!(f.entry, Some(BlockIdx(0)));
        assert_eq!(f.exit, Some(BlockIdx(3)));
        assert_eq!(f.block(BlockIdx(3)).preds, vec![BlockIdx(2), BlockIdx(1)]);
        assert_eq!(f.block(BlockIdx(0)).succs, vec![BlockIdx(1), BlockIdx(2)]);
        assert!(f.has_sym(Id::new("x")));
        assert!(f.sym(Id::new("a")).unwrap().typ.explicit);
        assert_eq!(f.block(BlockIdx(0)).stms[0].loc, Loc::new("t.py", 1));
        let top = ctx.scope(Id::new("@top")).unwrap();
        assert!(top.borrow().sym(Id::new("f")).unwrap().typ.is_function());
    }

    #[test]
    fn undefined_name_is_reported() {
        let src = "scope @top [namespace] {}\nscope @top.g [function] { block b0 { 3: x = y; } }";
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let err = ast_to_ir(prog, Config::default(), Some("t.py")).err().unwrap();
        assert_eq!(err.code(), Some(ErrorCode::ReferencedBeforeAssign));
        assert_eq!(err.loc().line(), 3);
    }

    #[test]
    fn bad_pred_declaration() {
        let src = "scope @top [namespace] {}\nscope @top.g [function] { block b0 { ret 0; } block b1 preds(b0) { ret 1; } }";
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        assert!(ast_to_ir(prog, Config::default(), None).is_err());
    }

    #[test]
    fn printed_ir_parses_back() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let ctx = ast_to_ir(prog, Config::default(), Some("t.py")).unwrap();
        let mut first = vec![];
        crate::Printer::write_context(&ctx, &mut first).unwrap();
        let again = IrParser::parse(first.as_slice()).unwrap();
        let ctx2 = ast_to_ir(again, Config::default(), Some("t.py")).unwrap();
        let mut second = vec![];
        crate::Printer::write_context(&ctx2, &mut second).unwrap();
        assert_eq!(String::from_utf8(first).unwrap(), String::from_utf8(second).unwrap());
    }
}
