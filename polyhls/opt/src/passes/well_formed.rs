use crate::analysis::TypeEval;
use crate::traversal::{
    Action, ConstructVisitor, DiagnosticContext, DiagnosticPass, Named, PassOpt, ParseVal,
    VisResult, Visitor,
};
use polyhls_ir::{BlockIdx, Context, Expr, Scope, StmKind};
use polyhls_utils::{Error, ErrorCode, HlsResult, Id};
use std::collections::{BTreeSet, HashMap};

/// Pass to check that the control flow graph of every scope is well formed:
/// 1. The entry block has no predecessors.
/// 2. Every live block ends in exactly one terminator, and its successors
///    are exactly the targets of that terminator.
/// 3. `PHI`/`LPHI` statements lead their block, have one argument per
///    predecessor and only appear in blocks with several predecessors.
/// 4. Read-only sequences are never stored to.
/// 5. With the `ssa` option, every versioned symbol is defined once.
pub struct WellFormed {
    diag: DiagnosticContext,
    check_ssa: bool,
}

impl ConstructVisitor for WellFormed {
    fn from(ctx: &Context) -> HlsResult<Self> {
        let opts = Self::get_opts(ctx);
        Ok(WellFormed {
            diag: DiagnosticContext::default(),
            check_ssa: opts["ssa"].bool(),
        })
    }

    fn clear_data(&mut self) {
        // Diagnostics are shared between scopes
    }
}

impl Named for WellFormed {
    fn name() -> &'static str {
        "well-formed"
    }

    fn description() -> &'static str {
        "check that the control flow graph of every scope is well formed"
    }

    fn opts() -> Vec<PassOpt> {
        vec![PassOpt::new(
            "ssa",
            "also check that versioned symbols have a single definition",
            ParseVal::Bool(false),
            PassOpt::parse_bool,
        )]
    }
}

impl DiagnosticPass for WellFormed {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

impl WellFormed {
    fn malformed(&mut self, scope: &Scope, msg: String) {
        self.diag
            .error(Error::malformed(format!("{}: {msg}", scope.name)).with_loc(scope.loc));
    }

    fn check_block(&mut self, scope: &Scope, idx: BlockIdx) {
        let blk = scope.block(idx);
        let terms = blk
            .stms
            .iter()
            .filter(|s| s.is_jump() || matches!(s.kind, StmKind::Ret(_)))
            .count();
        match blk.stms.last() {
            Some(last) if terms == 1 && (last.is_jump() || matches!(last.kind, StmKind::Ret(_))) => {
                let targets: BTreeSet<BlockIdx> = last.targets().into_iter().collect();
                let succs: BTreeSet<BlockIdx> = blk.succs.iter().copied().collect();
                if targets != succs {
                    self.malformed(
                        scope,
                        format!("successors of {idx} do not match its terminator"),
                    );
                }
            }
            _ => self.malformed(scope, format!("block {idx} must end in one terminator")),
        }

        let first_non_phi = blk.first_non_phi();
        for (i, stm) in blk.stms.iter().enumerate() {
            let Some(phi) = stm.as_phi() else { continue };
            if i >= first_non_phi {
                self.malformed(scope, format!("phi `{stm}` follows other statements"));
            }
            if phi.kind == polyhls_ir::PhiKind::UPhi {
                continue;
            }
            if phi.args.len() != blk.preds.len() {
                self.malformed(
                    scope,
                    format!("phi `{stm}` does not have one argument per predecessor"),
                );
            }
            if blk.preds.len() < 2 {
                self.malformed(scope, format!("phi `{stm}` in a block without a join"));
            }
        }
        for p in &blk.preds {
            if !scope.block(*p).succs.contains(&idx) {
                self.malformed(scope, format!("{p} is a predecessor of {idx} but not an edge"));
            }
        }
    }

    fn check_rom_stores(&mut self, scope: &Scope, ctx: &Context) {
        let ev = TypeEval::new(ctx, scope);
        for (_, stm) in scope.all_stms() {
            for e in stm.src_exprs() {
                e.walk(&mut |x| {
                    if let Expr::Mstore(m, _, _) = x {
                        if ev.of(m).is_rom() {
                            self.diag.error(Error::fail(
                                stm.loc,
                                ErrorCode::SeqCapacityOverflowed,
                                &[m.to_string()],
                            ));
                        }
                    }
                });
            }
        }
    }

    fn check_single_defs(&mut self, scope: &Scope) {
        let mut defs: HashMap<Id, usize> = HashMap::new();
        for (_, stm) in scope.all_stms() {
            if let Some(d) = stm.def_sym().filter(|d| d.as_ref().contains('#')) {
                *defs.entry(d).or_default() += 1;
            }
        }
        let mut multi: Vec<Id> = defs.into_iter().filter(|(_, n)| *n > 1).map(|(d, _)| d).collect();
        multi.sort();
        for d in multi {
            self.malformed(scope, format!("`{d}` is defined more than once"));
        }
    }
}

impl Visitor for WellFormed {
    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        let entry = scope.entry()?;
        if !scope.block(entry).preds.is_empty() {
            self.malformed(scope, format!("entry block {entry} has predecessors"));
        }
        for idx in scope.live_blocks() {
            self.check_block(scope, idx);
        }
        self.check_rom_stores(scope, ctx);
        if self.check_ssa {
            self.check_single_defs(scope);
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn errors(src: &str, opts: &[&str]) -> Vec<String> {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        ctx.extra_opts = opts.iter().map(|s| s.to_string()).collect();
        let pass = WellFormed::do_pass_default(&mut ctx).unwrap();
        pass.diagnostics().errors().map(|e| e.message()).collect()
    }

    #[test]
    fn accepts_diamond() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  block b0 entry {
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    x#1 = 1;
    jump b3;
  }
  block b2 preds(b0) {
    x#2 = 2;
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    x#3 = phi(x#1, x#2);
    ret x#3;
  }
}
"#;
        assert!(errors(src, &["well-formed:ssa"]).is_empty());
    }

    #[test]
    fn missing_terminator_and_double_def() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  block b0 entry exit {
    x#1 = 1;
    x#1 = 2;
  }
}
"#;
        let errs = errors(src, &["well-formed:ssa"]);
        assert_eq!(errs.len(), 2);
        assert!(errs[0].contains("terminator"));
        assert!(errs[1].contains("more than once"));
    }

    #[test]
    fn rom_store() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param xs: rom<int8>[4];
  block b0 entry exit {
    mstore(xs, 0, 1);
    ret None;
  }
}
"#;
        let errs = errors(src, &[]);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("xs"));
    }
}
