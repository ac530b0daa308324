//! The compilation context. This is the top-level object threaded through
//! every pass: the scope forest, the configuration and the diagnostics
//! collected so far.
use crate::{RRC, RuntimeInfo, Scope, Symbol, builtins, rrc};
use linked_hash_map::LinkedHashMap;
use polyhls_utils::{Error, HlsResult, Id};

/// Configuration information for the compiler.
#[derive(Clone, Debug)]
pub struct Config {
    /// Target HDL.
    pub target: String,
    /// Width of integers without an explicit width.
    pub default_int_width: u32,
    /// Inline every call, including calls into modules.
    pub perfect_inlining: bool,
    /// Evaluate pure functions at compile time.
    pub enable_pure: bool,
    /// `clksleep(n)` with `n` above this value becomes a counting wait state.
    pub sleep_sentinel_threshold: u32,
    pub dump_ir: bool,
    pub dump_stg: bool,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target: "verilog".to_string(),
            default_int_width: 32,
            perfect_inlining: false,
            enable_pure: false,
            sleep_sentinel_threshold: 50,
            dump_ir: false,
            dump_stg: false,
            verbose: false,
        }
    }
}

pub struct Context {
    pub config: Config,
    /// Extra options provided on the command line, interpreted by
    /// individual passes.
    pub extra_opts: Vec<String>,
    pub runtime_info: RuntimeInfo,
    /// Warnings reported so far; printed at the end of compilation.
    pub warnings: Vec<Error>,
    /// Name of the compiled file.
    pub file: Option<String>,
    scopes: LinkedHashMap<Id, RRC<Scope>>,
}

/// Replace the prefix `old` of a qualified name by `new`.
pub fn rename_prefix(id: Id, old: Id, new: Id) -> Option<Id> {
    if id == old {
        return Some(new);
    }
    let s = id.as_ref();
    s.strip_prefix(old.as_ref())
        .filter(|rest| rest.starts_with('.'))
        .map(|rest| Id::new(format!("{new}{rest}")))
}

impl Context {
    /// A context holding only the builtin library scopes.
    pub fn new(config: Config) -> Self {
        let mut ctx = Context {
            config,
            extra_opts: vec![],
            runtime_info: RuntimeInfo::default(),
            warnings: vec![],
            file: None,
            scopes: LinkedHashMap::new(),
        };
        builtins::install(&mut ctx);
        ctx
    }

    pub fn has_scope(&self, name: Id) -> bool {
        self.scopes.contains_key(&name)
    }

    pub fn get_scope(&self, name: Id) -> Option<RRC<Scope>> {
        self.scopes.get(&name).cloned()
    }

    pub fn scope(&self, name: Id) -> HlsResult<RRC<Scope>> {
        self.get_scope(name)
            .ok_or_else(|| Error::undefined(name, "scope"))
    }

    /// Names of all scopes in creation order.
    pub fn scope_names(&self) -> Vec<Id> {
        self.scopes.keys().copied().collect()
    }

    /// Scopes that are compiled, i.e. everything but library scopes.
    pub fn user_scopes(&self) -> Vec<Id> {
        self.scopes
            .iter()
            .filter(|(_, s)| !s.borrow().is_lib())
            .map(|(n, _)| *n)
            .collect()
    }

    /// Add a scope and register it as a child of its parent.
    pub fn add_scope(&mut self, scope: Scope) -> RRC<Scope> {
        let name = scope.name;
        if let Some(parent) = scope.parent.and_then(|p| self.scopes.get(&p)) {
            let mut parent = parent.borrow_mut();
            if !parent.children.contains(&name) {
                parent.children.push(name);
            }
        }
        let rc = rrc(scope);
        self.scopes.insert(name, rc.clone());
        rc
    }

    /// Remove a scope and all of its children.
    pub fn remove_scope(&mut self, name: Id) -> Option<RRC<Scope>> {
        let removed = self.scopes.remove(&name)?;
        let (parent, children) = {
            let s = removed.borrow();
            (s.parent, s.children.clone())
        };
        for c in children {
            self.remove_scope(c);
        }
        if let Some(p) = parent.and_then(|p| self.scopes.get(&p)) {
            p.borrow_mut().children.retain(|c| *c != name);
        }
        Some(removed)
    }

    /// Resolve `name` as seen from inside `from`: the scope itself, then
    /// its enclosing scopes. Class bodies are not visible from methods.
    pub fn lookup_sym(&self, from: &Scope, name: Id) -> Option<Symbol> {
        if let Some(sym) = from.sym(name) {
            return Some(sym.clone());
        }
        let mut cur = from.parent;
        while let Some(p) = cur {
            let rc = self.scopes.get(&p)?;
            let scope = rc.borrow();
            if !scope.is_class() {
                if let Some(sym) = scope.sym(name) {
                    return Some(sym.clone());
                }
            }
            cur = scope.parent;
        }
        None
    }

    /// Find a field or method of a class, searching base classes too.
    pub fn class_field(&self, class: Id, name: Id) -> Option<Symbol> {
        let rc = self.scopes.get(&class)?;
        let scope = rc.borrow();
        if let Some(sym) = scope.sym(name) {
            return Some(sym.clone());
        }
        scope
            .bases
            .iter()
            .find_map(|b| self.class_field(*b, name))
    }

    /// Is `sup` among the classes `sub` derives from, itself included?
    pub fn is_subclass(&self, sub: Id, sup: Id) -> bool {
        if sub == sup {
            return true;
        }
        let Some(bases) = self
            .scopes
            .get(&sub)
            .and_then(|rc| rc.try_borrow().ok().map(|s| s.bases.clone()))
        else {
            return false;
        };
        bases.into_iter().any(|b| self.is_subclass(b, sup))
    }

    /// Deep copy `orig` and its children under the name `new_name`. Scope
    /// references inside the copy that point into `orig` are redirected
    /// into the copy.
    pub fn clone_scope(&mut self, orig: Id, new_name: Id) -> HlsResult<Id> {
        let (mut copy, children) = {
            let rc = self.scope(orig)?;
            let scope = rc.borrow();
            (scope.clone_as(new_name), scope.children.clone())
        };
        let rename = |id: Id| rename_prefix(id, orig, new_name);
        for (_, sym) in copy.symbols.iter_mut() {
            sym.typ.rename_scopes(&rename);
        }
        copy.return_type.rename_scopes(&rename);
        for (_, blk) in copy.blocks.iter_mut() {
            for stm in blk.stms.iter_mut() {
                for e in stm.exprs_mut() {
                    e.walk_mut(&mut |x| {
                        if let crate::Expr::New { class, .. } = x {
                            if let Some(n) = rename(*class) {
                                *class = n;
                            }
                        }
                    });
                }
            }
        }
        self.add_scope(copy);
        for c in children {
            let base = c.base();
            self.clone_scope(c, new_name.child(base))?;
        }
        Ok(new_name)
    }

    /// Record a warning; warnings are printed at the end of compilation.
    pub fn warn(&mut self, warning: Error) {
        log::debug!("warning recorded: {warning}");
        self.warnings.push(warning);
    }

    /// Qualified names of the scopes directly called or instantiated by
    /// `scope`.
    pub fn callees(&self, scope: &Scope) -> Vec<Id> {
        let mut out = vec![];
        for (_, stm) in scope.all_stms() {
            let mut visit = |e: &crate::Expr| match e {
                crate::Expr::Call { func, .. } => {
                    if let Some(callee) = self.callee_of(scope, func) {
                        out.push(callee);
                    }
                }
                crate::Expr::New { class, .. } => {
                    out.push(*class);
                    let ctor = class.child("__init__");
                    if self.has_scope(ctor) {
                        out.push(ctor);
                    }
                }
                _ => {}
            };
            for e in stm.src_exprs() {
                e.walk(&mut visit);
            }
        }
        out.sort();
        out.dedup();
        out
    }

    /// The scope a call target refers to, resolved through symbol types.
    pub fn callee_of(&self, scope: &Scope, func: &crate::Expr) -> Option<Id> {
        self.type_of_ref(scope, func)
            .and_then(|t| match t.kind {
                crate::TypeKind::Function { scope, .. } => Some(scope),
                _ => None,
            })
    }

    /// Type of a `TEMP`/`ATTR` reference as seen from `scope`.
    pub fn type_of_ref(&self, scope: &Scope, e: &crate::Expr) -> Option<crate::Type> {
        match e {
            crate::Expr::Temp(n) => self.lookup_sym(scope, *n).map(|s| s.typ),
            crate::Expr::Attr(base, attr) => {
                let bt = self.type_of_ref(scope, base)?;
                let owner = bt.scope()?;
                self.class_field(owner, *attr).map(|s| s.typ)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScopeTags, SymTags, Type};

    #[test]
    fn scope_tree_and_lookup() {
        let mut ctx = Context::new(Config::default());
        let mut top = Scope::new(Id::new("@top"), ScopeTags::NAMESPACE);
        top.add_sym(Id::new("N"), Type::int(32, true), SymTags::STATIC);
        ctx.add_scope(top);
        ctx.add_scope(Scope::new(Id::new("@top.f"), ScopeTags::FUNCTION));
        ctx.add_scope(Scope::new(Id::new("@top.f.g"), ScopeTags::FUNCTION));
        let g = ctx.scope(Id::new("@top.f.g")).unwrap();
        let found = ctx.lookup_sym(&g.borrow(), Id::new("N")).unwrap();
        assert_eq!(found.scope, Id::new("@top"));

        let copy = ctx
            .clone_scope(Id::new("@top.f"), Id::new("@top.f_i32"))
            .unwrap();
        assert!(ctx.has_scope(Id::new("@top.f_i32.g")));
        let top = ctx.scope(Id::new("@top")).unwrap();
        assert!(top.borrow().children.contains(&copy));

        ctx.remove_scope(Id::new("@top.f"));
        assert!(!ctx.has_scope(Id::new("@top.f.g")));
        assert!(!top.borrow().children.contains(&Id::new("@top.f")));
    }

    #[test]
    fn prefix_rename() {
        let (a, b) = (Id::new("@top.f"), Id::new("@top.f_i8"));
        assert_eq!(rename_prefix(Id::new("@top.f.g"), a, b), Some(Id::new("@top.f_i8.g")));
        assert_eq!(rename_prefix(Id::new("@top.foo"), a, b), None);
    }
}
