//! Types of expressions as seen from inside a scope.
use polyhls_ir::{
    Const, Context, Direction, Expr, Id, Length, Scope, Type, TypeKind, UnOp, builtins,
};

/// Evaluates the type of expressions of one scope. Unknown parts of the
/// program evaluate to `undef`; nothing here reports errors.
pub struct TypeEval<'a> {
    ctx: &'a Context,
    scope: &'a Scope,
}

/// Least type holding values of both `a` and `b`.
pub fn join(a: &Type, b: &Type) -> Type {
    if a.is_undef() {
        return b.clone();
    }
    a.propagate(b)
        .map(|t| t.with_explicit(false))
        .unwrap_or_else(|| a.clone())
}

impl<'a> TypeEval<'a> {
    pub fn new(ctx: &'a Context, scope: &'a Scope) -> Self {
        TypeEval { ctx, scope }
    }

    fn int(&self) -> Type {
        Type::int(self.ctx.config.default_int_width, true)
    }

    pub fn sym_type(&self, name: Id) -> Type {
        self.ctx
            .lookup_sym(self.scope, name)
            .map(|s| s.typ)
            .unwrap_or_default()
    }

    pub fn of_const(&self, c: &Const) -> Type {
        match c {
            Const::Int(_) => self.int(),
            Const::Bool(_) => Type::bool(),
            Const::Str(_) => Type::str(),
            Const::None => Type::none(),
        }
    }

    /// Result type of arithmetic on `l` and `r`. Booleans count as one bit
    /// wide unsigned integers; arithmetic on two booleans yields an int.
    pub fn arith(&self, l: &Type, r: &Type) -> Type {
        let bits = |t: &Type| match &t.kind {
            TypeKind::Int { width, signed } => Some((*width, *signed)),
            TypeKind::Bool => Some((1, false)),
            _ => None,
        };
        match (bits(l), bits(r)) {
            _ if l.is_bool() && r.is_bool() => self.int(),
            (Some((w1, s1)), Some((w2, s2))) => Type::int(w1.max(w2), s1 || s2),
            _ => Type::undef(),
        }
    }

    pub fn of(&self, e: &Expr) -> Type {
        match e {
            Expr::Const(c) => self.of_const(c),
            Expr::Temp(n) => self.sym_type(*n),
            Expr::Attr(..) => self.ctx.type_of_ref(self.scope, e).unwrap_or_default(),
            Expr::Unop(UnOp::Not, _) | Expr::Relop(..) => Type::bool(),
            Expr::Unop(_, x) => {
                let t = self.of(x);
                if t.is_bool() { self.int() } else { t }
            }
            Expr::Binop(_, l, r) => self.arith(&self.of(l), &self.of(r)),
            Expr::Polyop(_, vs) => {
                let mut types = vs.iter().map(|v| self.of(v));
                let first = types.next().unwrap_or_default();
                types.fold(first, |acc, t| self.arith(&acc, &t))
            }
            Expr::Condop(_, l, r) => join(&self.of(l), &self.of(r)),
            Expr::Mref(m, _) => self.of(m).element().cloned().unwrap_or_default(),
            Expr::Mstore(..) => Type::none(),
            Expr::Array {
                items,
                repeat,
                mutable,
            } => {
                let elm = items
                    .iter()
                    .fold(Type::undef(), |acc, i| join(&acc, &self.of(i)));
                let n = repeat
                    .as_int()
                    .and_then(|r| u64::try_from(r).ok())
                    .map(|r| r * items.len() as u64);
                match (mutable, n) {
                    (true, Some(n)) => Type::list(elm, Length::Const(n)),
                    (true, None) => Type::list(elm, Length::Expr(repeat.clone())),
                    (false, n) => Type::tuple(elm, n.unwrap_or(items.len() as u64)),
                }
            }
            Expr::Call { func, args, .. } => self.call(func, args),
            Expr::Syscall { name, args, .. } => self.syscall(*name, args),
            Expr::New { class, args, kwargs } => self.new_object(*class, args, kwargs),
        }
    }

    fn call(&self, func: &Expr, args: &[Expr]) -> Type {
        if let Expr::Attr(_, m) = func {
            if *m == builtins::APPEND_WORKER {
                return Type::none();
            }
        }
        let Some(callee) = self.ctx.callee_of(self.scope, func) else {
            // Calling a class constructs an object.
            return match self.ctx.type_of_ref(self.scope, func).map(|t| t.kind) {
                Some(TypeKind::Class { scope, .. }) => Type::object(scope),
                _ => Type::undef(),
            };
        };
        if callee == builtins::FLIPPED {
            return args.first().map(|a| self.of(a).flipped()).unwrap_or_default();
        }
        if callee.parent().is_some_and(builtins::is_port_class)
            && matches!(callee.base(), "rd" | "get")
        {
            if let Expr::Attr(port, _) = func {
                if let TypeKind::Port { dtype, .. } = self.of(port).kind {
                    return *dtype;
                }
            }
            return Type::undef();
        }
        self.ctx
            .get_scope(callee)
            .map(|s| s.borrow().return_type.clone())
            .unwrap_or_default()
    }

    fn syscall(&self, name: Id, args: &[Expr]) -> Type {
        match name.as_ref() {
            "len" => self.int(),
            "print" | "assert" => Type::none(),
            builtins::NEW => match args.first().and_then(|a| self.ctx.type_of_ref(self.scope, a)) {
                Some(Type {
                    kind: TypeKind::Class { scope, .. },
                    ..
                }) => Type::object(scope),
                _ => Type::undef(),
            },
            builtins::FLIPPED => args.first().map(|a| self.of(a).flipped()).unwrap_or_default(),
            _ if builtins::is_timing(name) => Type::none(),
            _ => Type::undef(),
        }
    }

    fn new_object(&self, class: Id, args: &[Expr], kwargs: &[(Id, Expr)]) -> Type {
        if !builtins::is_port_class(class) {
            return Type::object(class);
        }
        port_ctor_type(class, args, kwargs, self.ctx.config.default_int_width)
            .unwrap_or_else(|| Type::object(class))
    }
}

/// The port type built by `new Port(dtype, direction, init)`.
pub fn port_ctor_type(
    class: Id,
    args: &[Expr],
    kwargs: &[(Id, Expr)],
    default_width: u32,
) -> Option<Type> {
    let arg = |i: usize, name: &str| {
        args.get(i)
            .or_else(|| kwargs.iter().find(|(k, _)| *k == name).map(|(_, v)| v))
    };
    let dtype = match arg(0, "dtype")?.as_const()? {
        Const::Str(s) => builtins::type_from_name(s, default_width)?,
        _ => return None,
    };
    let direction = match arg(1, "direction").and_then(Expr::as_const) {
        Some(Const::Str(s)) => s.parse::<Direction>().ok()?,
        Some(_) => return None,
        None => Direction::Any,
    };
    let init = arg(2, "init").and_then(Expr::as_int);
    Some(builtins::port_type(class, dtype, direction, init))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    const SRC: &str = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param a: int8!;
  param b: uint16!;
  param xs: list<int8>[4]!;
  block b0 entry exit {
    ret None;
  }
}
"#;

    #[test]
    fn expression_types() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        let f = f.borrow();
        let ev = TypeEval::new(&ctx, &f);
        let sum = Expr::binop(polyhls_ir::BinOp::Add, Expr::temp("a"), Expr::temp("b"));
        assert_eq!(ev.of(&sum), Type::int(16, true));
        assert!(ev.of(&Expr::relop(polyhls_ir::RelOp::Lt, Expr::temp("a"), Expr::int(1))).is_bool());
        let elm = Expr::Mref(Box::new(Expr::temp("xs")), Box::new(Expr::int(0)));
        assert_eq!(ev.of(&elm), Type::int(8, true));
        let port = Expr::New {
            class: Id::new(builtins::PORT_CLASS),
            args: vec![Expr::Const(Const::Str("uint4".into())), Expr::Const(Const::Str("in".into()))],
            kwargs: vec![],
        };
        let t = ev.of(&port);
        assert_eq!(t.port_direction(), Some(Direction::Input));
    }
}
