//! Expression trees.
use polyhls_utils::Id;
use smallvec::SmallVec;
use strum::{Display, EnumString};

/// A dotted path of symbols, e.g. `self.sub.x` is `[self, sub, x]`.
pub type QSym = SmallVec<[Id; 4]>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString)]
pub enum UnOp {
    #[strum(serialize = "-")]
    USub,
    #[strum(serialize = "+")]
    UAdd,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    Invert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mult,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "&")]
    BitAnd,
}

impl BinOp {
    /// Operators that can be merged into a single polyadic operation.
    pub fn is_associative(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mult | BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor
        )
    }

    pub fn eval(&self, l: i64, r: i64) -> Option<i64> {
        Some(match self {
            BinOp::Add => l.wrapping_add(r),
            BinOp::Sub => l.wrapping_sub(r),
            BinOp::Mult => l.wrapping_mul(r),
            BinOp::FloorDiv => {
                if r == 0 {
                    return None;
                }
                l.div_euclid(r)
            }
            BinOp::Mod => {
                if r == 0 {
                    return None;
                }
                l.rem_euclid(r)
            }
            BinOp::LShift => l.checked_shl(u32::try_from(r).ok()?)?,
            BinOp::RShift => l.checked_shr(u32::try_from(r).ok()?)?,
            BinOp::BitOr => l | r,
            BinOp::BitXor => l ^ r,
            BinOp::BitAnd => l & r,
        })
    }

    /// Neutral element, used when folding polyadic constants.
    pub fn identity(&self) -> Option<i64> {
        match self {
            BinOp::Add | BinOp::BitOr | BinOp::BitXor => Some(0),
            BinOp::Mult => Some(1),
            BinOp::BitAnd => Some(-1),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString)]
pub enum RelOp {
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    LtE,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    GtE,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "isnot")]
    IsNot,
}

impl RelOp {
    pub fn eval(&self, l: i64, r: i64) -> bool {
        match self {
            RelOp::And => l != 0 && r != 0,
            RelOp::Or => l != 0 || r != 0,
            RelOp::Eq | RelOp::Is => l == r,
            RelOp::NotEq | RelOp::IsNot => l != r,
            RelOp::Lt => l < r,
            RelOp::LtE => l <= r,
            RelOp::Gt => l > r,
            RelOp::GtE => l >= r,
        }
    }

    /// The operator producing the negated result, if it exists.
    pub fn negate(&self) -> Option<RelOp> {
        Some(match self {
            RelOp::Eq => RelOp::NotEq,
            RelOp::NotEq => RelOp::Eq,
            RelOp::Lt => RelOp::GtE,
            RelOp::GtE => RelOp::Lt,
            RelOp::Gt => RelOp::LtE,
            RelOp::LtE => RelOp::Gt,
            RelOp::Is => RelOp::IsNot,
            RelOp::IsNot => RelOp::Is,
            RelOp::And | RelOp::Or => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Const {
    Int(i64),
    Bool(bool),
    Str(String),
    None,
}

impl Const {
    /// Integer view of a constant; booleans are 0/1.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Const::Int(v) => Some(*v),
            Const::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn is_true(&self) -> Option<bool> {
        match self {
            Const::Int(v) => Some(*v != 0),
            Const::Bool(b) => Some(*b),
            Const::None => Some(false),
            Const::Str(s) => Some(!s.is_empty()),
        }
    }
}

impl std::fmt::Display for Const {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{v}"),
            Const::Bool(true) => write!(f, "True"),
            Const::Bool(false) => write!(f, "False"),
            Const::Str(s) => write!(f, "\"{s}\""),
            Const::None => write!(f, "None"),
        }
    }
}

/// Expression nodes. Expressions form trees owned by their statement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Unop(UnOp, Box<Expr>),
    Binop(BinOp, Box<Expr>, Box<Expr>),
    Relop(RelOp, Box<Expr>, Box<Expr>),
    Condop(Box<Expr>, Box<Expr>, Box<Expr>),
    Polyop(BinOp, Vec<Expr>),
    Const(Const),
    Temp(Id),
    Attr(Box<Expr>, Id),
    Mref(Box<Expr>, Box<Expr>),
    Mstore(Box<Expr>, Box<Expr>, Box<Expr>),
    Array {
        items: Vec<Expr>,
        repeat: Box<Expr>,
        mutable: bool,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(Id, Expr)>,
    },
    Syscall {
        name: Id,
        args: Vec<Expr>,
        kwargs: Vec<(Id, Expr)>,
    },
    New {
        class: Id,
        args: Vec<Expr>,
        kwargs: Vec<(Id, Expr)>,
    },
}

impl Expr {
    pub fn temp(name: impl Into<Id>) -> Expr {
        Expr::Temp(name.into())
    }

    pub fn int(v: i64) -> Expr {
        Expr::Const(Const::Int(v))
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Const(Const::Bool(b))
    }

    pub fn none() -> Expr {
        Expr::Const(Const::None)
    }

    pub fn attr(exp: Expr, name: impl Into<Id>) -> Expr {
        Expr::Attr(Box::new(exp), name.into())
    }

    pub fn binop(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::Binop(op, Box::new(l), Box::new(r))
    }

    pub fn relop(op: RelOp, l: Expr, r: Expr) -> Expr {
        Expr::Relop(op, Box::new(l), Box::new(r))
    }

    pub fn not(e: Expr) -> Expr {
        match e {
            Expr::Const(c) => match c.is_true() {
                Some(b) => Expr::bool(!b),
                None => Expr::Unop(UnOp::Not, Box::new(Expr::Const(c))),
            },
            Expr::Unop(UnOp::Not, inner) => *inner,
            e => Expr::Unop(UnOp::Not, Box::new(e)),
        }
    }

    /// Conjunction that drops trivially true operands.
    pub fn and(l: Expr, r: Expr) -> Expr {
        match (l.as_const().and_then(Const::is_true), r.as_const().and_then(Const::is_true)) {
            (Some(true), _) => r,
            (_, Some(true)) => l,
            (Some(false), _) | (_, Some(false)) => Expr::bool(false),
            _ if l == r => l,
            _ => Expr::relop(RelOp::And, l, r),
        }
    }

    pub fn or(l: Expr, r: Expr) -> Expr {
        match (l.as_const().and_then(Const::is_true), r.as_const().and_then(Const::is_true)) {
            (Some(false), _) => r,
            (_, Some(false)) => l,
            (Some(true), _) | (_, Some(true)) => Expr::bool(true),
            _ if l == r => l,
            _ => Expr::relop(RelOp::Or, l, r),
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    pub fn as_const(&self) -> Option<&Const> {
        match self {
            Expr::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        self.as_const().and_then(Const::as_int)
    }

    pub fn as_temp(&self) -> Option<Id> {
        match self {
            Expr::Temp(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_call_like(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::Syscall { .. } | Expr::New { .. })
    }

    /// The dotted path named by a `TEMP`/`ATTR` chain.
    pub fn qsym(&self) -> Option<QSym> {
        match self {
            Expr::Temp(n) => Some(smallvec::smallvec![*n]),
            Expr::Attr(e, a) => {
                let mut q = e.qsym()?;
                q.push(*a);
                Some(q)
            }
            _ => None,
        }
    }

    /// The symbol at the head of a `TEMP`/`ATTR` chain.
    pub fn head(&self) -> Option<Id> {
        match self {
            Expr::Temp(n) => Some(*n),
            Expr::Attr(e, _) => e.head(),
            _ => None,
        }
    }

    /// The direct sub-expressions of this node.
    pub fn kids(&self) -> Vec<&Expr> {
        match self {
            Expr::Unop(_, e) => vec![e],
            Expr::Binop(_, l, r) | Expr::Relop(_, l, r) | Expr::Mref(l, r) => vec![l, r],
            Expr::Condop(c, l, r) | Expr::Mstore(c, l, r) => vec![c, l, r],
            Expr::Polyop(_, vs) => vs.iter().collect(),
            Expr::Const(_) | Expr::Temp(_) => vec![],
            Expr::Attr(e, _) => vec![e],
            Expr::Array { items, repeat, .. } => {
                items.iter().chain(std::iter::once(&**repeat)).collect()
            }
            Expr::Call { func, args, kwargs } => std::iter::once(&**func)
                .chain(args.iter())
                .chain(kwargs.iter().map(|(_, e)| e))
                .collect(),
            Expr::Syscall { args, kwargs, .. } | Expr::New { args, kwargs, .. } => {
                args.iter().chain(kwargs.iter().map(|(_, e)| e)).collect()
            }
        }
    }

    pub fn kids_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Unop(_, e) => vec![e],
            Expr::Binop(_, l, r) | Expr::Relop(_, l, r) | Expr::Mref(l, r) => vec![l, r],
            Expr::Condop(c, l, r) | Expr::Mstore(c, l, r) => vec![c, l, r],
            Expr::Polyop(_, vs) => vs.iter_mut().collect(),
            Expr::Const(_) | Expr::Temp(_) => vec![],
            Expr::Attr(e, _) => vec![e],
            Expr::Array { items, repeat, .. } => items
                .iter_mut()
                .chain(std::iter::once(&mut **repeat))
                .collect(),
            Expr::Call { func, args, kwargs } => std::iter::once(&mut **func)
                .chain(args.iter_mut())
                .chain(kwargs.iter_mut().map(|(_, e)| e))
                .collect(),
            Expr::Syscall { args, kwargs, .. } | Expr::New { args, kwargs, .. } => args
                .iter_mut()
                .chain(kwargs.iter_mut().map(|(_, e)| e))
                .collect(),
        }
    }

    /// Pre-order walk over this expression and all sub-expressions.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for k in self.kids() {
            k.walk(f);
        }
    }

    /// Post-order mutable walk: children are rewritten before their parent.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        for k in self.kids_mut() {
            k.walk_mut(f);
        }
        f(self);
    }

    /// All maximal `TEMP`/`ATTR` references read by this expression.
    /// `a.b.c` yields the single path `[a, b, c]`.
    pub fn refs(&self) -> Vec<QSym> {
        let mut out = vec![];
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs(&self, out: &mut Vec<QSym>) {
        if let Some(q) = self.qsym() {
            out.push(q);
            return;
        }
        for k in self.kids() {
            k.collect_refs(out);
        }
    }

    /// True if the expression mentions the symbol `name` anywhere.
    pub fn mentions(&self, name: Id) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let Expr::Temp(n) = e {
                found |= *n == name;
            }
        });
        found
    }

    /// Replace every `TEMP(name)` head by `rep`.
    pub fn replace_temp(&mut self, name: Id, rep: &Expr) -> bool {
        let mut changed = false;
        self.walk_mut(&mut |e| {
            if let Expr::Temp(n) = e {
                if *n == name {
                    *e = rep.clone();
                    changed = true;
                }
            }
        });
        changed
    }

    /// Replace every occurrence of the reference path `q` by `rep`.
    pub fn replace_qsym(&mut self, q: &[Id], rep: &Expr) -> bool {
        if self.qsym().as_deref() == Some(q) {
            *self = rep.clone();
            return true;
        }
        let mut changed = false;
        for k in self.kids_mut() {
            changed |= k.replace_qsym(q, rep);
        }
        changed
    }
}

impl From<Const> for Expr {
    fn from(c: Const) -> Self {
        Expr::Const(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn operator_strings() {
        assert_eq!(BinOp::from_str("//").unwrap(), BinOp::FloorDiv);
        assert_eq!(RelOp::from_str("isnot").unwrap(), RelOp::IsNot);
        assert_eq!(UnOp::Not.to_string(), "!");
        assert!(BinOp::from_str("<").is_err());
    }

    #[test]
    fn folding_helpers() {
        assert_eq!(BinOp::FloorDiv.eval(-7, 2), Some(-4));
        assert_eq!(BinOp::Mod.eval(1, 0), None);
        assert!(RelOp::Lt.eval(1, 2));
        assert_eq!(RelOp::Lt.negate(), Some(RelOp::GtE));
    }

    #[test]
    fn refs_and_replace() {
        let mut e = Expr::binop(
            BinOp::Add,
            Expr::attr(Expr::temp("self"), "x"),
            Expr::temp("y"),
        );
        let refs = e.refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].as_slice(), &[Id::new("self"), Id::new("x")]);
        assert!(e.replace_temp(Id::new("y"), &Expr::int(3)));
        assert_eq!(e.refs().len(), 1);
        assert!(e.mentions(Id::new("self")));
    }

    #[test]
    fn boolean_simplification() {
        let c = Expr::temp("c");
        assert_eq!(Expr::and(Expr::bool(true), c.clone()), c);
        assert_eq!(Expr::not(Expr::not(c.clone())), c);
        assert_eq!(Expr::or(c.clone(), Expr::bool(true)), Expr::bool(true));
    }
}
