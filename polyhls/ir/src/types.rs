//! The type lattice of the IR.
use crate::Expr;
use polyhls_utils::Id;
use strum::{Display, EnumString};

/// Direction of a port as seen from the owning module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
pub enum Direction {
    #[strum(serialize = "in")]
    Input,
    #[strum(serialize = "out")]
    Output,
    #[strum(serialize = "any")]
    Any,
}

impl Direction {
    pub fn flip(&self) -> Direction {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
            Direction::Any => Direction::Any,
        }
    }
}

/// Length of a sequence type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Length {
    /// Not known yet.
    Any,
    Const(u64),
    /// Depends on symbols that are not constant yet.
    Expr(Box<Expr>),
}

impl Length {
    pub fn as_const(&self) -> Option<u64> {
        match self {
            Length::Const(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Undef,
    Int { width: u32, signed: bool },
    Bool,
    Str,
    None,
    List {
        elm: Box<Type>,
        length: Length,
        ro: bool,
    },
    Tuple { elm: Box<Type>, length: u64 },
    Object { scope: Id },
    Class { scope: Id, typeargs: Vec<Type> },
    Namespace { scope: Id },
    Function {
        scope: Id,
        ret: Box<Type>,
        params: Vec<Type>,
    },
    Port {
        /// `polyphony.io.Port` or `polyphony.io.Queue`.
        scope: Id,
        dtype: Box<Type>,
        direction: Direction,
        init: Option<i64>,
        /// Set once the direction has been fixed by a use.
        assigned: bool,
        /// The symbol that created the port, if known.
        root: Option<Id>,
    },
    Expr(Box<Expr>),
    Generic,
}

/// A type plus the flag telling whether the user wrote it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Type {
    pub kind: TypeKind,
    pub explicit: bool,
}

impl Default for Type {
    fn default() -> Self {
        Type::undef()
    }
}

impl From<TypeKind> for Type {
    fn from(kind: TypeKind) -> Self {
        Type {
            kind,
            explicit: false,
        }
    }
}

impl Type {
    pub fn undef() -> Type {
        TypeKind::Undef.into()
    }
    pub fn int(width: u32, signed: bool) -> Type {
        TypeKind::Int { width, signed }.into()
    }
    pub fn bool() -> Type {
        TypeKind::Bool.into()
    }
    pub fn str() -> Type {
        TypeKind::Str.into()
    }
    pub fn none() -> Type {
        TypeKind::None.into()
    }
    pub fn generic() -> Type {
        TypeKind::Generic.into()
    }
    pub fn list(elm: Type, length: Length) -> Type {
        TypeKind::List {
            elm: Box::new(elm),
            length,
            ro: false,
        }
        .into()
    }
    pub fn tuple(elm: Type, length: u64) -> Type {
        TypeKind::Tuple {
            elm: Box::new(elm),
            length,
        }
        .into()
    }
    pub fn object(scope: Id) -> Type {
        TypeKind::Object { scope }.into()
    }
    pub fn class(scope: Id) -> Type {
        TypeKind::Class {
            scope,
            typeargs: vec![],
        }
        .into()
    }
    pub fn namespace(scope: Id) -> Type {
        TypeKind::Namespace { scope }.into()
    }
    pub fn function(scope: Id) -> Type {
        TypeKind::Function {
            scope,
            ret: Box::new(Type::undef()),
            params: vec![],
        }
        .into()
    }

    pub fn with_explicit(mut self, explicit: bool) -> Type {
        self.explicit = explicit;
        self
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.kind, TypeKind::Undef)
    }
    pub fn is_int(&self) -> bool {
        matches!(self.kind, TypeKind::Int { .. })
    }
    pub fn is_bool(&self) -> bool {
        matches!(self.kind, TypeKind::Bool)
    }
    pub fn is_none(&self) -> bool {
        matches!(self.kind, TypeKind::None)
    }
    pub fn is_list(&self) -> bool {
        matches!(self.kind, TypeKind::List { .. })
    }
    pub fn is_tuple(&self) -> bool {
        matches!(self.kind, TypeKind::Tuple { .. })
    }
    pub fn is_seq(&self) -> bool {
        self.is_list() || self.is_tuple()
    }
    pub fn is_object(&self) -> bool {
        matches!(self.kind, TypeKind::Object { .. })
    }
    pub fn is_class(&self) -> bool {
        matches!(self.kind, TypeKind::Class { .. })
    }
    pub fn is_function(&self) -> bool {
        matches!(self.kind, TypeKind::Function { .. })
    }
    pub fn is_port(&self) -> bool {
        matches!(self.kind, TypeKind::Port { .. })
    }
    pub fn is_namespace(&self) -> bool {
        matches!(self.kind, TypeKind::Namespace { .. })
    }

    /// Values that fit in a single register.
    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, TypeKind::Int { .. } | TypeKind::Bool | TypeKind::Str)
    }

    /// True for a read-only list, i.e. a ROM.
    pub fn is_rom(&self) -> bool {
        matches!(self.kind, TypeKind::List { ro: true, .. })
    }

    /// The scope a scope-bearing type refers to.
    pub fn scope(&self) -> Option<Id> {
        match &self.kind {
            TypeKind::Object { scope }
            | TypeKind::Class { scope, .. }
            | TypeKind::Namespace { scope }
            | TypeKind::Function { scope, .. }
            | TypeKind::Port { scope, .. } => Some(*scope),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::List { elm, .. } | TypeKind::Tuple { elm, .. } => Some(elm),
            _ => None,
        }
    }

    pub fn length(&self) -> Option<u64> {
        match &self.kind {
            TypeKind::List { length, .. } => length.as_const(),
            TypeKind::Tuple { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// Bit width of a scalar value.
    pub fn width(&self) -> Option<u32> {
        match &self.kind {
            TypeKind::Int { width, .. } => Some(*width),
            TypeKind::Bool => Some(1),
            _ => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.kind, TypeKind::Int { signed: true, .. })
    }

    pub fn port_direction(&self) -> Option<Direction> {
        match &self.kind {
            TypeKind::Port { direction, .. } => Some(*direction),
            _ => None,
        }
    }

    /// Can a value of type `other` be stored in a location of this type?
    pub fn is_compatible(&self, other: &Type) -> bool {
        use TypeKind as K;
        match (&self.kind, &other.kind) {
            (K::Undef, _) | (_, K::Undef) | (K::Generic, _) | (_, K::Generic) => true,
            (K::Int { .. } | K::Bool, K::Int { .. } | K::Bool) => true,
            (K::Str, K::Str) | (K::None, K::None) => true,
            (K::List { elm: e1, .. }, K::List { elm: e2, .. })
            | (K::Tuple { elm: e1, .. }, K::Tuple { elm: e2, .. }) => e1.is_compatible(e2),
            (K::Object { scope: s1 }, K::Object { scope: s2 }) => s1 == s2,
            (K::Object { .. }, K::None) => true,
            (K::Class { scope: s1, .. }, K::Class { scope: s2, .. })
            | (K::Namespace { scope: s1 }, K::Namespace { scope: s2 }) => s1 == s2,
            (K::Function { .. }, K::Function { .. }) => true,
            (K::Port { dtype: d1, .. }, K::Port { dtype: d2, .. }) => d1.is_compatible(d2),
            (K::Expr(_), _) | (_, K::Expr(_)) => true,
            _ => false,
        }
    }

    /// Merge `new` into this type, returning the updated type if anything
    /// changed. Explicit types are never widened, and a known int width is
    /// never narrowed unless the narrower type is explicit.
    pub fn propagate(&self, new: &Type) -> Option<Type> {
        use TypeKind as K;
        if self == new || new.is_undef() {
            return None;
        }
        if self.is_undef() || self.is_generic_like() {
            return Some(new.clone().with_explicit(self.explicit && !self.is_undef()));
        }
        if self.explicit {
            // Only fill in missing details of an explicit type.
            return match (&self.kind, &new.kind) {
                (
                    K::List { elm, length, ro },
                    K::List {
                        elm: nelm,
                        length: nlength,
                        ..
                    },
                ) => {
                    let elm2 = elm.propagate(nelm);
                    let length2 = match (length, nlength) {
                        (Length::Any | Length::Expr(_), Length::Const(_)) => Some(nlength.clone()),
                        _ => None,
                    };
                    if elm2.is_none() && length2.is_none() {
                        return None;
                    }
                    Some(Type {
                        kind: K::List {
                            elm: Box::new(elm2.unwrap_or_else(|| (**elm).clone())),
                            length: length2.unwrap_or_else(|| length.clone()),
                            ro: *ro,
                        },
                        explicit: true,
                    })
                }
                (K::Port { .. }, K::Port { .. }) => self.propagate_port(new),
                _ => None,
            };
        }
        match (&self.kind, &new.kind) {
            (K::Int { width: w1, signed: s1 }, K::Int { width: w2, signed: s2 }) => {
                if new.explicit {
                    return Some(new.clone());
                }
                let w = (*w1).max(*w2);
                let s = *s1 || *s2;
                (w != *w1 || s != *s1).then(|| Type::int(w, s))
            }
            (K::Bool, K::Int { .. }) => Some(new.clone()),
            (K::Int { .. }, K::Bool) => None,
            (K::List { .. }, K::List { .. }) | (K::Tuple { .. }, K::Tuple { .. }) => {
                let elm = self.element()?.propagate(new.element()?);
                let length_changed = match (&self.kind, &new.kind) {
                    (K::List { length, .. }, K::List { length: nl, .. }) => {
                        !matches!(length, Length::Const(_)) && matches!(nl, Length::Const(_))
                    }
                    _ => false,
                };
                if elm.is_none() && !length_changed {
                    return None;
                }
                let mut t = if length_changed { new.clone() } else { self.clone() };
                if let Some(e) = elm {
                    t.set_element(e);
                }
                t.explicit = false;
                Some(t)
            }
            (K::Port { .. }, K::Port { .. }) => self.propagate_port(new),
            (K::Function { scope: s1, .. }, K::Function { scope: s2, .. }) if s1 != s2 => {
                Some(new.clone())
            }
            (K::Object { .. }, K::None) => None,
            (K::None, K::Object { .. }) => Some(new.clone()),
            _ => None,
        }
    }

    fn propagate_port(&self, new: &Type) -> Option<Type> {
        let (
            TypeKind::Port {
                scope,
                dtype,
                direction,
                init,
                assigned,
                root,
            },
            TypeKind::Port {
                dtype: nd,
                direction: ndir,
                init: ninit,
                root: nroot,
                ..
            },
        ) = (&self.kind, &new.kind)
        else {
            return None;
        };
        let dtype2 = dtype.propagate(nd);
        let dir2 = if !*assigned && *direction == Direction::Any && *ndir != Direction::Any {
            Some(*ndir)
        } else {
            None
        };
        let init2 = if init.is_none() { *ninit } else { *init };
        let root2 = root.or(*nroot);
        if dtype2.is_none() && dir2.is_none() && init2 == *init && root2 == *root {
            return None;
        }
        Some(Type {
            kind: TypeKind::Port {
                scope: *scope,
                dtype: Box::new(dtype2.unwrap_or_else(|| (**dtype).clone())),
                direction: dir2.unwrap_or(*direction),
                init: init2,
                assigned: *assigned,
                root: root2,
            },
            explicit: self.explicit,
        })
    }

    fn is_generic_like(&self) -> bool {
        matches!(self.kind, TypeKind::Generic)
    }

    pub fn set_element(&mut self, e: Type) {
        if let TypeKind::List { elm, .. } | TypeKind::Tuple { elm, .. } = &mut self.kind {
            **elm = e;
        }
    }

    /// Fix the direction of a port; returns false if it was already fixed to
    /// a different direction.
    pub fn assign_direction(&mut self, dir: Direction) -> bool {
        if let TypeKind::Port {
            direction,
            assigned,
            ..
        } = &mut self.kind
        {
            if *assigned {
                return *direction == dir || dir == Direction::Any;
            }
            if *direction == Direction::Any {
                *direction = dir;
            } else if *direction != dir {
                return false;
            }
            *assigned = true;
        }
        true
    }

    /// Invert every port direction reachable from this type.
    pub fn flipped(&self) -> Type {
        let mut t = self.clone();
        t.flip_in_place();
        t
    }

    fn flip_in_place(&mut self) {
        match &mut self.kind {
            TypeKind::Port { direction, .. } => *direction = direction.flip(),
            TypeKind::List { elm, .. } | TypeKind::Tuple { elm, .. } => elm.flip_in_place(),
            _ => {}
        }
    }

    /// Short mangled form used in specialized scope names: `i16`, `u8`,
    /// `b`, `l_i32`, `o_Foo`, ...
    pub fn mangle(&self) -> String {
        match &self.kind {
            TypeKind::Undef => "x".into(),
            TypeKind::Int { width, signed: true } => format!("i{width}"),
            TypeKind::Int { width, signed: false } => format!("u{width}"),
            TypeKind::Bool => "b".into(),
            TypeKind::Str => "s".into(),
            TypeKind::None => "n".into(),
            TypeKind::List { elm, .. } => format!("l_{}", elm.mangle()),
            TypeKind::Tuple { elm, length } => format!("t_{}{length}", elm.mangle()),
            TypeKind::Object { scope } => format!("o_{}", scope.base()),
            TypeKind::Class { scope, .. } => format!("c_{}", scope.base()),
            TypeKind::Namespace { scope } => format!("ns_{}", scope.base()),
            TypeKind::Function { scope, .. } => format!("f_{}", scope.base()),
            TypeKind::Port { dtype, .. } => format!("p_{}", dtype.mangle()),
            TypeKind::Expr(_) => "e".into(),
            TypeKind::Generic => "g".into(),
        }
    }

    /// Expressions embedded in this type (symbolic lengths, expr types).
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            TypeKind::Expr(e) => vec![e],
            TypeKind::List { elm, length, .. } => {
                let mut v = elm.exprs();
                if let Length::Expr(e) = length {
                    v.push(e);
                }
                v
            }
            TypeKind::Tuple { elm, .. } => elm.exprs(),
            TypeKind::Port { dtype, .. } => dtype.exprs(),
            TypeKind::Function { ret, params, .. } => {
                let mut v = ret.exprs();
                v.extend(params.iter().flat_map(|p| p.exprs()));
                v
            }
            _ => vec![],
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            TypeKind::Expr(e) => vec![e],
            TypeKind::List { elm, length, .. } => {
                let mut v = elm.exprs_mut();
                if let Length::Expr(e) = length {
                    v.push(e);
                }
                v
            }
            TypeKind::Tuple { elm, .. } => elm.exprs_mut(),
            TypeKind::Port { dtype, .. } => dtype.exprs_mut(),
            TypeKind::Function { ret, params, .. } => {
                let mut v = ret.exprs_mut();
                v.extend(params.iter_mut().flat_map(|p| p.exprs_mut()));
                v
            }
            _ => vec![],
        }
    }

    /// Rename every scope reference for which `f` returns a new name.
    pub fn rename_scopes(&mut self, f: &dyn Fn(Id) -> Option<Id>) {
        match &mut self.kind {
            TypeKind::Object { scope } | TypeKind::Namespace { scope } => {
                if let Some(n) = f(*scope) {
                    *scope = n;
                }
            }
            TypeKind::Class { scope, typeargs } => {
                if let Some(n) = f(*scope) {
                    *scope = n;
                }
                typeargs.iter_mut().for_each(|t| t.rename_scopes(f));
            }
            TypeKind::Function { scope, ret, params } => {
                if let Some(n) = f(*scope) {
                    *scope = n;
                }
                ret.rename_scopes(f);
                params.iter_mut().for_each(|t| t.rename_scopes(f));
            }
            TypeKind::List { elm, .. } | TypeKind::Tuple { elm, .. } => elm.rename_scopes(f),
            TypeKind::Port { dtype, .. } => dtype.rename_scopes(f),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_types_are_not_widened() {
        let t = Type::int(8, true).with_explicit(true);
        assert_eq!(t.propagate(&Type::int(32, true)), None);
        let u = Type::int(8, true);
        assert_eq!(u.propagate(&Type::int(32, true)), Some(Type::int(32, true)));
        assert_eq!(Type::int(32, true).propagate(&Type::int(8, true)), None);
        let narrow = Type::int(8, true).with_explicit(true);
        assert_eq!(Type::int(32, true).propagate(&narrow), Some(narrow.clone()));
    }

    #[test]
    fn undef_takes_anything() {
        let t = Type::undef();
        assert_eq!(t.propagate(&Type::bool()), Some(Type::bool()));
        assert_eq!(Type::bool().propagate(&Type::undef()), None);
    }

    #[test]
    fn list_length_is_filled_in() {
        let t = Type::list(Type::int(32, true), Length::Any).with_explicit(true);
        let n = Type::list(Type::int(32, true), Length::Const(4));
        let r = t.propagate(&n).unwrap();
        assert_eq!(r.length(), Some(4));
        assert!(r.explicit);
    }

    #[test]
    fn port_direction_is_fixed_once() {
        let mut p: Type = TypeKind::Port {
            scope: Id::new("polyphony.io.Port"),
            dtype: Box::new(Type::int(8, false)),
            direction: Direction::Any,
            init: None,
            assigned: false,
            root: None,
        }
        .into();
        assert!(p.assign_direction(Direction::Output));
        assert!(p.assign_direction(Direction::Output));
        assert!(!p.assign_direction(Direction::Input));
        assert_eq!(p.port_direction(), Some(Direction::Output));
        assert_eq!(p.flipped().port_direction(), Some(Direction::Input));
    }

    #[test]
    fn mangled_names() {
        assert_eq!(Type::int(16, true).mangle(), "i16");
        assert_eq!(Type::list(Type::int(32, true), Length::Any).mangle(), "l_i32");
        assert_eq!(Type::object(Id::new("@top.Foo")).mangle(), "o_Foo");
    }
}
