use crate::Type;
use bitflags::bitflags;
use polyhls_utils::{Error, GetName, HlsResult, Id};

bitflags! {
    /// The closed vocabulary of symbol tags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct SymTags: u32 {
        const PARAM = 1 << 0;
        const RETURN = 1 << 1;
        const CONDITION = 1 << 2;
        const INDUCTION = 1 << 3;
        const ALIAS = 1 << 4;
        const FREE = 1 << 5;
        const SELF = 1 << 6;
        const STATIC = 1 << 7;
        const SUBOBJECT = 1 << 8;
        const FIELD = 1 << 9;
        const BUILTIN = 1 << 10;
        const FLATTENED = 1 << 11;
        const PIPELINED = 1 << 12;
        const PREDEFINED = 1 << 13;
        const REGISTER = 1 << 14;
        const IMPORTED = 1 << 15;
        const TEMP = 1 << 16;
    }
}

const SYM_TAG_NAMES: &[(&str, SymTags)] = &[
    ("param", SymTags::PARAM),
    ("return", SymTags::RETURN),
    ("condition", SymTags::CONDITION),
    ("induction", SymTags::INDUCTION),
    ("alias", SymTags::ALIAS),
    ("free", SymTags::FREE),
    ("self", SymTags::SELF),
    ("static", SymTags::STATIC),
    ("subobject", SymTags::SUBOBJECT),
    ("field", SymTags::FIELD),
    ("builtin", SymTags::BUILTIN),
    ("flattened", SymTags::FLATTENED),
    ("pipelined", SymTags::PIPELINED),
    ("predefined", SymTags::PREDEFINED),
    ("register", SymTags::REGISTER),
    ("imported", SymTags::IMPORTED),
    ("temp", SymTags::TEMP),
];

impl SymTags {
    pub fn from_tag(name: &str) -> HlsResult<SymTags> {
        SYM_TAG_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
            .ok_or_else(|| Error::undefined(Id::new(name), "symbol tag"))
    }

    pub fn names(&self) -> Vec<&'static str> {
        SYM_TAG_NAMES
            .iter()
            .filter(|(_, t)| self.contains(*t))
            .map(|(n, _)| *n)
            .collect()
    }
}

/// A named value binding owned by a scope.
#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    pub name: Id,
    /// Qualified name of the owning scope.
    pub scope: Id,
    pub typ: Type,
    pub tags: SymTags,
    /// The symbol this one was cloned or renamed from.
    pub ancestor: Option<Id>,
}

impl Symbol {
    pub fn new(name: Id, scope: Id, typ: Type, tags: SymTags) -> Self {
        Symbol {
            name,
            scope,
            typ,
            tags,
            ancestor: None,
        }
    }

    pub fn is_param(&self) -> bool {
        self.tags.contains(SymTags::PARAM)
    }
    pub fn is_return(&self) -> bool {
        self.tags.contains(SymTags::RETURN)
    }
    pub fn is_field(&self) -> bool {
        self.tags.contains(SymTags::FIELD)
    }
    pub fn is_alias(&self) -> bool {
        self.tags.contains(SymTags::ALIAS)
    }
    pub fn is_static(&self) -> bool {
        self.tags.contains(SymTags::STATIC)
    }
    pub fn is_induction(&self) -> bool {
        self.tags.contains(SymTags::INDUCTION)
    }
    pub fn is_temp(&self) -> bool {
        self.tags.contains(SymTags::TEMP)
    }

    /// The original name before any SSA or clone renaming.
    pub fn orig_name(&self) -> Id {
        self.ancestor.unwrap_or(self.name).root()
    }
}

impl GetName for Symbol {
    fn name(&self) -> Id {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_round_trip() {
        let t = SymTags::PARAM | SymTags::INDUCTION;
        assert_eq!(t.names(), vec!["param", "induction"]);
        assert_eq!(SymTags::from_tag("induction").unwrap(), SymTags::INDUCTION);
        assert!(SymTags::from_tag("bogus").is_err());
    }
}
