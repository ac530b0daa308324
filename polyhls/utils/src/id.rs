use std::cmp::Ordering;

pub type GSym = symbol_table::GlobalSymbol;

/// Represents an identifier in the IR: scope names, symbol names and
/// builtin names are all interned into one global table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize), serde(transparent))]
pub struct Id {
    pub id: GSym,
}

impl Id {
    pub fn new<S: ToString>(id: S) -> Self {
        Self {
            id: GSym::from(id.to_string()),
        }
    }

    /// The part of the name before an SSA version marker `#`.
    pub fn root(&self) -> Id {
        match self.as_ref().split_once('#') {
            Some((root, _)) => Id::new(root),
            None => *self,
        }
    }

    /// The last component of a dotted qualified name.
    pub fn base(&self) -> &'static str {
        let s = self.id.as_str();
        s.rsplit('.').next().unwrap_or(s)
    }

    /// Concatenate a dotted component onto this name.
    pub fn child(&self, name: impl AsRef<str>) -> Id {
        Id::new(format!("{}.{}", self.as_ref(), name.as_ref()))
    }

    /// The dotted prefix of this name, if it has one.
    pub fn parent(&self) -> Option<Id> {
        self.as_ref().rsplit_once('.').map(|(p, _)| Id::new(p))
    }
}

/* =================== Impls for Id to make them easier to use ============== */

impl Default for Id {
    fn default() -> Self {
        Id::new("")
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id.as_str())
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id.as_str())
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.id.as_str()
    }
}

// Ordering is lexicographic so that every iteration over sorted ids (call
// graph orders, emitted STGs) is stable from run to run.
impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_ref().cmp(other.as_ref())
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::new(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::new(s)
    }
}

impl PartialEq<str> for Id {
    fn eq(&self, other: &str) -> bool {
        self.id == GSym::from(other)
    }
}

impl PartialEq<&str> for Id {
    fn eq(&self, other: &&str) -> bool {
        self.id == GSym::from(*other)
    }
}

impl PartialEq<String> for Id {
    fn eq(&self, other: &String) -> bool {
        self.id == GSym::from(other.as_str())
    }
}

/// A trait representing something in the IR that has a name.
pub trait GetName {
    /// Return a reference to the object's name
    fn name(&self) -> Id;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_parts() {
        let id = Id::new("@top.Foo.run");
        assert_eq!(id.base(), "run");
        assert_eq!(id.parent(), Some(Id::new("@top.Foo")));
        assert_eq!(Id::new("@top").parent(), None);
        assert_eq!(Id::new("@top").child("f"), Id::new("@top.f"));
    }

    #[test]
    fn ssa_root() {
        assert_eq!(Id::new("x#3").root(), Id::new("x"));
        assert_eq!(Id::new("x").root(), Id::new("x"));
    }
}
