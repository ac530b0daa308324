use crate::Id;
use std::collections::{HashMap, HashSet};

/// Simple HashMap-based name generator that generates new names for each
/// prefix.
#[derive(Clone, Debug, Default)]
pub struct NameGenerator {
    name_hash: HashMap<Id, i64>,
    generated_names: HashSet<Id>,
}

impl NameGenerator {
    /// Create a NameGenerator where `names` are already defined so that this generator
    /// will never generate those names.
    pub fn with_prev_defined_names(names: HashSet<Id>) -> Self {
        NameGenerator {
            generated_names: names,
            name_hash: HashMap::default(),
        }
    }

    /// Add generated names
    pub fn add_names(&mut self, names: impl IntoIterator<Item = Id>) {
        self.generated_names.extend(names)
    }

    /// Returns a new name that starts with `prefix` and is joined to a counter
    /// by `sep`.
    /// ```
    /// # use polyhls_utils::NameGenerator;
    /// let mut namegen = NameGenerator::default();
    /// assert_eq!(namegen.gen_name("x", "#").as_ref(), "x#0");
    /// assert_eq!(namegen.gen_name("x", "#").as_ref(), "x#1");
    /// ```
    pub fn gen_name<S>(&mut self, prefix: S, sep: &str) -> Id
    where
        S: Into<Id>,
    {
        let prefix: Id = prefix.into();
        loop {
            let count = self
                .name_hash
                .entry(prefix)
                .and_modify(|v| *v += 1)
                .or_insert(0);
            let name = Id::new(format!("{prefix}{sep}{count}"));

            // If we've not generated this name before, return it.
            if !self.generated_names.contains(&name) {
                self.generated_names.insert(name);
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_defined_names() {
        let mut ng = NameGenerator::with_prev_defined_names(
            [Id::new("t0"), Id::new("t1")].into_iter().collect(),
        );
        assert_eq!(ng.gen_name("t", ""), Id::new("t2"));
        assert_eq!(ng.gen_name("t", ""), Id::new("t3"));
    }
}
