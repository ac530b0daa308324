//! Path expressions: the condition under which control reaches a block
//! from the scope entry, kept in disjunctive normal form.
use polyhls_ir::{BlockIdx, Expr, Scope, StmKind, cfg};
use std::collections::BTreeMap;

/// A conjunction of literals.
pub type Term = Vec<Expr>;

/// A disjunction of [Term]s. The empty disjunction is false; a disjunction
/// holding the empty term is true.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PathCond {
    pub terms: Vec<Term>,
}

fn negated(a: &Expr, b: &Expr) -> bool {
    Expr::not(a.clone()) == *b
}

impl PathCond {
    pub fn always() -> Self {
        PathCond { terms: vec![vec![]] }
    }

    pub fn never() -> Self {
        PathCond { terms: vec![] }
    }

    pub fn is_always(&self) -> bool {
        self.terms.iter().any(|t| t.is_empty())
    }

    pub fn is_never(&self) -> bool {
        self.terms.is_empty()
    }

    /// Conjoin every term with `lit`.
    pub fn and_lit(&self, lit: &Expr) -> Self {
        if lit.as_const().and_then(|c| c.is_true()) == Some(true) {
            return self.clone();
        }
        let mut terms = vec![];
        for t in &self.terms {
            if t.iter().any(|l| negated(l, lit)) {
                continue;
            }
            let mut t = t.clone();
            if !t.contains(lit) {
                t.push(lit.clone());
            }
            terms.push(t);
        }
        PathCond { terms }.simplify()
    }

    pub fn or(&self, other: &PathCond) -> Self {
        let mut terms = self.terms.clone();
        for t in &other.terms {
            if !terms.contains(t) {
                terms.push(t.clone());
            }
        }
        PathCond { terms }.simplify()
    }

    /// Merge pairs of terms that differ in a single complementary literal,
    /// `(A & c) | (A & !c) == A`, until nothing changes.
    fn simplify(mut self) -> Self {
        if self.is_always() {
            return PathCond::always();
        }
        'again: loop {
            for i in 0..self.terms.len() {
                for j in (i + 1)..self.terms.len() {
                    if let Some(merged) = merge(&self.terms[i], &self.terms[j]) {
                        self.terms.remove(j);
                        self.terms[i] = merged;
                        if self.terms[i].is_empty() {
                            return PathCond::always();
                        }
                        continue 'again;
                    }
                }
            }
            return self;
        }
    }

    /// Can both conditions hold at once? Conservative: only complementary
    /// literals prove exclusion.
    pub fn is_exclusive_with(&self, other: &PathCond) -> bool {
        if self.is_never() || other.is_never() {
            return false;
        }
        self.terms.iter().all(|a| {
            other
                .terms
                .iter()
                .all(|b| a.iter().any(|la| b.iter().any(|lb| negated(la, lb))))
        })
    }

    pub fn to_expr(&self) -> Expr {
        self.terms
            .iter()
            .map(|t| {
                t.iter()
                    .cloned()
                    .reduce(Expr::and)
                    .unwrap_or_else(|| Expr::bool(true))
            })
            .reduce(Expr::or)
            .unwrap_or_else(|| Expr::bool(false))
    }
}

fn merge(a: &Term, b: &Term) -> Option<Term> {
    if a.len() != b.len() {
        // Absorption: A | (A & c) == A
        let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };
        return short.iter().all(|l| long.contains(l)).then(|| short.clone());
    }
    let only_a: Vec<&Expr> = a.iter().filter(|l| !b.contains(l)).collect();
    let only_b: Vec<&Expr> = b.iter().filter(|l| !a.contains(l)).collect();
    match (only_a.as_slice(), only_b.as_slice()) {
        ([], []) => Some(a.clone()),
        ([x], [y]) if negated(x, y) => Some(a.iter().filter(|l| l != x).cloned().collect()),
        _ => None,
    }
}

/// Condition attached to the edge `from -> to` by the terminator of `from`.
pub fn edge_cond(scope: &Scope, from: BlockIdx, to: BlockIdx) -> Vec<Expr> {
    let Some(term) = scope.block(from).terminator() else {
        return vec![];
    };
    match &term.kind {
        StmKind::CJump { cond, t, f } if t != f => {
            if *t == to {
                vec![cond.clone()]
            } else {
                vec![Expr::not(cond.clone())]
            }
        }
        StmKind::MCJump { conds, targets } => {
            // The first true arm wins.
            let mut lits = vec![];
            for (c, t) in conds.iter().zip(targets) {
                if *t == to {
                    lits.push(c.clone());
                    break;
                }
                lits.push(Expr::not(c.clone()));
            }
            lits.retain(|l| l.as_const().and_then(|c| c.is_true()) != Some(true));
            lits
        }
        _ => vec![],
    }
}

/// Path conditions of every reachable block, computed over forward edges in
/// topological order.
pub fn path_conds(scope: &Scope) -> BTreeMap<BlockIdx, PathCond> {
    let mut out: BTreeMap<BlockIdx, PathCond> = BTreeMap::new();
    let order = cfg::topo_order(scope);
    for (i, &b) in order.iter().enumerate() {
        if i == 0 {
            out.insert(b, PathCond::always());
            continue;
        }
        let mut acc = PathCond::never();
        for p in scope.block(b).fwd_preds() {
            let Some(pc) = out.get(&p) else { continue };
            let mut pc = pc.clone();
            for lit in edge_cond(scope, p, b) {
                pc = pc.and_lit(&lit);
            }
            acc = acc.or(&pc);
        }
        out.insert(b, acc);
    }
    out
}

/// The predicate of each phi argument of `blk`: the path condition of the
/// matching predecessor conjoined with its edge condition.
pub fn phi_predicates(
    scope: &Scope,
    conds: &BTreeMap<BlockIdx, PathCond>,
    blk: BlockIdx,
) -> Vec<Expr> {
    scope
        .block(blk)
        .preds
        .iter()
        .map(|p| {
            let mut pc = conds.get(p).cloned().unwrap_or_else(PathCond::always);
            for lit in edge_cond(scope, *p, blk) {
                pc = pc.and_lit(&lit);
            }
            pc.to_expr()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complementary_terms_merge() {
        let c = Expr::temp("c");
        let d = Expr::temp("d");
        let a = PathCond::always().and_lit(&c).and_lit(&d);
        let b = PathCond::always().and_lit(&c).and_lit(&Expr::not(d.clone()));
        assert_eq!(a.or(&b), PathCond::always().and_lit(&c));
        let nc = PathCond::always().and_lit(&Expr::not(c.clone()));
        assert!(a.is_exclusive_with(&nc));
        assert!(a.is_exclusive_with(&b.or(&nc)));
        assert!(PathCond::always().and_lit(&c).or(&nc).is_always());
    }

    #[test]
    fn expression_form() {
        let c = Expr::temp("c");
        assert_eq!(PathCond::always().and_lit(&c).to_expr(), c);
        assert_eq!(PathCond::never().to_expr(), Expr::bool(false));
        assert_eq!(PathCond::always().to_expr(), Expr::bool(true));
    }
}
