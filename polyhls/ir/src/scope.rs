use crate::{
    Block, BlockIdx, BranchGraph, Const, Expr, LoopTree, Schedule, Stg, Stm, StmId, StmKind,
    SymTags, Symbol, Type, UseDefTable,
};
use bitflags::bitflags;
use linked_hash_map::LinkedHashMap;
use polyhls_utils::{Error, GetName, HlsResult, Id, IndexedMap, Loc, NameGenerator};
use std::collections::HashMap;
use strum::{Display, EnumString};

bitflags! {
    /// The closed vocabulary of scope tags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ScopeTags: u32 {
        const NAMESPACE = 1 << 0;
        const CLASS = 1 << 1;
        const FUNCTION = 1 << 2;
        const METHOD = 1 << 3;
        const CTOR = 1 << 4;
        const CALLABLE = 1 << 5;
        const RETURNABLE = 1 << 6;
        const MODULE = 1 << 7;
        const WORKER = 1 << 8;
        const PORT = 1 << 9;
        const TESTBENCH = 1 << 10;
        const SPECIALIZED = 1 << 11;
        const INSTANTIATED = 1 << 12;
        const LIB = 1 << 13;
        const BUILTIN = 1 << 14;
        const PURE = 1 << 15;
        const INLINELIB = 1 << 16;
        const CLOSURE = 1 << 17;
        const ENCLOSURE = 1 << 18;
    }
}

const SCOPE_TAG_NAMES: &[(&str, ScopeTags)] = &[
    ("namespace", ScopeTags::NAMESPACE),
    ("class", ScopeTags::CLASS),
    ("function", ScopeTags::FUNCTION),
    ("method", ScopeTags::METHOD),
    ("ctor", ScopeTags::CTOR),
    ("callable", ScopeTags::CALLABLE),
    ("returnable", ScopeTags::RETURNABLE),
    ("module", ScopeTags::MODULE),
    ("worker", ScopeTags::WORKER),
    ("port", ScopeTags::PORT),
    ("testbench", ScopeTags::TESTBENCH),
    ("specialized", ScopeTags::SPECIALIZED),
    ("instantiated", ScopeTags::INSTANTIATED),
    ("lib", ScopeTags::LIB),
    ("builtin", ScopeTags::BUILTIN),
    ("pure", ScopeTags::PURE),
    ("inlinelib", ScopeTags::INLINELIB),
    ("closure", ScopeTags::CLOSURE),
    ("enclosure", ScopeTags::ENCLOSURE),
];

impl ScopeTags {
    pub fn from_tag(name: &str) -> HlsResult<ScopeTags> {
        SCOPE_TAG_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
            .ok_or_else(|| Error::undefined(Id::new(name), "scope tag"))
    }

    pub fn names(&self) -> Vec<&'static str> {
        SCOPE_TAG_NAMES
            .iter()
            .filter(|(_, t)| self.contains(*t))
            .map(|(n, _)| *n)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Scheduling {
    #[default]
    Sequential,
    Parallel,
    Pipeline,
    Timed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CyclePolicy {
    #[default]
    Any,
    Minimum,
}

/// Scheduling hints attached to scopes and blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SynthParams {
    pub scheduling: Scheduling,
    pub cycle: CyclePolicy,
    /// Initiation interval of a pipeline; 0 lets the scheduler choose.
    pub ii: u32,
    /// Unroll factor; 0 means no unrolling and -1 full unrolling.
    pub unroll: i32,
}

impl SynthParams {
    /// Update one hint from its textual `key=value` form.
    pub fn set(&mut self, key: &str, val: &str) -> HlsResult<()> {
        let bad = || Error::misc(format!("invalid synthesis parameter `{key}={val}'"));
        match key {
            "scheduling" => self.scheduling = val.parse().map_err(|_| bad())?,
            "cycle" => self.cycle = val.parse().map_err(|_| bad())?,
            "ii" => self.ii = val.parse().map_err(|_| bad())?,
            "unroll" => {
                self.unroll = if val == "full" {
                    -1
                } else {
                    val.parse().map_err(|_| bad())?
                }
            }
            _ => return Err(Error::undefined(Id::new(key), "synthesis parameter")),
        }
        Ok(())
    }

    pub fn is_pipeline(&self) -> bool {
        self.scheduling == Scheduling::Pipeline
    }
}

impl std::fmt::Display for SynthParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scheduling={} cycle={} ii={} unroll={}",
            self.scheduling,
            self.cycle,
            self.ii,
            if self.unroll < 0 {
                "full".to_string()
            } else {
                self.unroll.to_string()
            }
        )
    }
}

/// A formal parameter and its default value.
#[derive(Clone, Debug)]
pub struct Param {
    pub sym: Id,
    pub default: Option<Expr>,
}

/// A named node of the scope tree: namespace, class, function, method,
/// worker or module. Function-like scopes own a CFG.
#[derive(Clone, Debug)]
pub struct Scope {
    /// Fully qualified name, e.g. `@top.Foo.run`.
    pub name: Id,
    pub parent: Option<Id>,
    pub children: Vec<Id>,
    pub tags: ScopeTags,
    pub symbols: LinkedHashMap<Id, Symbol>,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub bases: Vec<Id>,
    pub blocks: IndexedMap<BlockIdx, Block>,
    pub entry: Option<BlockIdx>,
    pub exit: Option<BlockIdx>,
    pub synth_params: SynthParams,
    /// Use-def table; `None` when stale.
    pub usedef: Option<UseDefTable>,
    pub loop_tree: Option<LoopTree>,
    pub branch_graph: Option<BranchGraph>,
    /// Symbols with statically known values.
    pub constants: LinkedHashMap<Id, Const>,
    /// The scope this one was specialized or cloned from.
    pub origin: Option<Id>,
    pub asap_latency: Option<u32>,
    pub schedule: Option<Schedule>,
    pub stgs: Vec<Stg>,
    pub loc: Loc,
    next_stm: u32,
    namegen: NameGenerator,
}

impl GetName for Scope {
    fn name(&self) -> Id {
        self.name
    }
}

impl Scope {
    pub fn new(name: Id, tags: ScopeTags) -> Self {
        Scope {
            name,
            parent: name.parent(),
            children: vec![],
            tags,
            symbols: LinkedHashMap::new(),
            params: vec![],
            return_type: Type::undef(),
            bases: vec![],
            blocks: IndexedMap::new(),
            entry: None,
            exit: None,
            synth_params: SynthParams::default(),
            usedef: None,
            loop_tree: None,
            branch_graph: None,
            constants: LinkedHashMap::new(),
            origin: None,
            asap_latency: None,
            schedule: None,
            stgs: vec![],
            loc: Loc::unknown(),
            next_stm: 0,
            namegen: NameGenerator::default(),
        }
    }

    pub fn is_namespace(&self) -> bool {
        self.tags.contains(ScopeTags::NAMESPACE)
    }
    pub fn is_class(&self) -> bool {
        self.tags.contains(ScopeTags::CLASS)
    }
    pub fn is_function(&self) -> bool {
        self.tags.contains(ScopeTags::FUNCTION)
    }
    pub fn is_method(&self) -> bool {
        self.tags.contains(ScopeTags::METHOD)
    }
    pub fn is_ctor(&self) -> bool {
        self.tags.contains(ScopeTags::CTOR)
    }
    pub fn is_module(&self) -> bool {
        self.tags.contains(ScopeTags::MODULE)
    }
    pub fn is_worker(&self) -> bool {
        self.tags.contains(ScopeTags::WORKER)
    }
    pub fn is_testbench(&self) -> bool {
        self.tags.contains(ScopeTags::TESTBENCH)
    }
    pub fn is_lib(&self) -> bool {
        self.tags.intersects(ScopeTags::LIB | ScopeTags::BUILTIN)
    }
    pub fn is_pure(&self) -> bool {
        self.tags.contains(ScopeTags::PURE)
    }
    pub fn is_closure(&self) -> bool {
        self.tags.contains(ScopeTags::CLOSURE)
    }

    /// Scopes whose body is compiled: functions, methods and workers.
    pub fn is_function_like(&self) -> bool {
        self.tags
            .intersects(ScopeTags::FUNCTION | ScopeTags::METHOD | ScopeTags::WORKER)
            && !self.is_lib()
    }

    /* ============= Symbols ============= */

    pub fn sym(&self, name: Id) -> Option<&Symbol> {
        self.symbols.get(&name)
    }

    pub fn sym_mut(&mut self, name: Id) -> Option<&mut Symbol> {
        self.symbols.get_mut(&name)
    }

    pub fn has_sym(&self, name: Id) -> bool {
        self.symbols.contains_key(&name)
    }

    /// Add a symbol, replacing a previous one with the same name.
    pub fn add_sym(&mut self, name: Id, typ: Type, tags: SymTags) -> &mut Symbol {
        self.namegen.add_names([name]);
        self.symbols.remove(&name);
        self.symbols
            .entry(name)
            .or_insert(Symbol::new(name, self.name, typ, tags))
    }

    pub fn del_sym(&mut self, name: Id) -> Option<Symbol> {
        self.symbols.remove(&name)
    }

    /// Create a fresh symbol `{prefix}#N` recording `prefix` as its ancestor.
    pub fn gen_sym(&mut self, prefix: Id, typ: Type, tags: SymTags) -> Id {
        let base = prefix.root();
        loop {
            let name = self.namegen.gen_name(base, "#");
            if !self.symbols.contains_key(&name) {
                let ancestor = Some(prefix);
                let sym = self.add_sym(name, typ, tags);
                sym.ancestor = ancestor;
                return name;
            }
        }
    }

    /// Create a fresh compiler temporary.
    pub fn gen_temp(&mut self, typ: Type) -> Id {
        self.gen_sym(Id::new("@t"), typ, SymTags::TEMP)
    }

    pub fn param_names(&self) -> Vec<Id> {
        self.params.iter().map(|p| p.sym).collect()
    }

    /// The symbol holding the return value, if the scope returns.
    pub fn return_sym(&self) -> Option<Id> {
        self.symbols.values().find(|s| s.is_return()).map(|s| s.name)
    }

    pub fn self_sym(&self) -> Option<Id> {
        self.symbols
            .values()
            .find(|s| s.tags.contains(SymTags::SELF))
            .map(|s| s.name)
    }

    /* ============= Blocks and statements ============= */

    pub fn new_block(&mut self) -> BlockIdx {
        let blk = Block::new(self.synth_params);
        self.blocks.push(blk)
    }

    pub fn block(&self, idx: BlockIdx) -> &Block {
        &self.blocks[idx]
    }

    pub fn block_mut(&mut self, idx: BlockIdx) -> &mut Block {
        &mut self.blocks[idx]
    }

    /// Live blocks in index order.
    pub fn live_blocks(&self) -> Vec<BlockIdx> {
        self.blocks
            .iter()
            .filter(|(_, b)| !b.removed)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_body(&self) -> bool {
        self.entry.is_some()
    }

    pub fn entry(&self) -> HlsResult<BlockIdx> {
        self.entry
            .ok_or_else(|| Error::malformed(format!("scope `{}' has no entry block", self.name)))
    }

    pub fn next_stm_id(&mut self) -> StmId {
        let id = StmId(self.next_stm);
        self.next_stm += 1;
        id
    }

    /// Create a statement with a fresh id. The statement is not placed in
    /// any block.
    pub fn mk_stm(&mut self, kind: StmKind, loc: Loc) -> Stm {
        let id = self.next_stm_id();
        Stm::new(id, kind, loc)
    }

    /// Give a statement a fresh id, used when statements are copied.
    pub fn renumber(&mut self, mut stm: Stm) -> Stm {
        stm.id = self.next_stm_id();
        stm
    }

    /// Find the block and position of a statement.
    pub fn find_stm(&self, id: StmId) -> Option<(BlockIdx, usize)> {
        if let Some(ud) = &self.usedef {
            if let Some(blk) = ud.block_of(id) {
                if let Some(pos) = self.blocks[blk].stms.iter().position(|s| s.id == id) {
                    return Some((blk, pos));
                }
            }
        }
        self.blocks.iter().filter(|(_, b)| !b.removed).find_map(|(i, b)| {
            b.stms.iter().position(|s| s.id == id).map(|p| (i, p))
        })
    }

    pub fn stm(&self, id: StmId) -> Option<&Stm> {
        let (blk, pos) = self.find_stm(id)?;
        Some(&self.blocks[blk].stms[pos])
    }

    /// Every live statement with its block, in block index order.
    pub fn all_stms(&self) -> impl Iterator<Item = (BlockIdx, &Stm)> {
        self.blocks
            .iter()
            .filter(|(_, b)| !b.removed)
            .flat_map(|(i, b)| b.stms.iter().map(move |s| (i, s)))
    }

    /// A map from statement id to its position, for bulk lookups.
    pub fn stm_positions(&self) -> HashMap<StmId, (BlockIdx, usize)> {
        self.blocks
            .iter()
            .filter(|(_, b)| !b.removed)
            .flat_map(|(i, b)| b.stms.iter().enumerate().map(move |(p, s)| (s.id, (i, p))))
            .collect()
    }

    /// Drop every cached analysis after a structural change.
    pub fn invalidate(&mut self) {
        self.usedef = None;
        self.loop_tree = None;
        self.branch_graph = None;
    }

    /// A copy of this scope under a new name. Analyses are not copied.
    pub fn clone_as(&self, name: Id) -> Scope {
        let mut s = self.clone();
        s.name = name;
        s.parent = name.parent();
        s.children = vec![];
        s.origin = Some(self.name);
        for (_, sym) in s.symbols.iter_mut() {
            sym.scope = name;
        }
        s.invalidate();
        s.schedule = None;
        s.stgs = vec![];
        s.asap_latency = None;
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synth_params_parse() {
        let mut p = SynthParams::default();
        p.set("scheduling", "pipeline").unwrap();
        p.set("ii", "2").unwrap();
        p.set("cycle", "minimum").unwrap();
        assert!(p.is_pipeline());
        assert_eq!(p.to_string(), "scheduling=pipeline cycle=minimum ii=2 unroll=0");
        assert!(p.set("ii", "x").is_err());
    }

    #[test]
    fn fresh_symbols() {
        let mut s = Scope::new(Id::new("@top.f"), ScopeTags::FUNCTION);
        s.add_sym(Id::new("x"), Type::int(32, true), SymTags::empty());
        let x0 = s.gen_sym(Id::new("x"), Type::int(32, true), SymTags::empty());
        let x1 = s.gen_sym(Id::new("x#0"), Type::int(32, true), SymTags::empty());
        assert_eq!(x0, Id::new("x#0"));
        assert_eq!(x1, Id::new("x#1"));
        assert_eq!(s.sym(x1).unwrap().orig_name(), Id::new("x"));
        assert_eq!(s.parent, Some(Id::new("@top")));
    }
}
