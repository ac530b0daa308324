//! Facts captured by running the source program, injected before
//! compilation.
use crate::Const;
use linked_hash_map::LinkedHashMap;
use polyhls_utils::Id;

/// A module object created at elaboration time.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleInstance {
    /// Qualified name of the global holding the instance.
    pub name: Id,
    /// Qualified name of the module class.
    pub class: Id,
    /// Constant constructor arguments.
    pub args: Vec<Const>,
}

/// A worker registered on an instance by `append_worker`.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerBinding {
    pub instance: Id,
    pub func: Id,
}

#[derive(Clone, Debug, Default)]
pub struct RuntimeInfo {
    /// Values of global variables, keyed by qualified name.
    pub global_constants: LinkedHashMap<Id, Const>,
    pub instances: Vec<ModuleInstance>,
    pub workers: Vec<WorkerBinding>,
}

impl RuntimeInfo {
    pub fn global_constant(&self, name: Id) -> Option<&Const> {
        self.global_constants.get(&name)
    }

    pub fn workers_of(&self, instance: Id) -> impl Iterator<Item = Id> + '_ {
        self.workers
            .iter()
            .filter(move |w| w.instance == instance)
            .map(|w| w.func)
    }
}
