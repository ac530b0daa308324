//! Backends for the polyhls compiler.
//!
//! A backend turns a compiled [polyhls_ir::Context] into the artifacts
//! consumed downstream: the per-module [ModuleInfo] descriptions with their
//! state transition graphs, or the textual IR itself.
mod backend_opt;
mod ir_print;
mod module_info;
mod stg;
mod traits;

pub use backend_opt::BackendOpt;
pub use ir_print::IrBackend;
pub use module_info::{
    Instance, InstanceKind, ModuleInfo, ModuleKind, NextState, Ram, Signal, SignalKind,
    StateInfo, StgInfo,
};
pub use stg::StgBackend;
pub use traits::Backend;

#[cfg(feature = "serialize")]
mod json;
#[cfg(feature = "serialize")]
pub use json::JsonBackend;
