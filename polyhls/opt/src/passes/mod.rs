//! Passes for the polyhls compiler.
mod alias_var;
mod block_reducer;
mod call_graph_builder;
mod constant_opt;
mod copy_opt;
mod dce;
mod flatten;
mod inliner;
mod loop_detector;
mod module_checker;
mod object_transformer;
mod path_exp_tracer;
mod phi_inlining;
mod phi_resolver;
mod polyad;
mod port_type_prop;
mod restriction;
mod scheduling;
mod ssa;
mod stg_builder;
mod type_check;
mod type_prop;
mod unroll;
mod use_phi;
mod well_formed;

pub use alias_var::AliasVarDetector;
pub use block_reducer::BlockReducer;
pub use call_graph_builder::{CallGraphBuilder, UnusedScopeRemoval};
pub use constant_opt::{ConstantOpt, EarlyConstantOpt};
pub use copy_opt::{CopyOpt, ObjCopyOpt};
pub use dce::DeadCodeEliminator;
pub use flatten::{FlattenFieldAccess, FlattenModule};
pub use inliner::Inliner;
pub use loop_detector::LoopDetector;
pub use module_checker::{ModuleChecker, PortAccessChecker};
pub use object_transformer::ObjectTransformer;
pub use path_exp_tracer::PathExpTracer;
pub use phi_inlining::PhiInlining;
pub use phi_resolver::PhiCondResolver;
pub use polyad::PolyadConstantFolding;
pub use port_type_prop::PortTypeProp;
pub use restriction::{EarlyRestrictionChecker, LateRestrictionChecker};
pub use scheduling::Scheduler;
pub use ssa::{
    Lists, ObjectSsa, Objects, ListSsa, ScalarSsa, Scalars, Ssa, SsaClass, TupleSsa, Tuples,
};
pub use stg_builder::StgBuilder;
pub use type_check::TypeChecker;
pub use type_prop::{PropError, TypePropagation};
pub use unroll::{FULL_UNROLL_LIMIT, SimpleLoopUnroll};
pub use use_phi::UsePhiMaterializer;
pub use well_formed::WellFormed;
