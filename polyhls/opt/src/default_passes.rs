//! Defines the default passes available to [PassManager].
use crate::passes::{
    AliasVarDetector, BlockReducer, CallGraphBuilder, ConstantOpt, CopyOpt, DeadCodeEliminator,
    EarlyConstantOpt, EarlyRestrictionChecker, FlattenFieldAccess, FlattenModule, Inliner,
    LateRestrictionChecker, ListSsa, LoopDetector, ModuleChecker, ObjCopyOpt, ObjectSsa,
    ObjectTransformer, PathExpTracer, PhiCondResolver, PhiInlining, PolyadConstantFolding,
    PortAccessChecker, PortTypeProp, ScalarSsa, Scheduler, SimpleLoopUnroll, StgBuilder,
    TupleSsa, TypeChecker, TypePropagation, UnusedScopeRemoval, UsePhiMaterializer, WellFormed,
};
use crate::traversal::Named;
use crate::{pass_manager::PassManager, pass_manager::PassResult, register_alias};

impl PassManager {
    pub fn default_passes() -> PassResult<Self> {
        // Construct the pass manager and register all passes.
        let mut pm = PassManager::default();

        // Validation passes
        pm.register_diagnostic::<EarlyRestrictionChecker>()?;
        pm.register_diagnostic::<WellFormed>()?;
        pm.register_diagnostic::<TypeChecker>()?;
        pm.register_diagnostic::<ModuleChecker>()?;
        pm.register_diagnostic::<PortAccessChecker>()?;
        pm.register_diagnostic::<LateRestrictionChecker>()?;

        // Typing
        pm.register_pass::<TypePropagation>()?;
        pm.register_pass::<PortTypeProp>()?;

        // Structural passes
        pm.register_pass::<BlockReducer>()?;
        pm.register_pass::<Inliner>()?;
        pm.register_pass::<FlattenFieldAccess>()?;
        pm.register_pass::<FlattenModule>()?;
        pm.register_pass::<ObjectTransformer>()?;
        pm.register_pass::<CallGraphBuilder>()?;
        pm.register_pass::<UnusedScopeRemoval>()?;

        // SSA construction
        pm.register_pass::<PathExpTracer>()?;
        pm.register_pass::<ScalarSsa>()?;
        pm.register_pass::<TupleSsa>()?;
        pm.register_pass::<ListSsa>()?;
        pm.register_pass::<ObjectSsa>()?;
        pm.register_pass::<UsePhiMaterializer>()?;

        // Optimization passes
        pm.register_pass::<EarlyConstantOpt>()?;
        pm.register_pass::<ConstantOpt>()?;
        pm.register_pass::<CopyOpt>()?;
        pm.register_pass::<ObjCopyOpt>()?;
        pm.register_pass::<PhiInlining>()?;
        pm.register_pass::<PolyadConstantFolding>()?;
        pm.register_pass::<DeadCodeEliminator>()?;

        // Loops
        pm.register_pass::<LoopDetector>()?;
        pm.register_pass::<SimpleLoopUnroll>()?;

        // Scheduling and lowering
        pm.register_pass::<AliasVarDetector>()?;
        pm.register_pass::<PhiCondResolver>()?;
        pm.register_pass::<Scheduler>()?;
        pm.register_pass::<StgBuilder>()?;

        register_alias!(pm, "frontend-checks", [EarlyRestrictionChecker, WellFormed]);
        register_alias!(
            pm,
            "early",
            [
                TypePropagation,
                PortTypeProp,
                EarlyConstantOpt,
                TypeChecker,
                BlockReducer
            ]
        );
        register_alias!(
            pm,
            "inline",
            [
                Inliner,
                FlattenFieldAccess,
                FlattenModule,
                ObjectTransformer,
                CallGraphBuilder,
                UnusedScopeRemoval,
                EarlyConstantOpt,
                BlockReducer
            ]
        );
        register_alias!(
            pm,
            "ssa",
            [
                PathExpTracer,
                ScalarSsa,
                TupleSsa,
                ListSsa,
                ObjectSsa,
                UsePhiMaterializer
            ]
        );
        register_alias!(
            pm,
            "ssa-opt",
            [
                ConstantOpt,
                CopyOpt,
                ObjCopyOpt,
                PhiInlining,
                PolyadConstantFolding,
                ConstantOpt, // Folds what polyad folding exposed
                DeadCodeEliminator,
                ModuleChecker,
                PortAccessChecker
            ]
        );
        register_alias!(
            pm,
            "loops",
            [LoopDetector, SimpleLoopUnroll, LateRestrictionChecker]
        );
        register_alias!(
            pm,
            "schedule",
            [AliasVarDetector, PhiCondResolver, Scheduler]
        );
        register_alias!(pm, "stg", [StgBuilder]);
        register_alias!(
            pm,
            "all",
            [
                "frontend-checks",
                "early",
                "inline",
                "ssa",
                "ssa-opt",
                "loops",
                "schedule",
                "stg"
            ]
        );

        Ok(pm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_expand_in_order() {
        let pm = PassManager::default_passes().unwrap();
        let help = pm.specific_help("schedule").unwrap();
        let lines: Vec<_> = help.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec!["- alias-var-detector", "- phi-cond-resolver", "- scheduler"]
        );
        let all = pm.specific_help("all").unwrap();
        assert!(all.lines().nth(1).unwrap().contains("early-restriction-checker"));
        assert!(all.lines().last().unwrap().contains("stg-builder"));
    }

    #[test]
    fn every_pass_has_help() {
        let pm = PassManager::default_passes().unwrap();
        let help = pm.complete_help();
        for name in [Inliner::name(), ScalarSsa::name(), StgBuilder::name()] {
            assert!(help.contains(&format!("- {name}: ")), "{name} missing");
        }
    }
}
