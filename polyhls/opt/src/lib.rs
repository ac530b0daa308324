//! # polyhls optimizer
//!
//! Passes over the polyhls IR. A [pass_manager::PassManager] holds every
//! registered pass and the aliases grouping them into pipelines; the
//! default set is built by [pass_manager::PassManager::default_passes].
//!
//! ```rust,ignore
//! use polyhls_opt::pass_manager::PassManager;
//! let pm = PassManager::default_passes()?;
//! pm.execute_plan(&mut ctx, &["all".to_string()], &[], false)?;
//! ```
pub mod analysis;
pub mod default_passes;
pub mod pass_manager;
pub mod passes;
pub mod traversal;
