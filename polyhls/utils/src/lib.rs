//! Shared utilities for the polyhls compiler.
mod errors;
mod id;
mod idx;
mod math;
mod namegenerator;
mod out_file;
mod position;
mod weight_graph;

pub use errors::{Error, ErrorCode, ErrorKind, HlsResult, MultiError};
pub use id::{GSym, GetName, Id};
pub use idx::{IndexRef, IndexedMap};
pub use math::bits_needed_for;
pub use namegenerator::NameGenerator;
pub use out_file::OutputFile;
pub use position::{Loc, WithPos};
pub use weight_graph::WeightGraph;
