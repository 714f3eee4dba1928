mod assemble;
mod build;
pub mod case;
mod continuation;
pub mod control;
pub mod device;
mod ecfopt;
pub mod ecfsoln;
mod error;
pub mod index;
pub mod infeasibility;
mod limiting;
pub mod linsolve;
pub mod multiperiod;
mod newton;
pub mod oplimits;
mod runecf;
mod triplet;

pub use assemble::{residual, Assembler, Shadow};
pub use build::{build, CaseContext};
pub use ecfopt::*;
pub use error::*;
pub use newton::{solve_ecf, NewtonOutcome, PrintProgress, ProgressMonitor};
pub use runecf::*;
pub use triplet::{csr_entries, CsrMatrix, ReducedSystem, Triplets};
