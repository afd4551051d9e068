pub mod apm;
pub mod basis;
pub mod components;
pub mod data_manager;
pub mod ih_table;
pub mod quality;
pub mod refinement;
pub mod serialization;
pub mod target;
pub mod weighting;

mod traits;

pub use traits::{LeastSquaresProblem, LeastSquaresSolver, TargetFunction};
