pub mod deadlock;
pub mod elr;
pub mod okvl;
pub mod table;

pub use elr::{CommitLsnDependencies, ElrMode};
pub use okvl::LockMode;
pub use table::{LockKey, LockTable};
