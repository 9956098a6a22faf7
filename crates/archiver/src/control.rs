//! Archiver-specific activation control: a thin re-export of the common
//! daemon activation protocol, named the way the original log archiver
//! design names its control block.

pub use mini_aurora_common::DaemonControl as ArchiverControl;
