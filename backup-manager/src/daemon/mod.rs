//! Process lifecycle for the daemon binary.

pub mod shutdown;
