//! Small helpers shared by the backup modules.

pub mod path;
pub mod retention;
