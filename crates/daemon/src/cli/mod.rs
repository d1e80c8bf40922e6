pub mod args;
pub mod op;
pub mod ops;

pub use ops::{CaseStatus, CloseSession, Download, Init, Reconcile, Version};
