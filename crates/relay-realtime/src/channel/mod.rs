//! Topic membership tracking.

pub mod registry;
pub mod topic;
