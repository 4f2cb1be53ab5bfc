// strata-common: shared types and wire protocol for the Strata workspace

pub mod protocol;
pub mod types;
