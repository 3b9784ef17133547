//! Memory ceiling tracking, admission control and cache eviction.

pub(crate) mod ledger;
pub(crate) mod monitor;
pub(crate) mod probe;
