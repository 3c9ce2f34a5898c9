//! Utilities used by the hop chain.

pub(crate) mod ct;
pub(crate) mod err;
pub(crate) mod wipe;
