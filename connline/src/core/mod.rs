pub(crate) mod context;
pub(crate) mod engine;
mod presence;
pub(crate) mod trigger;
