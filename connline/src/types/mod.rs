pub(crate) mod constants;
pub mod properties;
