//! Helper node models and test scaffolding built on `obn-core`.

pub mod helper_models;
pub mod test_support;
