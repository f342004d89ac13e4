//! Cross-crate tests for the zgate workspace
//!
//! Everything lives under `tests/`.
