//! End-to-end smoke coverage lives in `tests/smoke.rs`; nothing is exported.
