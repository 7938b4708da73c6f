//! Directory walking and the session that drives one indexing run.

pub mod cancel;
pub mod session;
pub mod walker;
