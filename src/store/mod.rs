//! Index database: schema, classification, writing and reading back.

pub mod classify;
pub mod columns;
pub mod reader;
pub mod writer;
