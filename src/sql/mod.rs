//! Statement generation shared by the migration planner and the batch loader.

pub mod ddl;
mod escape;

pub use escape::{escape_literal, quote_identifier};
