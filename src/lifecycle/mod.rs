pub mod context;
pub mod error;
pub mod form;
pub mod instructions;
pub mod payload;
pub mod policy;
pub mod questions;
pub mod stage;
pub mod wizard;
