//! Runtime traits for the device collaborator

pub mod context;

pub use context::ExecutionContext;
