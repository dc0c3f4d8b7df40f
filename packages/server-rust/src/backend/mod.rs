//! Backends the launcher binary can front.

pub mod standalone;

pub use standalone::StandaloneBackend;
