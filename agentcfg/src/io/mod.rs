//! Side-effecting adapters used by the mutation engine.

pub mod backup;
pub mod fs;
pub mod process;
pub mod settings;
pub mod shadow;
pub mod templates;
