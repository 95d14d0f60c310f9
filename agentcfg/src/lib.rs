//! Declarative configuration mutation engine for third-party coding agent CLIs.
//!
//! The crate points tools such as Claude Code, Codex and OpenCode at an
//! alternate API provider by editing their local config files. Every change is
//! described up front as an ordered [`mutation::Manifest`] and applied by a
//! single executor that is parameterised over a filesystem:
//!
//! - **[`core`]**: Pure, deterministic logic (outcome types, diffing, dry-run
//!   rendering, structured document merge/prune). No I/O.
//! - **[`io`]**: Side-effecting adapters (real and shadow filesystems, backups,
//!   subprocesses, templates, persisted settings).
//!
//! Orchestration modules ([`executor`], [`prerequisites`], [`pipeline`]) tie the
//! two together, and [`services`] holds the per-tool manifests.

pub mod core;
pub mod error;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod mutation;
pub mod pipeline;
pub mod prerequisites;
pub mod services;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
