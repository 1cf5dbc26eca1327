//! Configuration and variant resolution for a product-line native build.
//!
//! This crate resolves a per-product build configuration, expands modules
//! into per-target and per-API-level variants, and manages snapshots of the
//! constrained device partition so it can build against a frozen ABI:
//!
//! - **Configuration** - Product variables and build options loaded from the
//!   output directory, resolved into a per-OS target matrix
//! - **Toolchains** - Per-architecture compiler and linker flag composition
//! - **Mutation passes** - Per-API-level stub expansion, snapshot capture,
//!   and source-module suppression
//! - **Packaging** - Deterministic snapshot assembly (artifacts, headers,
//!   configs, notices, descriptors) into a list file and archive
//!
//! # Architecture
//!
//! ```text
//! Config ──► Session ──► mutation passes ──► packaged snapshot
//!    │          │             │
//!    │          │             ├── api_variant: clone per API level
//!    │          │             └── snapshot: capture, then suppress
//!    │          └── shared registries (stubs, snapshots, suffixes)
//!    └── target matrix, env ledger, product variables
//! ```
//!
//! The [`config::Config`] is resolved once per invocation and read
//! concurrently afterwards; per-module passes communicate only through the
//! locked registries on [`session::Session`].

pub mod config;
pub mod module;
pub mod mutate;
pub mod package;
pub mod session;
pub mod toolchain;

pub use config::Config;
pub use module::Module;
pub use session::Session;
