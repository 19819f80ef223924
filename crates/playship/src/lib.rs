//! # Playship
//!
//! A transactional publishing engine for app-store releases.
//!
//! Playship takes the packages a build produced, reconciles their version codes
//! with what the store already holds, and pushes them to a distribution track
//! inside a single remote edit. Either every step lands and the edit is
//! committed, or the edit is discarded and the store is left untouched.
//!
//! ## Pipeline
//!
//! 1. [`artifacts::resolve_artifacts`] finds binary packages, expansion files
//!    and mapping files, and loads release notes and console names.
//! 2. [`edit::EditSessionManager::open`] opens a remote edit.
//! 3. [`conflict::resolve_conflicts`] compares local version codes with the
//!    store's maximum and fails, drops or renumbers.
//! 4. The optional [`hooks::OutputProcessor`] sees the final artifacts.
//! 5. Packages, mapping files and expansion files are uploaded.
//! 6. [`track::plan_assignment`] builds the new track state, which is written
//!    along with release notes.
//! 7. The edit is committed (or discarded for a dry run).
//!
//! ## Example
//!
//! ```ignore
//! use playship::engine::{Publisher, Reporter};
//! use playship::outputs::OutputMetadataBuildSystem;
//! use playship::play_api::{PlayBackend, PlayBackendConfig};
//!
//! let config = playship_config::load_config(".".as_ref())?.resolve()?;
//! let backend = PlayBackend::new(PlayBackendConfig { /* ... */ })?;
//! let build = OutputMetadataBuildSystem::new("app/build/outputs/apk");
//! let outcome = Publisher::new(&backend, &build, &config).publish("release", &mut reporter)?;
//! ```
//!
//! ## Modules
//!
//! - [`artifacts`]: Local artifact discovery and metadata loading
//! - [`conflict`]: Version-code conflict resolution
//! - [`edit`]: Remote edit session state machine
//! - [`track`]: Track assignment and promotion
//! - [`engine`]: The publish and promote pipelines
//! - [`backend`]: The store operations the engine depends on
//! - [`outputs`]: The build-system collaborator
//! - [`play_api`]: HTTP backend for the store's edits API
//! - [`receipt`]: Publish receipts
//! - [`journal`]: Reporter and event log of a single publish

pub mod artifacts;
pub mod backend;
pub mod conflict;
pub mod edit;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod journal;
pub mod outputs;
pub mod play_api;
pub mod receipt;
pub mod track;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod property_tests;

pub use error::PublishError;
pub use playship_types as types;
