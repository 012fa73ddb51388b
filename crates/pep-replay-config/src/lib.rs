// crates/pep-replay-config/src/lib.rs
// ============================================================================
// Module: PEP Replay Config Library
// Description: Immutable configuration model for the replay client.
// Purpose: Single source of truth for config.yml semantics.
// Dependencies: pep-replay-core, serde, serde_yaml, url
// ============================================================================

//! ## Overview
//! `pep-replay-config` loads the replay client's YAML configuration,
//! populates defaults, and validates it fail-closed into a [`ReplayConfig`]
//! value. The value is built once at startup and passed by reference; no
//! component reads configuration from ambient global state.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
