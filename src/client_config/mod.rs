//! Client-safe configuration projections.
//!
//! # Data Flow
//! ```text
//! ServerConfig + telemetry id + terms of service + signing public key
//!     → generate.rs (full / limited key-value maps)
//!     → projector.rs (hash, publish snapshot atomically)
//!     → per-request computed fields added by the server
//! ```
//!
//! # Design Decisions
//! - Maps are `BTreeMap` so serialization, and therefore the hash, is
//!   deterministic
//! - Only explicitly listed settings are projected; secrets never are

pub mod generate;
pub mod projector;

use std::collections::BTreeMap;

pub use generate::{generate_client_config, generate_limited_client_config};
pub use projector::{client_config_hash, ClientConfigProjector, ClientConfigSnapshot};

/// String-keyed client configuration.
pub type ClientConfig = BTreeMap<String, String>;
