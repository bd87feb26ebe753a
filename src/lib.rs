// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Cortex - composable model cells
//!
//! Cortex builds models out of named cells whose dimensions are inferred
//! from links to datasets and to each other. Cells are declared first,
//! linked, and constructed lazily once every argument can be resolved.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! cortex = "0.1"  # Default: models + config + observability
//! ```
//!
//! ```rust
//! use cortex::prelude::*;
//! use serde_json::json;
//!
//! let mut ctx = BuildContext::new();
//! ctx.add_dataset("data", DatasetInfo::new().with_dim("input", json!(784)));
//!
//! let mut kwargs = Kwargs::new();
//! kwargs.insert("dim_out".to_string(), json!(10));
//! ctx.prepare_cell("MLP", None, Some("mlp"), kwargs)?;
//! ctx.add_link("data.input", "mlp.input")?;
//! ctx.build(None)?;
//!
//! assert!(ctx.cell("mlp")?.total_params() > 0);
//! # Ok::<(), cortex::models::ModelError>(())
//! ```
//!
//! ## Feature Flags
//!
//! - **`observability`** (default): `tracing-subscriber` initialisation and
//!   per-crate `--debug-<crate>` flags
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: cortex-config, cortex-observability        │
//! │  (BuildConfig, logging)                                 │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Models: cortex-models                                  │
//! │  (BuildContext, Link, Cell, layers)                     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## License
//!
//! Apache-2.0

pub use cortex_config as config;
pub use cortex_models as models;

#[cfg(feature = "observability")]
pub use cortex_observability as observability;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{BuildConfig, CortexConfig};
    pub use crate::models::{
        BuildContext, Cell, CellClass, ClassSpec, ComponentTemplate, DatasetInfo, Kwargs, KwargsExt,
        ModelError, ModelResult, Outputs, SampleRequest,
    };
}
