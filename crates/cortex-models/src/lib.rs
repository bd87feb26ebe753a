// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # cortex-models
//!
//! Composable model cells with deferred construction.
//!
//! Models are assembled from **cells**: parameterized units that may own
//! other cells as components. Cells are declared by name in a
//! [`BuildContext`] and connected by **links** (`"source.port->target.port"`)
//! that carry dimensions and distribution types between cells and datasets.
//! Arguments a cell is missing are filled from its links when the cell is
//! built, so a model can be described before every dimension is known.
//!
//! Parameters are registered in the context by full name and shared by
//! handle: rebuilding a cell under the same name reuses its parameters.
//!
//! ## Modules
//!
//! - [`context`]: declaration, linking, building and the parameter registry
//! - [`cell`]: built cells, class metadata and component templates
//! - [`link`]: link endpoints and dimension resolution
//! - [`layers`]: the built-in cell classes (MLP, RNN family, CNN2D)
//! - [`distributions`]: output distributions used by generative cells

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod attrs;
pub mod cell;
pub mod context;
pub mod datasets;
pub mod distributions;
pub mod init;
pub mod layers;
pub mod link;
pub mod noise;
pub mod ops;
pub mod registry;
pub mod rng;
pub mod types;

pub use attrs::KwargsExt;
pub use cell::{
    ArgView, Cell, CellClass, ClassSpec, ComponentParams, ComponentSlot, ComponentTemplate, CostOutput,
    DistributionKey, ParamEntry, ParamInit, ParamRef, ParamSet, SampleRequest, SharedParam, TemplateArg,
};
pub use context::BuildContext;
pub use datasets::{DatasetClass, DatasetInfo, DeclaredDataset};
pub use distributions::Distribution;
pub use link::{split_reference, Link, Node};
pub use noise::NoiseSwitch;
pub use registry::{ClassRegistry, DatasetRegistry};
pub use types::{ArgRecord, CellArg, Kwargs, LinkId, ModelError, ModelResult, Outputs};
