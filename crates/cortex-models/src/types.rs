// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Core types for cell composition.

Argument records, link handles and the error taxonomy shared by the
build context, links and cell classes.
*/

use indexmap::IndexMap;
use ndarray::ArrayD;
use serde_json::Value;

/// Keyword arguments handed to a cell constructor (insertion-ordered)
pub type Kwargs = IndexMap<String, Value>;

/// Named outputs of a cell's forward computation
pub type Outputs = IndexMap<String, ArrayD<f32>>;

/// Per-cell argument record kept by the build context
pub type ArgRecord = IndexMap<String, CellArg>;

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Handle to a link owned by a [`crate::BuildContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) usize);

impl LinkId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One entry of an argument record: a literal value or a pending link
#[derive(Debug, Clone, PartialEq)]
pub enum CellArg {
    Value(Value),
    Link(LinkId),
}

impl CellArg {
    /// Null literals count as "not set"
    pub fn is_unset(&self) -> bool {
        matches!(self, CellArg::Value(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            CellArg::Value(v) => Some(v),
            CellArg::Link(_) => None,
        }
    }

    pub fn as_link(&self) -> Option<LinkId> {
        match self {
            CellArg::Link(id) => Some(*id),
            CellArg::Value(_) => None,
        }
    }
}

impl From<Value> for CellArg {
    fn from(value: Value) -> Self {
        CellArg::Value(value)
    }
}

/// Errors that can occur while declaring, linking, building or running cells
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Invalid link {link}: {reason}")]
    InvalidLink { link: String, reason: String },

    #[error("Cannot resolve link {0}: neither endpoint provides a value")]
    UnresolvableLink(String),

    #[error("Link {0} queried before its value was resolved")]
    LinkNotReady(String),

    #[error("Unsupported key `{key}` for {owner}")]
    UnsupportedKey { owner: String, key: String },

    #[error("Argument `{key}` of {cell} is already {existing}, cannot set it to {requested}")]
    ArgumentMismatch {
        cell: String,
        key: String,
        existing: String,
        requested: String,
    },

    #[error("Cell {cell} is already built and has no argument `{key}`")]
    UnknownArgument { cell: String, key: String },

    #[error("Unknown cell type `{tag}`. Available: {available:?}")]
    UnknownCellType { tag: String, available: Vec<String> },

    #[error("Unknown dataset type `{tag}`. Available: {available:?}")]
    UnknownDatasetType { tag: String, available: Vec<String> },

    #[error("Required argument `{key}` not provided (or null) for {cell_type} cell {cell}")]
    MissingRequiredArgument {
        cell: String,
        cell_type: String,
        key: String,
    },

    #[error("Component `{key}` not found in cell {cell}")]
    ComponentNotFound { cell: String, key: String },

    #[error("Type mismatch for `{key}`: expected {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Invalid argument for {owner}: {reason}")]
    InvalidArgument { owner: String, reason: String },

    #[error("Invalid cell class `{tag}`: {reason}")]
    InvalidClass { tag: String, reason: String },

    #[error("Shape mismatch in {context}: {reason}")]
    ShapeMismatch { context: String, reason: String },

    #[error("{cell_type} does not support {operation}")]
    UnsupportedOperation {
        cell_type: String,
        operation: String,
    },
}

impl ModelError {
    pub(crate) fn shape(context: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::ShapeMismatch {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn type_mismatch(key: &str, expected: &str, found: &Value) -> Self {
        ModelError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
