// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed accessors over keyword arguments and cell attributes

use serde_json::Value;

use crate::types::{Kwargs, ModelError, ModelResult};

/// Extension trait for reading typed values out of a [`Kwargs`] map
///
/// Missing keys and nulls are reported as [`ModelError::ReferenceNotFound`]
/// by the strict getters; the `opt_` variants map them to `None`.
pub trait KwargsExt {
    /// Non-null value for a key
    fn get_set(&self, key: &str) -> Option<&Value>;

    fn get_usize(&self, key: &str) -> ModelResult<usize>;

    fn get_opt_usize(&self, key: &str) -> ModelResult<Option<usize>>;

    /// Float argument; `false` reads as 0 so boolean-off options work
    fn get_f32(&self, key: &str) -> ModelResult<f32>;

    fn get_bool(&self, key: &str) -> ModelResult<bool>;

    fn get_str(&self, key: &str) -> ModelResult<&str>;

    fn get_opt_str(&self, key: &str) -> ModelResult<Option<&str>>;

    /// List of non-negative integers
    fn get_usize_list(&self, key: &str) -> ModelResult<Vec<usize>>;

    fn get_opt_usize_list(&self, key: &str) -> ModelResult<Option<Vec<usize>>>;

    /// Shape argument: a single integer or a list of integers
    fn get_shape(&self, key: &str) -> ModelResult<Vec<usize>>;
}

fn missing(key: &str) -> ModelError {
    ModelError::ReferenceNotFound(format!("argument `{}`", key))
}

pub(crate) fn value_as_usize(key: &str, value: &Value) -> ModelResult<usize> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| ModelError::type_mismatch(key, "non-negative integer", value))
}

pub(crate) fn value_as_usize_list(key: &str, value: &Value) -> ModelResult<Vec<usize>> {
    match value {
        Value::Array(items) => items.iter().map(|v| value_as_usize(key, v)).collect(),
        other => Err(ModelError::type_mismatch(key, "list of integers", other)),
    }
}

pub(crate) fn value_as_shape(key: &str, value: &Value) -> ModelResult<Vec<usize>> {
    match value {
        Value::Array(_) => value_as_usize_list(key, value),
        other => Ok(vec![value_as_usize(key, other)?]),
    }
}

impl KwargsExt for Kwargs {
    fn get_set(&self, key: &str) -> Option<&Value> {
        self.get(key).filter(|v| !v.is_null())
    }

    fn get_usize(&self, key: &str) -> ModelResult<usize> {
        let value = self.get_set(key).ok_or_else(|| missing(key))?;
        value_as_usize(key, value)
    }

    fn get_opt_usize(&self, key: &str) -> ModelResult<Option<usize>> {
        self.get_set(key)
            .map(|v| value_as_usize(key, v))
            .transpose()
    }

    fn get_f32(&self, key: &str) -> ModelResult<f32> {
        match self.get_set(key) {
            None => Err(missing(key)),
            Some(Value::Bool(false)) => Ok(0.0),
            Some(value) => value
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| ModelError::type_mismatch(key, "number", value)),
        }
    }

    fn get_bool(&self, key: &str) -> ModelResult<bool> {
        let value = self.get_set(key).ok_or_else(|| missing(key))?;
        value
            .as_bool()
            .ok_or_else(|| ModelError::type_mismatch(key, "bool", value))
    }

    fn get_str(&self, key: &str) -> ModelResult<&str> {
        let value = self.get_set(key).ok_or_else(|| missing(key))?;
        value
            .as_str()
            .ok_or_else(|| ModelError::type_mismatch(key, "string", value))
    }

    fn get_opt_str(&self, key: &str) -> ModelResult<Option<&str>> {
        match self.get_set(key) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| ModelError::type_mismatch(key, "string", value)),
        }
    }

    fn get_usize_list(&self, key: &str) -> ModelResult<Vec<usize>> {
        let value = self.get_set(key).ok_or_else(|| missing(key))?;
        value_as_usize_list(key, value)
    }

    fn get_opt_usize_list(&self, key: &str) -> ModelResult<Option<Vec<usize>>> {
        self.get_set(key)
            .map(|v| value_as_usize_list(key, v))
            .transpose()
    }

    fn get_shape(&self, key: &str) -> ModelResult<Vec<usize>> {
        let value = self.get_set(key).ok_or_else(|| missing(key))?;
        value_as_shape(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(pairs: &[(&str, Value)]) -> Kwargs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_null_reads_as_missing() {
        let args = kwargs(&[("dim_h", Value::Null)]);
        assert!(args.get_set("dim_h").is_none());
        assert_eq!(args.get_opt_usize("dim_h").unwrap(), None);
        assert!(matches!(
            args.get_usize("dim_h"),
            Err(ModelError::ReferenceNotFound(_))
        ));
    }

    #[test]
    fn test_false_reads_as_zero_rate() {
        let args = kwargs(&[("dropout", json!(false)), ("weight_noise", json!(0.25))]);
        assert_eq!(args.get_f32("dropout").unwrap(), 0.0);
        assert_eq!(args.get_f32("weight_noise").unwrap(), 0.25);
    }

    #[test]
    fn test_shape_accepts_scalar_or_list() {
        let args = kwargs(&[("a", json!(7)), ("b", json!([1, 28, 28]))]);
        assert_eq!(args.get_shape("a").unwrap(), vec![7]);
        assert_eq!(args.get_shape("b").unwrap(), vec![1, 28, 28]);
    }

    #[test]
    fn test_type_mismatch_reports_key() {
        let args = kwargs(&[("dim_in", json!("wide"))]);
        match args.get_usize("dim_in") {
            Err(ModelError::TypeMismatch { key, .. }) => assert_eq!(key, "dim_in"),
            other => panic!("expected TypeMismatch, got {:?}", other),
        }
    }
}
