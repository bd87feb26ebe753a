// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Property tests for link construction and back-fill

use cortex_models::{BuildContext, CellArg, DatasetInfo, Kwargs, ModelError};
use proptest::prelude::*;
use serde_json::json;

fn dataset_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn dataset_pairs_never_link(a in dataset_name(), b in dataset_name(), dim in 1u64..4096) {
        let mut ctx = BuildContext::new();
        ctx.add_dataset(a.clone(), DatasetInfo::new().with_dim("input", json!(dim)));
        ctx.add_dataset(b.clone(), DatasetInfo::new().with_dim("output", json!(dim)));
        let result = ctx.add_link(&format!("{}.input", a), &format!("{}.output", b));
        let is_invalid_link = matches!(result, Err(ModelError::InvalidLink { .. }));
        prop_assert!(is_invalid_link);
        prop_assert!(ctx.links().is_empty());
    }

    #[test]
    fn built_records_survive_later_links(dim_in in 1usize..8, dim_out in 1usize..8) {
        let mut ctx = BuildContext::new();
        let mut kwargs = Kwargs::new();
        kwargs.insert("dim_in".to_string(), json!(dim_in));
        kwargs.insert("dim_out".to_string(), json!(dim_out));
        ctx.prepare_cell("DistributionMLP", None, Some("d"), kwargs).unwrap();
        ctx.build(None).unwrap();
        let before = ctx.cell_record("d").unwrap().clone();

        let mut kwargs = Kwargs::new();
        kwargs.insert("dim_out".to_string(), json!(1));
        ctx.prepare_cell("MLP", None, Some("m"), kwargs).unwrap();
        ctx.add_link("d.samples", "m.input").unwrap();

        prop_assert_eq!(ctx.cell_record("d").unwrap(), &before);
        prop_assert!(matches!(ctx.cell_record("m").unwrap()["dim_in"], CellArg::Link(_)));
        ctx.build(Some("m")).unwrap();
        prop_assert_eq!(ctx.cell("m").unwrap().attrs()["dim_in"].clone(), json!(dim_out));
    }
}
