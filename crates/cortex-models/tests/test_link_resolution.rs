// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Link Resolution Tests
//!
//! Covers how links between datasets and declared cells infer values:
//! - dataset endpoints supply dimensions and distributions
//! - cell endpoints are asked through their dimension maps
//! - unset arguments are back-filled, set ones are kept
//! - every failure kind names the offending link or key

use cortex_models::{BuildContext, CellArg, DatasetInfo, Kwargs, ModelError};
use serde_json::{json, Value};

fn kwargs(pairs: &[(&str, Value)]) -> Kwargs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn context_with_data() -> BuildContext {
    let mut ctx = BuildContext::new();
    ctx.add_dataset(
        "data",
        DatasetInfo::new()
            .with_dim("input", json!(5))
            .with_distribution("input", "gaussian"),
    );
    ctx.add_dataset("labels", DatasetInfo::new().with_dim("input", json!(9)));
    ctx
}

// ═══════════════════════════════════════════════════════════
// Failure kinds
// ═══════════════════════════════════════════════════════════

#[test]
fn test_dataset_to_dataset_is_invalid() {
    let mut ctx = context_with_data();
    let err = ctx
        .add_link("data.input", "labels.input")
        .expect_err("two datasets cannot be linked");
    assert!(matches!(err, ModelError::InvalidLink { .. }));
    assert!(err.to_string().contains("data.input->labels.input"));
    assert!(ctx.links().is_empty());
}

#[test]
fn test_unknown_endpoint_is_reported() {
    let mut ctx = context_with_data();
    let err = ctx
        .add_link("data.input", "ghost.input")
        .expect_err("undeclared cell");
    assert!(matches!(err, ModelError::ReferenceNotFound(_)));
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn test_unknown_port_is_unsupported() {
    let mut ctx = context_with_data();
    ctx.prepare_cell("MLP", None, Some("m"), kwargs(&[("dim_out", json!(2))]))
        .expect("declare mlp");
    let err = ctx
        .add_link("data.input", "m.hidden")
        .expect_err("MLP has no hidden port");
    assert!(matches!(err, ModelError::UnsupportedKey { ref key, .. } if key == "hidden"));
}

#[test]
fn test_link_with_no_known_side_is_unresolvable() {
    let mut ctx = BuildContext::new();
    ctx.prepare_cell("MLP", None, Some("a"), kwargs(&[("dim_in", json!(2))]))
        .expect("declare a");
    ctx.prepare_cell("MLP", None, Some("b"), kwargs(&[("dim_out", json!(3))]))
        .expect("declare b");
    let err = ctx
        .add_link("a.output", "b.input")
        .expect_err("neither side knows the width");
    assert!(matches!(err, ModelError::UnresolvableLink(ref name) if name == "a.output->b.input"));
}

// ═══════════════════════════════════════════════════════════
// Back-filling
// ═══════════════════════════════════════════════════════════

#[test]
fn test_first_link_wins_for_an_argument() {
    let mut ctx = context_with_data();
    ctx.prepare_cell("MLP", None, Some("m"), kwargs(&[("dim_out", json!(1))]))
        .expect("declare mlp");
    let first = ctx.add_link("data.input", "m.input").expect("first link");
    let second = ctx.add_link("labels.input", "m.input").expect("second link");
    assert_ne!(first, second);

    assert_eq!(ctx.cell_record("m").unwrap()["dim_in"], CellArg::Link(first));
    ctx.build(None).expect("build");
    assert_eq!(ctx.cell("m").unwrap().attrs()["dim_in"], json!(5));
    assert_eq!(ctx.cell_args()["m"]["dim_in"], CellArg::Value(json!(5)));
}

#[test]
fn test_literal_argument_is_not_overridden_by_link() {
    let mut ctx = context_with_data();
    ctx.prepare_cell("MLP", None, Some("m"), kwargs(&[("dim_in", json!(7)), ("dim_out", json!(1))]))
        .expect("declare mlp");
    ctx.add_link("data.input", "m.input").expect("link");
    assert_eq!(ctx.cell_record("m").unwrap()["dim_in"], CellArg::Value(json!(7)));
}

#[test]
fn test_distribution_flows_from_dataset() {
    let mut ctx = context_with_data();
    ctx.prepare_cell("DistributionMLP", None, Some("head"), kwargs(&[("dim_in", json!(3))]))
        .expect("declare head");
    ctx.add_link("head.samples", "data.input").expect("link");
    ctx.build(None).expect("build");

    let head = ctx.cell("head").unwrap();
    assert_eq!(head.attrs()["dim_out"], json!(5));
    assert_eq!(head.attrs()["distribution_type"], json!("gaussian"));
    // gaussian heads emit a mean and a log-sigma per output
    assert_eq!(head.attrs()["mlp_dim_out"], json!(10));
}

#[test]
fn test_cell_to_cell_link_reads_source_dimension() {
    let mut ctx = BuildContext::new();
    ctx.prepare_cell("MLP", None, Some("enc"), kwargs(&[("dim_in", json!(8)), ("dim_out", json!(4))]))
        .expect("declare enc");
    ctx.prepare_cell("MLP", None, Some("dec"), kwargs(&[("dim_out", json!(8))]))
        .expect("declare dec");
    let id = ctx.add_link("enc.output", "dec.input").expect("link");

    let link = ctx.link(id).expect("stored link");
    assert_eq!(link.value(), Some(&json!(4)));
    assert!(link.nodes().contains_key("enc") && link.nodes().contains_key("dec"));
    assert_eq!(link.query("dec", "dim_in").unwrap(), json!(4));
    assert_eq!(link.query("dec", "dim_in").unwrap(), link.query("dec", "dim_in").unwrap());
    assert!(matches!(
        link.query("dec", "dim_h"),
        Err(ModelError::UnsupportedKey { .. })
    ));
    assert!(matches!(
        link.query("nobody", "dim_in"),
        Err(ModelError::ReferenceNotFound(_))
    ));
}

#[test]
fn test_make_data_declares_linkable_dataset() {
    let mut ctx = BuildContext::new();
    ctx.make_data(
        "Declared",
        "mnist",
        kwargs(&[
            ("dims", json!({"input": 784, "labels": 10})),
            ("distributions", json!({"input": "binomial"})),
        ]),
    )
    .expect("declare dataset");
    ctx.prepare_cell("MLP", None, Some("clf"), Kwargs::new())
        .expect("declare classifier");
    ctx.add_link("mnist.input", "clf.input").expect("input link");
    ctx.add_link("mnist.labels", "clf.output").expect("label link");
    ctx.build(None).expect("build");

    let clf = ctx.cell("clf").unwrap();
    assert_eq!(clf.attrs()["dim_in"], json!(784));
    assert_eq!(clf.attrs()["dim_out"], json!(10));
}
