// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Cell Composition Tests
//!
//! Composite cells build their components through the context, forward
//! arguments to them and expose one flat parameter list addressed by the
//! component layout.

use std::sync::Arc;

use cortex_models::{
    BuildContext, Cell, CellClass, ClassSpec, ComponentSlot, ComponentTemplate, Kwargs, ModelError,
    ModelResult, ParamInit, ParamSet,
};
use serde_json::{json, Value};

fn kwargs(pairs: &[(&str, Value)]) -> Kwargs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// `n` identical square MLPs applied in sequence
#[derive(Debug)]
struct Stack {
    spec: ClassSpec,
}

impl Stack {
    fn new() -> Self {
        let layer = ComponentTemplate::new("MLP")
            .owner_arg("dim_in", "dim")
            .owner_arg("dim_out", "dim")
            .replicas(3);
        Self {
            spec: ClassSpec::new("Stack")
                .required(&["dim"])
                .args(&["dim"])
                .dim("input", "dim")
                .dim("output", "dim")
                .component("layer", Some(layer)),
        }
    }
}

impl CellClass for Stack {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }
}

/// Builds its component, then fails on its own parameters
#[derive(Debug)]
struct FailingOwner {
    spec: ClassSpec,
}

impl CellClass for FailingOwner {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    fn init_params(&self, _init: &mut ParamInit<'_>) -> ModelResult<ParamSet> {
        Err(ModelError::InvalidArgument {
            owner: "FailingOwner".to_string(),
            reason: "no parameters today".to_string(),
        })
    }
}

fn build_gen_rnn(ctx: &mut BuildContext) {
    ctx.prepare_cell(
        "GenRNN",
        None,
        Some("gen"),
        kwargs(&[
            ("dim_in", json!(4)),
            ("dim_h", json!(6)),
            ("distribution_type", json!("gaussian")),
            ("h_act", json!("tanh")),
        ]),
    )
    .expect("declare GenRNN");
    ctx.build(None).expect("build GenRNN");
}

fn assert_param_arithmetic(ctx: &BuildContext, cell: &Cell) {
    let component_total: usize = cell
        .layout()
        .iter()
        .map(|c| ctx.cell(&c.cell).expect("component").total_params())
        .sum();
    assert_eq!(cell.total_params(), cell.n_params() + component_total, "cell {}", cell.name());
    for entry in cell.layout() {
        assert_param_arithmetic(ctx, ctx.cell(&entry.cell).expect("component"));
    }
}

// ═══════════════════════════════════════════════════════════
// Parameter layout
// ═══════════════════════════════════════════════════════════

#[test]
fn test_total_params_is_own_plus_components() {
    let mut ctx = BuildContext::new();
    build_gen_rnn(&mut ctx);
    let gen = ctx.cell("gen").expect("built GenRNN");
    assert_param_arithmetic(&ctx, gen);
    assert_eq!(gen.get_params(&ctx).unwrap().len(), gen.total_params());
}

#[test]
fn test_select_params_partitions_the_flat_list() {
    let mut ctx = BuildContext::new();
    build_gen_rnn(&mut ctx);
    let gen = ctx.cell("gen").expect("built GenRNN");
    let params = gen.get_params(&ctx).unwrap();
    let names: Vec<String> = params.iter().map(|p| p.name().to_string()).collect();

    let own = gen.select_params(None, &names).unwrap();
    assert!(own.is_empty());

    let mut covered = own.len();
    for entry in gen.layout() {
        let slice = gen.select_params(Some(&entry.key), &names).unwrap();
        assert_eq!(slice.len(), entry.count);
        assert!(slice.iter().all(|n| n.starts_with(&format!("{}.", entry.cell))));
        covered += slice.len();
    }
    assert_eq!(covered, names.len());

    assert!(matches!(
        gen.select_params(Some("decoder"), &names),
        Err(ModelError::ComponentNotFound { .. })
    ));
}

#[test]
fn test_profile_lists_every_parameter() {
    let mut ctx = BuildContext::new();
    build_gen_rnn(&mut ctx);
    let gen = ctx.cell("gen").expect("built GenRNN");
    let profile = gen.profile_params(&ctx).unwrap();
    assert_eq!(profile.len(), gen.total_params());
    assert_eq!(profile["gen.RU.W"], vec![6, 6]);
    // gaussian head doubles the inner MLP width
    assert_eq!(profile["gen.output_net.mlp.W[0]"], vec![6, 8]);
}

// ═══════════════════════════════════════════════════════════
// Argument forwarding
// ═══════════════════════════════════════════════════════════

#[test]
fn test_passed_arguments_reach_components() {
    let mut ctx = BuildContext::new();
    build_gen_rnn(&mut ctx);
    let gen = ctx.cell("gen").expect("built GenRNN");

    let input_net = gen.component(&ctx, "input_net").unwrap();
    assert_eq!(input_net.attrs()["h_act"], json!("tanh"));
    assert_eq!(input_net.attrs()["out_act"], json!("identity"));
    assert_eq!(gen.attr(&ctx, "dim_h").unwrap(), json!(6));
    assert!(gen.attr(&ctx, "colour").is_err());

    let args = gen.get_args(&ctx);
    assert_eq!(args["cell_type"], json!("GenRNN"));
    assert_eq!(args["dim_in"], json!(4));
    assert_eq!(args["distribution_type"], json!("gaussian"));
}

#[test]
fn test_component_override_map() {
    let mut ctx = BuildContext::new();
    ctx.prepare_cell(
        "RNN",
        None,
        Some("rnn"),
        kwargs(&[
            ("dim_in", json!(3)),
            ("dim_h", json!(5)),
            ("input_net", json!({"dim_hs": [7]})),
        ]),
    )
    .unwrap();
    ctx.build(None).unwrap();

    let rnn = ctx.cell("rnn").unwrap();
    let input_net = rnn.component(&ctx, "input_net").unwrap();
    assert_eq!(input_net.n_params(), 4);
    assert_eq!(input_net.attrs()["dim_hs"], json!([7]));
}

#[test]
fn test_recurrence_type_selects_component_class() {
    let mut ctx = BuildContext::new();
    ctx.prepare_cell(
        "RNN",
        None,
        Some("rnn"),
        kwargs(&[
            ("dim_in", json!(3)),
            ("dim_h", json!(5)),
            ("recurrence_type", json!("LSTM")),
        ]),
    )
    .unwrap();
    let err = ctx.build(None).expect_err("no LSTM class is registered");
    assert!(matches!(err, ModelError::UnknownCellType { ref tag, .. } if tag == "LSTM"));
}

#[test]
fn test_get_components_is_depth_first() {
    let mut ctx = BuildContext::new();
    build_gen_rnn(&mut ctx);
    let gen = ctx.cell("gen").expect("built GenRNN");
    let names: Vec<&str> = gen
        .get_components(&ctx)
        .unwrap()
        .iter()
        .map(|c| c.name())
        .collect();
    assert_eq!(
        names,
        vec![
            "gen.initializer",
            "gen.initializer.initializer",
            "gen.RU",
            "gen.input_net",
            "gen.output_net",
            "gen.output_net.mlp",
        ]
    );
}

// ═══════════════════════════════════════════════════════════
// User classes
// ═══════════════════════════════════════════════════════════

#[test]
fn test_registered_class_with_replicas() {
    let mut ctx = BuildContext::new();
    ctx.add_cell_class("Stack", Arc::new(Stack::new()))
        .expect("register Stack");
    ctx.prepare_cell("Stack", None, Some("stack"), kwargs(&[("dim", json!(3))]))
        .unwrap();
    ctx.build(None).unwrap();

    let stack = ctx.cell("stack").unwrap();
    match &stack.components()["layer"] {
        ComponentSlot::Group(names) => {
            assert_eq!(names, &["stack.layer_0", "stack.layer_1", "stack.layer_2"])
        }
        other => panic!("expected a component group, got {:?}", other),
    }
    assert_eq!(stack.total_params(), 6);
    assert_eq!(stack.component(&ctx, "layer_1").unwrap().name(), "stack.layer_1");

    let params = stack.param_values(&ctx).unwrap();
    assert_eq!(stack.select_params(Some("layer_2"), &params).unwrap().len(), 2);
}

#[test]
fn test_class_with_dangling_link_is_rejected() {
    let mut ctx = BuildContext::new();
    let broken = Stack {
        spec: Stack::new().spec.link("layer.output", "missing.input"),
    };
    let err = ctx
        .add_cell_class("Broken", Arc::new(broken))
        .expect_err("link names an undeclared component");
    assert!(matches!(err, ModelError::InvalidClass { .. }));
    assert!(!ctx.classes().contains("Broken"));
}

#[test]
fn test_missing_required_argument_names_cell() {
    let mut ctx = BuildContext::new();
    ctx.prepare_cell("MLP", None, Some("m"), kwargs(&[("dim_in", json!(3))]))
        .unwrap();
    let err = ctx.build(None).expect_err("dim_out is required");
    match err {
        ModelError::MissingRequiredArgument { cell, key, .. } => {
            assert_eq!(cell, "m");
            assert_eq!(key, "dim_out");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_components_survive_owner_failure() {
    let mut ctx = BuildContext::new();
    let head = ComponentTemplate::new("MLP")
        .owner_arg("dim_in", "dim")
        .owner_arg("dim_out", "dim");
    let owner = FailingOwner {
        spec: ClassSpec::new("FailingOwner")
            .required(&["dim"])
            .args(&["dim"])
            .component("head", Some(head)),
    };
    ctx.add_cell_class("FailingOwner", Arc::new(owner))
        .expect("register FailingOwner");
    ctx.prepare_cell("FailingOwner", None, Some("f"), kwargs(&[("dim", json!(2))]))
        .unwrap();

    let err = ctx.build(None).expect_err("init_params fails");
    assert!(matches!(err, ModelError::InvalidArgument { .. }));
    assert!(!ctx.is_built("f"));
    assert!(ctx.is_built("f.head"));
    assert_eq!(ctx.cell("f.head").unwrap().total_params(), 2);
}
