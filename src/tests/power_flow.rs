use super::fixtures::*;
use crate::phase::Phase::{A, B, C};
use crate::topology::{BranchData, Connection, GridDefinition, LoadData, NodeData};
use crate::{
    fixed_point_pf, Alg, Backend, Criterion, GridError, GridModel, Injection, PowerFlow,
    PowerFlowOptions, ProgressMonitor,
};
use num_complex::Complex64;
use spsolve::rlu::RLU;
use std::cell::RefCell;

#[derive(Default)]
struct Recorder {
    changes: RefCell<Vec<f64>>,
}

impl ProgressMonitor for Recorder {
    fn update(&self, _i: usize, change: f64) {
        self.changes.borrow_mut().push(change);
    }
}

fn solve(def: &GridDefinition, alg: Alg, scale: f64) -> (GridModel, crate::OperatingPoint) {
    let model = GridModel::build(def).unwrap();
    let s = Injection::from_loads(&model, &vec![scale; model.load_count()]).unwrap();
    let pf = Backend::from_options(options(alg, 1e-12), RLU::default());
    let op = pf.solve(&model, &s).unwrap();
    (model, op)
}

#[test]
fn zero_injection_converges_to_no_load_voltage() {
    for def in [three_node_feeder(), three_phase_feeder()] {
        let model = GridModel::build(&def).unwrap();
        let s = Injection::zeros(model.node_phase_count());

        let (v, converged, iterations, _) = fixed_point_pf(
            &model,
            &s,
            &RLU::default(),
            &PowerFlowOptions::default(),
            None,
        )
        .unwrap();

        assert!(converged);
        assert_eq!(iterations, 1);
        assert!(max_diff(&v, model.no_load_voltage()) < 1e-14);
    }
}

#[test]
fn no_load_voltage_of_transformer_feeder() {
    let model = GridModel::build(&three_phase_feeder()).unwrap();
    let w = model.no_load_voltage();
    for p in [A, B, C] {
        let src = model.node_phase("sub", p).unwrap();
        assert_close(w[src], p.phasor(1.0), 1e-15);

        // line charging lifts the far end slightly above the tap voltage
        let n2 = model.node_phase("n2", p).unwrap();
        assert_close(w[n2], p.phasor(1.0 / 1.025), 1e-3);
    }
}

#[test]
fn source_only_grid_needs_no_iterations() {
    let def = GridDefinition {
        name: "source".to_string(),
        nodes: vec![NodeData::source("s", &[A, B, C], 2.4)],
        ..Default::default()
    };
    let model = GridModel::build(&def).unwrap();
    let s = Injection::zeros(3);

    let (v, converged, iterations, _) = fixed_point_pf(
        &model,
        &s,
        &RLU::default(),
        &PowerFlowOptions::default(),
        None,
    )
    .unwrap();

    assert!(converged);
    assert_eq!(iterations, 0);
    assert_close(v[1], B.phasor(2.4), 1e-15);
}

#[test]
fn three_node_feeder_matches_reference() {
    for alg in [Alg::FixedPoint, Alg::Newton] {
        let (model, op) = solve(&three_node_feeder(), alg, 1.0);

        let n1 = model.node_phase("n1", A).unwrap();
        let n2 = model.node_phase("n2", A).unwrap();
        assert_close(op.voltage[n1], THREE_NODE_V1, 1e-9);
        assert_close(op.voltage[n2], THREE_NODE_V2, 1e-9);
        assert_close(op.total_loss(), THREE_NODE_LOSS, 1e-9);

        // the far end of l2 delivers the load at n2
        let l2 = model.branch_phase("l2", A).unwrap();
        assert_close(op.branch_power_to[l2], Complex64::new(0.2, 0.05), 1e-9);
    }
}

#[test]
fn convergence_is_monotone() {
    let model = GridModel::build(&three_node_feeder()).unwrap();
    let s = Injection::from_loads(&model, &[]).unwrap();
    let recorder = Recorder::default();

    let (_, converged, iterations, _) = fixed_point_pf(
        &model,
        &s,
        &RLU::default(),
        &options(Alg::FixedPoint, 1e-10),
        Some(&recorder),
    )
    .unwrap();

    assert!(converged);
    let changes = recorder.changes.borrow();
    assert_eq!(changes.len(), iterations);
    assert!(*changes.last().unwrap() < 1e-10);
    for w in changes.windows(2) {
        assert!(w[1] <= w[0], "change increased: {:?}", changes);
    }
}

#[test]
fn convergence_is_bounded_on_unbalanced_feeder() {
    let model = GridModel::build(&three_phase_feeder()).unwrap();
    let s = Injection::from_loads(&model, &[]).unwrap();
    let recorder = Recorder::default();

    let (_, converged, _, _) = fixed_point_pf(
        &model,
        &s,
        &RLU::default(),
        &options(Alg::FixedPoint, 1e-10),
        Some(&recorder),
    )
    .unwrap();

    assert!(converged);
    let changes = recorder.changes.borrow();
    let first = changes[0];
    assert!(changes.iter().skip(1).all(|&c| c <= first));
}

#[test]
fn iteration_cap_reports_convergence_failure() {
    let model = GridModel::build(&three_node_feeder()).unwrap();
    let s = Injection::from_loads(&model, &[]).unwrap();
    let opt = PowerFlowOptions::builder().max_iterations(1).build().unwrap();
    let pf = Backend::from_options(opt, RLU::default());

    match pf.solve(&model, &s) {
        Err(err @ GridError::Convergence { .. }) => {
            assert_eq!(err.iterations(), Some(1));
            if let GridError::Convergence { change, voltage, .. } = err {
                assert!(change > 1e-10);
                assert_eq!(voltage.len(), model.node_phase_count());
            }
        }
        other => panic!("expected convergence failure, got {:?}", other),
    }
}

#[test]
fn infeasible_injection_is_not_converged() {
    let model = GridModel::build(&three_node_feeder()).unwrap();
    let s = Injection::from_loads(&model, &[100.0, 100.0]).unwrap();
    let pf = Backend::from_options(PowerFlowOptions::default(), RLU::default());

    let res = pf.solve(&model, &s);
    assert!(res.is_err());
    assert!(!matches!(res, Err(GridError::Topology(_))));
}

#[test]
fn lossless_branch_conserves_active_power() {
    let def = GridDefinition {
        name: "lossless".to_string(),
        nodes: vec![
            NodeData::source("s", &[A], 1.0),
            NodeData::new("n1", &[A], 1.0),
            NodeData::new("n2", &[A], 1.0),
        ],
        branches: vec![
            BranchData::line("x", "s", "n1", &[A], 0.0, 0.05),
            BranchData::line("stub", "n1", "n2", &[A], 0.01, 0.01),
        ],
        loads: vec![LoadData::new("d", "n1", &[A], Connection::Wye, 0.2, 0.05)],
    };
    let (model, op) = solve(&def, Alg::FixedPoint, 1.0);

    let x = model.branch_phase("x", A).unwrap();
    let (s_f, s_t) = (op.branch_power_from[x], op.branch_power_to[x]);
    assert!((s_f.re - s_t.re).abs() < 1e-12);

    // series reactance consumes x |I|^2
    let n1 = model.node_phase("n1", A).unwrap();
    let i = (s_t / op.voltage[n1]).conj();
    assert!((s_f.im - s_t.im - 0.05 * i.norm_sqr()).abs() < 1e-12);

    // an unloaded stub carries nothing
    let stub = model.branch_phase("stub", A).unwrap();
    assert_close(op.branch_power_from[stub], op.branch_power_to[stub], 1e-12);
    assert!(op.branch_power_from[stub].norm() < 1e-12);
}

#[test]
fn lossy_branches_have_non_negative_loss() {
    for def in [three_node_feeder(), three_phase_feeder()] {
        let (_, op) = solve(&def, Alg::FixedPoint, 1.0);
        let loss = op.branch_loss();
        for (b, l) in loss.iter().enumerate() {
            assert_close(*l, op.branch_power_from[b] - op.branch_power_to[b], 0.0);
        }
        let total: Complex64 = loss.iter().sum();
        assert!(total.re > 0.0);
        assert_close(op.total_loss(), total, 1e-15);
    }

    // per branch-phase on the uncoupled feeder
    let (_, op) = solve(&three_node_feeder(), Alg::FixedPoint, 1.0);
    assert!(op.branch_loss().iter().all(|l| l.re >= 0.0 && l.im >= 0.0));
}

#[test]
fn unbalanced_feeder_power_balance() {
    let (model, op) = solve(&three_phase_feeder(), Alg::FixedPoint, 1.0);

    let source_power: Complex64 = [A, B, C]
        .iter()
        .map(|&p| op.branch_power_from[model.branch_phase("t1", p).unwrap()])
        .sum();
    let demand = Complex64::new(0.67, 0.18);
    assert_close(source_power, demand + op.total_loss(), 1e-9);
    assert_close(op.injection.total(), -demand, 1e-12);

    // voltages stay close to their nominal phase angle
    for (i, np) in model.node_phases().entries().iter().enumerate() {
        let v = op.voltage[i];
        let angle = v.arg().to_degrees();
        let nominal = np.phase.angle();
        let diff = (angle - nominal + 540.0) % 360.0 - 180.0;
        assert!(diff.abs() < 10.0, "{}: {}", model.node_phase_label(i), angle);
        assert!(v.norm() > 0.85 && v.norm() <= 1.0 + 1e-12);
    }
}

#[test]
fn newton_agrees_with_fixed_point() {
    for def in [three_node_feeder(), three_phase_feeder()] {
        let (_, fp) = solve(&def, Alg::FixedPoint, 1.0);
        let (_, nr) = solve(&def, Alg::Newton, 1.0);

        assert!(max_diff(&fp.voltage, &nr.voltage) < 1e-9);
        assert!(max_diff(&fp.branch_power_from, &nr.branch_power_from) < 1e-9);
        assert!(nr.iterations <= fp.iterations);
    }
}

#[test]
fn injection_must_fit_the_grid() {
    let model = GridModel::build(&three_node_feeder()).unwrap();
    let pf = Backend::from_options(PowerFlowOptions::default(), RLU::default());

    let short = Injection::zeros(model.node_phase_count() - 1);
    assert!(matches!(pf.solve(&model, &short), Err(GridError::Injection(_))));

    // single-phase nodes have no delta pair
    let mut s = Injection::zeros(model.node_phase_count());
    s.delta[1] = Complex64::new(-0.1, 0.0);
    assert!(matches!(pf.solve(&model, &s), Err(GridError::Injection(_))));

    assert!(matches!(
        Injection::from_loads(&model, &[1.0]),
        Err(GridError::Injection(_))
    ));
}

#[test]
fn options_are_validated() {
    let opt = PowerFlowOptions::default();
    assert_eq!(opt.algorithm, Alg::FixedPoint);
    assert_eq!(opt.tolerance, 1e-10);
    assert_eq!(opt.max_iterations, 100);
    assert_eq!(opt.criterion, Criterion::Relative);

    assert!(PowerFlowOptions::builder().tolerance(0.0).build().is_err());
    assert!(PowerFlowOptions::builder().tolerance(f64::NAN).build().is_err());
    assert!(PowerFlowOptions::builder().max_iterations(0).build().is_err());

    let opt = PowerFlowOptions::builder()
        .algorithm(Alg::Newton)
        .build()
        .unwrap();
    assert_eq!(opt.tolerance, 1e-10);
    assert!(matches!(
        Backend::from_options(opt, RLU::default()),
        Backend::Newton(_)
    ));
}

#[test]
fn convergence_criteria_measure_different_changes() {
    let w = [Complex64::new(2.4, 0.0), B.phasor(2.4)];
    // the second node-phase only rotates
    let v = [
        Complex64::new(2.3, 0.1),
        B.phasor(2.4) * Complex64::from_polar(1.0, 0.01),
    ];

    let relative = PowerFlowOptions::default();
    let expected = Complex64::new(-0.1, 0.1).norm() / 2.4;
    assert!((relative.change(&v, &w, &w) - expected).abs() < 1e-12);

    let magnitude = PowerFlowOptions::builder()
        .criterion(Criterion::Magnitude)
        .build()
        .unwrap();
    let expected = 2.4 - Complex64::new(2.3, 0.1).norm();
    assert!((magnitude.change(&v, &w, &w) - expected).abs() < 1e-12);
    assert!(magnitude.change(&v[1..], &w[1..], &w[1..]) < 1e-12);
}

#[test]
fn magnitude_criterion_reaches_reference() {
    let model = GridModel::build(&three_node_feeder()).unwrap();
    let s = Injection::from_loads(&model, &[]).unwrap();
    for alg in [Alg::FixedPoint, Alg::Newton] {
        let opt = PowerFlowOptions::builder()
            .algorithm(alg)
            .criterion(Criterion::Magnitude)
            .tolerance(1e-12)
            .build()
            .unwrap();
        let op = Backend::from_options(opt, RLU::default())
            .solve(&model, &s)
            .unwrap();
        let n2 = model.node_phase("n2", A).unwrap();
        assert_close(op.voltage[n2], THREE_NODE_V2, 1e-9);
    }
}
