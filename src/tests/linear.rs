use super::fixtures::*;
use crate::phase::Phase::{A, B, C};
use crate::topology::{BranchData, GridDefinition, NodeData};
use crate::{
    linearize, Alg, Backend, Direction, GridError, GridModel, Injection, LinearModel,
    OperatingPoint, PowerFlow,
};
use num_complex::Complex64;
use spsolve::rlu::RLU;

fn solve_at(model: &GridModel, s: &Injection) -> OperatingPoint {
    Backend::from_options(options(Alg::FixedPoint, 1e-13), RLU::default())
        .solve(model, s)
        .unwrap()
}

fn nominal(def: &crate::GridDefinition) -> (GridModel, OperatingPoint, LinearModel) {
    let model = GridModel::build(def).unwrap();
    let s = Injection::from_loads(&model, &[]).unwrap();
    let op = solve_at(&model, &s);
    let lin = linearize(&model, &op, &RLU::default()).unwrap();
    (model, op, lin)
}

fn perturbed(s: &Injection, k: usize, ds: Complex64, delta: bool) -> Injection {
    let mut s = s.clone();
    if delta {
        s.delta[k] += ds;
    } else {
        s.wye[k] += ds;
    }
    s
}

#[test]
fn sensitivities_match_finite_differences() {
    let (model, op, lin) = nominal(&three_node_feeder());
    let h = 1e-5;

    for k in [
        model.node_phase("n1", A).unwrap(),
        model.node_phase("n2", A).unwrap(),
    ] {
        for (ds, vm, sf, loss) in [
            (
                Complex64::new(h, 0.0),
                &lin.voltage_magnitude.wye_active,
                &lin.branch_power_from.wye_active,
                &lin.loss_active.wye_active,
            ),
            (
                Complex64::new(0.0, h),
                &lin.voltage_magnitude.wye_reactive,
                &lin.branch_power_from.wye_reactive,
                &lin.loss_active.wye_reactive,
            ),
        ] {
            let plus = solve_at(&model, &perturbed(&op.injection, k, ds, false));
            let minus = solve_at(&model, &perturbed(&op.injection, k, -ds, false));

            let vm_p = plus.voltage_magnitude();
            let vm_m = minus.voltage_magnitude();
            for i in 0..model.node_phase_count() {
                let fd = (vm_p[i] - vm_m[i]) / (2.0 * h);
                assert!(
                    (fd - vm.get(i, k)).abs() < 1e-6,
                    "d|V{}|/ds{}: {} vs {}",
                    i,
                    k,
                    fd,
                    vm.get(i, k)
                );
            }

            let sf_p = plus.branch_power_from_squared();
            let sf_m = minus.branch_power_from_squared();
            for b in 0..model.branch_phase_count() {
                let fd = (sf_p[b] - sf_m[b]) / (2.0 * h);
                assert!((fd - sf.get(b, k)).abs() < 1e-6);
            }

            let fd = (plus.total_loss().re - minus.total_loss().re) / (2.0 * h);
            assert!((fd - loss.get(0, k)).abs() < 1e-6);
        }
    }
}

#[test]
fn more_load_lowers_voltage() {
    let (model, _, lin) = nominal(&three_node_feeder());
    let n2 = model.node_phase("n2", A).unwrap();
    // injection is negative demand: more injection raises voltage
    for i in 1..model.node_phase_count() {
        assert!(lin.voltage_magnitude.wye_active.get(i, n2) > 0.0);
    }
    // the squared flow on l1 falls as n2 injects more
    let l1 = model.branch_phase("l1", A).unwrap();
    assert!(lin.branch_power_from.wye_active.get(l1, n2) < 0.0);
}

#[test]
fn delta_sensitivities_match_finite_differences() {
    let (model, op, lin) = nominal(&three_phase_feeder());
    let h = 1e-5;

    for (node, p) in [("n2", A), ("n2", C), ("n3", A)] {
        let k = model.node_phase(node, p).unwrap();
        for (ds, vm, st) in [
            (
                Complex64::new(h, 0.0),
                &lin.voltage_magnitude.delta_active,
                &lin.branch_power_to.delta_active,
            ),
            (
                Complex64::new(0.0, h),
                &lin.voltage_magnitude.delta_reactive,
                &lin.branch_power_to.delta_reactive,
            ),
        ] {
            let plus = solve_at(&model, &perturbed(&op.injection, k, ds, true));
            let minus = solve_at(&model, &perturbed(&op.injection, k, -ds, true));

            let vm_p = plus.voltage_magnitude();
            let vm_m = minus.voltage_magnitude();
            for i in 0..model.node_phase_count() {
                let fd = (vm_p[i] - vm_m[i]) / (2.0 * h);
                assert!((fd - vm.get(i, k)).abs() < 1e-6, "{} {}", fd, vm.get(i, k));
            }

            let st_p = plus.branch_power_to_squared();
            let st_m = minus.branch_power_to_squared();
            for b in 0..model.branch_phase_count() {
                let fd = (st_p[b] - st_m[b]) / (2.0 * h);
                assert!((fd - st.get(b, k)).abs() < 1e-6);
            }
        }
    }
}

#[test]
fn taylor_error_decays_quadratically() {
    let (model, op, lin) = nominal(&three_phase_feeder());
    let direction = Injection::from_loads(&model, &[]).unwrap();

    let errors: Vec<(f64, f64, f64)> = [1e-2, 1e-3]
        .iter()
        .map(|&eps| {
            let s = op.injection.plus(&direction.scaled(eps));
            let exact = solve_at(&model, &s);

            let v_err = max_diff(&exact.voltage, &lin.predict_voltage(&op, &s));
            let vm_err = exact
                .voltage_magnitude()
                .iter()
                .zip(lin.predict_voltage_magnitude(&op, &s))
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            assert!(vm_err < 1e-3);

            let flow_err = [
                (exact.branch_power_from_squared(), lin.predict_branch_power_from(&op, &s)),
                (exact.branch_power_to_squared(), lin.predict_branch_power_to(&op, &s)),
                (
                    exact.branch_power_from.iter().map(|s| s.norm()).collect(),
                    lin.predict_branch_power_magnitude_from(&op, &s),
                ),
                (
                    exact.branch_power_to.iter().map(|s| s.norm()).collect(),
                    lin.predict_branch_power_magnitude_to(&op, &s),
                ),
            ]
            .iter()
            .flat_map(|(a, b)| a.iter().zip(b).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);

            let loss_err = (exact.total_loss() - lin.predict_loss(&op, &s)).norm();
            (v_err, loss_err, flow_err)
        })
        .collect();

    let (big, small) = (errors[0], errors[1]);
    assert!(small.0 < 1e-5);
    assert!(big.0 / small.0 > 50.0, "voltage error ratio {}", big.0 / small.0);
    assert!(big.1 / small.1 > 50.0, "loss error ratio {}", big.1 / small.1);
    assert!(big.2 / small.2 > 50.0, "flow error ratio {}", big.2 / small.2);
}

#[test]
fn fixed_quantities_have_zero_sensitivity() {
    let (model, _, lin) = nominal(&three_phase_feeder());
    let n = model.node_phase_count();

    for p in [A, B, C] {
        let src = model.node_phase("sub", p).unwrap();
        // source voltage is fixed
        assert!(lin.voltage.wye_active.row(src).iter().all(|d| d.norm() == 0.0));
        assert!(lin.voltage_magnitude.delta_reactive.row(src).iter().all(|&d| d == 0.0));
        // power injected at the source goes nowhere
        assert!((0..n).all(|i| lin.voltage.wye_reactive.get(i, src).norm() == 0.0));
    }

    // rows without a delta pair
    for (node, p) in [("n3", C), ("n4", B)] {
        let k = model.node_phase(node, p).unwrap();
        assert!(model.delta_pairs()[k].is_none());
        assert!((0..n).all(|i| lin.voltage_magnitude.delta_active.get(i, k) == 0.0));
    }

    assert_eq!(lin.voltage.wye_active.shape(), (n, n));
    assert_eq!(
        lin.branch_power_from.delta_active.shape(),
        (model.branch_phase_count(), n)
    );
    assert_eq!(lin.loss_reactive.wye_active.shape(), (1, n));
}

#[test]
fn load_sensitivities_project_injection_sensitivities() {
    let (model, op, lin) = nominal(&three_phase_feeder());
    let by_load = lin.by_load(&model);
    let h = 1e-3;

    for (j, ld) in model.definition().loads.iter().enumerate() {
        let mut scale = vec![1.0; model.load_count()];
        scale[j] += h;
        let s = Injection::from_loads(&model, &scale).unwrap();
        let ds = s.plus(&op.injection.scaled(-1.0));

        let expected = lin.voltage_magnitude.apply(&ds);
        for (i, e) in expected.iter().enumerate() {
            let d = by_load.voltage_magnitude.active.get(i, j) * h * ld.active_power
                + by_load.voltage_magnitude.reactive.get(i, j) * h * ld.reactive_power;
            assert!((d - e).abs() < 1e-12);
        }
    }

    // serving more of a balanced load lowers the voltage downstream
    for j in [0, 1] {
        for p in [A, B, C] {
            let n2 = model.node_phase("n2", p).unwrap();
            assert!(by_load.voltage_magnitude.active.get(n2, j) < 0.0);
        }
    }
}

#[test]
fn newton_and_fixed_point_linearize_alike() {
    let model = GridModel::build(&three_node_feeder()).unwrap();
    let s = Injection::from_loads(&model, &[]).unwrap();
    let fp = solve_at(&model, &s);
    let nr = Backend::from_options(options(Alg::Newton, 1e-13), RLU::default())
        .solve(&model, &s)
        .unwrap();

    let a = linearize(&model, &fp, &RLU::default()).unwrap();
    let b = linearize(&model, &nr, &RLU::default()).unwrap();
    let diff = a
        .voltage_magnitude
        .wye_active
        .values()
        .iter()
        .zip(b.voltage_magnitude.wye_active.values())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max);
    assert!(diff < 1e-9);
}

#[test]
fn rejects_unconverged_operating_point() {
    let model = GridModel::build(&three_node_feeder()).unwrap();
    let s = Injection::from_loads(&model, &[]).unwrap();
    let op = OperatingPoint::new(&model, &s, model.no_load_voltage().to_vec(), false, 3);

    match linearize(&model, &op, &RLU::default()) {
        Err(err @ GridError::Linearization { .. }) => {
            assert_eq!(err.iterations(), Some(3));
            assert!(err.to_string().contains("not a converged"));
        }
        other => panic!("expected linearization error, got {:?}", other),
    }
}

#[test]
fn singular_jacobian_is_a_linearization_error() {
    let def = GridDefinition {
        name: "singular".to_string(),
        nodes: vec![
            NodeData::source("s", &[A], 1.0),
            NodeData::new("n", &[A], 1.0),
        ],
        branches: vec![BranchData::line("x", "s", "n", &[A], 0.0, 1.0)],
        ..Default::default()
    };
    let model = GridModel::build(&def).unwrap();

    // with y = -j and V = 1, S = -conj(y) cancels dF/dVr exactly
    let s = Injection::wye(vec![Complex64::default(), Complex64::new(0.0, -1.0)]);
    let v = vec![Complex64::new(1.0, 0.0); 2];
    let op = OperatingPoint::new(&model, &s, v, true, 4);

    match linearize(&model, &op, &RLU::default()) {
        Err(err @ GridError::Linearization { .. }) => {
            assert_eq!(err.iterations(), Some(4));
            assert!(err.to_string().contains("structurally singular"), "{}", err);
        }
        other => panic!("expected linearization error, got {:?}", other),
    }
}

#[test]
fn linearization_error_names_the_column() {
    let err = GridError::Linearization {
        iterations: 7,
        column: Some((Direction::DeltaReactive, 5)),
        reason: "singular Jacobian".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("after 7 iterations"));
    assert!(msg.contains("(delta reactive column 5)"));
}

#[test]
fn branch_power_magnitude_matches_finite_differences() {
    let (model, op, lin) = nominal(&three_phase_feeder());
    let h = 1e-5;

    for (node, p, delta) in [("n1", B, false), ("n3", A, true), ("n4", B, false)] {
        let k = model.node_phase(node, p).unwrap();
        for (ds, sf, st) in [
            (
                Complex64::new(h, 0.0),
                if delta {
                    &lin.branch_power_magnitude_from.delta_active
                } else {
                    &lin.branch_power_magnitude_from.wye_active
                },
                if delta {
                    &lin.branch_power_magnitude_to.delta_active
                } else {
                    &lin.branch_power_magnitude_to.wye_active
                },
            ),
            (
                Complex64::new(0.0, h),
                if delta {
                    &lin.branch_power_magnitude_from.delta_reactive
                } else {
                    &lin.branch_power_magnitude_from.wye_reactive
                },
                if delta {
                    &lin.branch_power_magnitude_to.delta_reactive
                } else {
                    &lin.branch_power_magnitude_to.wye_reactive
                },
            ),
        ] {
            let plus = solve_at(&model, &perturbed(&op.injection, k, ds, delta));
            let minus = solve_at(&model, &perturbed(&op.injection, k, -ds, delta));
            for b in 0..model.branch_phase_count() {
                let fd_f =
                    (plus.branch_power_from[b].norm() - minus.branch_power_from[b].norm()) / (2.0 * h);
                let fd_t =
                    (plus.branch_power_to[b].norm() - minus.branch_power_to[b].norm()) / (2.0 * h);
                assert!((fd_f - sf.get(b, k)).abs() < 1e-6, "{}: {} vs {}", b, fd_f, sf.get(b, k));
                assert!((fd_t - st.get(b, k)).abs() < 1e-6, "{}: {} vs {}", b, fd_t, st.get(b, k));
            }
        }
    }

    // |S| and |S|^2 sensitivities agree through d|S|^2 = 2 |S| d|S|
    let k = model.node_phase("n2", C).unwrap();
    for b in 0..model.branch_phase_count() {
        let m = op.branch_power_from[b].norm();
        let d2 = lin.branch_power_from.wye_active.get(b, k);
        let d1 = lin.branch_power_magnitude_from.wye_active.get(b, k);
        assert!((d2 - 2.0 * m * d1).abs() < 1e-12);
    }
}
