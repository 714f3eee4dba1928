//! End-to-end power flow on small feeders with known answers.

use num_complex::Complex64;
use powers_ecf::case::{
    BusData, Case, Connection, IbdgData, LineData, LoadData, RegulatorData, TapControl,
    TransformerData,
};
use powers_ecf::control::{setpoint_profile, QvCurve, QvRegion};
use powers_ecf::device::DeviceOutput;
use powers_ecf::linsolve::{DenseLu, SparseLu};
use powers_ecf::oplimits::check_limits;
use powers_ecf::{runecf, EcfOpt, EcfRun, QvControl, SolveStatus};

fn bus(name: &str, phases: &str, vnom: f64, slack: bool) -> BusData {
    BusData {
        name: name.to_string(),
        phases: phases.to_string(),
        vnom,
        slack,
        ..Default::default()
    }
}

fn diag(n: usize, z: [f64; 2]) -> Vec<Vec<[f64; 2]>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { z } else { [0.0, 0.0] }).collect())
        .collect()
}

/// Receiving-end voltage of a constant-power load behind a series
/// impedance, by fixed-point iteration on `V = Vs − Z·conj(S/V)`.
fn receiving_end(vs: Complex64, z: Complex64, s: Complex64) -> Complex64 {
    let mut v = vs;
    for _ in 0..200 {
        v = vs - z * (s / v).conj();
    }
    v
}

/// Slack and one load bus joined by a resistive balanced line.
/// Base: 1000 V line-to-ground and 1 MVA per phase, so `Z_base = 1 Ω`.
fn stub(z: [f64; 2]) -> Case {
    Case {
        name: "stub".into(),
        buses: vec![bus("src", "ABCN", 1000.0, true), bus("n2", "ABCN", 1000.0, false)],
        lines: vec![LineData {
            name: "l12".into(),
            from: "src".into(),
            to: "n2".into(),
            phases: "ABC".into(),
            z: diag(3, z),
            y_shunt: None,
        }],
        loads: vec![LoadData {
            name: "ld".into(),
            bus: "n2".into(),
            phases: "ABC".into(),
            power: vec![[5e5, 1e5]; 3],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn power_flow(case: &Case) -> powers_ecf::ecfsoln::EcfSolution {
    let run = runecf(case, &EcfOpt::default(), &SparseLu, None, None).unwrap();
    match run {
        EcfRun::PowerFlow { soln, .. } => soln,
        other => panic!("unexpected run {:?}", other),
    }
}

#[test]
fn test_stub_matches_single_phase_equivalent() {
    let soln = power_flow(&stub([0.01, 0.0]));
    assert!(soln.success());

    let expected = receiving_end(
        Complex64::new(1000.0, 0.0),
        Complex64::new(0.01, 0.0),
        Complex64::new(5e5, 1e5),
    );
    // 0.99497 p.u.
    assert!((expected.norm() / 1000.0 - 0.99497).abs() < 1e-5);
    for phase in ["A", "B", "C"] {
        let pu = soln.magnitude_pu("n2", phase).unwrap();
        assert!((pu - expected.norm() / 1000.0).abs() < 1e-6, "{} {}", phase, pu);
    }

    let a = soln.voltage("n2", "A").unwrap();
    let b = soln.voltage("n2", "B").unwrap();
    let shift = (a / b).arg().to_degrees();
    assert!((shift - 120.0).abs() < 1e-6);
}

#[test]
fn test_slack_supplies_load_and_losses() {
    let soln = power_flow(&stub([0.01, 0.01]));
    assert!(soln.success());

    let v = receiving_end(
        Complex64::new(1000.0, 0.0),
        Complex64::new(0.01, 0.01),
        Complex64::new(5e5, 1e5),
    );
    let i = (Complex64::new(5e5, 1e5) / v).conj();
    let loss = Complex64::new(0.01, 0.01) * i.norm_sqr();
    let expected = 3.0 * (Complex64::new(5e5, 1e5) + loss);

    let supplied = soln.slack_power();
    assert!((supplied - expected).norm() / expected.norm() < 1e-6);
    assert!(soln.max_violation() < 1e-3);
}

#[test]
fn test_sparse_and_dense_solvers_agree() {
    let case = stub([0.01, 0.02]);
    let opt = EcfOpt::default();
    let sparse = runecf(&case, &opt, &SparseLu, None, None).unwrap();
    let dense = runecf(&case, &opt, &DenseLu, None, None).unwrap();
    let (s, d) = (sparse.solution().unwrap(), dense.solution().unwrap());
    for phase in ["A", "B", "C"] {
        let dv = s.voltage("n2", phase).unwrap() - d.voltage("n2", phase).unwrap();
        assert!(dv.norm() < 1e-6);
    }
}

#[test]
fn test_load_factor_scales_demand() {
    let case = stub([0.01, 0.0]);
    let mut opt = EcfOpt::default();
    opt.load_factor = 0.5;
    let run = runecf(&case, &opt, &SparseLu, None, None).unwrap();
    let soln = run.solution().unwrap();
    assert!(soln.success());

    let expected = receiving_end(
        Complex64::new(1000.0, 0.0),
        Complex64::new(0.01, 0.0),
        Complex64::new(2.5e5, 0.5e5),
    );
    let pu = soln.magnitude_pu("n2", "A").unwrap();
    assert!((pu - expected.norm() / 1000.0).abs() < 1e-6);
}

#[test]
fn test_heavy_load_flags_undervoltage() {
    // 10 % series resistance drops the load bus to about 0.947 p.u.
    let soln = power_flow(&stub([0.1, 0.0]));
    assert!(soln.success());
    let limits = check_limits(&soln);
    assert_eq!(limits.violations.len(), 3);
    assert!(limits.violations.iter().all(|v| v.bus == "n2" && v.pu < 0.95));
    assert!(limits.max_unbalance() < 1e-6);
}

#[test]
fn test_wye_wye_transformer_steps_down() {
    let case = Case {
        name: "xfmr".into(),
        buses: vec![bus("hv", "ABCN", 7200.0, true), bus("lv", "ABCN", 240.0, false)],
        transformers: vec![TransformerData {
            name: "t1".into(),
            from: "hv".into(),
            to: "lv".into(),
            phases: "ABCN".into(),
            connection: Connection::WyeWye,
            rating: 1e6,
            v_primary: 7200.0,
            v_secondary: 240.0,
            r: vec![0.01],
            x: vec![0.05],
            shunt: None,
        }],
        loads: vec![LoadData {
            name: "ld".into(),
            bus: "lv".into(),
            phases: "ABC".into(),
            power: vec![[1e5, 2e4]; 3],
            ..Default::default()
        }],
        ..Default::default()
    };
    let soln = power_flow(&case);
    assert!(soln.success());

    let z_base = 240.0 * 240.0 / 1e6;
    let expected = receiving_end(
        Complex64::new(240.0, 0.0),
        Complex64::new(0.01, 0.05) * z_base,
        Complex64::new(1e5, 2e4),
    );
    let va = soln.voltage("lv", "A").unwrap();
    assert!((va - expected).norm() / 240.0 < 1e-6);
    assert!(soln.voltage("lv", "N").unwrap().norm() < 1e-9);
}

#[test]
fn test_unloaded_delta_delta_keeps_phase() {
    let case = Case {
        name: "dd".into(),
        buses: vec![bus("hv", "ABC", 7200.0, true), bus("lv", "ABC", 277.0, false)],
        transformers: vec![TransformerData {
            name: "t1".into(),
            from: "hv".into(),
            to: "lv".into(),
            phases: "ABC".into(),
            connection: Connection::DeltaDelta,
            rating: 5e5,
            v_primary: 7200.0,
            v_secondary: 277.0,
            r: vec![0.01],
            x: vec![0.04],
            shunt: None,
        }],
        ..Default::default()
    };
    let soln = power_flow(&case);
    assert!(soln.success());

    for phase in ["A", "B", "C"] {
        let pu = soln.magnitude_pu("lv", phase).unwrap();
        assert!((pu - 1.0).abs() < 1e-4, "{} {}", phase, pu);
        let hv = soln.voltage("hv", phase).unwrap();
        let lv = soln.voltage("lv", phase).unwrap();
        assert!((lv / hv).arg().abs() < 1e-4);
    }
}

#[test]
fn test_homotopy_reaches_the_direct_solution() {
    let case = stub([0.01, 0.02]);
    let direct = power_flow(&case);
    assert!(direct.success());
    assert_eq!(direct.steps, 1);

    let mut opt = EcfOpt::default();
    opt.homotopy = true;
    let run = runecf(&case, &opt, &SparseLu, None, None).unwrap();
    let soln = run.solution().unwrap();
    assert!(soln.success());
    // h = 0, 0.2, ..., 1
    assert!(soln.steps >= 6);
    for phase in ["A", "B", "C"] {
        let dv = soln.voltage("n2", phase).unwrap() - direct.voltage("n2", phase).unwrap();
        assert!(dv.norm() < 1e-6, "{} {}", phase, dv);
    }
}

#[test]
fn test_homotopy_gives_up_after_repeated_failures_at_start() {
    let mut opt = EcfOpt::default();
    opt.homotopy = true;
    opt.max_iters = 1;
    let run = runecf(&stub([0.01, 0.02]), &opt, &SparseLu, None, None).unwrap();
    let soln = run.solution().unwrap();
    assert_eq!(soln.status, SolveStatus::DivergedMaxIters);
    assert_eq!(soln.steps, 0);
    // every retry restarts from the initial iterate at h = 0
    assert_eq!(soln.iterations, opt.continuation.k_reset);
}

/// Stub feeder with a PV inverter at the load bus.
fn stub_with_inverter(vset: f64) -> Case {
    let mut case = stub([0.01, 0.0]);
    case.ibdgs.push(IbdgData {
        name: "pv".into(),
        bus: "n2".into(),
        p3: 3e5,
        vset: Some(vset),
        ..Default::default()
    });
    case
}

fn inverter_output(soln: &powers_ecf::ecfsoln::EcfSolution) -> (f64, Option<QvRegion>) {
    match soln.output("pv") {
        Some(DeviceOutput::Ibdg { q3, region, .. }) => (*q3, *region),
        other => panic!("unexpected output {:?}", other),
    }
}

#[test]
fn test_qv_inverter_clamps_at_full_injection() {
    // 0.996 p.u. lies below the 1.01 p.u. first breakpoint of a 1.03 set point
    let q_max = 3e5 / 2.0;
    for control in [QvControl::Patching, QvControl::Spline, QvControl::Loop] {
        let mut opt = EcfOpt::default();
        opt.qv_control = control;
        let run = runecf(&stub_with_inverter(1.03), &opt, &SparseLu, None, None).unwrap();
        let soln = run.solution().unwrap();
        assert!(soln.success(), "{:?}", control);

        let (q3, region) = inverter_output(soln);
        assert_eq!(region, Some(QvRegion::ClampHigh), "{:?}", control);
        assert!((q3 - q_max).abs() < 1e-6 * q_max, "{:?} {}", control, q3);
    }
}

#[test]
fn test_qv_inverter_settles_on_its_curve() {
    let q_max = 3e5 / 2.0;
    let fixed = power_flow(&stub([0.01, 0.0]));
    let v_fixed = fixed.magnitude_pu("n2", "A").unwrap();
    for control in [QvControl::Patching, QvControl::Spline, QvControl::Loop] {
        let mut opt = EcfOpt::default();
        opt.qv_control = control;
        let run = runecf(&stub_with_inverter(1.005), &opt, &SparseLu, None, None).unwrap();
        let soln = run.solution().unwrap();
        assert!(soln.success(), "{:?}", control);

        let (q3, region) = inverter_output(soln);
        assert_eq!(region, Some(QvRegion::Region12), "{:?}", control);
        assert!(q3 > 0.0 && q3 < q_max, "{:?} {}", control, q3);

        let v = soln.magnitude_pu("n2", "A").unwrap();
        assert!(v > v_fixed);
        let curve = QvCurve::new(control, setpoint_profile(1.005), q_max, -q_max, "pv").unwrap();
        let (q, _, _) = curve.evaluate(v);
        assert!((q3 - q).abs() < 1e-3 * q_max, "{:?} {} {}", control, q3, q);
    }
}

/// Slack, a long line to `mid`, and a regulator from `mid` to the load bus.
fn regulated(control: TapControl) -> Case {
    Case {
        name: "reg".into(),
        buses: vec![
            bus("src", "ABCN", 1000.0, true),
            bus("mid", "ABCN", 1000.0, false),
            bus("reg", "ABCN", 1000.0, false),
        ],
        lines: vec![LineData {
            name: "l1".into(),
            from: "src".into(),
            to: "mid".into(),
            phases: "ABC".into(),
            z: diag(3, [0.1, 0.0]),
            y_shunt: None,
        }],
        regulators: vec![RegulatorData {
            name: "r1".into(),
            from: "mid".into(),
            to: "reg".into(),
            phases: "ABCN".into(),
            control,
            ..Default::default()
        }],
        loads: vec![LoadData {
            name: "ld".into(),
            bus: "reg".into(),
            phases: "ABC".into(),
            power: vec![[5e5, 1e5]; 3],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn ratios(soln: &powers_ecf::ecfsoln::EcfSolution) -> Vec<f64> {
    match soln.output("r1") {
        Some(DeviceOutput::Regulator { ratios, .. }) => ratios.iter().map(|r| r.1).collect(),
        other => panic!("unexpected output {:?}", other),
    }
}

#[test]
fn test_controlled_regulator_raises_load_voltage() {
    let fixed = power_flow(&regulated(TapControl::Fixed));
    assert!(fixed.success());
    assert!(ratios(&fixed).iter().all(|&a| a == 1.0));
    let v_fixed = fixed.magnitude_pu("reg", "A").unwrap();
    assert!(v_fixed < 0.95);

    let soln = power_flow(&regulated(TapControl::Patching));
    assert!(soln.success());
    let v = soln.magnitude_pu("reg", "A").unwrap();
    assert!(v > v_fixed);

    let a = ratios(&soln);
    assert_eq!(a.len(), 3);
    for (k, phase) in ["A", "B", "C"].iter().enumerate() {
        assert!(a[k] >= 0.9 && a[k] < 1.0, "{} {}", phase, a[k]);
        let mid = soln.voltage("mid", phase).unwrap();
        let reg = soln.voltage("reg", phase).unwrap();
        assert!((mid.norm() / reg.norm() - a[k]).abs() < 1e-6);
    }
}
