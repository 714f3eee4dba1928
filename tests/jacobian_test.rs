//! Assembled Newton matrices against central differences of the residual.

use powers_ecf::case::{
    BatteryData, BusData, Case, Connection, CurrentMeasData, IbdgData, LineData, LoadConnection,
    LoadData, RegulatorData, TapControl, TransformerData, TriplexLoadData,
};
use powers_ecf::device::StampCtx;
use powers_ecf::{
    build, residual, Assembler, CaseContext, EcfOpt, Objective, QvControl, SourceType,
};

fn bus(name: &str, slack: bool) -> BusData {
    BusData {
        name: name.to_string(),
        vnom: 1000.0,
        slack,
        ..Default::default()
    }
}

fn case() -> Case {
    Case {
        name: "fd".into(),
        buses: vec![bus("src", true), bus("n2", false)],
        lines: vec![LineData {
            name: "l12".into(),
            from: "src".into(),
            to: "n2".into(),
            phases: "ABCN".into(),
            z: (0..4)
                .map(|i| {
                    (0..4)
                        .map(|j| if i == j { [0.02, 0.04] } else { [0.005, 0.01] })
                        .collect()
                })
                .collect(),
            y_shunt: None,
        }],
        loads: vec![
            LoadData {
                name: "wye".into(),
                bus: "n2".into(),
                phases: "ABC".into(),
                power: vec![[3e5, 1e5], [2e5, 5e4], [1e5, 0.0]],
                ..Default::default()
            },
            LoadData {
                name: "delta".into(),
                bus: "n2".into(),
                phases: "ABC".into(),
                connection: LoadConnection::Delta,
                power: vec![[1e5, 3e4]; 3],
            },
        ],
        // only built when duals are stamped
        batteries: vec![BatteryData {
            name: "bat".into(),
            bus: "n2".into(),
            b_max: 1.0,
            b_init: 0.5,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Iterate away from flat start, with nonzero multipliers and auxiliaries.
fn iterate(ctx: &CaseContext) -> Vec<f64> {
    ctx.x0
        .iter()
        .enumerate()
        .map(|(k, v)| v * 0.97 + 3.0 + 0.25 * (k % 5) as f64)
        .collect()
}

fn eval(ctx: &CaseContext, asm: &mut Assembler, x: &[f64]) -> Vec<f64> {
    let sctx = StampCtx {
        x,
        lf: 1.0,
        h: 1.0,
        cs_tol: 1e-6,
    };
    let (y, j) = asm.system(&ctx.devices, &sctx, None).unwrap();
    residual(&y, &j, x).unwrap()
}

/// The base feeder extended with a transformer, a regulator, a split-phase
/// service and a fixed-power inverter.
fn network() -> Case {
    let mut case = case();
    case.buses.extend([
        bus("n3", false),
        bus("n4", false),
        BusData {
            name: "tx".into(),
            phases: "12N".into(),
            triplex: true,
            vnom: 120.0,
            ..Default::default()
        },
    ]);
    case.transformers = vec![
        TransformerData {
            name: "t23".into(),
            from: "n2".into(),
            to: "n3".into(),
            connection: Connection::WyeWye,
            rating: 1e6,
            v_primary: 1000.0,
            v_secondary: 1000.0,
            r: vec![0.01],
            x: vec![0.05],
            ..Default::default()
        },
        TransformerData {
            name: "ct".into(),
            from: "n2".into(),
            to: "tx".into(),
            phases: "AN".into(),
            connection: Connection::CenterTap,
            rating: 5e4,
            v_primary: 1000.0,
            v_secondary: 120.0,
            r: vec![0.01],
            x: vec![0.02],
            ..Default::default()
        },
    ];
    case.regulators = vec![RegulatorData {
        name: "r34".into(),
        from: "n3".into(),
        to: "n4".into(),
        taps: vec![2, -1, 0],
        z: Some([0.01, 0.03]),
        ..Default::default()
    }];
    case.loads.push(LoadData {
        name: "ld4".into(),
        bus: "n4".into(),
        phases: "ABC".into(),
        power: vec![[1e5, 2e4]; 3],
        ..Default::default()
    });
    case.triplex_loads = vec![TriplexLoadData {
        name: "house".into(),
        bus: "tx".into(),
        s1: [1e3, 2e2],
        s2: [8e2, 1e2],
        s12: [2e3, 5e2],
    }];
    case.ibdgs = vec![IbdgData {
        name: "pv3".into(),
        bus: "n3".into(),
        p3: 6e4,
        q3: 1e4,
        ..Default::default()
    }];
    case
}

/// Power-flow only devices on top of [`network`]: a Q-V inverter sensing
/// inside its first transition region, a controlled regulator and a current
/// measurement.
fn controlled_network() -> Case {
    let mut case = network();
    case.regulators[0].control = TapControl::Patching;
    case.ibdgs.push(IbdgData {
        name: "pv4".into(),
        bus: "n4".into(),
        p3: 3e4,
        // breakpoints 0.965 and 0.98 around the iterate's 0.973 p.u.
        vset: Some(0.985),
        ..Default::default()
    });
    case.current_meas = vec![CurrentMeasData {
        name: "m12".into(),
        line: "l12".into(),
        phases: "ABC".into(),
    }];
    case
}

fn check_jacobian(opt: &EcfOpt) {
    check_case_jacobian(&case(), opt);
}

fn check_case_jacobian(case: &Case, opt: &EcfOpt) {
    let mut ctx = build(case, opt).unwrap();
    let x = iterate(&ctx);
    // piecewise devices stamp the region of the iterate
    for d in ctx.devices.iter_mut() {
        d.update_state(&x);
    }
    let mut asm = Assembler::new(&ctx).unwrap();

    let sctx = StampCtx {
        x: &x,
        lf: 1.0,
        h: 1.0,
        cs_tol: 1e-6,
    };
    let (y, _) = asm.system(&ctx.devices, &sctx, None).unwrap();

    for k in 0..x.len() {
        let d = 1e-3 * x[k].abs().max(1.0);
        let mut xp = x.clone();
        let mut xm = x.clone();
        xp[k] += d;
        xm[k] -= d;
        let fp = eval(&ctx, &mut asm, &xp);
        let fm = eval(&ctx, &mut asm, &xm);
        for i in 0..x.len() {
            let fd = (fp[i] - fm[i]) / (2.0 * d);
            let an = y.get(i, k);
            assert!(
                (fd - an).abs() <= 1e-6 * (1.0 + an.abs()),
                "d{}/d{}: fd {} vs {} ({} / {})",
                i,
                k,
                fd,
                an,
                ctx.describe(i),
                ctx.describe(k)
            );
        }
    }
}

#[test]
fn test_power_flow_jacobian() {
    check_jacobian(&EcfOpt::default());
}

#[test]
fn test_kkt_jacobian_with_current_sources() {
    check_jacobian(&EcfOpt::infeasibility(SourceType::Current, Objective::L2));
}

#[test]
fn test_kkt_jacobian_with_pq_sources() {
    check_jacobian(&EcfOpt::infeasibility(SourceType::PQ, Objective::L2));
}

#[test]
fn test_kkt_jacobian_with_gb_sources() {
    check_jacobian(&EcfOpt::infeasibility(SourceType::GB, Objective::L2));
}

#[test]
fn test_kkt_jacobian_with_l1_current_sources() {
    check_jacobian(&EcfOpt::infeasibility(SourceType::Current, Objective::L1));
}

#[test]
fn test_kkt_jacobian_with_l1_pq_sources() {
    check_jacobian(&EcfOpt::infeasibility(SourceType::PQ, Objective::L1));
}

#[test]
fn test_kkt_jacobian_with_l1_gb_sources() {
    check_jacobian(&EcfOpt::infeasibility(SourceType::GB, Objective::L1));
}

#[test]
fn test_power_flow_jacobian_of_network_devices() {
    check_case_jacobian(&network(), &EcfOpt::default());
}

#[test]
fn test_power_flow_jacobian_of_controlled_devices() {
    for control in [QvControl::Patching, QvControl::Spline, QvControl::Loop] {
        let mut opt = EcfOpt::default();
        opt.qv_control = control;
        check_case_jacobian(&controlled_network(), &opt);
    }
}

#[test]
fn test_kkt_jacobian_of_network_devices() {
    check_case_jacobian(
        &network(),
        &EcfOpt::infeasibility(SourceType::Current, Objective::L2),
    );
    check_case_jacobian(&network(), &EcfOpt::infeasibility(SourceType::PQ, Objective::L1));
}
