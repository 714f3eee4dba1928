use powers_ecf::case::{BatteryData, BusData, Case, LineData, LoadData};
use powers_ecf::device::DeviceOutput;
use powers_ecf::linsolve::SparseLu;
use powers_ecf::multiperiod::PeriodSolution;
use powers_ecf::{runecf, EcfOpt, EcfRun, RunType};

fn feeder() -> Case {
    let bus = |name: &str, slack| BusData {
        name: name.to_string(),
        vnom: 1000.0,
        slack,
        ..Default::default()
    };
    Case {
        name: "mp".into(),
        buses: vec![bus("src", true), bus("n2", false)],
        lines: vec![LineData {
            name: "l12".into(),
            from: "src".into(),
            to: "n2".into(),
            phases: "ABC".into(),
            z: (0..3)
                .map(|i| (0..3).map(|j| if i == j { [0.02, 0.02] } else { [0.0, 0.0] }).collect())
                .collect(),
            y_shunt: None,
        }],
        loads: vec![LoadData {
            name: "ld".into(),
            bus: "n2".into(),
            phases: "ABC".into(),
            power: vec![[3e5, 5e4]; 3],
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[test]
fn test_periods_follow_load_series() {
    let mut opt = EcfOpt::default();
    opt.run_type = RunType::MultiPeriod;
    opt.multi.periods = 3;
    opt.multi.max_epochs = 4;
    opt.multi.load_factor = vec![1.0, 0.8, 0.6];

    let run = runecf(&feeder(), &opt, &SparseLu, None, None).unwrap();
    let m = match run {
        EcfRun::MultiPeriod(m) => m,
        other => panic!("unexpected run {:?}", other),
    };
    assert!(m.success());
    // without batteries the periods are independent
    assert!(m.converged);
    assert_eq!(m.epochs, 1);
    assert_eq!(m.epsilon, 0.0);
    assert_eq!(m.periods.len(), 3);

    let v: Vec<f64> = m
        .periods
        .iter()
        .map(|p| p.soln.magnitude_pu("n2", "A").unwrap())
        .collect();
    assert!(v[0] < v[1] && v[1] < v[2]);
    for (p, lf) in m.periods.iter().zip([1.0, 0.8, 0.6]) {
        assert_eq!(p.soln.load_factor, lf);
        assert!(p.infeas.is_feasible());
        assert!(p.batteries.is_empty());
    }
}

#[test]
fn test_zero_periods_is_a_config_error() {
    let mut opt = EcfOpt::default();
    opt.run_type = RunType::MultiPeriod;
    opt.multi.periods = 0;
    assert!(runecf(&feeder(), &opt, &SparseLu, None, None).is_err());
}

#[test]
fn test_default_options_converge_without_batteries() {
    let mut opt = EcfOpt::default();
    opt.run_type = RunType::MultiPeriod;

    let run = runecf(&feeder(), &opt, &SparseLu, None, None).unwrap();
    let m = match run {
        EcfRun::MultiPeriod(m) => m,
        other => panic!("unexpected run {:?}", other),
    };
    assert!(m.success());
    assert!(m.converged);
    assert_eq!(m.periods.len(), 2);
}

#[test]
fn test_battery_charges_when_cheap_and_discharges_when_dear() {
    let mut case = feeder();
    case.batteries.push(BatteryData {
        name: "bat".into(),
        bus: "n2".into(),
        phases: "ABC".into(),
        b_max: 1.0,
        b_init: 0.5,
        p_max: 1e5,
        m_ch: 1e-5,
        m_d: 1e-5,
        ..Default::default()
    });
    let mut opt = EcfOpt::default();
    opt.run_type = RunType::MultiPeriod;
    opt.multi.periods = 2;
    opt.multi.max_epochs = 4;
    opt.multi.price = vec![0.1, 10.0];

    let run = runecf(&case, &opt, &SparseLu, None, None).unwrap();
    let m = match run {
        EcfRun::MultiPeriod(m) => m,
        other => panic!("unexpected run {:?}", other),
    };
    assert!(m.success());
    assert!(m.epochs >= 2);

    let soc: Vec<f64> = m.periods.iter().map(|p| p.batteries[0].soc).collect();
    for p in &m.periods {
        let b = &p.batteries[0];
        assert_eq!(b.name, "bat");
        assert!(b.dynamics_residual.abs() < 1e-6);
        assert!(b.soc > -1e-6 && b.soc < 1.0 + 1e-6);
    }
    // energy bought at the low price is sold at the high one
    assert!(soc[0] > 0.5);
    assert!(soc[1] < soc[0]);

    let flows = |p: &PeriodSolution| match p.soln.output("bat") {
        Some(DeviceOutput::Battery {
            charge, discharge, ..
        }) => (charge.iter().sum::<f64>(), discharge.iter().sum::<f64>()),
        other => panic!("unexpected output {:?}", other),
    };
    let (ch0, d0) = flows(&m.periods[0]);
    let (ch1, d1) = flows(&m.periods[1]);
    assert!(ch0 > d0);
    assert!(d1 > ch1);
    for p in &m.periods {
        let (ch, d) = flows(p);
        assert!(ch > -1e-6 && ch < 3e5 + 1e-3);
        assert!(d > -1e-6 && d < 3e5 + 1e-3);
    }
}
