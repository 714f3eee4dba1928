//! Case to system translation.
//!
//! Buses are registered first so their voltage indices form a contiguous
//! prefix, then devices are built in a fixed order: branches, shunt
//! elements, loads and generators, pseudo-devices, slack sources, grounds,
//! infeasibility sources and batteries.

use crate::case::{parse_phases, phase_key, Case, SwitchData, WarmStart};
use crate::device::{
    Battery, Bound, CurrentMeas, Device, Ground, Ibdg, InfeasSource, Line, Load, Regulator, Shunt,
    Slack, Switch, Transformer, TriplexLoad,
};
use crate::ecfopt::{EcfOpt, SourceType};
use crate::error::SolveError;
use crate::index::{IndexAllocator, NodeRegistry, Phase, PhaseMask, Terminal};

use std::collections::BTreeSet;

/// A case resolved to indices, with its device list and initial iterate.
#[derive(Debug)]
pub struct CaseContext {
    pub nodes: NodeRegistry,
    pub devices: Vec<Device>,
    /// Dual index of each primal, when dual stamping is on.
    pub dual_of: Vec<Option<usize>>,
    pub stamp_dual: bool,
    /// Initial iterate.
    pub x0: Vec<f64>,
    /// Nonnegativity constraints subject to diode limiting.
    pub bounds: Vec<Bound>,
    /// Every bus phase voltage with its nominal magnitude.
    pub voltages: Vec<(Phase, Terminal, f64)>,
    /// Device unknowns counted in the power-flow error.
    pub tracked: Vec<usize>,
}

impl CaseContext {
    pub fn len(&self) -> usize {
        self.x0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x0.is_empty()
    }

    pub fn batteries_mut(&mut self) -> impl Iterator<Item = &mut Battery> {
        self.devices.iter_mut().filter_map(|d| match d {
            Device::Battery(b) => Some(b),
            _ => None,
        })
    }

    pub fn ibdgs_mut(&mut self) -> impl Iterator<Item = &mut Ibdg> {
        self.devices.iter_mut().filter_map(|d| match d {
            Device::Ibdg(g) => Some(g),
            _ => None,
        })
    }

    /// Overwrites bus voltages from a warm-start record. Unknown buses and
    /// phases are ignored.
    pub fn apply_warm_start(&self, ws: &WarmStart, x: &mut [f64]) {
        let mut applied = 0;
        for bus in self.nodes.buses() {
            let phases = match ws.get(&bus.name) {
                Some(p) => p,
                None => continue,
            };
            for p in Phase::ALL {
                let t = match bus.terminal(p) {
                    Some(t) => t,
                    None => continue,
                };
                if let Some(v) = phases.get(&phase_key(p, bus.triplex)) {
                    x[t.vr] = v[0];
                    x[t.vi] = v[1];
                    applied += 1;
                }
            }
        }
        log::debug!("warm start set {} phase voltages", applied);
    }

    /// Names the bus phase or device variable behind an index.
    pub fn describe(&self, index: usize) -> String {
        match self.nodes.locate(index) {
            Some((bus, p, true)) => format!("{} {} (re)", bus.name, p),
            Some((bus, p, false)) => format!("{} {} (im)", bus.name, p),
            None => match self.dual_of.iter().position(|&d| d == Some(index)) {
                Some(primal) => format!("dual of {}", self.describe(primal)),
                None => format!("variable {}", index),
            },
        }
    }
}

fn flat_start(nodes: &NodeRegistry, n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for bus in nodes.buses() {
        for p in Phase::ALL {
            if let Some(t) = bus.terminal(p) {
                let (re, im) = bus.flat_start(p);
                x[t.vr] = re;
                x[t.vi] = im;
            }
        }
    }
    x
}

/// Buses whose neutral is tied to ground.
fn grounded_buses(case: &Case, nodes: &NodeRegistry, devices: &[Device]) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    for bus in nodes.buses().iter().filter(|b| b.slack) {
        out.insert(bus.id);
    }
    for d in devices {
        let ids = match d {
            Device::Transformer(t) => t.grounded_buses(),
            Device::Regulator(r) => r.grounded_buses(),
            _ => continue,
        };
        out.extend(ids.iter().copied());
    }

    // a neutral that no neutral conductor reaches is grounded locally
    let has_n = |phases: &str| {
        PhaseMask::parse(phases)
            .map(|m| m.contains(Phase::N))
            .unwrap_or(false)
    };
    let mut reached = BTreeSet::new();
    let mut touch = |from: &str, to: &str| {
        for name in [from, to] {
            if let Some(id) = nodes.id(name) {
                reached.insert(id);
            }
        }
    };
    for l in case.lines.iter().filter(|l| has_n(&l.phases)) {
        touch(&l.from, &l.to);
    }
    for s in case.switches.iter().filter(|s| s.closed && has_n(&s.phases)) {
        touch(&s.from, &s.to);
    }
    for f in case.fuses.iter().filter(|f| f.closed && has_n(&f.phases)) {
        touch(&f.from, &f.to);
    }
    for bus in nodes.buses() {
        if !reached.contains(&bus.id) {
            out.insert(bus.id);
        }
    }

    out.retain(|&id| nodes.bus(id).neutral().is_some());
    out
}

/// Builds the system of a case.
pub fn build(case: &Case, opt: &EcfOpt) -> Result<CaseContext, SolveError> {
    case.validate()?;
    let islands = case.island_count();
    if islands > 1 {
        log::warn!("case {} has {} islands", case.name, islands);
        for island in case.unsourced_islands() {
            log::warn!("island without a slack bus: {}", island.join(", "));
        }
    }

    let stamp_dual = opt.stamp_dual || opt.infeasibility_mode();
    let mut alloc = IndexAllocator::new(stamp_dual);
    let mut nodes = NodeRegistry::default();
    for b in &case.buses {
        let phases = parse_phases(&b.phases, &b.name)?;
        nodes.add(&mut alloc, &b.name, phases, b.triplex, b.vnom, b.slack)?;
    }

    let mut devices = Vec::new();
    for d in &case.lines {
        devices.push(Device::Line(Line::new(d, &nodes)?));
    }
    for d in &case.transformers {
        devices.push(Device::Transformer(Transformer::new(d, &nodes, &mut alloc)?));
    }
    for d in &case.regulators {
        devices.push(Device::Regulator(Regulator::new(d, &nodes, &mut alloc)?));
    }
    for d in &case.switches {
        devices.push(Device::Switch(Switch::new(d, None, &nodes, &mut alloc)?));
    }
    for f in &case.fuses {
        let d = SwitchData {
            name: f.name.clone(),
            from: f.from.clone(),
            to: f.to.clone(),
            phases: f.phases.clone(),
            closed: f.closed,
        };
        devices.push(Device::Switch(Switch::new(&d, Some(f.rating), &nodes, &mut alloc)?));
    }
    for d in &case.shunts {
        devices.push(Device::Shunt(Shunt::new(d, &nodes)?));
    }
    for d in &case.capacitors {
        devices.push(Device::Shunt(Shunt::capacitor(d, &nodes)?));
    }
    for d in &case.loads {
        devices.push(Device::Load(Load::new(d, &nodes)?));
    }
    for d in &case.triplex_loads {
        devices.push(Device::TriplexLoad(TriplexLoad::new(d, &nodes)?));
    }
    for d in &case.ibdgs {
        devices.push(Device::Ibdg(Ibdg::new(d, opt.qv_control, &nodes, &mut alloc)?));
    }
    for m in &case.current_meas {
        if stamp_dual {
            log::warn!("current measurement {} dropped under dual stamping", m.name);
            continue;
        }
        let line = case
            .lines
            .iter()
            .find(|l| l.name == m.line)
            .ok_or_else(|| SolveError::config(&m.name, format!("unknown line {}", m.line)))?;
        devices.push(Device::CurrentMeas(CurrentMeas::new(m, line, &nodes, &mut alloc)?));
    }

    for (b, data) in nodes.buses().iter().zip(&case.buses) {
        if b.slack {
            devices.push(Device::Slack(Slack::new(b, data.vset, data.angle, &mut alloc)));
        }
    }
    for id in grounded_buses(case, &nodes, &devices) {
        let bus = nodes.bus(id);
        if let Some(n) = bus.neutral() {
            devices.push(Device::Ground(Ground::new(bus, n, &mut alloc)));
        }
    }

    if opt.infeasibility_mode() {
        let inf = &opt.infeas;
        for bus in nodes.buses() {
            if (bus.slack && !inf.stamp_slack_bus) || (bus.triplex && !inf.triplex_sources) {
                continue;
            }
            let mut phases = bus.hot();
            if inf.neutral_source && bus.neutral().is_some() {
                phases.push(Phase::N);
            }
            for p in phases {
                let src =
                    InfeasSource::new(bus, p, inf.source_type, inf.obj, inf.obj_scalar, &mut alloc)?;
                devices.push(Device::Infeas(src));
            }
        }
        if inf.source_type != SourceType::Current && inf.neutral_source {
            log::debug!("neutral infeasibility sources use current injections");
        }
    }

    for d in &case.batteries {
        if !stamp_dual {
            log::warn!("battery {} ignored without dual stamping", d.name);
            continue;
        }
        devices.push(Device::Battery(Battery::new(d, &nodes, &mut alloc)?));
    }

    let n = alloc.len();
    let mut x0 = flat_start(&nodes, n);
    let mut bounds = Vec::new();
    let mut tracked = Vec::new();
    for d in &devices {
        d.init(&mut x0);
        d.bounds(&mut bounds);
        d.tracked(&mut tracked);
    }

    let mut voltages = Vec::new();
    for bus in nodes.buses() {
        for p in Phase::ALL {
            if let Some(t) = bus.terminal(p) {
                voltages.push((p, t, bus.vnom));
            }
        }
    }

    log::info!(
        "built {}: {} buses, {} devices, {} unknowns{}",
        case.name,
        nodes.len(),
        devices.len(),
        n,
        if stamp_dual { " (with duals)" } else { "" }
    );

    Ok(CaseContext {
        nodes,
        devices,
        dual_of: alloc.into_dual_map(),
        stamp_dual,
        x0,
        bounds,
        voltages,
        tracked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::tests::{bus, diag};
    use crate::case::{LineData, LoadData};

    fn stub() -> Case {
        Case {
            buses: vec![bus("src", 2401.8, true), bus("n2", 2401.8, false)],
            lines: vec![LineData {
                name: "l12".into(),
                from: "src".into(),
                to: "n2".into(),
                phases: "ABC".into(),
                z: diag(3, [0.3, 0.6]),
                y_shunt: None,
            }],
            loads: vec![LoadData {
                name: "ld".into(),
                bus: "n2".into(),
                phases: "ABC".into(),
                power: vec![[1e5, 2e4]; 3],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn unreached_neutrals_are_grounded() {
        let ctx = build(&stub(), &EcfOpt::default()).unwrap();
        // the line carries no neutral, so both buses ground their own
        let grounds = ctx
            .devices
            .iter()
            .filter(|d| matches!(d, Device::Ground(_)))
            .count();
        assert_eq!(grounds, 2);
    }

    #[test]
    fn infeasibility_mode_adds_sources_and_duals() {
        let opt = EcfOpt::infeasibility(SourceType::Current, crate::ecfopt::Objective::L2);
        let ctx = build(&stub(), &opt).unwrap();
        let sources = ctx
            .devices
            .iter()
            .filter(|d| matches!(d, Device::Infeas(_)))
            .count();
        assert_eq!(sources, 6);
        assert!(ctx.stamp_dual);
        assert!(ctx.dual_of.iter().any(|d| d.is_some()));
    }

    #[test]
    fn flat_start_uses_nominal_angles() {
        let ctx = build(&stub(), &EcfOpt::default()).unwrap();
        let b = ctx.nodes.get("n2", "test").unwrap();
        let t = b.terminal(Phase::B).unwrap();
        let v = (ctx.x0[t.vr].powi(2) + ctx.x0[t.vi].powi(2)).sqrt();
        assert!((v - 2401.8).abs() < 1e-9);
        assert!(ctx.x0[t.vi] < 0.0);
    }
}
