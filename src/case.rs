//! Input case model.
//!
//! A case is a plain serde record of buses and devices as a parser hands
//! them over. Bus and device references are by name; phases are strings
//! such as `"ABCN"` or `"12N"` for split-phase equipment. Electrical
//! quantities are in volts, amperes, ohms and volt-amperes (per phase).

use crate::error::SolveError;
use crate::index::{Phase, PhaseMask};

use anyhow::Result;
use clap::ValueEnum;
use num_complex::Complex64;
use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Complex quantity as `[re, im]`.
pub type Cplx = [f64; 2];

pub(crate) fn cplx(c: &Cplx) -> Complex64 {
    Complex64::new(c[0], c[1])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Case {
    pub name: String,
    pub buses: Vec<BusData>,
    pub lines: Vec<LineData>,
    pub transformers: Vec<TransformerData>,
    pub regulators: Vec<RegulatorData>,
    pub switches: Vec<SwitchData>,
    pub fuses: Vec<FuseData>,
    pub shunts: Vec<ShuntData>,
    pub capacitors: Vec<CapacitorData>,
    pub loads: Vec<LoadData>,
    pub triplex_loads: Vec<TriplexLoadData>,
    pub ibdgs: Vec<IbdgData>,
    pub current_meas: Vec<CurrentMeasData>,
    pub batteries: Vec<BatteryData>,
}

impl Default for Case {
    fn default() -> Self {
        Self {
            name: "case".to_string(),
            buses: Vec::new(),
            lines: Vec::new(),
            transformers: Vec::new(),
            regulators: Vec::new(),
            switches: Vec::new(),
            fuses: Vec::new(),
            shunts: Vec::new(),
            capacitors: Vec::new(),
            loads: Vec::new(),
            triplex_loads: Vec::new(),
            ibdgs: Vec::new(),
            current_meas: Vec::new(),
            batteries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusData {
    pub name: String,
    pub phases: String,
    pub triplex: bool,
    /// Nominal line-to-ground voltage.
    pub vnom: f64,
    pub slack: bool,
    /// Slack set point magnitude in per unit of `vnom`.
    pub vset: f64,
    /// Slack angle offset in degrees, added to each phase's nominal angle.
    pub angle: f64,
}

impl Default for BusData {
    fn default() -> Self {
        Self {
            name: String::new(),
            phases: "ABCN".to_string(),
            triplex: false,
            vnom: 2401.7771,
            slack: false,
            vset: 1.0,
            angle: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineData {
    pub name: String,
    pub from: String,
    pub to: String,
    pub phases: String,
    /// Series impedance matrix in ohms, rows and columns in `phases` order.
    pub z: Vec<Vec<Cplx>>,
    /// Total shunt admittance matrix in siemens; half is placed at each end.
    pub y_shunt: Option<Vec<Vec<Cplx>>>,
}

#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum Connection {
    WyeWye,
    DeltaDelta,
    WyeDelta,
    DeltaWye,
    /// Single-phase primary feeding a split-phase secondary.
    CenterTap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerData {
    pub name: String,
    pub from: String,
    pub to: String,
    pub phases: String,
    pub connection: Connection,
    /// Rated power per winding.
    pub rating: f64,
    /// Rated primary and secondary line-to-ground voltages.
    pub v_primary: f64,
    pub v_secondary: f64,
    /// Winding resistance and reactance in per unit. Center-tap units use
    /// three values `[primary, half 1, half 2]`, or one value to be split.
    pub r: Vec<f64>,
    pub x: Vec<f64>,
    /// Magnetizing shunt impedance in per unit, if modeled.
    pub shunt: Option<Cplx>,
}

impl Default for TransformerData {
    fn default() -> Self {
        Self {
            name: String::new(),
            from: String::new(),
            to: String::new(),
            phases: "ABCN".to_string(),
            connection: Connection::WyeWye,
            rating: 0.0,
            v_primary: 0.0,
            v_secondary: 0.0,
            r: vec![0.0],
            x: vec![0.0],
            shunt: None,
        }
    }
}

#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum RegulatorType {
    /// Regulator shunt winding on the source side.
    A,
    /// Regulator shunt winding on the load side.
    B,
}

#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum TapControl {
    /// Taps held at their given positions.
    Fixed,
    /// Ratio solved together with the network through a smoothed control curve.
    Patching,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulatorData {
    pub name: String,
    pub from: String,
    pub to: String,
    pub phases: String,
    pub reg_type: RegulatorType,
    pub control: TapControl,
    /// Tap positions per hot phase, in `phases` order.
    pub taps: Vec<i32>,
    /// Per-unit voltage change of one tap.
    pub step: f64,
    /// Total number of tap positions (raise plus lower).
    pub max_taps: i32,
    /// Band center and edges of the sensed voltage, per unit.
    pub v_band_center: f64,
    pub v_min: f64,
    pub v_max: f64,
    /// Potential transformer base for the sensed voltage; the output bus
    /// nominal voltage when absent.
    pub pt_base: Option<f64>,
    /// Series impedance of the regulator in ohms.
    pub z: Option<Cplx>,
}

impl Default for RegulatorData {
    fn default() -> Self {
        Self {
            name: String::new(),
            from: String::new(),
            to: String::new(),
            phases: "ABCN".to_string(),
            reg_type: RegulatorType::B,
            control: TapControl::Fixed,
            taps: Vec::new(),
            step: 0.00625,
            max_taps: 32,
            v_band_center: 1.0,
            v_min: 0.95,
            v_max: 1.05,
            pt_base: None,
            z: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchData {
    pub name: String,
    pub from: String,
    pub to: String,
    pub phases: String,
    pub closed: bool,
}

impl Default for SwitchData {
    fn default() -> Self {
        Self {
            name: String::new(),
            from: String::new(),
            to: String::new(),
            phases: "ABCN".to_string(),
            closed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseData {
    pub name: String,
    pub from: String,
    pub to: String,
    pub phases: String,
    pub closed: bool,
    /// Current rating in amperes.
    pub rating: f64,
}

impl Default for FuseData {
    fn default() -> Self {
        Self {
            name: String::new(),
            from: String::new(),
            to: String::new(),
            phases: "ABCN".to_string(),
            closed: true,
            rating: f64::INFINITY,
        }
    }
}

#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum LoadConnection {
    /// Phase to neutral, or to ground when the bus has no neutral.
    Wye,
    /// Phase to next phase (AB, BC, CA).
    Delta,
}

impl Default for LoadConnection {
    fn default() -> Self {
        LoadConnection::Wye
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuntData {
    pub name: String,
    pub bus: String,
    pub phases: String,
    pub connection: LoadConnection,
    /// Admittance per phase in siemens.
    pub g: f64,
    pub b: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacitorData {
    pub name: String,
    pub bus: String,
    pub phases: String,
    pub connection: LoadConnection,
    /// Rated reactive power per phase in vars.
    pub q: f64,
    /// Rated voltage across each element; bus nominal voltage when absent.
    pub v_rated: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadData {
    pub name: String,
    pub bus: String,
    pub phases: String,
    pub connection: LoadConnection,
    /// Constant complex power per hot phase (or phase pair) in `phases` order.
    pub power: Vec<Cplx>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriplexLoadData {
    pub name: String,
    pub bus: String,
    /// Power drawn between L1 and N, L2 and N, and L1 and L2.
    pub s1: Cplx,
    pub s2: Cplx,
    pub s12: Cplx,
}

#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum IbdgKind {
    /// Balanced positive-sequence control.
    Bpsc,
    /// Positive and negative sequence control.
    Pnsc,
    /// Flexible positive and negative sequence control.
    Fpnsc,
}

#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum Resource {
    Pv,
    Wind,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IbdgData {
    pub name: String,
    pub bus: String,
    pub kind: IbdgKind,
    pub resource: Resource,
    /// Scheduled three-phase active and reactive generation.
    pub p3: f64,
    pub q3: f64,
    pub alpha: Cplx,
    pub beta: Cplx,
    /// Q-V control set point in per unit. Fixed `q3` when absent.
    pub vset: Option<f64>,
    /// Phase whose voltage is sensed by the Q-V control.
    pub sense_phase: char,
    /// Clamp relaxation scale used during homotopy.
    pub h_init: f64,
}

impl Default for IbdgData {
    fn default() -> Self {
        Self {
            name: String::new(),
            bus: String::new(),
            kind: IbdgKind::Bpsc,
            resource: Resource::Pv,
            p3: 0.0,
            q3: 0.0,
            alpha: [1.0, 0.0],
            beta: [0.0, 0.0],
            vset: None,
            sense_phase: 'A',
            h_init: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentMeasData {
    pub name: String,
    /// Name of the measured line.
    pub line: String,
    pub phases: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryData {
    pub name: String,
    pub bus: String,
    pub phases: String,
    /// Energy capacity and initial state of charge.
    pub b_max: f64,
    pub b_init: f64,
    /// Per-phase power limit for charge and discharge.
    pub p_max: f64,
    /// Energy per unit of charge and discharge power.
    pub m_ch: f64,
    pub m_d: f64,
    /// Cost weights of charge and discharge power.
    pub c_ch: f64,
    pub c_d: f64,
}

impl Default for BatteryData {
    fn default() -> Self {
        Self {
            name: String::new(),
            bus: String::new(),
            phases: "ABC".to_string(),
            b_max: 0.0,
            b_init: 0.0,
            p_max: 3e6,
            m_ch: 5e-7,
            m_d: 5e-7,
            c_ch: 1.0,
            c_d: -0.5,
        }
    }
}

/// Parses a phase string, naming the device on failure.
pub(crate) fn parse_phases(s: &str, device: &str) -> Result<PhaseMask, SolveError> {
    PhaseMask::parse(s)
        .ok_or_else(|| SolveError::config(device, format!("invalid phase string {:?}", s)))
}

impl Case {
    pub fn from_json_str(s: &str) -> Result<Case> {
        let case: Case = serde_json::from_str(s).map_err(SolveError::from)?;
        Ok(case)
    }

    pub fn read_json(path: &Path) -> Result<Case> {
        let file = File::open(path).map_err(SolveError::from)?;
        let case: Case = serde_json::from_reader(BufReader::new(file)).map_err(SolveError::from)?;
        Ok(case)
    }

    /// Checks names, references and ratings before anything is built.
    pub fn validate(&self) -> Result<(), SolveError> {
        let mut names = HashSet::new();
        for b in &self.buses {
            if b.name.is_empty() {
                return Err(SolveError::config("bus", "empty bus name"));
            }
            if !names.insert(b.name.as_str()) {
                return Err(SolveError::config(&b.name, "duplicate bus name"));
            }
            if !(b.vnom > 0.0) {
                return Err(SolveError::config(&b.name, "nominal voltage must be positive"));
            }
            parse_phases(&b.phases, &b.name)?;
        }
        if !self.buses.iter().any(|b| b.slack) {
            return Err(SolveError::config(&self.name, "no slack bus"));
        }

        let known = |dev: &str, bus: &str| -> Result<(), SolveError> {
            if names.contains(bus) {
                Ok(())
            } else {
                Err(SolveError::config(dev, format!("unknown bus {}", bus)))
            }
        };
        for (dev, from, to) in self.branches() {
            known(dev, from)?;
            known(dev, to)?;
        }
        for (dev, bus) in self.attachments() {
            known(dev, bus)?;
        }

        for l in &self.lines {
            let n = parse_phases(&l.phases, &l.name)?.phases().len();
            if l.z.len() != n || l.z.iter().any(|r| r.len() != n) {
                return Err(SolveError::config(
                    &l.name,
                    format!("impedance matrix must be {}x{}", n, n),
                ));
            }
        }
        for t in &self.transformers {
            if !(t.rating > 0.0 && t.v_primary > 0.0 && t.v_secondary > 0.0) {
                return Err(SolveError::config(&t.name, "rating and voltages must be positive"));
            }
            if t.r.is_empty() || t.x.is_empty() {
                return Err(SolveError::config(&t.name, "missing winding impedance"));
            }
        }
        let lines: HashSet<&str> = self.lines.iter().map(|l| l.name.as_str()).collect();
        for m in &self.current_meas {
            if !lines.contains(m.line.as_str()) {
                return Err(SolveError::config(&m.name, format!("unknown line {}", m.line)));
            }
        }
        for b in &self.batteries {
            if b.b_init < 0.0 || b.b_init > b.b_max {
                return Err(SolveError::config(&b.name, "initial charge outside [0, b_max]"));
            }
        }
        Ok(())
    }

    /// Two-terminal devices as `(name, from, to)`.
    fn branches(&self) -> Vec<(&str, &str, &str)> {
        let mut out: Vec<(&str, &str, &str)> = Vec::new();
        out.extend(self.lines.iter().map(|d| (d.name.as_str(), d.from.as_str(), d.to.as_str())));
        out.extend(
            self.transformers
                .iter()
                .map(|d| (d.name.as_str(), d.from.as_str(), d.to.as_str())),
        );
        out.extend(
            self.regulators
                .iter()
                .map(|d| (d.name.as_str(), d.from.as_str(), d.to.as_str())),
        );
        out.extend(
            self.switches
                .iter()
                .filter(|d| d.closed)
                .map(|d| (d.name.as_str(), d.from.as_str(), d.to.as_str())),
        );
        out.extend(
            self.fuses
                .iter()
                .filter(|d| d.closed)
                .map(|d| (d.name.as_str(), d.from.as_str(), d.to.as_str())),
        );
        out
    }

    fn attachments(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = Vec::new();
        out.extend(self.shunts.iter().map(|d| (d.name.as_str(), d.bus.as_str())));
        out.extend(self.capacitors.iter().map(|d| (d.name.as_str(), d.bus.as_str())));
        out.extend(self.loads.iter().map(|d| (d.name.as_str(), d.bus.as_str())));
        out.extend(self.triplex_loads.iter().map(|d| (d.name.as_str(), d.bus.as_str())));
        out.extend(self.ibdgs.iter().map(|d| (d.name.as_str(), d.bus.as_str())));
        out.extend(self.batteries.iter().map(|d| (d.name.as_str(), d.bus.as_str())));
        out
    }

    fn bus_graph(&self) -> (UnGraph<usize, ()>, HashMap<&str, NodeIndex>) {
        let mut graph = UnGraph::<usize, ()>::new_undirected();
        let mut nodes = HashMap::new();
        for (i, b) in self.buses.iter().enumerate() {
            nodes.insert(b.name.as_str(), graph.add_node(i));
        }
        for (_, from, to) in self.branches() {
            if let (Some(&f), Some(&t)) = (nodes.get(from), nodes.get(to)) {
                graph.add_edge(f, t, ());
            }
        }
        (graph, nodes)
    }

    /// Number of electrically connected bus groups.
    pub fn island_count(&self) -> usize {
        let (graph, _) = self.bus_graph();
        connected_components(&graph)
    }

    /// Bus names of every island that does not contain a slack bus.
    pub fn unsourced_islands(&self) -> Vec<Vec<String>> {
        let (graph, nodes) = self.bus_graph();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for b in &self.buses {
            let start = nodes[b.name.as_str()];
            if !seen.insert(start) {
                continue;
            }
            let mut stack = vec![start];
            let mut group = vec![start];
            while let Some(n) = stack.pop() {
                for m in graph.neighbors(n) {
                    if seen.insert(m) {
                        stack.push(m);
                        group.push(m);
                    }
                }
            }
            if !group.iter().any(|&n| self.buses[graph[n]].slack) {
                let mut names: Vec<String> =
                    group.iter().map(|&n| self.buses[graph[n]].name.clone()).collect();
                names.sort();
                out.push(names);
            }
        }
        out
    }
}

/// Voltages keyed by bus name then phase letter, as `[re, im]`.
pub type WarmStart = BTreeMap<String, BTreeMap<String, Cplx>>;

pub fn read_warm_start(path: &Path) -> Result<WarmStart> {
    let file = File::open(path).map_err(SolveError::from)?;
    let ws: WarmStart = serde_json::from_reader(BufReader::new(file)).map_err(SolveError::from)?;
    Ok(ws)
}

pub fn write_warm_start(path: &Path, ws: &WarmStart) -> Result<()> {
    let file = File::create(path).map_err(SolveError::from)?;
    serde_json::to_writer_pretty(BufWriter::new(file), ws).map_err(SolveError::from)?;
    Ok(())
}

pub(crate) fn phase_key(p: Phase, triplex: bool) -> String {
    match (triplex, p) {
        (true, Phase::L1) => "1".to_string(),
        (true, Phase::L2) => "2".to_string(),
        _ => p.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn bus(name: &str, vnom: f64, slack: bool) -> BusData {
        BusData {
            name: name.to_string(),
            vnom,
            slack,
            ..Default::default()
        }
    }

    pub(crate) fn diag(n: usize, z: Cplx) -> Vec<Vec<Cplx>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { z } else { [0.0, 0.0] }).collect())
            .collect()
    }

    fn radial() -> Case {
        Case {
            buses: vec![bus("src", 2401.8, true), bus("n2", 2401.8, false), bus("n3", 2401.8, false)],
            lines: vec![
                LineData {
                    name: "l12".into(),
                    from: "src".into(),
                    to: "n2".into(),
                    phases: "ABCN".into(),
                    z: diag(4, [0.3, 0.6]),
                    y_shunt: None,
                },
                LineData {
                    name: "l23".into(),
                    from: "n2".into(),
                    to: "n3".into(),
                    phases: "ABCN".into(),
                    z: diag(4, [0.3, 0.6]),
                    y_shunt: None,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn valid_case_passes() {
        radial().validate().unwrap();
    }

    #[test]
    fn unknown_bus_is_rejected() {
        let mut case = radial();
        case.lines[1].to = "n9".into();
        let err = case.validate().unwrap_err();
        assert!(err.to_string().contains("n9"));
    }

    #[test]
    fn bad_impedance_shape_is_rejected() {
        let mut case = radial();
        case.lines[0].z = diag(3, [0.3, 0.6]);
        assert!(case.validate().is_err());
    }

    #[test]
    fn open_switch_splits_islands() {
        let mut case = radial();
        case.lines.pop();
        case.switches.push(SwitchData {
            name: "sw".into(),
            from: "n2".into(),
            to: "n3".into(),
            closed: false,
            ..Default::default()
        });
        assert_eq!(case.island_count(), 2);
        assert_eq!(case.unsourced_islands(), vec![vec!["n3".to_string()]]);

        case.switches[0].closed = true;
        assert_eq!(case.island_count(), 1);
        assert!(case.unsourced_islands().is_empty());
    }

    #[test]
    fn json_names_and_defaults() {
        let json = r#"{
            "buses": [{"name": "b1", "slack": true, "vnom": 120.0, "phases": "12N", "triplex": true}],
            "loads": [{"name": "ld", "bus": "b1", "phases": "1N", "power": [[100.0, 20.0]]}]
        }"#;
        let case = Case::from_json_str(json).unwrap();
        assert!(case.buses[0].triplex);
        assert_eq!(case.loads[0].connection, LoadConnection::Wye);
        assert_eq!(case.buses[0].vset, 1.0);
        case.validate().unwrap();
    }
}
