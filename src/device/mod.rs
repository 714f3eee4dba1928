//! Device models and their stamps.
//!
//! Every device is a variant of [`Device`]. Terminals are resolved to
//! indices when the device is built, so stamping only reads the iterate and
//! writes triplets. Contributions that do not depend on the iterate go to
//! the linear partition, shadow admittances scaled by `1 − h` to the
//! homotopy partition and everything else to the nonlinear partition.

mod battery;
mod infeas;
pub(crate) mod law;
mod line;
mod load;
mod ibdg;
mod meas;
mod regulator;
mod shunt;
mod slack;
mod stamp;
mod switch;
mod xfmr;

pub use battery::{Battery, BatteryPeriod};
pub use ibdg::Ibdg;
pub use infeas::{InfeasSource, SourceVars};
pub use line::{series_admittance, Line};
pub use load::{Load, PqElement, TriplexLoad};
pub use meas::CurrentMeas;
pub use regulator::Regulator;
pub use shunt::Shunt;
pub use slack::{Ground, Slack};
pub use stamp::{Series, Winding};
pub use switch::Switch;
pub use xfmr::Transformer;

use crate::control::QvRegion;
use crate::index::Phase;
use crate::triplet::Triplets;

use num_complex::Complex64;
use std::ops::AddAssign;

/// Upper bounds on the entries a device writes into each partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nnz {
    pub y_lin: usize,
    pub j_lin: usize,
    pub y_hom: usize,
    pub y_nl: usize,
    pub j_nl: usize,
}

impl AddAssign for Nnz {
    fn add_assign(&mut self, o: Nnz) {
        self.y_lin += o.y_lin;
        self.j_lin += o.j_lin;
        self.y_hom += o.y_hom;
        self.y_nl += o.y_nl;
        self.j_nl += o.j_nl;
    }
}

/// Iterate and run parameters seen by the nonlinear stamps.
#[derive(Debug, Clone, Copy)]
pub struct StampCtx<'a> {
    pub x: &'a [f64],
    /// Load factor.
    pub lf: f64,
    /// Homotopy factor; 1 is the target problem.
    pub h: f64,
    pub cs_tol: f64,
}

/// Class of a diode-limited unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    Primal,
    Dual,
}

/// Nonnegativity of `dir·(x[index] − bound)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub index: usize,
    pub bound: f64,
    pub dir: f64,
    pub class: LimitClass,
}

impl Bound {
    pub fn lower(index: usize, class: LimitClass) -> Self {
        Bound {
            index,
            bound: 0.0,
            dir: 1.0,
            class,
        }
    }

    pub fn upper(index: usize, bound: f64) -> Self {
        Bound {
            index,
            bound,
            dir: -1.0,
            class: LimitClass::Primal,
        }
    }

    pub fn slack(&self, x: &[f64]) -> f64 {
        self.dir * (x[self.index] - self.bound)
    }
}

/// Computed quantities of a device at a solution.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOutput {
    /// Series current per phase leaving the from end, and power entering it.
    Branch {
        currents: Vec<(Phase, Complex64)>,
        power: Complex64,
    },
    Regulator {
        ratios: Vec<(Phase, f64)>,
        taps: Vec<(Phase, i32)>,
        clamped: bool,
    },
    Switch {
        currents: Vec<(Phase, Complex64)>,
        blown: bool,
    },
    /// Power drawn from the network (negative when supplying).
    Power { power: Complex64 },
    Ibdg {
        q3: f64,
        region: Option<QvRegion>,
        currents: Vec<(Phase, Complex64)>,
    },
    Measurement {
        currents: Vec<(Phase, Complex64)>,
        magnitudes: Vec<(Phase, f64)>,
    },
    Infeasibility {
        phase: Phase,
        current: Complex64,
        values: Vec<f64>,
    },
    Battery {
        soc: f64,
        charge: Vec<f64>,
        discharge: Vec<f64>,
        dual: f64,
    },
}

/// Stamp and state contract shared by all devices.
pub(crate) trait Element {
    fn name(&self) -> &str;

    fn nnz(&self) -> Nnz;

    fn stamp_linear(&self, _t: &mut Triplets) {}

    /// Shadow admittances, scaled by `s = 1 − h`.
    fn stamp_homotopy(&self, _t: &mut Triplets, _s: f64, _g_h: f64, _b_h: f64) {}

    fn stamp_nonlinear(&self, _t: &mut Triplets, _ctx: &StampCtx) {}

    /// Piecewise state transition after an accepted step. Returns true when
    /// the state changed.
    fn update_state(&mut self, _x: &[f64]) -> bool {
        false
    }

    /// Initial values of the device's own unknowns.
    fn init(&self, _x: &mut [f64]) {}

    fn bounds(&self, _out: &mut Vec<Bound>) {}

    /// Auxiliary unknowns that count towards the power-flow error.
    fn tracked(&self, _out: &mut Vec<usize>) {}

    fn output(&self, _x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        None
    }
}

#[derive(Debug, Clone)]
pub enum Device {
    Line(Line),
    Transformer(Transformer),
    Regulator(Regulator),
    Switch(Switch),
    Shunt(Shunt),
    Load(Load),
    TriplexLoad(TriplexLoad),
    Ibdg(Ibdg),
    CurrentMeas(CurrentMeas),
    Slack(Slack),
    Ground(Ground),
    Infeas(InfeasSource),
    Battery(Battery),
}

macro_rules! dispatch {
    ($self:expr, $d:ident => $body:expr) => {
        match $self {
            Device::Line($d) => $body,
            Device::Transformer($d) => $body,
            Device::Regulator($d) => $body,
            Device::Switch($d) => $body,
            Device::Shunt($d) => $body,
            Device::Load($d) => $body,
            Device::TriplexLoad($d) => $body,
            Device::Ibdg($d) => $body,
            Device::CurrentMeas($d) => $body,
            Device::Slack($d) => $body,
            Device::Ground($d) => $body,
            Device::Infeas($d) => $body,
            Device::Battery($d) => $body,
        }
    };
}

impl Device {
    pub fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Device::Line(_) => "line",
            Device::Transformer(_) => "transformer",
            Device::Regulator(_) => "regulator",
            Device::Switch(_) => "switch",
            Device::Shunt(_) => "shunt",
            Device::Load(_) => "load",
            Device::TriplexLoad(_) => "triplex load",
            Device::Ibdg(_) => "ibdg",
            Device::CurrentMeas(_) => "current measurement",
            Device::Slack(_) => "slack",
            Device::Ground(_) => "ground",
            Device::Infeas(_) => "infeasibility source",
            Device::Battery(_) => "battery",
        }
    }

    pub fn nnz(&self) -> Nnz {
        dispatch!(self, d => d.nnz())
    }

    pub fn stamp_linear(&self, t: &mut Triplets) {
        dispatch!(self, d => d.stamp_linear(t))
    }

    pub fn stamp_homotopy(&self, t: &mut Triplets, s: f64, g_h: f64, b_h: f64) {
        dispatch!(self, d => d.stamp_homotopy(t, s, g_h, b_h))
    }

    pub fn stamp_nonlinear(&self, t: &mut Triplets, ctx: &StampCtx) {
        dispatch!(self, d => d.stamp_nonlinear(t, ctx))
    }

    pub fn update_state(&mut self, x: &[f64]) -> bool {
        dispatch!(self, d => d.update_state(x))
    }

    pub fn init(&self, x: &mut [f64]) {
        dispatch!(self, d => d.init(x))
    }

    pub fn bounds(&self, out: &mut Vec<Bound>) {
        dispatch!(self, d => d.bounds(out))
    }

    pub fn tracked(&self, out: &mut Vec<usize>) {
        dispatch!(self, d => d.tracked(out))
    }

    pub fn output(&self, x: &[f64], lf: f64) -> Option<DeviceOutput> {
        dispatch!(self, d => d.output(x, lf))
    }
}

pub(crate) fn volt(x: &[f64], t: crate::index::Terminal) -> Complex64 {
    Complex64::new(x[t.vr], x[t.vi])
}

pub(crate) fn volt_or_ground(x: &[f64], t: Option<crate::index::Terminal>) -> Complex64 {
    t.map(|t| volt(x, t)).unwrap_or_default()
}
