//! Index allocation and the node registry.
//!
//! Every scalar unknown of the system is named by an integer issued by the
//! [`IndexAllocator`]. Buses receive a fixed bundle of voltage indices when they
//! are registered and never give them back.

use crate::error::SolveError;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum Phase {
    A = 0,
    B = 1,
    C = 2,
    N = 3,
}

impl Phase {
    /// First hot leg of a split-phase bus.
    pub const L1: Phase = Phase::A;
    /// Second hot leg of a split-phase bus.
    pub const L2: Phase = Phase::B;

    pub const ABC: [Phase; 3] = [Phase::A, Phase::B, Phase::C];
    pub const ALL: [Phase; 4] = [Phase::A, Phase::B, Phase::C, Phase::N];

    pub fn slot(&self) -> usize {
        *self as usize
    }

    pub fn bit(&self) -> u8 {
        1 << (*self as u8)
    }

    pub fn from_char(c: char) -> Option<Phase> {
        match c.to_ascii_uppercase() {
            'A' | '1' => Some(Phase::A),
            'B' | '2' => Some(Phase::B),
            'C' => Some(Phase::C),
            'N' => Some(Phase::N),
            _ => None,
        }
    }

    /// Nominal angle of the phase in radians.
    pub fn angle(&self) -> f64 {
        match self {
            Phase::A => 0.0,
            Phase::B => -2.0 * std::f64::consts::FRAC_PI_3,
            Phase::C => 2.0 * std::f64::consts::FRAC_PI_3,
            Phase::N => 0.0,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
            Phase::N => "N",
        };
        write!(f, "{}", s)
    }
}

/// Set of phases present at a bus or on a device: `A=0x1, B=0x2, C=0x4, N=0x8`.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub struct PhaseMask(pub u8);

impl PhaseMask {
    pub const ABCN: PhaseMask = PhaseMask(0xF);
    pub const ABC: PhaseMask = PhaseMask(0x7);

    pub fn parse(s: &str) -> Option<PhaseMask> {
        let mut mask = 0;
        for c in s.chars().filter(|c| !c.is_whitespace()) {
            mask |= Phase::from_char(c)?.bit();
        }
        Some(PhaseMask(mask))
    }

    pub fn contains(&self, p: Phase) -> bool {
        self.0 & p.bit() != 0
    }

    /// Phases in slot order.
    pub fn phases(&self) -> Vec<Phase> {
        Phase::ALL.into_iter().filter(|&p| self.contains(p)).collect()
    }

    pub fn hot(&self) -> Vec<Phase> {
        Phase::ABC.into_iter().filter(|&p| self.contains(p)).collect()
    }

    pub fn intersect(&self, other: PhaseMask) -> PhaseMask {
        PhaseMask(self.0 & other.0)
    }
}

/// Real and imaginary voltage indices of one bus phase.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Terminal {
    pub vr: usize,
    pub vi: usize,
}

/// Issues strictly increasing indices and records which primal index owns
/// which dual index.
#[derive(Debug, Default)]
pub struct IndexAllocator {
    dual_of: Vec<Option<usize>>,
    stamp_dual: bool,
}

impl IndexAllocator {
    pub fn new(stamp_dual: bool) -> Self {
        Self {
            dual_of: Vec::new(),
            stamp_dual,
        }
    }

    pub fn next(&mut self) -> usize {
        self.dual_of.push(None);
        self.dual_of.len() - 1
    }

    /// Allocates a primal unknown that takes part in the network equations,
    /// together with its dual when dual stamping is on.
    pub fn primal(&mut self) -> usize {
        let p = self.next();
        if self.stamp_dual {
            let d = self.next();
            self.dual_of[p] = Some(d);
        }
        p
    }

    pub fn terminal(&mut self) -> Terminal {
        Terminal {
            vr: self.primal(),
            vi: self.primal(),
        }
    }

    pub(crate) fn bind_dual(&mut self, primal: usize, dual: usize) {
        self.dual_of[primal] = Some(dual);
    }

    pub fn stamp_dual(&self) -> bool {
        self.stamp_dual
    }

    /// Number of indices issued so far.
    pub fn len(&self) -> usize {
        self.dual_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dual_of.is_empty()
    }

    pub fn dual_of(&self, primal: usize) -> Option<usize> {
        self.dual_of.get(primal).copied().flatten()
    }

    pub fn into_dual_map(self) -> Vec<Option<usize>> {
        self.dual_of
    }
}

/// Index bundle of one bus.
#[derive(Debug, Clone, Default)]
pub struct BusIndices {
    pub v: [Option<Terminal>; 4],
    pub dual: [Option<Terminal>; 4],
}

#[derive(Debug, Clone)]
pub struct Bus {
    pub name: String,
    pub id: usize,
    pub phases: PhaseMask,
    pub triplex: bool,
    /// Nominal line-to-ground voltage.
    pub vnom: f64,
    pub slack: bool,
    pub idx: BusIndices,
}

impl Bus {
    /// Voltage indices of a phase, if the phase is present at the bus.
    pub fn terminal(&self, p: Phase) -> Option<Terminal> {
        if self.phases.contains(p) {
            self.idx.v[p.slot()]
        } else {
            None
        }
    }

    pub fn neutral(&self) -> Option<Terminal> {
        self.terminal(Phase::N)
    }

    pub fn require(&self, p: Phase, device: &str) -> Result<Terminal, SolveError> {
        self.terminal(p).ok_or_else(|| {
            SolveError::config(device, format!("bus {} has no phase {}", self.name, p))
        })
    }

    pub fn dual(&self, p: Phase) -> Option<Terminal> {
        if self.phases.contains(p) {
            self.idx.dual[p.slot()]
        } else {
            None
        }
    }

    /// Dual pair of one of this bus's voltage terminals.
    pub fn dual_for(&self, t: Terminal) -> Option<Terminal> {
        (0..4)
            .find(|&k| self.idx.v[k] == Some(t))
            .and_then(|k| self.idx.dual[k])
    }

    /// Flat-start voltage of a phase.
    pub fn flat_start(&self, p: Phase) -> (f64, f64) {
        match p {
            Phase::N => (0.0, 0.0),
            _ if self.triplex => {
                let sign = if p == Phase::L2 { -1.0 } else { 1.0 };
                (sign * self.vnom, 0.0)
            }
            _ => (self.vnom * p.angle().cos(), self.vnom * p.angle().sin()),
        }
    }

    /// Hot phases: A, B, C or the two legs of a split-phase bus.
    pub fn hot(&self) -> Vec<Phase> {
        if self.triplex {
            vec![Phase::L1, Phase::L2]
        } else {
            self.phases.hot()
        }
    }
}

/// Maps bus names to their index bundles.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    buses: Vec<Bus>,
    by_name: HashMap<String, usize>,
}

impl NodeRegistry {
    /// Registers a bus and assigns its voltage indices (then its duals).
    ///
    /// Three-phase buses always receive all four phase slots in the order
    /// `A_Vr, A_Vi, B_Vr, B_Vi, C_Vr, C_Vi, N_Vr, N_Vi`. Split-phase buses
    /// receive `L1, L2, N`. Slots of phases absent from the mask stay unused
    /// and produce empty rows that are removed before solving.
    pub fn add(
        &mut self,
        alloc: &mut IndexAllocator,
        name: &str,
        phases: PhaseMask,
        triplex: bool,
        vnom: f64,
        slack: bool,
    ) -> Result<usize, SolveError> {
        if self.by_name.contains_key(name) {
            return Err(SolveError::config(name, "duplicate bus name"));
        }
        let slots: &[Phase] = if triplex {
            &[Phase::L1, Phase::L2, Phase::N]
        } else {
            &Phase::ALL
        };

        let mut idx = BusIndices::default();
        for &p in slots {
            idx.v[p.slot()] = Some(Terminal {
                vr: alloc.next(),
                vi: alloc.next(),
            });
        }
        if alloc.stamp_dual() {
            for &p in slots {
                let d = Terminal {
                    vr: alloc.next(),
                    vi: alloc.next(),
                };
                if let Some(t) = idx.v[p.slot()] {
                    alloc.bind_dual(t.vr, d.vr);
                    alloc.bind_dual(t.vi, d.vi);
                }
                idx.dual[p.slot()] = Some(d);
            }
        }

        let id = self.buses.len();
        self.buses.push(Bus {
            name: name.to_string(),
            id,
            phases,
            triplex,
            vnom,
            slack,
            idx,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get(&self, name: &str, device: &str) -> Result<&Bus, SolveError> {
        self.by_name
            .get(name)
            .map(|&i| &self.buses[i])
            .ok_or_else(|| SolveError::config(device, format!("unknown bus {}", name)))
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn bus(&self, id: usize) -> &Bus {
        &self.buses[id]
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    /// Finds the bus and phase that own a voltage index.
    pub fn locate(&self, index: usize) -> Option<(&Bus, Phase, bool)> {
        for bus in &self.buses {
            for p in Phase::ALL {
                if let Some(t) = bus.idx.v[p.slot()] {
                    if t.vr == index {
                        return Some((bus, p, true));
                    }
                    if t.vi == index {
                        return Some((bus, p, false));
                    }
                }
            }
        }
        None
    }
}
