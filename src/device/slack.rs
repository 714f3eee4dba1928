use super::stamp::ground;
use super::{volt, DeviceOutput, Element, Nnz};
use crate::index::{Bus, IndexAllocator, Phase, Terminal};
use crate::triplet::Triplets;

use num_complex::Complex64;

/// Ideal voltage source holding the slack bus phases at their set points.
#[derive(Debug, Clone)]
pub struct Slack {
    name: String,
    legs: Vec<(Phase, Terminal, Terminal, Complex64)>,
}

impl Slack {
    /// `vset` is the magnitude in per unit and `angle` an offset in degrees.
    pub fn new(bus: &Bus, vset: f64, angle: f64, alloc: &mut IndexAllocator) -> Self {
        let rot = Complex64::from_polar(vset, angle.to_radians());
        let legs = bus
            .hot()
            .into_iter()
            .filter_map(|p| {
                let v = bus.terminal(p)?;
                let (re, im) = bus.flat_start(p);
                Some((p, v, alloc.terminal(), rot * Complex64::new(re, im)))
            })
            .collect();
        Self {
            name: bus.name.clone(),
            legs,
        }
    }

    pub fn setpoints(&self) -> impl Iterator<Item = (Terminal, Complex64)> + '_ {
        self.legs.iter().map(|&(_, v, _, s)| (v, s))
    }
}

impl Element for Slack {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        Nnz {
            y_lin: self.legs.len() * 4,
            j_lin: self.legs.len() * 2,
            ..Default::default()
        }
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        for &(_, v, is, set) in &self.legs {
            t.stamp_y(v.vr, is.vr, 1.0);
            t.stamp_y(v.vi, is.vi, 1.0);
            t.stamp_y(is.vr, v.vr, 1.0);
            t.stamp_y(is.vi, v.vi, 1.0);
            t.stamp_j(is.vr, set.re);
            t.stamp_j(is.vi, set.im);
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        let power = self
            .legs
            .iter()
            .map(|&(_, v, is, _)| volt(x, v) * volt(x, is).conj())
            .sum();
        Some(DeviceOutput::Power { power })
    }
}

/// Auxiliary pair forcing a neutral voltage to zero.
#[derive(Debug, Clone)]
pub struct Ground {
    name: String,
    n: Terminal,
    g: Terminal,
}

impl Ground {
    pub fn new(bus: &Bus, n: Terminal, alloc: &mut IndexAllocator) -> Self {
        Self {
            name: format!("{}_gnd", bus.name),
            n,
            g: alloc.terminal(),
        }
    }
}

impl Element for Ground {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        Nnz {
            y_lin: 4,
            ..Default::default()
        }
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        ground(t, self.n, self.g);
    }
}
