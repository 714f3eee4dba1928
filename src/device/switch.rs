use super::{volt, DeviceOutput, Element, Nnz};
use crate::case::{parse_phases, SwitchData};
use crate::error::SolveError;
use crate::index::{IndexAllocator, NodeRegistry, Phase, Terminal};
use crate::triplet::Triplets;

/// Ideal switch or fuse. A closed device ties each phase pair through an
/// auxiliary current; an open one stamps nothing.
#[derive(Debug, Clone)]
pub struct Switch {
    name: String,
    /// `(phase, from, to, current)` per conducting phase.
    legs: Vec<(Phase, Terminal, Terminal, Terminal)>,
    /// Fuse current rating in amperes.
    rating: Option<f64>,
}

impl Switch {
    pub fn new(
        data: &SwitchData,
        rating: Option<f64>,
        nodes: &NodeRegistry,
        alloc: &mut IndexAllocator,
    ) -> Result<Self, SolveError> {
        let name = data.name.as_str();
        let fb = nodes.get(&data.from, name)?;
        let tb = nodes.get(&data.to, name)?;
        let mut legs = Vec::new();
        if data.closed {
            for p in parse_phases(&data.phases, name)?.phases() {
                let (a, b) = (fb.require(p, name)?, tb.require(p, name)?);
                legs.push((p, a, b, alloc.terminal()));
            }
        }
        Ok(Self {
            name: name.to_string(),
            legs,
            rating,
        })
    }
}

impl Element for Switch {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        Nnz {
            y_lin: self.legs.len() * 8,
            ..Default::default()
        }
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        for &(_, a, b, i) in &self.legs {
            for (n, c) in [(a, 1.0), (b, -1.0)] {
                t.stamp_y(n.vr, i.vr, c);
                t.stamp_y(n.vi, i.vi, c);
                t.stamp_y(i.vr, n.vr, c);
                t.stamp_y(i.vi, n.vi, c);
            }
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        let currents: Vec<_> = self.legs.iter().map(|&(p, _, _, i)| (p, volt(x, i))).collect();
        let blown = match self.rating {
            Some(r) => currents.iter().any(|(_, i)| i.norm() > r),
            None => false,
        };
        if blown {
            log::warn!("fuse {} is blown", self.name);
        }
        Some(DeviceOutput::Switch { currents, blown })
    }
}
