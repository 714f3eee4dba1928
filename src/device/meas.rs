use super::line::series_admittance;
use super::stamp::coupled;
use super::{DeviceOutput, Element, Nnz, StampCtx};
use crate::case::{parse_phases, CurrentMeasData, LineData};
use crate::error::SolveError;
use crate::index::{IndexAllocator, NodeRegistry, Phase, Terminal};
use crate::triplet::Triplets;

use num_complex::Complex64;

#[derive(Debug, Clone)]
struct MeasLeg {
    phase: Phase,
    /// Measured series current.
    current: Terminal,
    /// Squared magnitude of the current.
    mag2: usize,
    /// Row of the line's series admittance for this phase, as
    /// `(from, to, y)` per line phase.
    row: Vec<(Terminal, Terminal, Complex64)>,
}

/// Pseudo-device copying the series current of a line into auxiliary
/// unknowns.
#[derive(Debug, Clone)]
pub struct CurrentMeas {
    name: String,
    legs: Vec<MeasLeg>,
}

impl CurrentMeas {
    pub fn new(
        data: &CurrentMeasData,
        line: &LineData,
        nodes: &NodeRegistry,
        alloc: &mut IndexAllocator,
    ) -> Result<Self, SolveError> {
        let name = data.name.as_str();
        let line_phases = parse_phases(&line.phases, &line.name)?.phases();
        let y = series_admittance(line)?;
        let fb = nodes.get(&line.from, name)?;
        let tb = nodes.get(&line.to, name)?;

        let mut ends = Vec::with_capacity(line_phases.len());
        for &p in &line_phases {
            ends.push((fb.require(p, name)?, tb.require(p, name)?));
        }

        let mut legs = Vec::new();
        for p in parse_phases(&data.phases, name)?.phases() {
            let k = line_phases.iter().position(|&q| q == p).ok_or_else(|| {
                SolveError::config(name, format!("line {} has no phase {}", line.name, p))
            })?;
            let row = ends
                .iter()
                .zip(&y[k])
                .map(|(&(f, t), &ykq)| (f, t, ykq))
                .collect();
            legs.push(MeasLeg {
                phase: p,
                current: Terminal {
                    vr: alloc.next(),
                    vi: alloc.next(),
                },
                mag2: alloc.next(),
                row,
            });
        }
        Ok(Self {
            name: name.to_string(),
            legs,
        })
    }
}

impl Element for CurrentMeas {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        let mut nnz = Nnz::default();
        for leg in &self.legs {
            nnz.y_lin += 2 + leg.row.len() * 8;
            nnz.y_nl += 3;
            nnz.j_nl += 1;
        }
        nnz
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        for leg in &self.legs {
            let i = leg.current;
            t.stamp_y(i.vr, i.vr, 1.0);
            t.stamp_y(i.vi, i.vi, 1.0);
            for &(f, to, y) in &leg.row {
                coupled(t, Some(i), None, Some(f), Some(to), -y);
            }
        }
    }

    fn stamp_nonlinear(&self, t: &mut Triplets, ctx: &StampCtx) {
        // m − (Ir² + Ii²) = 0
        for leg in &self.legs {
            let (ir, ii) = (ctx.x[leg.current.vr], ctx.x[leg.current.vi]);
            t.stamp_y(leg.mag2, leg.mag2, 1.0);
            t.stamp_y(leg.mag2, leg.current.vr, -2.0 * ir);
            t.stamp_y(leg.mag2, leg.current.vi, -2.0 * ii);
            t.stamp_j(leg.mag2, -(ir * ir + ii * ii));
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        let currents = self
            .legs
            .iter()
            .map(|l| (l.phase, Complex64::new(x[l.current.vr], x[l.current.vi])))
            .collect();
        let magnitudes = self
            .legs
            .iter()
            .map(|l| (l.phase, x[l.mag2].max(0.0).sqrt()))
            .collect();
        Some(DeviceOutput::Measurement {
            currents,
            magnitudes,
        })
    }
}
