use super::stamp::{admittance, COUPLED_NNZ};
use super::{volt_or_ground, DeviceOutput, Element, Nnz};
use crate::case::{parse_phases, CapacitorData, LoadConnection, ShuntData};
use crate::error::SolveError;
use crate::index::{Bus, NodeRegistry, Terminal};
use crate::triplet::Triplets;

use num_complex::Complex64;

/// Fixed admittances, wye (to neutral or ground) or delta.
#[derive(Debug, Clone)]
pub struct Shunt {
    name: String,
    elements: Vec<(Terminal, Option<Terminal>, Complex64)>,
}

pub(crate) fn connection_pairs(
    bus: &Bus,
    phases: &str,
    conn: LoadConnection,
    device: &str,
) -> Result<Vec<(Terminal, Option<Terminal>)>, SolveError> {
    let hot = parse_phases(phases, device)?.hot();
    match conn {
        LoadConnection::Wye => hot
            .iter()
            .map(|&p| Ok((bus.require(p, device)?, bus.neutral())))
            .collect(),
        LoadConnection::Delta => {
            if hot.len() < 2 {
                return Err(SolveError::config(device, "delta connection needs two phases"));
            }
            let n = hot.len();
            let count = if n == 2 { 1 } else { n };
            (0..count)
                .map(|k| {
                    let a = bus.require(hot[k], device)?;
                    let b = bus.require(hot[(k + 1) % n], device)?;
                    Ok((a, Some(b)))
                })
                .collect()
        }
    }
}

impl Shunt {
    pub fn new(data: &ShuntData, nodes: &NodeRegistry) -> Result<Self, SolveError> {
        let bus = nodes.get(&data.bus, &data.name)?;
        let y = Complex64::new(data.g, data.b);
        let elements = connection_pairs(bus, &data.phases, data.connection, &data.name)?
            .into_iter()
            .map(|(a, b)| (a, b, y))
            .collect();
        Ok(Self {
            name: data.name.clone(),
            elements,
        })
    }

    /// Capacitor bank with susceptance `Q/V²` at its rated voltage.
    pub fn capacitor(data: &CapacitorData, nodes: &NodeRegistry) -> Result<Self, SolveError> {
        let bus = nodes.get(&data.bus, &data.name)?;
        let v = data.v_rated.unwrap_or(match data.connection {
            LoadConnection::Wye => bus.vnom,
            LoadConnection::Delta => bus.vnom * 3f64.sqrt(),
        });
        if !(v > 0.0) {
            return Err(SolveError::config(&data.name, "rated voltage must be positive"));
        }
        let y = Complex64::new(0.0, data.q / (v * v));
        let elements = connection_pairs(bus, &data.phases, data.connection, &data.name)?
            .into_iter()
            .map(|(a, b)| (a, b, y))
            .collect();
        Ok(Self {
            name: data.name.clone(),
            elements,
        })
    }
}

impl Element for Shunt {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        Nnz {
            y_lin: self.elements.len() * COUPLED_NNZ,
            ..Default::default()
        }
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        for &(a, b, y) in &self.elements {
            admittance(t, Some(a), b, y);
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        let power = self
            .elements
            .iter()
            .map(|&(a, b, y)| {
                let v = volt_or_ground(x, Some(a)) - volt_or_ground(x, b);
                v * (y * v).conj()
            })
            .sum();
        Some(DeviceOutput::Power { power })
    }
}
