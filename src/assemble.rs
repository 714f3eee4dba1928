//! System assembly from device stamps.
//!
//! The linear partition (with its transpose in dual space) is stamped once.
//! The homotopy partition is restamped when `h` changes and the nonlinear
//! partition every iteration. All three are concatenated into one
//! coordinate buffer before conversion to compressed rows.

use crate::build::CaseContext;
use crate::device::{Device, Nnz, StampCtx};
use crate::error::SolveError;
use crate::triplet::{CsrMatrix, Triplets};

use anyhow::Result;

/// Homotopy parameters of the shadow admittances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shadow {
    /// `1 − h`.
    pub s: f64,
    pub g_h: f64,
    pub b_h: f64,
}

fn check(t: &Triplets, device: &Device) -> Result<(), SolveError> {
    if t.overflowed() {
        let (y, j) = t.capacity();
        log::error!("stamp buffer of {} exhausted at {} {}", device.name(), y, j);
        return Err(SolveError::CapacityOverflow {
            device: format!("{} {}", device.kind(), device.name()),
            capacity: y,
        });
    }
    Ok(())
}

pub struct Assembler {
    n: usize,
    dual_of: Option<Vec<Option<usize>>>,
    linear: Triplets,
    homotopy: Triplets,
    homotopy_at: Option<Shadow>,
    nonlinear: Triplets,
    full: Triplets,
}

impl Assembler {
    /// Reserves every partition from the device catalog and stamps the
    /// linear partition.
    pub fn new(ctx: &CaseContext) -> Result<Self, SolveError> {
        let mut nnz = Nnz::default();
        for d in &ctx.devices {
            nnz += d.nnz();
        }
        let dual_of = if ctx.stamp_dual {
            Some(ctx.dual_of.clone())
        } else {
            None
        };
        let twice = if dual_of.is_some() { 2 } else { 1 };

        let mut own = Triplets::with_capacity(nnz.y_lin, nnz.j_lin);
        for d in &ctx.devices {
            d.stamp_linear(&mut own);
            check(&own, d)?;
        }
        let mut linear = Triplets::with_capacity(twice * own.nnz_y(), own.nnz_j());
        linear.extend_from(&own);
        if let Some(dual_of) = &dual_of {
            own.stamp_transpose(dual_of, &mut linear);
        }

        let homotopy = Triplets::with_capacity(twice * nnz.y_hom, 0);
        let nonlinear = Triplets::with_capacity(nnz.y_nl, nnz.j_nl);
        let full = Triplets::with_capacity(
            linear.capacity().0 + homotopy.capacity().0 + nnz.y_nl,
            linear.capacity().1 + nnz.j_nl,
        );
        log::trace!(
            "reserved {} linear, {} homotopy and {} nonlinear entries for {} unknowns",
            linear.nnz_y(),
            homotopy.capacity().0,
            nnz.y_nl,
            ctx.len()
        );

        Ok(Self {
            n: ctx.len(),
            dual_of,
            linear,
            homotopy,
            homotopy_at: None,
            nonlinear,
            full,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    fn stamp_homotopy(&mut self, devices: &[Device], shadow: Option<Shadow>) -> Result<(), SolveError> {
        if self.homotopy_at == shadow {
            return Ok(());
        }
        self.homotopy.clear();
        if let Some(sh) = shadow.filter(|sh| sh.s > 0.0) {
            let mut own = Triplets::with_capacity(self.homotopy.capacity().0, 0);
            for d in devices {
                d.stamp_homotopy(&mut own, sh.s, sh.g_h, sh.b_h);
                check(&own, d)?;
            }
            self.homotopy.extend_from(&own);
            if let Some(dual_of) = &self.dual_of {
                own.stamp_transpose(dual_of, &mut self.homotopy);
            }
        }
        self.homotopy_at = shadow;
        Ok(())
    }

    /// Stamps every partition at the iterate and returns `(Y, J)`.
    pub fn system(
        &mut self,
        devices: &[Device],
        ctx: &StampCtx,
        shadow: Option<Shadow>,
    ) -> Result<(CsrMatrix, Vec<f64>), SolveError> {
        self.stamp_homotopy(devices, shadow)?;

        self.nonlinear.clear();
        for d in devices {
            d.stamp_nonlinear(&mut self.nonlinear, ctx);
            check(&self.nonlinear, d)?;
        }

        self.full.clear();
        self.full.extend_from(&self.linear);
        self.full.extend_from(&self.homotopy);
        self.full.extend_from(&self.nonlinear);
        if self.full.overflowed() {
            return Err(SolveError::CapacityOverflow {
                device: "system".to_string(),
                capacity: self.full.capacity().0,
            });
        }
        log::trace!(
            "assembled {} x {} with {} entries",
            self.n,
            self.n,
            self.full.nnz_y()
        );
        Ok((self.full.to_csr(self.n), self.full.dense_j(self.n)))
    }
}

/// `Y·x − J`.
pub fn residual(y: &CsrMatrix, j: &[f64], x: &[f64]) -> Result<Vec<f64>> {
    let yx = y.mat_vec(x)?;
    Ok(yx.iter().zip(j).map(|(a, b)| a - b).collect())
}
