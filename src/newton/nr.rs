use crate::assemble::{Assembler, Shadow};
use crate::build::CaseContext;
use crate::continuation::ContinuationController;
use crate::device::StampCtx;
use crate::ecfopt::EcfOpt;
use crate::error::SolveError;
use crate::limiting::{damp, diode_limit, variable_limit, voltage_limit};
use crate::linsolve::LinearSolver;
use crate::newton::ProgressMonitor;
use crate::triplet::ReducedSystem;

use powers::debug::format_f64_vec;

/// Consecutive state flips after which steps are damped.
const THRASH_WARN: usize = 5;
/// Consecutive state flips after which the iteration is abandoned.
const THRASH_FAIL: usize = 10;

/// Largest absolute change over the measured unknowns and where it occurs.
fn max_change(x: &[f64], x_new: &[f64], measured: Option<&[usize]>) -> (f64, usize) {
    let mut err = 0.0;
    let mut at = 0;
    let mut visit = |k: usize| {
        let d = (x_new[k] - x[k]).abs();
        if d > err || d.is_nan() {
            err = d;
            at = k;
        }
    };
    match measured {
        Some(idx) => idx.iter().for_each(|&k| visit(k)),
        None => (0..x.len()).for_each(|k| visit(k)),
    }
    (err, at)
}

/// Unknowns counted in the convergence error: voltages and tracked device
/// variables in power flow, everything when duals are stamped.
fn measured(ctx: &CaseContext) -> Option<Vec<usize>> {
    if ctx.stamp_dual {
        return None;
    }
    let mut idx: Vec<usize> = ctx
        .voltages
        .iter()
        .flat_map(|(_, t, _)| [t.vr, t.vi])
        .collect();
    idx.extend_from_slice(&ctx.tracked);
    Some(idx)
}

/// Runs Newton iterations at the controller's current homotopy factor.
///
/// Each iteration stamps every device at the same iterate, solves the
/// reduced system for the next iterate, applies the diode, voltage and
/// variable limiters, and then lets piecewise devices update their state.
/// Returns the number of iterations taken on convergence.
pub(crate) fn newton_ecf(
    ctx: &mut CaseContext,
    asm: &mut Assembler,
    x: &mut Vec<f64>,
    cont: &mut ContinuationController,
    opt: &EcfOpt,
    lf: f64,
    solver: &dyn LinearSolver,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<usize, SolveError> {
    let h = cont.h();
    let shadow = if opt.homotopy {
        Some(Shadow {
            s: 1.0 - h,
            g_h: opt.g_homotopy,
            b_h: opt.b_homotopy,
        })
    } else {
        None
    };
    let measured = measured(ctx);
    let mut flips = 0;
    let mut err = f64::INFINITY;

    for i in 1..=opt.max_iters {
        let sctx = StampCtx {
            x: x.as_slice(),
            lf,
            h,
            cs_tol: opt.infeas.cs_tol,
        };
        let (y, j) = asm.system(&ctx.devices, &sctx, shadow)?;
        let sys = ReducedSystem::reduce(&y, &j)?;
        let sol = solver.solve(&sys.a, &sys.b).map_err(|e| {
            log::error!("linear solve failed at iteration {}: {}", i, e);
            SolveError::SingularMatrix { iteration: i }
        })?;

        let mut x_new = x.clone();
        sys.scatter(&sol, &mut x_new);
        log::trace!("x_{}: {}", i, format_f64_vec(&x_new));

        if opt.diode_limiting {
            diode_limit(&ctx.bounds, x, &mut x_new);
        }
        if opt.voltage_limiting {
            voltage_limit(&ctx.voltages, &opt.limiting, x, &mut x_new);
            let sigma = variable_limit(&ctx.voltages, &opt.limiting, cont.sigma(), x, &mut x_new);
            cont.set_sigma(sigma);
        } else if cont.sigma() < 1.0 {
            damp(cont.sigma(), x, &mut x_new);
        }

        let (e, at) = max_change(x, &x_new, measured.as_deref());
        err = e;
        *x = x_new;

        let mut changed = false;
        for d in ctx.devices.iter_mut() {
            if d.update_state(x) {
                log::debug!("{} {} changed state at iteration {}", d.kind(), d.name(), i);
                changed = true;
            }
        }
        flips = if changed { flips + 1 } else { 0 };
        if flips >= THRASH_FAIL {
            log::error!("control state thrashing for {} iterations at h = {:.4}", flips, h);
            return Err(SolveError::Diverged {
                iterations: i,
                error: err,
            });
        }
        if flips >= THRASH_WARN {
            let sigma = (cont.sigma() / 2.0).max(opt.limiting.sigma_min);
            log::warn!(
                "control state flipped {} consecutive times, damping to {:.4}",
                flips,
                sigma
            );
            cont.set_sigma(sigma);
        }

        cont.record(err);
        log::debug!(
            "iteration {}: error {:.3e} at {}, sigma {:.4}",
            i,
            err,
            ctx.describe(at),
            cont.sigma()
        );
        if let Some(pm) = progress {
            pm.update(cont.history().len(), err);
        }

        if err < opt.tolerance && !changed {
            log::debug!("converged at h = {:.4} in {} iterations", h, i);
            return Ok(i);
        }
    }

    log::warn!(
        "no convergence within {} iterations at h = {:.4} (error {:.3e})",
        opt.max_iters,
        h,
        err
    );
    Err(SolveError::Diverged {
        iterations: opt.max_iters,
        error: err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_is_located() {
        let x = [0.0, 1.0, 2.0];
        let x_new = [0.5, 1.0, -1.0];
        assert_eq!(max_change(&x, &x_new, None), (3.0, 2));
        assert_eq!(max_change(&x, &x_new, Some(&[0, 1][..])), (0.5, 0));
    }
}
