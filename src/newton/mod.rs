mod nr;

use crate::assemble::{residual, Assembler};
use crate::build::CaseContext;
use crate::continuation::ContinuationController;
use crate::device::StampCtx;
use crate::ecfopt::EcfOpt;
use crate::error::{SolveError, SolveStatus};
use crate::linsolve::LinearSolver;

use full::slice::norm_inf;

pub trait ProgressMonitor {
    fn update(&self, i: usize, err: f64);
}

pub struct PrintProgress {}

impl ProgressMonitor for PrintProgress {
    fn update(&self, i: usize, err: f64) {
        if i == 1 {
            println!(" it    max change");
            println!("----  ------------");
        }
        println!("{:3}   {:10.3e}", i, err);
    }
}

/// Result of a solve over the full continuation schedule.
#[derive(Debug, Clone)]
pub struct NewtonOutcome {
    pub x: Vec<f64>,
    pub status: SolveStatus,
    /// Newton iterations over all continuation steps.
    pub iterations: usize,
    /// Continuation steps accepted.
    pub steps: usize,
    /// Error of the last iteration.
    pub error: f64,
    /// `‖Y(x)·x − J(x)‖∞` of the target problem at the final iterate.
    pub residual: f64,
    /// `Y(x)·x − J(x)` per row; empty when it could not be evaluated.
    pub residuals: Vec<f64>,
    pub history: Vec<f64>,
}

impl NewtonOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

fn final_residual(
    ctx: &CaseContext,
    asm: &mut Assembler,
    x: &[f64],
    opt: &EcfOpt,
    lf: f64,
) -> anyhow::Result<Vec<f64>> {
    let sctx = StampCtx {
        x,
        lf,
        h: 1.0,
        cs_tol: opt.infeas.cs_tol,
    };
    let (y, j) = asm.system(&ctx.devices, &sctx, None)?;
    residual(&y, &j, x)
}

/// Solves the built system from `x0`, walking the homotopy factor to 1
/// when homotopy is enabled.
///
/// Singular systems are retried once from the last checkpoint with half the
/// continuation step; iteration limits and control thrash are retried until
/// the controller gives up. Every failure is reported through the status
/// of the outcome.
pub fn solve_ecf(
    ctx: &mut CaseContext,
    opt: &EcfOpt,
    x0: &[f64],
    lf: f64,
    solver: &dyn LinearSolver,
    progress: Option<&dyn ProgressMonitor>,
) -> NewtonOutcome {
    let mut x = x0.to_vec();
    let mut cont = ContinuationController::new(&opt.continuation, opt.homotopy, x0);
    let finish = |x: Vec<f64>, cont: &ContinuationController, status, residuals: Vec<f64>| {
        NewtonOutcome {
            x,
            status,
            iterations: cont.history().len(),
            steps: cont.steps(),
            error: cont.history().last().copied().unwrap_or(f64::NAN),
            residual: if residuals.is_empty() {
                f64::NAN
            } else {
                norm_inf(&residuals)
            },
            residuals,
            history: cont.history().to_vec(),
        }
    };

    let mut asm = match Assembler::new(ctx) {
        Ok(asm) => asm,
        Err(e) => {
            log::error!("{}", e);
            return finish(x, &cont, e.status(), Vec::new());
        }
    };

    let mut retried_singular = false;
    let status = loop {
        let h = cont.h();
        match nr::newton_ecf(ctx, &mut asm, &mut x, &mut cont, opt, lf, solver, progress) {
            Ok(_) => {
                if cont.accept(&x) {
                    break SolveStatus::Converged;
                }
            }
            Err(e) => {
                log::warn!("solve at h = {:.4} failed: {}", h, e);
                let retry = match e {
                    SolveError::SingularMatrix { .. } | SolveError::NonSquare { .. } => {
                        !std::mem::replace(&mut retried_singular, true)
                    }
                    SolveError::Diverged { .. } => true,
                    _ => false,
                };
                if !(retry && cont.rollback(&mut x)) {
                    log::error!(
                        "solve abandoned after {} iterations: {}",
                        cont.history().len(),
                        e
                    );
                    break e.status();
                }
            }
        }
    };

    let residuals = match final_residual(ctx, &mut asm, &x, opt, lf) {
        Ok(r) => r,
        Err(e) => {
            log::error!("residual evaluation failed: {}", e);
            Vec::new()
        }
    };
    let out = finish(x, &cont, status, residuals);
    if out.success() {
        log::info!(
            "converged in {} iterations over {} continuation steps (residual {:.3e})",
            out.iterations,
            out.steps,
            out.residual
        );
    }
    out
}
