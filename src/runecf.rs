use crate::build::build;
use crate::case::{Case, WarmStart};
use crate::ecfopt::{EcfOpt, RunType};
use crate::ecfsoln::{ecfsoln, EcfSolution};
use crate::infeasibility::{infeasibility_report, InfeasReport};
use crate::linsolve::LinearSolver;
use crate::multiperiod::{run_multiperiod, MultiPeriodSolution};
use crate::newton::{solve_ecf, ProgressMonitor};
use crate::oplimits::{check_limits, OpLimits};

use anyhow::Result;
use powers::debug::format_rect_vec;
use std::time::Instant;

/// Outcome of a run, by run type.
#[derive(Debug, Clone)]
pub enum EcfRun {
    PowerFlow {
        soln: EcfSolution,
        limits: OpLimits,
    },
    Infeasibility {
        soln: EcfSolution,
        limits: OpLimits,
        infeas: InfeasReport,
    },
    MultiPeriod(MultiPeriodSolution),
}

impl EcfRun {
    pub fn success(&self) -> bool {
        match self {
            EcfRun::PowerFlow { soln, .. } | EcfRun::Infeasibility { soln, .. } => soln.success(),
            EcfRun::MultiPeriod(m) => m.success(),
        }
    }

    /// Single-period solution, if the run had one.
    pub fn solution(&self) -> Option<&EcfSolution> {
        match self {
            EcfRun::PowerFlow { soln, .. } | EcfRun::Infeasibility { soln, .. } => Some(soln),
            EcfRun::MultiPeriod(_) => None,
        }
    }
}

/// Solves a case according to its run type.
///
/// Configuration errors abort the run. Solver failures are reported through
/// the status of the returned solution.
pub fn runecf(
    case: &Case,
    opt: &EcfOpt,
    solver: &dyn LinearSolver,
    warm_start: Option<&WarmStart>,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<EcfRun> {
    let t0 = Instant::now();
    if opt.run_type == RunType::MultiPeriod {
        if warm_start.is_some() {
            log::warn!("warm start ignored by multi-period runs");
        }
        let m = run_multiperiod(case, opt, solver, progress)?;
        log::info!("multi-period run took {:?}", t0.elapsed());
        return Ok(EcfRun::MultiPeriod(m));
    }

    let mut ctx = build(case, opt)?;
    let mut x0 = ctx.x0.clone();
    if let Some(ws) = warm_start {
        ctx.apply_warm_start(ws, &mut x0);
    }

    let out = solve_ecf(&mut ctx, opt, &x0, opt.load_factor, solver, progress);
    let soln = ecfsoln(&ctx, &case.name, &out, opt.load_factor);
    if log::log_enabled!(log::Level::Debug) {
        let v: Vec<_> = ctx
            .voltages
            .iter()
            .map(|(_, t, _)| num_complex::Complex64::new(out.x[t.vr], out.x[t.vi]))
            .collect();
        log::debug!("V: {}", format_rect_vec(&v));
    }
    let limits = check_limits(&soln);
    log::info!(
        "{:?} run of {} finished as {:?} in {:?}",
        opt.run_type,
        case.name,
        soln.status,
        t0.elapsed()
    );

    Ok(match opt.run_type {
        RunType::PowerFlow => EcfRun::PowerFlow { soln, limits },
        _ => {
            let infeas = infeasibility_report(&ctx, &out.x, opt.infeas.obj);
            EcfRun::Infeasibility {
                soln,
                limits,
                infeas,
            }
        }
    })
}
