//! Multi-period infeasibility analysis.
//!
//! Periods are solved in order within an epoch. Each period starts from the
//! previous period's solution and takes its battery states of charge; the
//! battery multipliers of the following period come from the previous
//! epoch. Epochs repeat until no period's iterate moves by more than the
//! multi-period tolerance.

use crate::build::{build, CaseContext};
use crate::case::{Case, Resource};
use crate::device::{BatteryPeriod, Element};
use crate::ecfopt::{EcfOpt, MultiOpt};
use crate::ecfsoln::{ecfsoln, EcfSolution};
use crate::error::SolveError;
use crate::infeasibility::{infeasibility_report, InfeasReport};
use crate::linsolve::LinearSolver;
use crate::newton::{solve_ecf, ProgressMonitor};

use anyhow::Result;
use itertools::Itertools;

/// State of one battery at the end of a period.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryState {
    pub name: String,
    pub soc: f64,
    /// Multiplier of the dynamics row.
    pub dual: f64,
    pub dynamics_residual: f64,
}

#[derive(Debug, Clone)]
pub struct PeriodSolution {
    pub period: usize,
    pub soln: EcfSolution,
    pub infeas: InfeasReport,
    pub batteries: Vec<BatteryState>,
}

#[derive(Debug, Clone)]
pub struct MultiPeriodSolution {
    pub periods: Vec<PeriodSolution>,
    pub epochs: usize,
    /// Largest change of any period's iterate over the last epoch.
    pub epsilon: f64,
    pub converged: bool,
}

impl MultiPeriodSolution {
    /// True when every period of the last epoch solved.
    pub fn success(&self) -> bool {
        self.periods.iter().all(|p| p.soln.success())
    }
}

/// Applies the time series of period `t` to the inverters and returns the
/// period's load factor.
fn apply_series(ctx: &mut CaseContext, opt: &EcfOpt, t: usize) -> f64 {
    let multi = &opt.multi;
    let pv = MultiOpt::series(&multi.pv, t);
    let wind = MultiOpt::series(&multi.wind, t);
    for g in ctx.ibdgs_mut() {
        match g.resource() {
            Resource::Pv => g.set_scale(pv),
            Resource::Wind => g.set_scale(wind),
            Resource::Other => {}
        }
    }
    opt.load_factor * MultiOpt::series(&multi.load_factor, t)
}

fn battery_states(ctx: &mut CaseContext, x: &[f64]) -> Vec<BatteryState> {
    ctx.batteries_mut()
        .map(|b| BatteryState {
            name: b.name().to_string(),
            soc: b.soc(x),
            dual: b.dual(x),
            dynamics_residual: b.dynamics_residual(x),
        })
        .collect()
}

/// Runs the multi-period coordinator over the case's batteries and the
/// configured time series.
pub fn run_multiperiod(
    case: &Case,
    opt: &EcfOpt,
    solver: &dyn LinearSolver,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<MultiPeriodSolution> {
    let multi = &opt.multi;
    if multi.periods == 0 {
        return Err(SolveError::config("multi settings", "at least one period is required").into());
    }
    let mut ctx = build(case, opt)?;
    let n_periods = multi.periods;
    let n_batt = ctx.batteries_mut().count();
    let b_init: Vec<f64> = ctx.batteries_mut().map(|b| b.b_init()).collect();
    log::info!(
        "multi-period run of {}: {} periods, {} batteries",
        case.name,
        n_periods,
        n_batt
    );

    if n_batt > 0 && multi.max_epochs < 2 {
        log::info!("a single epoch is run, the coupling between periods is not checked");
    }

    let mut prev_x: Vec<Option<Vec<f64>>> = vec![None; n_periods];
    let mut duals: Vec<Vec<f64>> = vec![vec![0.0; n_batt]; n_periods];
    let mut periods: Vec<PeriodSolution> = Vec::with_capacity(n_periods);
    let mut epsilon = f64::INFINITY;
    let mut converged = false;
    let mut epochs = 0;

    while epochs < multi.max_epochs.max(1) {
        epochs += 1;
        periods.clear();
        let mut soc = b_init.clone();
        let mut next_duals = duals.clone();
        let mut eps_epoch: f64 = 0.0;
        let mut start = prev_x[0].clone().unwrap_or_else(|| ctx.x0.clone());

        for t in 0..n_periods {
            let lf = apply_series(&mut ctx, opt, t);
            let price = MultiOpt::series(&multi.price, t);
            for (k, b) in ctx.batteries_mut().enumerate() {
                b.set_period(BatteryPeriod {
                    price,
                    b_prev: soc[k],
                    lb_next: duals.get(t + 1).map(|d| d[k]).unwrap_or(0.0),
                });
            }

            let out = solve_ecf(&mut ctx, opt, &start, lf, solver, progress);
            if !out.success() {
                log::error!(
                    "period {} of epoch {} did not converge ({:?})",
                    t,
                    epochs,
                    out.status
                );
            }
            let soln = ecfsoln(&ctx, &case.name, &out, lf);
            let infeas = infeasibility_report(&ctx, &out.x, opt.infeas.obj);
            let batteries = battery_states(&mut ctx, &out.x);
            for (k, b) in batteries.iter().enumerate() {
                soc[k] = b.soc;
                next_duals[t][k] = b.dual;
            }
            log::debug!(
                "period {}: soc [{}], duals [{}]",
                t,
                soc.iter().map(|v| format!("{:.4}", v)).join(", "),
                next_duals[t].iter().map(|v| format!("{:.4}", v)).join(", ")
            );

            let change = match &prev_x[t] {
                Some(px) => px
                    .iter()
                    .zip(&out.x)
                    .fold(0.0_f64, |m, (a, b)| m.max((a - b).abs())),
                None => f64::INFINITY,
            };
            eps_epoch = eps_epoch.max(change);
            prev_x[t] = Some(out.x.clone());
            // the previous period's solution seeds the next one
            start.clone_from(&out.x);

            periods.push(PeriodSolution {
                period: t,
                soln,
                infeas,
                batteries,
            });
        }

        duals = next_duals;
        if n_batt == 0 {
            // without batteries no period depends on another
            epsilon = 0.0;
            converged = true;
            break;
        }
        epsilon = eps_epoch;
        log::info!("epoch {}: largest change {:.4e}", epochs, epsilon);
        if epsilon < multi.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        log::warn!(
            "multi-period run stopped after {} epochs (change {:.4e})",
            epochs,
            epsilon
        );
    }
    Ok(MultiPeriodSolution {
        periods,
        epochs,
        epsilon,
        converged,
    })
}
