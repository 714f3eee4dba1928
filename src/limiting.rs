//! Step limiters applied between the linear solve and the update.

use crate::device::{Bound, LimitClass};
use crate::ecfopt::LimitOpt;
use crate::index::{Phase, Terminal};

/// Fraction of the distance to a bound a limited step may travel.
const DIODE_FRACTION: f64 = 0.99;

/// Largest step factor per limiter class that keeps every bounded slack
/// positive: `min(1, 0.99·min s/(s − s_new))` over the coordinates the full
/// step would drive through their bound.
pub fn diode_factors(bounds: &[Bound], x: &[f64], x_new: &[f64]) -> (f64, f64) {
    let mut primal = 1.0_f64;
    let mut dual = 1.0_f64;
    for b in bounds {
        let s = b.slack(x);
        let s_new = b.slack(x_new);
        if s_new > 0.0 || s <= 0.0 {
            continue;
        }
        let sigma = (DIODE_FRACTION * s / (s - s_new)).min(1.0);
        match b.class {
            LimitClass::Primal => primal = primal.min(sigma),
            LimitClass::Dual => dual = dual.min(sigma),
        }
    }
    (primal, dual)
}

/// Shortens the steps of bounded unknowns by their class factor.
pub fn diode_limit(bounds: &[Bound], x: &[f64], x_new: &mut [f64]) -> (f64, f64) {
    let (primal, dual) = diode_factors(bounds, x, x_new);
    if primal == 1.0 && dual == 1.0 {
        return (primal, dual);
    }
    let mut done = vec![false; x.len()];
    for b in bounds {
        if done[b.index] {
            continue;
        }
        let sigma = match b.class {
            LimitClass::Primal => primal,
            LimitClass::Dual => dual,
        };
        let i = b.index;
        x_new[i] = x[i] + sigma * (x_new[i] - x[i]);
        done[i] = true;
    }
    log::debug!("diode limiting: primal {:.4}, dual {:.4}", primal, dual);
    (primal, dual)
}

/// Clamps every voltage coordinate step to `±max_step·V_nom`. Returns the
/// number of clamped coordinates.
pub fn voltage_limit(
    voltages: &[(Phase, Terminal, f64)],
    opt: &LimitOpt,
    x: &[f64],
    x_new: &mut [f64],
) -> usize {
    let mut clamped = 0;
    for &(_, t, vnom) in voltages {
        let dv_max = opt.max_step * vnom;
        for i in [t.vr, t.vi] {
            let dv = x_new[i] - x[i];
            if dv.abs() > dv_max {
                x_new[i] = x[i] + dv.signum() * dv_max;
                clamped += 1;
            }
        }
    }
    if clamped > 0 {
        log::debug!("voltage limiting clamped {} coordinates", clamped);
    }
    clamped
}

/// Scales the whole step by `sigma`.
pub fn damp(sigma: f64, x: &[f64], x_new: &mut [f64]) {
    for (o, &v) in x_new.iter_mut().zip(x) {
        *o = v + sigma * (*o - v);
    }
}

/// Per-unit magnitude of a hot phase voltage that lies outside the band.
fn out_of_band(voltages: &[(Phase, Terminal, f64)], opt: &LimitOpt, x: &[f64]) -> Option<f64> {
    voltages
        .iter()
        .filter(|(p, _, vnom)| *p != Phase::N && *vnom > 0.0)
        .map(|&(_, t, vnom)| x[t.vr].hypot(x[t.vi]) / vnom)
        .find(|&v| v < opt.v_min || v > opt.v_max)
}

/// Scales the step by a global factor, halving it from `sigma` while a hot
/// phase voltage leaves `[v_min, v_max]` p.u. and the factor stays above its
/// floor. Returns the factor applied.
pub fn variable_limit(
    voltages: &[(Phase, Terminal, f64)],
    opt: &LimitOpt,
    sigma: f64,
    x: &[f64],
    x_new: &mut [f64],
) -> f64 {
    let step: Vec<f64> = x_new.iter().zip(x).map(|(a, b)| a - b).collect();
    let mut sigma = sigma;
    let apply = |sigma: f64, out: &mut [f64]| {
        for (k, o) in out.iter_mut().enumerate() {
            *o = x[k] + sigma * step[k];
        }
    };
    apply(sigma, x_new);
    while sigma > opt.sigma_min {
        match out_of_band(voltages, opt, x_new) {
            Some(v) => {
                log::debug!("voltage {:.3} p.u. out of band, halving sigma {:.4}", v, sigma);
                sigma = (sigma / 2.0).max(opt.sigma_min);
                apply(sigma, x_new);
            }
            None => break,
        }
    }
    sigma
}
