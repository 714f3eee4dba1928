use crate::ecfopt::ContinuationOpt;

/// Consecutive error decreases after which σ_v is relaxed.
const RELAX_AFTER: usize = 5;
const RELAX_FACTOR: f64 = 0.75;

/// Homotopy schedule and step damping state of one solve.
///
/// Owns the homotopy factor `h`, its step `Δh`, the last accepted
/// checkpoint, the global damping factor `σ_v` and the error history.
/// With homotopy the initial iterate is the checkpoint at `h = 0` until a
/// step is accepted.
#[derive(Debug, Clone)]
pub struct ContinuationController {
    opt: ContinuationOpt,
    h: f64,
    dh: f64,
    checkpoint: Option<(f64, Vec<f64>)>,
    failures: usize,
    sigma: f64,
    history: Vec<f64>,
    decreases: usize,
    steps: usize,
}

impl ContinuationController {
    /// Starts at `h = 0` with homotopy, or directly at the target problem.
    pub fn new(opt: &ContinuationOpt, homotopy: bool, x0: &[f64]) -> Self {
        Self {
            opt: opt.clone(),
            h: if homotopy { 0.0 } else { 1.0 },
            dh: opt.step,
            checkpoint: if homotopy {
                Some((0.0, x0.to_vec()))
            } else {
                None
            },
            failures: 0,
            sigma: 1.0,
            history: Vec::new(),
            decreases: 0,
            steps: 0,
        }
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn set_sigma(&mut self, sigma: f64) {
        self.sigma = sigma;
    }

    /// Errors of every iteration so far.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Continuation steps accepted.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Records an iteration error and relaxes σ_v after a run of decreases.
    pub fn record(&mut self, err: f64) {
        match self.history.last() {
            Some(&prev) if err < prev => self.decreases += 1,
            _ => self.decreases = 0,
        }
        self.history.push(err);
        if self.decreases > RELAX_AFTER && self.sigma < 1.0 {
            self.sigma = (self.sigma / RELAX_FACTOR).min(1.0);
            log::debug!("sigma relaxed to {:.4}", self.sigma);
        }
    }

    /// Accepts the converged iterate at the current `h`. Returns true once
    /// the target problem is solved, otherwise advances `h`.
    pub fn accept(&mut self, x: &[f64]) -> bool {
        self.steps += 1;
        self.failures = 0;
        self.sigma = 1.0;
        self.decreases = 0;
        if self.h >= 1.0 {
            return true;
        }
        self.checkpoint = Some((self.h, x.to_vec()));
        let h = self.h + self.dh;
        self.h = if h > 1.0 - 1e-9 { 1.0 } else { h };
        log::info!("continuation advanced to h = {:.4}", self.h);
        false
    }

    /// Restores the last checkpoint and retries with half the step. A
    /// failure at the checkpoint itself is retried there with half the
    /// damping factor. Returns false when no further retry is possible.
    pub fn rollback(&mut self, x: &mut Vec<f64>) -> bool {
        let (h0, x0) = match &self.checkpoint {
            Some(c) => c,
            None => return false,
        };
        self.failures += 1;
        let dh = self.dh / 2.0;
        if self.failures >= self.opt.k_reset || dh < self.opt.min_step {
            log::error!(
                "continuation failed {} times at h = {:.4} (step {:.2e})",
                self.failures,
                h0,
                dh
            );
            return false;
        }
        self.dh = dh;
        self.decreases = 0;
        x.clone_from(x0);
        if self.h > *h0 {
            self.h = (h0 + dh).min(1.0);
            self.sigma = 1.0;
            log::warn!("continuation rolled back to h = {:.4}, step {:.4}", h0, dh);
        } else {
            self.sigma /= 2.0;
            log::warn!(
                "restarting h = {:.4} from the checkpoint with sigma {:.4}",
                h0,
                self.sigma
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_steps_reach_target() {
        let mut c = ContinuationController::new(&ContinuationOpt::default(), true, &[0.0]);
        let mut accepted = 0;
        while !c.accept(&[0.0]) {
            accepted += 1;
            assert!(c.h() <= 1.0);
        }
        assert_eq!(accepted, 5);
        assert_eq!(c.steps(), 6);
    }

    #[test]
    fn rollback_halves_the_step() {
        let mut c = ContinuationController::new(&ContinuationOpt::default(), true, &[0.0]);
        c.accept(&[1.0]);
        let mut x = vec![5.0];
        assert!(c.rollback(&mut x));
        assert_eq!(x, vec![1.0]);
        assert!((c.h() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn gives_up_after_reset_limit() {
        let mut c = ContinuationController::new(&ContinuationOpt::default(), true, &[0.0]);
        c.accept(&[1.0]);
        let mut x = vec![0.0];
        let retries = (0..10).take_while(|_| c.rollback(&mut x)).count();
        assert_eq!(retries, 4);
    }

    #[test]
    fn no_rollback_without_homotopy() {
        let mut c = ContinuationController::new(&ContinuationOpt::default(), false, &[0.0]);
        assert!(!c.rollback(&mut vec![0.0]));
    }

    #[test]
    fn sigma_relaxes_after_decreases() {
        let mut c = ContinuationController::new(&ContinuationOpt::default(), false, &[0.0]);
        c.set_sigma(0.5);
        for k in 0..7 {
            c.record(1.0 / (k + 1) as f64);
        }
        assert!(c.sigma() > 0.5);
    }

    #[test]
    fn failure_at_start_retries_from_initial_iterate() {
        let mut c = ContinuationController::new(&ContinuationOpt::default(), true, &[2.0]);
        let mut x = vec![5.0];
        assert!(c.rollback(&mut x));
        assert_eq!(x, vec![2.0]);
        assert_eq!(c.h(), 0.0);
        assert_eq!(c.sigma(), 0.5);

        // the next accepted step advances by the halved step
        assert!(!c.accept(&x));
        assert!((c.h() - 0.1).abs() < 1e-12);
    }
}
