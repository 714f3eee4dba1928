use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum RunType {
    /// Physical network equations only.
    #[serde(rename = "Power Flow")]
    PowerFlow = 0,
    /// Minimize injected infeasibility subject to the network equations.
    #[serde(rename = "Infeas")]
    Infeasibility = 1,
    /// Infeasibility analysis over several periods coupled by batteries.
    #[serde(rename = "Multi")]
    MultiPeriod = 2,
}

/// Kind of auxiliary injection added at each bus phase in infeasibility mode.
#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "current")]
    Current,
    #[serde(rename = "PQ")]
    PQ,
    #[serde(rename = "GB")]
    GB,
}

/// Norm of the infeasibility objective.
#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum Objective {
    L1,
    L2,
}

/// Piecewise Q-V curve used by voltage-controlled inverters.
#[derive(Debug, PartialEq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum QvControl {
    /// Piecewise linear with C1 quadratic patches at every knot.
    Patching,
    /// Natural cubic spline per transition region (experimental).
    Spline,
    /// Unpatched linear slopes (experimental).
    Loop,
}

impl Default for QvControl {
    fn default() -> Self {
        QvControl::Patching
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EcfOpt {
    // Termination tolerance on the maximum absolute change of the
    // unknowns between two iterations.
    #[serde(rename = "Tolerance")]
    pub tolerance: f64,

    // Maximum number of Newton iterations per continuation step.
    #[serde(rename = "Max Iters")]
    pub max_iters: usize,

    // Clamp per-coordinate voltage steps.
    #[serde(rename = "Voltage Limiting")]
    pub voltage_limiting: bool,

    // Keep bounded primals and inequality duals positive.
    #[serde(rename = "Diode Limiting")]
    pub diode_limiting: bool,

    // Tx-stepping homotopy on series branches.
    #[serde(rename = "Homotopy")]
    pub homotopy: bool,
    #[serde(rename = "G_homotopy")]
    pub g_homotopy: f64,
    #[serde(rename = "B_homotopy")]
    pub b_homotopy: f64,

    // Multiplies every scheduled load.
    #[serde(rename = "Load Factor")]
    pub load_factor: f64,

    #[serde(rename = "Run Type")]
    pub run_type: RunType,

    // Stamp the stationarity rows of the network equations.
    #[serde(rename = "Stamp Dual")]
    pub stamp_dual: bool,

    #[serde(rename = "infeas settings")]
    pub infeas: InfeasOpt,
    #[serde(rename = "multi settings")]
    pub multi: MultiOpt,

    #[serde(rename = "continuation settings")]
    pub continuation: ContinuationOpt,
    #[serde(rename = "limiting settings")]
    pub limiting: LimitOpt,

    #[serde(rename = "Q-V Control")]
    pub qv_control: QvControl,
}

impl Default for EcfOpt {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iters: 100,
            voltage_limiting: true,
            diode_limiting: true,
            homotopy: false,
            g_homotopy: 400.0,
            b_homotopy: 400.0,
            load_factor: 1.0,
            run_type: RunType::PowerFlow,
            stamp_dual: false,
            infeas: InfeasOpt::default(),
            multi: MultiOpt::default(),
            continuation: ContinuationOpt::default(),
            limiting: LimitOpt::default(),
            qv_control: QvControl::Patching,
        }
    }
}

impl EcfOpt {
    /// Options of an infeasibility run, with dual stamping enabled.
    pub fn infeasibility(source: SourceType, obj: Objective) -> Self {
        let mut opt = Self::default();
        opt.run_type = RunType::Infeasibility;
        opt.stamp_dual = true;
        opt.infeas.source_type = source;
        opt.infeas.obj = obj;
        opt
    }

    pub(crate) fn infeasibility_mode(&self) -> bool {
        self.run_type != RunType::PowerFlow
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfeasOpt {
    #[serde(rename = "source type")]
    pub source_type: SourceType,
    #[serde(rename = "obj")]
    pub obj: Objective,
    // Weight of the infeasibility objective.
    #[serde(rename = "obj scalar")]
    pub obj_scalar: f64,
    // Right-hand side of the relaxed complementary slackness rows.
    #[serde(rename = "cs tol")]
    pub cs_tol: f64,
    #[serde(rename = "neutral infeas source")]
    pub neutral_source: bool,
    #[serde(rename = "stamp slack bus")]
    pub stamp_slack_bus: bool,
    #[serde(rename = "triplex sources")]
    pub triplex_sources: bool,
}

impl Default for InfeasOpt {
    fn default() -> Self {
        Self {
            source_type: SourceType::Current,
            obj: Objective::L2,
            obj_scalar: 1.0,
            cs_tol: 1e-6,
            neutral_source: false,
            stamp_slack_bus: true,
            triplex_sources: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiOpt {
    pub periods: usize,
    pub tolerance: f64,
    #[serde(rename = "max epochs")]
    pub max_epochs: usize,
    // Per-period multipliers; missing entries default to 1.
    #[serde(rename = "load factor")]
    pub load_factor: Vec<f64>,
    pub pv: Vec<f64>,
    pub wind: Vec<f64>,
    // Per-period energy price applied to battery costs.
    pub price: Vec<f64>,
}

impl Default for MultiOpt {
    fn default() -> Self {
        Self {
            periods: 2,
            tolerance: 1e-3,
            max_epochs: 2,
            load_factor: Vec::new(),
            pv: Vec::new(),
            wind: Vec::new(),
            price: Vec::new(),
        }
    }
}

impl MultiOpt {
    pub(crate) fn series(values: &[f64], t: usize) -> f64 {
        values.get(t).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationOpt {
    // Initial homotopy step; five steps take h from 0 to 1.
    pub step: f64,
    // Failures tolerated at one checkpoint before giving up.
    pub k_reset: usize,
    pub min_step: f64,
}

impl Default for ContinuationOpt {
    fn default() -> Self {
        Self {
            step: 0.2,
            k_reset: 5,
            min_step: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitOpt {
    // Largest per-iteration voltage change, per unit of nominal.
    pub max_step: f64,
    // Per-unit band outside of which the global damping factor is halved.
    pub v_max: f64,
    pub v_min: f64,
    pub sigma_min: f64,
}

impl Default for LimitOpt {
    fn default() -> Self {
        Self {
            max_step: 0.1,
            v_max: 2.0,
            v_min: 0.1,
            sigma_min: 1e-2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_use_configuration_names() {
        let json = r#"{
            "Tolerance": 1e-6,
            "Max Iters": 20,
            "Run Type": "Infeas",
            "Stamp Dual": true,
            "infeas settings": {"source type": "PQ", "obj": "L1", "cs tol": 1e-4}
        }"#;
        let opt: EcfOpt = serde_json::from_str(json).unwrap();
        assert_eq!(opt.max_iters, 20);
        assert_eq!(opt.run_type, RunType::Infeasibility);
        assert_eq!(opt.infeas.source_type, SourceType::PQ);
        assert_eq!(opt.infeas.obj, Objective::L1);
        assert_eq!(opt.infeas.obj_scalar, 1.0);
        assert!(opt.voltage_limiting);
        assert_eq!(opt.g_homotopy, 400.0);
    }

    #[test]
    fn missing_series_entries_default_to_one() {
        assert_eq!(MultiOpt::series(&[0.5], 0), 0.5);
        assert_eq!(MultiOpt::series(&[0.5], 3), 1.0);
    }
}
