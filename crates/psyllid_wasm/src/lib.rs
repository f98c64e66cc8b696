use js_sys::Float64Array;
use psyllid_core::solvers::SolverStats;
use psyllid_core::{Simulation, SimulationConfig, Trajectory, TrajectoryStatus};
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Result of a `solve()` call as seen from JavaScript.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct SolveSummary {
    samples: usize,
    t_start: f64,
    t_end: f64,
    status: TrajectoryStatus,
    stats: SolverStats,
}

impl SolveSummary {
    fn of(trajectory: &Trajectory) -> Self {
        let times = trajectory.times();
        Self {
            samples: trajectory.len(),
            t_start: times.first().copied().unwrap_or(f64::NAN),
            t_end: times.last().copied().unwrap_or(f64::NAN),
            status: trajectory.status(),
            stats: *trajectory.stats(),
        }
    }
}

/// `[t, Pu, Pi, Iu, Ii, Tu, Ti]` per sample, concatenated.
fn flatten_rows(trajectory: &Trajectory) -> Vec<f64> {
    trajectory.rows().flatten().collect()
}

fn to_js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen]
pub struct WasmModel {
    simulation: Simulation,
}

#[wasm_bindgen]
impl WasmModel {
    /// `config` is a (possibly partial) `SimulationConfig` object; `undefined` or `null`
    /// selects the reference scenario.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<WasmModel, JsValue> {
        console_error_panic_hook::set_once();

        let config: SimulationConfig = if config.is_undefined() || config.is_null() {
            SimulationConfig::default()
        } else {
            from_value(config)
                .map_err(|e| JsValue::from_str(&format!("Invalid simulation config: {}", e)))?
        };
        let simulation = Simulation::new(config).map_err(to_js_error)?;
        Ok(WasmModel { simulation })
    }

    pub fn solve(&mut self) -> Result<JsValue, JsValue> {
        let trajectory = self.simulation.solve().map_err(to_js_error)?;
        to_value(&SolveSummary::of(trajectory))
            .map_err(|e| JsValue::from_str(&format!("Failed to serialize summary: {}", e)))
    }

    pub fn is_solved(&self) -> bool {
        self.simulation.is_solved()
    }

    pub fn config(&self) -> Result<JsValue, JsValue> {
        to_value(self.simulation.config())
            .map_err(|e| JsValue::from_str(&format!("Failed to serialize config: {}", e)))
    }

    /// The psyllid and tree charts, in that order.
    pub fn charts(&self) -> Result<JsValue, JsValue> {
        let charts = self.simulation.charts().map_err(to_js_error)?;
        to_value(&charts)
            .map_err(|e| JsValue::from_str(&format!("Failed to serialize charts: {}", e)))
    }

    pub fn rows(&self) -> Result<Float64Array, JsValue> {
        let trajectory = self.simulation.trajectory().map_err(to_js_error)?;
        Ok(Float64Array::from(flatten_rows(trajectory).as_slice()))
    }

    pub fn csv(&self) -> Result<String, JsValue> {
        let mut buffer = Vec::new();
        self.simulation
            .export_csv(&mut buffer)
            .map_err(to_js_error)?;
        String::from_utf8(buffer).map_err(to_js_error)
    }
}

#[wasm_bindgen]
pub fn default_config() -> Result<JsValue, JsValue> {
    to_value(&SimulationConfig::default())
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::{flatten_rows, SolveSummary};
    use psyllid_core::SimulationConfig;

    #[test]
    fn rows_flatten_time_then_compartments() {
        let trajectory = SimulationConfig::default()
            .with_t_span([0.0, 2.0])
            .with_samples(5)
            .solve()
            .expect("solve");
        let flat = flatten_rows(&trajectory);
        assert_eq!(flat.len(), 5 * 7);
        assert_eq!(&flat[..7], &[0.0, 1e7, 1e2, 0.0, 0.0, 13000.0, 0.0]);
        assert_eq!(flat[4 * 7], 2.0);

        let summary = SolveSummary::of(&trajectory);
        assert_eq!(summary.samples, 5);
        assert_eq!(summary.t_end, 2.0);
        assert!(summary.stats.accepted_steps > 0);
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::WasmModel;
    use psyllid_core::SimulationConfig;
    use serde_wasm_bindgen::to_value;
    use wasm_bindgen::JsValue;
    use wasm_bindgen_test::wasm_bindgen_test;

    fn short_config() -> JsValue {
        let config = SimulationConfig::default()
            .with_t_span([0.0, 6.0])
            .with_samples(13);
        to_value(&config).expect("config")
    }

    #[wasm_bindgen_test]
    fn results_require_solve() {
        let model = WasmModel::new(short_config()).expect("model");
        assert!(!model.is_solved());
        let message = model
            .charts()
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("not been solved"));
        assert!(model.rows().is_err());
        assert!(model.csv().is_err());
    }

    #[wasm_bindgen_test]
    fn solve_exposes_rows_and_csv() {
        let mut model = WasmModel::new(short_config()).expect("model");
        model.solve().expect("solve");
        assert!(model.is_solved());
        assert_eq!(model.rows().expect("rows").length(), 13 * 7);
        let csv = model.csv().expect("csv");
        assert!(csv.starts_with("t,Pu,Pi,Iu,Ii,Tu,Ti"));
        assert!(model.charts().is_ok());
    }

    #[wasm_bindgen_test]
    fn rejects_invalid_config() {
        let config = SimulationConfig::default().with_samples(0);
        let result = WasmModel::new(to_value(&config).expect("config"));
        assert!(result.is_err());
    }
}
