//! Chart data handed to an external renderer. Nothing here draws.

use crate::model::Compartment;
use crate::trajectory::Trajectory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub label: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub times: Vec<f64>,
    pub series: Vec<Series>,
}

impl Chart {
    fn from_compartments(
        trajectory: &Trajectory,
        title: &str,
        y_label: &str,
        compartments: &[Compartment],
    ) -> Self {
        Self {
            title: title.to_string(),
            x_label: "Months".to_string(),
            y_label: y_label.to_string(),
            times: trajectory.times().to_vec(),
            series: compartments
                .iter()
                .map(|&c| Series {
                    label: c.label().to_string(),
                    values: trajectory.series(c),
                })
                .collect(),
        }
    }
}

impl Trajectory {
    pub fn vector_chart(&self) -> Chart {
        Chart::from_compartments(
            self,
            "Psyllid population dynamics (P)",
            "Population (P)",
            &[
                Compartment::UninfectedPsyllids,
                Compartment::InfectedPsyllids,
            ],
        )
    }

    pub fn tree_chart(&self) -> Chart {
        Chart::from_compartments(
            self,
            "Tree population dynamics (T)",
            "Population (T)",
            &[Compartment::UninfectedTrees, Compartment::InfectedTrees],
        )
    }

    /// Both standard charts, psyllids first.
    pub fn charts(&self) -> [Chart; 2] {
        [self.vector_chart(), self.tree_chart()]
    }
}

#[cfg(test)]
mod tests {
    use crate::model::ModelParameters;
    use crate::simulation::SimulationConfig;

    #[test]
    fn charts_pair_each_population_with_the_time_axis() {
        let config = SimulationConfig::default()
            .with_parameters(ModelParameters::default())
            .with_t_span([0.0, 12.0])
            .with_samples(25);
        let trajectory = config.solve().expect("solve");
        let [vectors, trees] = trajectory.charts();

        assert_eq!(vectors.series.len(), 2);
        assert_eq!(vectors.series[0].label, "P_uninfected(t)");
        assert_eq!(vectors.series[1].label, "P_infected(t)");
        assert_eq!(trees.series[0].label, "T_uninfected(t)");
        assert_eq!(trees.series[1].label, "T_infected(t)");
        assert_eq!(vectors.x_label, "Months");
        for chart in [&vectors, &trees] {
            assert_eq!(chart.times.len(), 25);
            assert!(chart.series.iter().all(|s| s.values.len() == 25));
        }
        assert_eq!(trees.series[0].values[0], 13000.0);
    }
}
