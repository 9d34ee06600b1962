//! Incremental run over a City10000 dataset.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use kornia_hybrid::{HybridFactorGraph, HybridResult, HybridSmoother, SmootherConfig};
use nalgebra::Vector3;

use crate::dataset::Measurement;
use crate::factors::{loop_key, mode_key, pose_key, PoseFactor, Values};
use crate::pose2::Pose2;

/// Parameters of an experiment run.
#[derive(Debug, Clone)]
pub struct ExperimentParams {
    /// Number of dataset lines to process.
    pub max_loop_count: usize,
    /// Number of hybrid factors that triggers a smoother update.
    pub update_frequency: usize,
    /// Maximum number of discrete hypotheses kept after each update.
    pub max_nr_hypotheses: usize,
    /// Re-linearize the estimate every this many updates.
    pub relinearization_frequency: usize,
}

impl Default for ExperimentParams {
    fn default() -> Self {
        Self {
            max_loop_count: 3000,
            update_frequency: 3,
            max_nr_hypotheses: 10,
            relinearization_frequency: 1,
        }
    }
}

/// Output of [`Experiment::run`].
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    /// Estimated trajectory, indexed by pose number.
    pub poses: Vec<Pose2>,
    /// Accumulated time at each odometry edge.
    pub odometry_times: Vec<Duration>,
    /// Duration of every smoother update.
    pub update_times: Vec<Duration>,
    /// Error of the final posterior at its optimum.
    pub final_error: f64,
}

/// Feeds a dataset to a [`HybridSmoother`] in batches of hybrid factors.
pub struct Experiment {
    params: ExperimentParams,
    smoother: HybridSmoother,
    new_factors: Vec<PoseFactor>,
    initial: Values,
}

impl Experiment {
    pub fn new(params: ExperimentParams, config: SmootherConfig) -> HybridResult<Self> {
        Ok(Self {
            params,
            smoother: HybridSmoother::new(config)?,
            new_factors: Vec::new(),
            initial: Values::new(),
        })
    }

    /// Linearize the pending factors at the initial estimate and update the smoother.
    fn smoother_update(&mut self) -> HybridResult<Duration> {
        let start = Instant::now();
        let graph = self
            .new_factors
            .iter()
            .map(|f| f.linearize(&self.initial))
            .collect::<HybridResult<HybridFactorGraph>>()?;
        self.smoother
            .update(&graph, Some(self.params.max_nr_hypotheses), None)?;
        self.new_factors.clear();
        Ok(start.elapsed())
    }

    /// The initial estimate moved by the smoother's current solution.
    fn estimate(&self) -> HybridResult<(Values, f64)> {
        let delta = self.smoother.optimize()?;
        let error = self.smoother.error(&delta)?;
        let values = self
            .initial
            .iter()
            .map(|(key, pose)| {
                let step = delta
                    .continuous
                    .get(*key)
                    .map_or_else(Vector3::zeros, |d| Vector3::new(d[0], d[1], d[2]));
                (*key, pose.retract(&step))
            })
            .collect();
        Ok((values, error))
    }

    pub fn run(mut self, measurements: &[Measurement]) -> HybridResult<ExperimentOutcome> {
        let prior = Pose2::identity();
        self.initial.insert(pose_key(0), prior);
        self.new_factors.push(PoseFactor::Prior {
            key: pose_key(0),
            pose: prior,
        });
        let mut update_times = vec![self.smoother_update()?];

        let (mut discrete_count, mut loop_count, mut update_count) = (0, 0, 0);
        let mut odometry_times = Vec::new();
        let mut last_pose = 0;
        let start = Instant::now();

        for (index, measurement) in measurements
            .iter()
            .take(self.params.max_loop_count)
            .enumerate()
        {
            let (from, to) = (pose_key(measurement.key_s), pose_key(measurement.key_t));
            let Some(first) = measurement.poses.first().copied() else {
                continue;
            };
            if measurement.is_odometry() {
                if measurement.poses.len() > 1 {
                    self.new_factors.push(PoseFactor::Odometry {
                        mode: mode_key(discrete_count, measurement.poses.len()),
                        from,
                        to,
                        candidates: measurement.poses.clone(),
                    });
                    discrete_count += 1;
                    log::debug!("mixture factor: {} {}", measurement.key_s, measurement.key_t);
                } else {
                    self.new_factors.push(PoseFactor::Between {
                        from,
                        to,
                        measured: first,
                    });
                }
                // the first candidate seeds the initial estimate
                let previous = self.initial.get(&from).copied().unwrap_or(prior);
                self.initial.insert(to, previous * first);
                last_pose = last_pose.max(measurement.key_t);
            } else {
                self.new_factors.push(PoseFactor::LoopClosure {
                    indicator: loop_key(loop_count),
                    from,
                    to,
                    measured: first,
                });
                loop_count += 1;
                log::debug!("loop closure: {} {}", measurement.key_s, measurement.key_t);
            }

            let pending_hybrid = self.new_factors.iter().filter(|f| f.is_hybrid()).count();
            if pending_hybrid >= self.params.update_frequency {
                log::debug!("smoother update with {} factors", self.new_factors.len());
                update_times.push(self.smoother_update()?);
                update_count += 1;
                if update_count % self.params.relinearization_frequency.max(1) == 0 {
                    // only checks that the posterior can still be solved
                    self.estimate()?;
                }
            }

            if measurement.is_odometry() {
                odometry_times.push(start.elapsed());
            }
            if index % 100 == 0 {
                log::info!(
                    "index {index}: {:?} elapsed, {} conditionals, {} fixed keys",
                    start.elapsed(),
                    self.smoother.posterior().len(),
                    self.smoother.fixed_values().len()
                );
            }
        }

        update_times.push(self.smoother_update()?);
        let (values, final_error) = self.estimate()?;
        log::info!("final error {final_error}, total time {:?}", start.elapsed());

        let poses = (0..=last_pose)
            .map(|i| values.get(&pose_key(i)).copied().unwrap_or(prior))
            .collect();
        Ok(ExperimentOutcome {
            poses,
            odometry_times,
            update_times,
            final_error,
        })
    }
}

/// Write one `x y θ` line per pose.
pub fn write_poses(path: &Path, poses: &[Pose2]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for pose in poses {
        writeln!(writer, "{} {} {}", pose.x, pose.y, pose.theta)?;
    }
    writer.flush()
}

/// Write the accumulated time of every odometry edge, in seconds.
pub fn write_times(path: &Path, times: &[Duration]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for time in times {
        writeln!(writer, "{}", time.as_secs_f64())?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::read_dataset;
    use approx::assert_relative_eq;

    fn odometry(s: u64, poses: Vec<Pose2>) -> Measurement {
        Measurement {
            key_s: s,
            key_t: s + 1,
            poses,
        }
    }

    fn run(measurements: &[Measurement]) -> HybridResult<ExperimentOutcome> {
        let params = ExperimentParams {
            update_frequency: 1,
            ..Default::default()
        };
        Experiment::new(params, SmootherConfig::default())?.run(measurements)
    }

    #[test]
    fn test_square_with_ambiguous_leg_and_loop_closure() -> HybridResult<()> {
        let turn = Pose2::new(1.0, 0.0, std::f64::consts::FRAC_PI_2);
        let measurements = vec![
            odometry(0, vec![turn]),
            // the second reading is wrong, the loop closure tells which one
            odometry(1, vec![turn, Pose2::new(1.5, 0.3, 0.0)]),
            odometry(2, vec![turn]),
            Measurement {
                key_s: 3,
                key_t: 0,
                poses: vec![turn],
            },
        ];
        let outcome = run(&measurements)?;
        assert_eq!(outcome.poses.len(), 4);
        assert_eq!(outcome.odometry_times.len(), 3);
        assert!(outcome.final_error.is_finite());

        let expected = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        for (pose, (x, y)) in outcome.poses.iter().zip(expected) {
            assert_relative_eq!(pose.x, x, epsilon = 1e-3);
            assert_relative_eq!(pose.y, y, epsilon = 1e-3);
        }
        Ok(())
    }

    #[test]
    fn test_results_are_written() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let data = dir.path().join("edges.txt");
        std::fs::write(
            &data,
            "E 0 E 1 N 1 1.0 0.0 0.0\nE 1 E 2 N 1 1.0 0.0 0.0\n",
        )?;
        let outcome = run(&read_dataset(&data, usize::MAX)?)?;

        let poses_path = dir.path().join("poses.txt");
        write_poses(&poses_path, &outcome.poses)?;
        let written = std::fs::read_to_string(&poses_path)?;
        assert_eq!(written.lines().count(), 3);
        let last: Vec<f64> = written
            .lines()
            .last()
            .unwrap()
            .split_whitespace()
            .map(|v| v.parse())
            .collect::<Result<_, _>>()?;
        assert_relative_eq!(last[0], 2.0, epsilon = 1e-6);

        let times_path = dir.path().join("times.txt");
        write_times(&times_path, &outcome.odometry_times)?;
        assert_eq!(std::fs::read_to_string(&times_path)?.lines().count(), 2);
        Ok(())
    }
}
