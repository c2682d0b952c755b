//! Data association with a speculative new-landmark hypothesis
//!
//! For every observation the back-projected position is appended to the state
//! as a speculative landmark and scored alongside all known landmarks. The
//! speculative candidate carries a fixed prior distance, so a known landmark
//! is only preferred when it explains the observation better than that.
//! New-landmark admission and re-observation are thus one decision.

use log::{debug, info, warn};
use nalgebra::{Point3, Vector3};

use super::correspondence::{select_best, Correspondence, SensorFrames, SensorKind};
use super::state::EkfSlamState;
use super::update::sequential_update;
use crate::config::EkfSlamConfig;
use crate::util::landmark_offset;

/// Outcome of associating one observation batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationReport {
    /// Observations matched to an existing landmark
    pub known_matches: usize,
    /// Observations admitted as new landmarks
    pub new_landmarks: usize,
    /// Observations routed to the pipeline list
    pub pipeline_landmarks: usize,
    /// Landmark candidates dropped by the outlier gate
    pub outliers_rejected: usize,
    /// Candidate evaluations that failed numerically
    pub failed_evaluations: usize,
    /// Observations with no usable candidate at all
    pub skipped_observations: usize,
    /// Index of the observation closest to the pipeline estimate
    pub pipeline_match: Option<usize>,
    /// Covariance blocks removed while reconciling state dimensions
    pub covariance_blocks_trimmed: usize,
    /// Landmark assigned to each observation; `None` for pipeline or skipped
    pub associations: Vec<Option<usize>>,
}

/// Find the observation whose back-projection lies closest to the pipeline
///
/// `pipeline_body` is the pipeline position expressed in the body frame.
/// Only observations within `pipeline_match_radius` qualify; on equal
/// distance the later observation wins.
pub fn find_pipeline_match(
    state: &EkfSlamState,
    config: &EkfSlamConfig,
    observations: &[Vector3<f64>],
    kind: SensorKind,
    pipeline_body: &Vector3<f64>,
) -> Option<usize> {
    let frames = SensorFrames::new(&state.mu, &config.sonar_mount);
    let pipeline = (frames.global_from_body * Point3::from(*pipeline_body)).coords;
    let global_from_sensor = frames.global_from_sensor(kind);

    let mut best = None;
    let mut best_dist = config.pipeline_match_radius;
    for (i, z) in observations.iter().enumerate() {
        let dist = (pipeline - kind.back_project(z, &global_from_sensor)).norm();
        if dist <= best_dist {
            best_dist = dist;
            best = Some(i);
        }
    }
    best
}

/// Associate an observation batch and apply sequential updates
///
/// Mutates only the hypothesis `state`; pipeline observations are appended
/// to `pipeline_map` instead of the state.
pub fn associate_and_update(
    state: &mut EkfSlamState,
    config: &EkfSlamConfig,
    observations: &[Vector3<f64>],
    kind: SensorKind,
    pipeline_estimate: Option<&Vector3<f64>>,
    pipeline_map: &mut Vec<Vector3<f64>>,
) -> AssociationReport {
    let sensor = config.sensor(kind);
    let mut report = AssociationReport {
        pipeline_match: pipeline_estimate
            .and_then(|p| find_pipeline_match(state, config, observations, kind, p)),
        ..Default::default()
    };
    debug!(
        "{:?}: {} observations, pipeline match {:?}",
        kind,
        observations.len(),
        report.pipeline_match
    );

    for (i, z) in observations.iter().enumerate() {
        // Pose may have moved with the previous observation's update
        let frames = SensorFrames::new(&state.mu, &config.sonar_mount);
        let new_lm = kind.back_project(z, &frames.global_from_sensor(kind));
        let n_known = state.n_landmarks;
        state.push_speculative(&new_lm, &sensor.new_landmark_variance);

        let mut candidates = Vec::with_capacity(n_known + 1);
        for j in 0..n_known {
            let landmark = state.mu.fixed_rows::<3>(landmark_offset(j)).into_owned();
            let sigma_sub = state.pose_landmark_covariance(j);
            let evaluated = Correspondence::evaluate(
                kind,
                &frames,
                i,
                j,
                &landmark,
                z,
                &sigma_sub,
                &sensor.noise,
            );
            match evaluated {
                Ok(c) if c.d_m < sensor.outlier_gate => {
                    debug!("observation {i}: landmark {j} d_m = {:.3}", c.d_m);
                    candidates.push(c);
                }
                Ok(c) => {
                    debug!(
                        "observation {i}: landmark {j} rejected as outlier (d_m = {:.3})",
                        c.d_m
                    );
                    report.outliers_rejected += 1;
                }
                Err(e) => {
                    warn!("observation {i}: landmark {j} not evaluated: {e}");
                    report.failed_evaluations += 1;
                }
            }
        }

        let sigma_sub = state.pose_landmark_covariance(n_known);
        let speculative = Correspondence::evaluate(
            kind,
            &frames,
            i,
            n_known,
            &new_lm,
            z,
            &sigma_sub,
            &sensor.noise,
        );
        match speculative {
            Ok(mut c) => {
                c.d_m = sensor.new_landmark_distance;
                candidates.push(c);
            }
            Err(e) => {
                warn!("observation {i}: new landmark hypothesis not evaluated: {e}");
                report.failed_evaluations += 1;
            }
        }

        let Some(best) = select_best(candidates) else {
            warn!("observation {i}: no usable correspondence, observation skipped");
            state.discard_speculative();
            report.skipped_observations += 1;
            report.associations.push(None);
            continue;
        };

        if best.landmark < n_known {
            debug!("observation {i}: known landmark {} detected", best.landmark);
            state.discard_speculative();
            sequential_update(state, &best);
            report.known_matches += 1;
            report.associations.push(Some(best.landmark));
        } else if report.pipeline_match == Some(i) {
            // The pipeline is tracked separately and does not correct the state
            state.discard_speculative();
            info!(
                "pipeline landmark added at ({:.2}, {:.2}, {:.2})",
                new_lm[0], new_lm[1], new_lm[2]
            );
            pipeline_map.push(new_lm);
            report.pipeline_landmarks += 1;
            report.associations.push(None);
        } else {
            let idx = state.confirm_speculative();
            info!(
                "added new landmark {idx} at ({:.2}, {:.2}, {:.2})",
                new_lm[0], new_lm[1], new_lm[2]
            );
            sequential_update(state, &best);
            report.new_landmarks += 1;
            report.associations.push(Some(idx));
        }
    }

    report.covariance_blocks_trimmed = state.reconcile_dimensions();
    debug_assert!(state.is_consistent(), "state inconsistent after association");
    report
}
