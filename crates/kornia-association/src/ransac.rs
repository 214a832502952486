//! RANSAC search for the rigid transformation best supported by a correspondence pool.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::{Duration, Instant};

use glam::{DMat2, DMat3, DVec2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::correspondence::{Correspondence, CorrespondenceSet};
use crate::error::AssociationError;
use crate::fit::fit_rigid_transform;
use crate::fusion::{FusionParams, PoseBelief, PoseHypothesis};
use crate::ops::{chi2_inv_1dof, mahalanobis_distance};
use crate::pose::Pose2D;

/// How minimal samples are drawn and how inliers may share indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// Distinguishable point landmarks.
    ///
    /// Minimal samples of two correspondences whose inter-point distances must agree,
    /// and every landmark and observation appears at most once per inlier set.
    Landmarks,
    /// Dense, possibly repetitive point clouds.
    ///
    /// Minimal samples of three correspondences; a landmark may explain several
    /// observations, each observation is still used once.
    PointCloud,
}

impl SamplingStrategy {
    /// Number of correspondences in a minimal sample.
    pub fn sample_size(&self) -> usize {
        match self {
            SamplingStrategy::Landmarks => 2,
            SamplingStrategy::PointCloud => 3,
        }
    }
}

/// Parameters of the RANSAC data association.
///
/// There is no `Default`: every value depends on the sensor and the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RansacConfig {
    /// Standard deviation of the observation noise, in map units.
    pub noise_std: f64,
    /// Minimum inlier set size for a hypothesis to be accepted.
    pub min_inliers: usize,
    /// Maximum inlier set size; gating stops once reached.
    pub max_inliers: usize,
    /// Mahalanobis distance below which a correspondence is an inlier.
    pub mahalanobis_threshold: f64,
    /// Desired probability of drawing at least one outlier-free sample.
    pub probability: f64,
    /// Lower bound on the number of iterations.
    pub min_iterations: usize,
    /// Sampling strategy.
    pub strategy: SamplingStrategy,
    /// Tolerances for merging accepted hypotheses.
    pub fusion: FusionParams,
}

impl RansacConfig {
    /// Check every parameter range.
    pub fn validate(&self) -> Result<(), AssociationError> {
        if !(self.noise_std.is_finite() && self.noise_std > 0.0) {
            return Err(AssociationError::ConfigurationError(format!(
                "noise standard deviation must be positive, got {}",
                self.noise_std
            )));
        }
        if !(self.mahalanobis_threshold.is_finite() && self.mahalanobis_threshold > 0.0) {
            return Err(AssociationError::ConfigurationError(format!(
                "Mahalanobis threshold must be positive, got {}",
                self.mahalanobis_threshold
            )));
        }
        if !(self.probability > 0.0 && self.probability < 1.0) {
            return Err(AssociationError::ConfigurationError(format!(
                "probability must lie in (0, 1), got {}",
                self.probability
            )));
        }
        let sample_size = self.strategy.sample_size();
        if self.min_inliers < sample_size {
            return Err(AssociationError::ConfigurationError(format!(
                "minimum inlier set size {} is below the minimal sample size {}",
                self.min_inliers, sample_size
            )));
        }
        if self.min_inliers > self.max_inliers {
            return Err(AssociationError::ConfigurationError(format!(
                "minimum inlier set size {} exceeds the maximum {}",
                self.min_inliers, self.max_inliers
            )));
        }
        self.fusion.validate()
    }
}

/// External request to end a run early, checked between trials.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    cancel_token: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
    max_iterations: Option<usize>,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// Stop once `token` is set to `true`.
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Stop at the given instant.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stop once `timeout` has elapsed from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Stop after `max_iterations` trials regardless of the adaptive budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Whether the run must stop before starting trial number `iterations` (zero-based).
    pub fn should_stop(&self, iterations: usize) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(|t| t.load(Ordering::SeqCst))
            || self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.max_iterations.is_some_and(|m| iterations >= m)
    }
}

/// Result of a RANSAC run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RansacOutput {
    /// Fused pose hypotheses.
    pub belief: PoseBelief,
    /// Largest inlier set accepted during the run, empty if none.
    pub best_inliers: CorrespondenceSet,
    /// Number of trials performed.
    pub num_iterations: usize,
    /// Iteration budget at the end of the run.
    pub iteration_budget: usize,
    /// Whether the stop signal ended the run before the budget.
    pub stopped: bool,
}

impl RansacOutput {
    /// The best supported mode, if any.
    pub fn best(&self) -> Option<&PoseHypothesis> {
        self.belief.best()
    }
}

/// Number of iterations needed to draw one outlier-free sample with the given probability.
///
/// `N = ceil(log(1 - p) / log(1 - w^s))` with `w` the inlier ratio and `s` the sample size.
/// Saturates at `usize::MAX` when `w` is zero.
pub fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, probability: f64) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    let ws = inlier_ratio.min(1.0).powi(sample_size as i32);
    if ws >= 1.0 {
        return 1;
    }
    let n = ((1.0 - probability).ln() / (-ws).ln_1p()).ceil();
    if !n.is_finite() || n >= usize::MAX as f64 {
        usize::MAX
    } else {
        (n as usize).max(1)
    }
}

// Hypotheses gathered so far, shared by the serial and parallel runners.
struct Accumulator {
    belief: PoseBelief,
    best_inliers: CorrespondenceSet,
    best_ratio: f64,
    budget: usize,
}

impl Accumulator {
    fn accept(&mut self, hypothesis: PoseHypothesis, pool_len: usize, config: &RansacConfig) {
        let num_inliers = hypothesis.num_inliers();
        if num_inliers > self.best_inliers.len() {
            self.best_inliers = hypothesis.inliers.clone();
        }

        let ratio = num_inliers as f64 / pool_len as f64;
        if ratio > self.best_ratio {
            self.best_ratio = ratio;
            self.budget = adaptive_iterations(
                ratio,
                config.strategy.sample_size(),
                config.probability,
            )
            .max(config.min_iterations);
            log::debug!(
                "Inlier ratio {:.5} ({} inliers), iteration budget is now {}",
                ratio,
                num_inliers,
                self.budget
            );
        }

        self.belief.insert(hypothesis, &config.fusion);
    }
}

// Reusable buffers for a single trial.
struct Scratch {
    candidates: Vec<(f64, usize)>,
    map_used: Vec<bool>,
    obs_used: Vec<bool>,
}

impl Scratch {
    fn new(pool: &[Correspondence]) -> Self {
        let num_map = pool.iter().map(|c| c.map_index + 1).max().unwrap_or(0);
        let num_obs = pool.iter().map(|c| c.obs_index + 1).max().unwrap_or(0);
        Self {
            candidates: Vec::with_capacity(pool.len()),
            map_used: vec![false; num_map],
            obs_used: vec![false; num_obs],
        }
    }

    fn reset(&mut self) {
        self.candidates.clear();
        self.map_used.fill(false);
        self.obs_used.fill(false);
    }
}

/// RANSAC engine matching observations to map landmarks under a 2D rigid transformation.
///
/// Each trial draws a minimal sample of correspondences, fits a transformation,
/// gates the whole pool by Mahalanobis distance and, if enough correspondences
/// agree, refits on all of them and adds the result to a [`PoseBelief`].
#[derive(Debug, Clone)]
pub struct RansacEngine {
    config: RansacConfig,
    // chi-squared gate on the squared-distance mismatch of a landmark sample
    sample_chi2_threshold: f64,
}

impl RansacEngine {
    /// Create an engine from a validated configuration.
    pub fn new(config: RansacConfig) -> Result<Self, AssociationError> {
        config.validate()?;
        Ok(Self {
            config,
            sample_chi2_threshold: chi2_inv_1dof(config.probability),
        })
    }

    /// The configuration of the engine.
    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    /// Run until the adaptive iteration budget is exhausted.
    ///
    /// The result depends only on `pool`, the configuration and the state of `rng`.
    ///
    /// # Errors
    ///
    /// Returns [`AssociationError::InsufficientData`] if the pool is smaller than
    /// the minimal sample.
    pub fn run<R: Rng + ?Sized>(
        &self,
        pool: &CorrespondenceSet,
        rng: &mut R,
    ) -> Result<RansacOutput, AssociationError> {
        self.run_until(pool, rng, &StopSignal::never())
    }

    /// Run until the iteration budget is exhausted or `stop` fires.
    pub fn run_until<R: Rng + ?Sized>(
        &self,
        pool: &CorrespondenceSet,
        rng: &mut R,
        stop: &StopSignal,
    ) -> Result<RansacOutput, AssociationError> {
        self.check_pool(pool)?;
        let now = Instant::now();

        let mut acc = self.new_accumulator(pool.len());
        let mut scratch = Scratch::new(pool);
        let mut iterations = 0;
        let mut stopped = false;

        while iterations < acc.budget {
            if stop.should_stop(iterations) {
                stopped = true;
                break;
            }
            if let Some(hypothesis) = self.trial(pool, rng, &mut scratch) {
                acc.accept(hypothesis, pool.len(), &self.config);
            }
            iterations += 1;
        }

        Ok(self.finish(acc, iterations, stopped, now.elapsed()))
    }

    /// Run the trials on the rayon thread pool.
    ///
    /// Each of the `num_workers` workers draws from its own generator seeded with
    /// `seed + worker`. Accepted hypotheses are merged under a lock, which also
    /// updates the shared iteration budget. The set of trials is reproducible for a
    /// given seed, their interleaving, and so the order of the modes, is not.
    pub fn run_parallel(
        &self,
        pool: &CorrespondenceSet,
        seed: u64,
        num_workers: usize,
        stop: &StopSignal,
    ) -> Result<RansacOutput, AssociationError> {
        self.check_pool(pool)?;
        let now = Instant::now();

        let acc = self.new_accumulator(pool.len());
        let budget = AtomicUsize::new(acc.budget);
        let shared = Mutex::new(acc);
        let started = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        let stopped = AtomicBool::new(false);

        (0..num_workers.max(1)).into_par_iter().for_each(|worker| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
            let mut scratch = Scratch::new(pool);
            loop {
                let iteration = started.fetch_add(1, Ordering::SeqCst);
                if iteration >= budget.load(Ordering::SeqCst) {
                    break;
                }
                // the slot index bounds the trials started so far
                if stop.should_stop(iteration) {
                    stopped.store(true, Ordering::SeqCst);
                    break;
                }
                if let Some(hypothesis) = self.trial(pool, &mut rng, &mut scratch) {
                    let mut acc = shared.lock().unwrap_or_else(PoisonError::into_inner);
                    acc.accept(hypothesis, pool.len(), &self.config);
                    budget.store(acc.budget, Ordering::SeqCst);
                }
                completed.fetch_add(1, Ordering::SeqCst);
            }
        });

        let acc = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
        Ok(self.finish(
            acc,
            completed.into_inner(),
            stopped.into_inner(),
            now.elapsed(),
        ))
    }

    fn check_pool(&self, pool: &CorrespondenceSet) -> Result<(), AssociationError> {
        let required = self.config.strategy.sample_size();
        if pool.len() < required {
            return Err(AssociationError::InsufficientData {
                required,
                actual: pool.len(),
            });
        }
        Ok(())
    }

    fn new_accumulator(&self, pool_len: usize) -> Accumulator {
        // until a hypothesis is accepted assume the smallest acceptable inlier ratio
        let min_ratio = (self.config.min_inliers as f64 / pool_len as f64).min(1.0);
        let budget = adaptive_iterations(
            min_ratio,
            self.config.strategy.sample_size(),
            self.config.probability,
        )
        .max(self.config.min_iterations);

        Accumulator {
            belief: PoseBelief::new(),
            best_inliers: CorrespondenceSet::new(),
            best_ratio: 0.0,
            budget,
        }
    }

    fn finish(
        &self,
        acc: Accumulator,
        num_iterations: usize,
        stopped: bool,
        elapsed: Duration,
    ) -> RansacOutput {
        if stopped {
            log::warn!(
                "RANSAC stopped after {} of {} iterations",
                num_iterations,
                acc.budget
            );
        }
        log::info!(
            "RANSAC: {} iterations in {:?}, {} modes, best match has {} correspondences",
            num_iterations,
            elapsed,
            acc.belief.len(),
            acc.best_inliers.len()
        );

        RansacOutput {
            belief: acc.belief,
            best_inliers: acc.best_inliers,
            num_iterations,
            iteration_budget: acc.budget,
            stopped,
        }
    }

    // One hypothesize-and-verify step. Degenerate and rejected samples yield `None`.
    fn trial<R: Rng + ?Sized>(
        &self,
        pool: &CorrespondenceSet,
        rng: &mut R,
        scratch: &mut Scratch,
    ) -> Option<PoseHypothesis> {
        let config = &self.config;
        let sample_size = config.strategy.sample_size();

        // sample without replacement (partial Fisher-Yates over the pool indices)
        let indices = rand::seq::index::sample(rng, pool.len(), sample_size);
        let sample = indices.iter().map(|i| pool[i]).collect::<Vec<_>>();

        if !self.is_valid_sample(&sample) {
            return None;
        }

        let seed_fit = match fit_rigid_transform(&sample, config.noise_std) {
            Ok(fit) => fit,
            Err(e) => {
                log::trace!("Discarding sample: {e}");
                return None;
            }
        };

        let inliers = self.gate(
            pool,
            &indices.into_vec(),
            &seed_fit.pose,
            &seed_fit.covariance,
            scratch,
        );
        if inliers.len() < config.min_inliers {
            return None;
        }

        let refit = match fit_rigid_transform(&inliers, config.noise_std) {
            Ok(fit) => fit,
            Err(e) => {
                log::trace!("Discarding inlier set: {e}");
                return None;
            }
        };

        log::debug!(
            "Accepted hypothesis {} with {} inliers",
            refit.pose,
            inliers.len()
        );

        Some(PoseHypothesis {
            mean: refit.pose,
            covariance: refit.covariance,
            weight: inliers.len() as f64,
            inliers: CorrespondenceSet::from_unique(inliers),
        })
    }

    fn is_valid_sample(&self, sample: &[Correspondence]) -> bool {
        for (i, a) in sample.iter().enumerate() {
            for b in &sample[i + 1..] {
                if a.obs_index == b.obs_index {
                    return false;
                }
                if self.config.strategy == SamplingStrategy::Landmarks
                    && (a.map_index == b.map_index || !self.distances_agree(a, b))
                {
                    return false;
                }
            }
        }
        true
    }

    // Chi-squared test on the difference of squared inter-point distances, which
    // a rigid transformation preserves.
    fn distances_agree(&self, a: &Correspondence, b: &Correspondence) -> bool {
        let d2_map = a.map_point.distance_squared(&b.map_point);
        let d2_obs = a.obs_point.distance_squared(&b.obs_point);
        let denom = 8.0 * self.config.noise_std.powi(2) * (d2_map + d2_obs);
        if denom <= 0.0 {
            return false;
        }
        (d2_map - d2_obs).powi(2) / denom <= self.sample_chi2_threshold
    }

    // Collect the inliers of `pose`: the sample first, then the gated candidates by
    // increasing Mahalanobis distance, honoring the index uniqueness of the strategy.
    fn gate(
        &self,
        pool: &CorrespondenceSet,
        sample: &[usize],
        pose: &Pose2D,
        pose_cov: &DMat3,
        scratch: &mut Scratch,
    ) -> Vec<Correspondence> {
        let config = &self.config;
        let unique_map = config.strategy == SamplingStrategy::Landmarks;
        scratch.reset();

        let mut inliers = Vec::with_capacity(config.max_inliers.min(pool.len()));
        for &i in sample {
            let c = pool[i];
            scratch.map_used[c.map_index] = true;
            scratch.obs_used[c.obs_index] = true;
            inliers.push(c);
        }

        let noise_var = config.noise_std * config.noise_std;
        for (i, c) in pool.iter().enumerate() {
            if scratch.obs_used[c.obs_index] || (unique_map && scratch.map_used[c.map_index]) {
                continue;
            }
            let cov = predicted_covariance(pose, pose_cov, c, noise_var);
            match mahalanobis_distance(c.residual(pose), &cov) {
                Some(d) if d <= config.mahalanobis_threshold => scratch.candidates.push((d, i)),
                _ => {}
            }
        }

        scratch
            .candidates
            .sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for &(_, i) in &scratch.candidates {
            if inliers.len() >= config.max_inliers {
                break;
            }
            let c = pool[i];
            if scratch.obs_used[c.obs_index] || (unique_map && scratch.map_used[c.map_index]) {
                continue;
            }
            scratch.map_used[c.map_index] = true;
            scratch.obs_used[c.obs_index] = true;
            inliers.push(c);
        }

        inliers
    }
}

// Covariance of the residual `map - pose * obs`: `J P J^T + sigma^2 I`, with
// `J = [I | d(pose * obs)/dtheta]` and `P` the pose covariance.
fn predicted_covariance(
    pose: &Pose2D,
    pose_cov: &DMat3,
    c: &Correspondence,
    noise_var: f64,
) -> DMat2 {
    let u = pose.transform_point_jacobian_theta(&c.obs_point);
    let p_tt = DMat2::from_cols(pose_cov.x_axis.truncate(), pose_cov.y_axis.truncate());
    let p_tr = pose_cov.z_axis.truncate();
    let q = pose_cov.z_axis.z;

    let cross = outer(p_tr, u);
    p_tt + cross
        + cross.transpose()
        + outer(u, u) * q
        + DMat2::from_diagonal(DVec2::splat(noise_var))
}

// a * b^T
#[inline]
fn outer(a: DVec2, b: DVec2) -> DMat2 {
    DMat2::from_cols(a * b.x, a * b.y)
}
