use argh::FromArgs;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use kornia_association as ka;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Serialize;

#[derive(FromArgs)]
/// Match noisy observations against a landmark map with RANSAC
struct Args {
    /// path to a landmark map with one `ID X Y` line per landmark
    #[argh(option)]
    map_file: Option<PathBuf>,

    /// number of landmarks of the random map
    #[argh(option, default = "100")]
    num_landmarks: usize,

    /// width of the random map
    #[argh(option, default = "50.0")]
    map_width: f64,

    /// height of the random map
    #[argh(option, default = "25.0")]
    map_height: f64,

    /// number of observed landmarks per trial
    #[argh(option, default = "10")]
    num_observations: usize,

    /// standard deviation of the observation noise
    #[argh(option, default = "0.15")]
    noise_std: f64,

    /// minimum number of inliers to accept a hypothesis
    #[argh(option, default = "9")]
    min_inliers: usize,

    /// maximum number of inliers, defaults to the pool size
    #[argh(option)]
    max_inliers: Option<usize>,

    /// mahalanobis distance threshold for inliers
    #[argh(option, default = "5.0")]
    mahalanobis_threshold: f64,

    /// probability of drawing at least one outlier-free sample
    #[argh(option, default = "0.999999")]
    probability: f64,

    /// minimum number of RANSAC iterations
    #[argh(option, default = "100000")]
    min_iterations: usize,

    /// position tolerance to fuse hypotheses
    #[argh(option, default = "0.01")]
    fuse_xy: f64,

    /// angle tolerance in degrees to fuse hypotheses
    #[argh(option, default = "0.1")]
    fuse_phi_deg: f64,

    /// do not fuse hypotheses sharing the same inlier set
    #[argh(switch)]
    no_fuse_by_correspondences: bool,

    /// sample for dense point clouds instead of landmarks
    #[argh(switch)]
    point_cloud: bool,

    /// number of parallel workers, 1 runs serially
    #[argh(option, default = "1")]
    num_workers: usize,

    /// number of trials, runs until Ctrl-C if absent
    #[argh(option)]
    num_trials: Option<usize>,

    /// time limit per trial in seconds
    #[argh(option)]
    timeout: Option<u64>,

    /// random seed
    #[argh(option, default = "0")]
    seed: u64,

    /// print one JSON report per trial
    #[argh(switch)]
    json: bool,
}

#[derive(Serialize)]
struct TrialReport {
    trial: usize,
    ground_truth: ka::Pose2D,
    estimate: Option<ka::Pose2D>,
    covariance_diag: Option<[f64; 3]>,
    num_modes: usize,
    num_inliers: usize,
    associations: Vec<Option<usize>>,
    rmse: Option<f64>,
    num_iterations: usize,
    elapsed_ms: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut rng = StdRng::seed_from_u64(args.seed);

    let landmarks = match &args.map_file {
        Some(path) => {
            let landmarks = ka::io::read_landmarks_txt(path)?;
            log::info!("Loaded {} landmarks from {}", landmarks.len(), path.display());
            landmarks.into_iter().map(|lm| lm.point).collect()
        }
        None => (0..args.num_landmarks)
            .map(|_| {
                ka::Point2D::new(
                    rng.random_range(0.0..args.map_width),
                    rng.random_range(0.0..args.map_height),
                )
            })
            .collect::<Vec<_>>(),
    };
    let map = ka::PointSet::from_points(landmarks)?;
    let (min_corner, max_corner) = bounds(map.points());

    let strategy = if args.point_cloud {
        ka::SamplingStrategy::PointCloud
    } else {
        ka::SamplingStrategy::Landmarks
    };
    let pool_size = map.len() * args.num_observations;
    let engine = ka::RansacEngine::new(ka::RansacConfig {
        noise_std: args.noise_std,
        min_inliers: args.min_inliers,
        max_inliers: args.max_inliers.unwrap_or(pool_size),
        mahalanobis_threshold: args.mahalanobis_threshold,
        probability: args.probability,
        min_iterations: args.min_iterations,
        strategy,
        fusion: ka::FusionParams {
            position_tolerance: args.fuse_xy,
            angle_tolerance: args.fuse_phi_deg.to_radians(),
            fuse_by_correspondences: !args.no_fuse_by_correspondences,
        },
    })?;

    let noise = Normal::new(0.0, args.noise_std)?;

    // create a cancel token to stop the trials
    let cancel_token = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            println!("Received Ctrl-C signal. Sending cancel signal !!");
            cancel_token.store(true, Ordering::SeqCst);
        }
    })?;

    let mut trial = 0;
    while !cancel_token.load(Ordering::SeqCst) && args.num_trials.map_or(true, |n| trial < n) {
        // random ground truth pose inside the map
        let gt = ka::Pose2D::from_random(
            &mut rng,
            min_corner.x..max_corner.x.max(min_corner.x + 1.0),
            min_corner.y..max_corner.y.max(min_corner.y + 1.0),
        );

        // observe the landmarks nearest to the sensor, in the sensor frame
        let sensor = ka::Point2D::new(gt.x, gt.y);
        let visible = map
            .within_radius(&sensor, (max_corner.distance(&min_corner) + 1.0).max(1.0))
            .into_iter()
            .take(args.num_observations)
            .collect::<Vec<_>>();
        let observations = visible
            .iter()
            .map(|nn| {
                let p = gt.inverse_transform_point(&map.points()[nn.index]);
                ka::Point2D::new(p.x + noise.sample(&mut rng), p.y + noise.sample(&mut rng))
            })
            .collect::<Vec<_>>();

        let pool = ka::build_correspondences(map.points(), &observations)?;

        let mut stop = ka::StopSignal::never().with_cancel_token(cancel_token.clone());
        if let Some(secs) = args.timeout {
            stop = stop.with_timeout(Duration::from_secs(secs));
        }

        let now = Instant::now();
        let output = if args.num_workers > 1 {
            engine.run_parallel(&pool, rng.random(), args.num_workers, &stop)?
        } else {
            engine.run_until(&pool, &mut rng, &stop)?
        };
        let elapsed = now.elapsed();

        // refit the best pairing for the final estimate
        let refit = if output.best_inliers.len() >= 2 {
            ka::fit_rigid_transform(&output.best_inliers, args.noise_std).ok()
        } else {
            None
        };

        let report = TrialReport {
            trial,
            ground_truth: gt,
            estimate: refit.map(|f| f.pose),
            covariance_diag: refit.map(|f| {
                [
                    f.covariance.x_axis.x,
                    f.covariance.y_axis.y,
                    f.covariance.z_axis.z,
                ]
            }),
            num_modes: output.belief.len(),
            num_inliers: output.best_inliers.len(),
            associations: output.best_inliers.observation_to_map(observations.len()),
            rmse: refit.map(|f| output.best_inliers.rmse(&f.pose)),
            num_iterations: output.num_iterations,
            elapsed_ms: elapsed.as_secs_f64() * 1e3,
        };

        if args.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print_report(&report, &visible);
        }

        trial += 1;
    }

    Ok(())
}

fn bounds(points: &[ka::Point2D]) -> (ka::Point2D, ka::Point2D) {
    let mut min = ka::Point2D::new(f64::INFINITY, f64::INFINITY);
    let mut max = ka::Point2D::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    (min, max)
}

fn print_report(report: &TrialReport, visible: &[ka::Neighbor]) {
    println!("=== Trial #{} ===", report.trial);
    println!("ground truth: {}", report.ground_truth);
    match (&report.estimate, &report.covariance_diag) {
        (Some(estimate), Some(diag)) => {
            println!(
                "estimate:     {} (std: {:.3} {:.3} {:.3}deg)",
                estimate,
                diag[0].sqrt(),
                diag[1].sqrt(),
                diag[2].sqrt().to_degrees()
            );
            println!(
                "error:        {:.4} m, {:.4} deg",
                estimate.position_distance(&report.ground_truth),
                estimate.angle_distance(&report.ground_truth).to_degrees()
            );
        }
        _ => println!("estimate:     none"),
    }

    let assoc = report
        .associations
        .iter()
        .map(|a| a.map_or("-".to_string(), |i| i.to_string()))
        .collect::<Vec<_>>()
        .join(" ");
    let truth = visible
        .iter()
        .map(|nn| nn.index.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!("associations: [{assoc}]");
    println!("ground truth: [{truth}]");

    if let Some(rmse) = report.rmse {
        println!("rmse:         {rmse:.4}");
    }
    println!(
        "{} modes, {} inliers, {} iterations in {:.1} ms",
        report.num_modes, report.num_inliers, report.num_iterations, report.elapsed_ms
    );
}
