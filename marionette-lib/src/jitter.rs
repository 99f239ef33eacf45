use std::time::Duration;

use rand::Rng;

/// Bounds for the humanized mouse path. Everything is sampled fresh on every
/// call; a constant step count or a fixed cadence would hand detection a
/// trivial signature.
#[derive(Clone, Debug)]
pub struct JitterConfig {
    pub min_steps: u32,
    pub max_steps: u32,
    /// Maximum perturbation per axis applied to each interpolated point, in
    /// device units.
    pub jitter: i32,
    pub min_step_delay: Duration,
    pub max_step_delay: Duration,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_steps: 10,
            max_steps: 15,
            jitter: 1,
            min_step_delay: Duration::from_millis(60),
            max_step_delay: Duration::from_millis(90),
        }
    }
}

/// One relative sub-move followed by a settle delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JitterStep {
    pub dx: i32,
    pub dy: i32,
    pub settle: Duration,
}

/// Breaks one displacement into randomized relative sub-moves. Point `i`
/// targets the fraction `i / steps` of the displacement, perturbed by up to
/// ±`jitter` per axis; each emitted delta is the difference between
/// consecutive perturbed points, so the path accumulates to within `jitter`
/// of `(target_x, target_y)`.
pub fn plan_path(
    rng: &mut impl Rng,
    config: &JitterConfig,
    target_x: i32,
    target_y: i32,
) -> Vec<JitterStep> {
    let steps = rng.gen_range(config.min_steps..=config.max_steps) as i64;
    let mut plan = Vec::with_capacity(steps as usize);
    let (mut last_x, mut last_y) = (0, 0);
    for i in 1..=steps {
        let x = (target_x as i64 * i / steps) as i32 + rng.gen_range(-config.jitter..=config.jitter);
        let y = (target_y as i64 * i / steps) as i32 + rng.gen_range(-config.jitter..=config.jitter);
        plan.push(JitterStep {
            dx: x - last_x,
            dy: y - last_y,
            settle: rng.gen_range(config.min_step_delay..=config.max_step_delay),
        });
        (last_x, last_y) = (x, y);
    }
    plan
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;

    fn total(plan: &[JitterStep]) -> (i32, i32) {
        plan.iter()
            .fold((0, 0), |(x, y), step| (x + step.dx, y + step.dy))
    }

    #[test]
    fn step_count_and_delays_stay_in_bounds() {
        let config = JitterConfig::default();
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            let plan = plan_path(&mut rng, &config, 500, -300);
            let steps = plan.len() as u32;
            assert!(steps >= config.min_steps && steps <= config.max_steps);
            for step in &plan {
                assert!(step.settle >= config.min_step_delay);
                assert!(step.settle <= config.max_step_delay);
            }
        }
    }

    #[test]
    fn path_accumulates_to_target_within_jitter() {
        let config = JitterConfig::default();
        let mut rng = SmallRng::seed_from_u64(42);
        for (tx, ty) in [(640, 360), (-200, 150), (0, 0), (1, -1)] {
            let (x, y) = total(&plan_path(&mut rng, &config, tx, ty));
            assert!((x - tx).abs() <= config.jitter, "x: {x} vs {tx}");
            assert!((y - ty).abs() <= config.jitter, "y: {y} vs {ty}");
        }
    }

    #[test]
    fn same_seed_replays_the_same_path() {
        let config = JitterConfig::default();
        let a = plan_path(&mut SmallRng::seed_from_u64(9), &config, 300, 200);
        let b = plan_path(&mut SmallRng::seed_from_u64(9), &config, 300, 200);
        assert_eq!(a, b);
    }

    #[test]
    fn consecutive_calls_differ() {
        let config = JitterConfig::default();
        let mut rng = SmallRng::seed_from_u64(11);
        let a = plan_path(&mut rng, &config, 300, 200);
        let b = plan_path(&mut rng, &config, 300, 200);
        // With resampled step counts, offsets and delays, a repeat is
        // astronomically unlikely.
        assert_ne!(a, b);
    }

    #[test]
    fn narrow_config_pins_the_step_count() {
        let config = JitterConfig {
            min_steps: 4,
            max_steps: 4,
            jitter: 0,
            min_step_delay: Duration::from_millis(1),
            max_step_delay: Duration::from_millis(1),
        };
        let plan = plan_path(&mut SmallRng::seed_from_u64(3), &config, 100, 40);
        assert_eq!(plan.len(), 4);
        assert_eq!(total(&plan), (100, 40));
    }
}
