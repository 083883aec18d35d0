// Cubic-bezier easing and a small time-based tween for overlay animations.
use std::time::{Duration, Instant};

/// CSS-style cubic bezier with fixed end points (0,0) and (1,1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicBezier {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

/// The overshooting curve used by the OSD and control center.
pub const OVERSHOOT: CubicBezier = CubicBezier::new(0.8, 1.55, 0.265, 1.25);
pub const DEFAULT_DURATION: Duration = Duration::from_millis(300);

impl CubicBezier {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    fn sample(a1: f32, a2: f32, t: f32) -> f32 {
        let u = 1.0 - t;
        3.0 * u * u * t * a1 + 3.0 * u * t * t * a2 + t * t * t
    }

    fn sample_derivative(a1: f32, a2: f32, t: f32) -> f32 {
        let u = 1.0 - t;
        3.0 * u * u * a1 + 6.0 * u * t * (a2 - a1) + 3.0 * t * t * (1.0 - a2)
    }

    // Parameter t such that x(t) == x.
    fn solve_t(&self, x: f32) -> f32 {
        let mut t = x;
        for _ in 0..8 {
            let error = Self::sample(self.x1, self.x2, t) - x;
            if error.abs() < 1e-5 {
                return t;
            }
            let slope = Self::sample_derivative(self.x1, self.x2, t);
            if slope.abs() < 1e-6 {
                break;
            }
            t -= error / slope;
        }

        let (mut low, mut high) = (0.0f32, 1.0f32);
        t = x;
        for _ in 0..32 {
            let value = Self::sample(self.x1, self.x2, t);
            if (value - x).abs() < 1e-5 {
                break;
            }
            if value < x {
                low = t;
            } else {
                high = t;
            }
            t = (low + high) / 2.0;
        }
        t
    }

    /// Eased progress for linear progress `x` in `0.0..=1.0`. May overshoot 1.0.
    pub fn ease(&self, x: f32) -> f32 {
        if x <= 0.0 {
            return 0.0;
        }
        if x >= 1.0 {
            return 1.0;
        }
        Self::sample(self.y1, self.y2, self.solve_t(x))
    }
}

/// Interpolates a value from `from` to `to` over `duration` starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tween {
    from: f32,
    to: f32,
    start: Instant,
    duration: Duration,
    curve: CubicBezier,
}

impl Tween {
    pub fn new(from: f32, to: f32, start: Instant) -> Self {
        Self {
            from,
            to,
            start,
            duration: DEFAULT_DURATION,
            curve: OVERSHOOT,
        }
    }

    /// A tween already resting at `value`.
    pub fn settled(value: f32, now: Instant) -> Self {
        Self {
            duration: Duration::ZERO,
            ..Self::new(value, value, now)
        }
    }

    pub fn with_curve(mut self, curve: CubicBezier) -> Self {
        self.curve = curve;
        self
    }

    pub fn target(&self) -> f32 {
        self.to
    }

    fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.start);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }

    pub fn value_at(&self, now: Instant) -> f32 {
        let eased = self.curve.ease(self.progress(now));
        self.from + (self.to - self.from) * eased
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }

    /// Start a new tween toward `to` from wherever this one currently is.
    pub fn retarget(&mut self, to: f32, now: Instant) {
        if (to - self.to).abs() < f32::EPSILON && !self.is_finished(now) {
            return;
        }
        self.from = self.value_at(now);
        self.to = to;
        self.start = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ease_pins_end_points() {
        assert_eq!(OVERSHOOT.ease(0.0), 0.0);
        assert_eq!(OVERSHOOT.ease(1.0), 1.0);
        assert_eq!(OVERSHOOT.ease(-3.0), 0.0);
        assert_eq!(OVERSHOOT.ease(7.0), 1.0);
    }

    #[test]
    fn linear_curve_is_identity() {
        let linear = CubicBezier::new(0.0, 0.0, 1.0, 1.0);
        for step in 1..10 {
            let x = step as f32 / 10.0;
            assert!((linear.ease(x) - x).abs() < 1e-3, "x={x}");
        }
    }

    #[test]
    fn overshoot_curve_exceeds_target_late() {
        let peak = (1..100)
            .map(|step| OVERSHOOT.ease(step as f32 / 100.0))
            .fold(f32::MIN, f32::max);
        assert!(peak > 1.0, "peak {peak} should overshoot");
    }

    #[test]
    fn ease_out_curve_is_monotonic() {
        let ease_out = CubicBezier::new(0.0, 0.0, 0.58, 1.0);
        let mut previous = 0.0;
        for step in 1..=50 {
            let value = ease_out.ease(step as f32 / 50.0);
            assert!(value >= previous - 1e-4);
            previous = value;
        }
    }

    #[test]
    fn tween_reaches_target_after_duration() {
        let start = Instant::now();
        let tween = Tween::new(0.0, 80.0, start);
        assert_eq!(tween.value_at(start), 0.0);
        assert!(!tween.is_finished(start + Duration::from_millis(150)));
        let end = start + DEFAULT_DURATION;
        assert!(tween.is_finished(end));
        assert_eq!(tween.value_at(end), 80.0);
    }

    #[test]
    fn retarget_continues_from_current_value() {
        let start = Instant::now();
        let mut tween = Tween::new(0.0, 100.0, start)
            .with_curve(CubicBezier::new(0.0, 0.0, 1.0, 1.0));
        let mid = start + Duration::from_millis(150);
        let current = tween.value_at(mid);

        tween.retarget(20.0, mid);

        assert!((tween.value_at(mid) - current).abs() < 1e-3);
        assert_eq!(tween.target(), 20.0);
        assert_eq!(tween.value_at(mid + DEFAULT_DURATION), 20.0);
    }

    #[test]
    fn settled_tween_is_finished_immediately() {
        let now = Instant::now();
        let tween = Tween::settled(42.0, now);
        assert!(tween.is_finished(now));
        assert_eq!(tween.value_at(now), 42.0);
    }
}
