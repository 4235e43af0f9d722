//! Pure step -> weight functions.
//!
//! A `Transition` is a closed capability (`weight_at(step, total_steps,
//! target_weight) -> weight`), not a type hierarchy: prefer a small trait
//! with a couple of implementations over subclassing, the way the
//! repository prefers traits (`Endpointer`, `WithAddr`) over inheritance.

use std::rc::Rc;

/// Computes the effective weight of an endpoint at a given ramp-up step.
///
/// Implementations must satisfy:
/// - `weight_at(0, n, w) == 0` (never observed in practice; steps start at 1)
/// - `weight_at(n, n, w) == w` exactly, regardless of rounding in intermediate steps
/// - monotonic non-decreasing in `step`
/// - saturating: never returns a value greater than `target_weight`
pub trait Transition {
    fn weight_at(&self, step: u32, total_steps: u32, target_weight: u32) -> u32;
}

/// `floor(target_weight * step / total_steps)`, with the terminal step
/// special-cased to avoid integer-division rounding leaving the endpoint
/// short of its target weight at graduation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Linear;

impl Transition for Linear {
    fn weight_at(&self, step: u32, total_steps: u32, target_weight: u32) -> u32 {
        debug_assert!(total_steps > 0);
        if step == 0 {
            return 0;
        }
        if step >= total_steps {
            return target_weight;
        }
        let w = u64::from(target_weight) * u64::from(step) / u64::from(total_steps);
        if w > u64::from(target_weight) {
            target_weight
        } else {
            w as u32
        }
    }
}

/// An exponential ramp: weight grows along `base^step`, normalized so the
/// terminal step lands exactly on `target_weight`.
///
/// `base` must be `> 1.0`; values `<= 1.0` degrade to a flat ramp and are
/// rejected by `RampingUpStrategyConfig::build` (see `config.rs`).
#[derive(Clone, Copy, Debug)]
pub struct Exponential {
    base: f64,
}

impl Exponential {
    pub fn new(base: f64) -> Exponential {
        Exponential { base }
    }
}

impl Transition for Exponential {
    fn weight_at(&self, step: u32, total_steps: u32, target_weight: u32) -> u32 {
        debug_assert!(total_steps > 0);
        if step == 0 {
            return 0;
        }
        if step >= total_steps {
            return target_weight;
        }
        let numerator = self.base.powi(step as i32) - 1.0;
        let denominator = self.base.powi(total_steps as i32) - 1.0;
        let fraction = if denominator.abs() < ::std::f64::EPSILON {
            0.0
        } else {
            numerator / denominator
        };
        let w = (f64::from(target_weight) * fraction).floor();
        if w < 0.0 {
            0
        } else if w > f64::from(target_weight) {
            target_weight
        } else {
            w as u32
        }
    }
}

/// Lets a `Box<Transition>` built from config validation be shared as
/// `Rc<Transition>` inside a `WindowScheduler` without an extra wrapper
/// type.
impl Transition for Rc<Transition> {
    fn weight_at(&self, step: u32, total_steps: u32, target_weight: u32) -> u32 {
        Transition::weight_at(self.as_ref(), step, total_steps, target_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_terminal_step_is_exact() {
        let t = Linear::default();
        assert_eq!(t.weight_at(10, 10, 999), 999);
        assert_eq!(t.weight_at(3, 10, 1000), 300);
        assert_eq!(t.weight_at(1, 10, 1000), 100);
        assert_eq!(t.weight_at(0, 10, 1000), 0);
    }

    #[test]
    fn linear_is_monotonic() {
        let t = Linear::default();
        let mut prev = 0;
        for step in 0..=10 {
            let w = t.weight_at(step, 10, 777);
            assert!(w >= prev);
            prev = w;
        }
        assert_eq!(prev, 777);
    }

    #[test]
    fn exponential_terminal_step_is_exact() {
        let t = Exponential::new(2.0);
        assert_eq!(t.weight_at(10, 10, 1000), 1000);
        assert_eq!(t.weight_at(0, 10, 1000), 0);
    }

    #[test]
    fn exponential_is_monotonic() {
        let t = Exponential::new(1.8);
        let mut prev = 0;
        for step in 0..=10 {
            let w = t.weight_at(step, 10, 500);
            assert!(w >= prev);
            prev = w;
        }
        assert_eq!(prev, 500);
    }
}
