//! Tests for learning rate schedules

use super::*;
use crate::optim::Adam;
use approx::assert_abs_diff_eq;

#[test]
fn test_noam_peaks_at_warmup() {
    let scheduler = NoamLR::new(1e-3, 4000);
    // s = step + 1 = warmup
    assert_abs_diff_eq!(scheduler.lr_at(3999), 1e-3, epsilon = 1e-9);
    assert!(scheduler.lr_at(0) < scheduler.lr_at(1000));
    assert!(scheduler.lr_at(20_000) < scheduler.lr_at(3999));
}

#[test]
fn test_noam_decays_as_inverse_sqrt() {
    let scheduler = NoamLR::new(1.0, 100);
    let ratio = scheduler.lr_at(399) / scheduler.lr_at(1599);
    assert_abs_diff_eq!(ratio, 2.0, epsilon = 1e-4);
}

#[test]
fn test_step_decay() {
    let scheduler = StepDecayLR::new(1.0, 10, 0.5);
    assert_abs_diff_eq!(scheduler.lr_at(0), 1.0);
    assert_abs_diff_eq!(scheduler.lr_at(9), 1.0);
    assert_abs_diff_eq!(scheduler.lr_at(10), 0.5);
    assert_abs_diff_eq!(scheduler.lr_at(25), 0.25);
}

#[test]
fn test_cyclic_cosine_restarts() {
    let scheduler = CyclicCosineLR::new(2.0, 100, 2);
    // period 50: step 1 is the start of a cycle
    assert_abs_diff_eq!(scheduler.lr_at(1), 2.0, epsilon = 1e-6);
    assert_abs_diff_eq!(scheduler.lr_at(26), 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(scheduler.lr_at(51), 2.0, epsilon = 1e-6);
    // step 0 wraps to the end of the previous cycle
    assert!(scheduler.lr_at(0) < 0.01);
}

#[test]
fn test_apply_sets_optimizer_rate() {
    let mut opt = Adam::default_params(1.0);
    let schedule = LrSchedule::StepDecay { anneal_rate: 0.1, anneal_interval: 5 };
    let lr = schedule.build(1.0).apply(&mut opt, 5);
    assert_abs_diff_eq!(lr, 0.1, epsilon = 1e-7);
    assert_abs_diff_eq!(crate::optim::Optimizer::lr(&opt), 0.1, epsilon = 1e-7);
}

#[test]
fn test_schedule_deserializes_with_defaults() {
    let schedule: LrSchedule = serde_json::from_str(r#"{"kind": "noam"}"#).unwrap();
    assert_eq!(schedule, LrSchedule::Noam { warmup_steps: 4000 });

    let text = r#"{"kind": "cyclic_cosine", "total_steps": 10, "cycles": 20}"#;
    let schedule: LrSchedule = serde_json::from_str(text).unwrap();
    assert!(schedule.validate().is_err());
    assert!(LrSchedule::Constant.validate().is_ok());
}
