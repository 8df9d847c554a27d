use motorloop_core::{PidCfg, PidController};
use proptest::prelude::*;

prop_compose! {
    fn pid_strategy()(
        kp in 0.0f64..100.0,
        ki in 0.0f64..100.0,
        kd in 0.0f64..1.0,
        lo in -10.0f64..0.0,
        hi in 0.0f64..10.0,
        awg in prop_oneof![Just(0.0f64), 0.01f64..5.0],
        swap in any::<bool>(),
    ) -> PidController {
        let (output_min, output_max) = if swap { (hi, lo) } else { (lo, hi) };
        PidController::new(&PidCfg {
            kp,
            ki,
            kd,
            output_min,
            output_max,
            integrator_min: -50.0,
            integrator_max: 50.0,
            anti_windup_gain: awg,
        })
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn output_is_clamped_and_saturates_to_the_nearest_bound(
        mut pid in pid_strategy(),
        steps in prop::collection::vec((-5.0f64..5.0, -5.0f64..5.0, -0.01f64..0.01), 1..200),
    ) {
        let lim = pid.output_limits();
        for (reference, measurement, dt) in steps {
            let out = pid.step(reference, measurement, dt);
            prop_assert!(out >= lim.min() && out <= lim.max());
            let raw = pid.last_unclamped();
            if raw > lim.max() {
                prop_assert_eq!(out, lim.max());
            } else if raw < lim.min() {
                prop_assert_eq!(out, lim.min());
            } else {
                prop_assert_eq!(out, raw);
            }
            let i = pid.integrator();
            prop_assert!((-50.0..=50.0).contains(&i));
            prop_assert!(out.is_finite());
        }
    }

    #[test]
    fn reset_always_lands_inside_integrator_limits(
        mut pid in pid_strategy(),
        value in -1e9f64..1e9,
        prev in -10.0f64..10.0,
    ) {
        pid.reset(value, prev);
        prop_assert!((-50.0..=50.0).contains(&pid.integrator()));
        prop_assert_eq!(pid.prev_error(), prev);
    }
}
