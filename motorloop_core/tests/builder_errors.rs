use std::sync::Arc;

use motorloop_core::error::BuildError;
use motorloop_core::{EncoderCounters, MotorCfg, MotorLoop};
use rstest::rstest;

fn counters() -> Arc<EncoderCounters> {
    Arc::new(EncoderCounters::new(0))
}

#[rstest]
fn builder_missing_encoder_yields_typed_build_error() {
    let err = MotorLoop::builder()
        // missing with_counts()/with_decoder()
        .with_channel(1)
        .try_build()
        .expect_err("should fail with MissingEncoder");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingEncoder) => {}
        other => panic!("expected MissingEncoder, got: {other:?}"),
    }
}

#[rstest]
fn builder_missing_channel_yields_typed_build_error() {
    let err = MotorLoop::builder()
        .with_counts(counters())
        .try_build()
        .expect_err("should fail with MissingChannel");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingChannel) => {}
        other => panic!("expected MissingChannel, got: {other:?}"),
    }
}

#[rstest]
#[case(0.0, 1.0, 800.0)]
#[case(-4.0, 1.0, 800.0)]
#[case(f64::NAN, 1.0, 800.0)]
#[case(4096.0, 0.0, 800.0)]
#[case(4096.0, f64::INFINITY, 800.0)]
#[case(4096.0, 1.0, 0.0)]
fn builder_rejects_invalid_scaling(#[case] cpr: f64, #[case] gear: f64, #[case] gain: f64) {
    let err = MotorLoop::builder()
        .with_counts(counters())
        .with_channel(1)
        .with_counts_per_rev(cpr)
        .with_gear_ratio(gear)
        .with_speed_gain(gain)
        .build()
        .expect_err("invalid scaling");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[rstest]
fn negative_gear_ratio_is_allowed() {
    let m = MotorLoop::builder()
        .with_counts(counters())
        .with_channel(3)
        .with_gear_ratio(-19.0)
        .build()
        .expect("reversed gearbox");
    assert_eq!(m.gear_ratio(), -19.0);
}

#[rstest]
fn config_sets_name_channel_and_initial_state() {
    let cfg = MotorCfg {
        name: "wrist".into(),
        channel: 2,
        reference_rev: 0.5,
        enabled: true,
        ..MotorCfg::default()
    };
    let m = MotorLoop::builder()
        .with_counts(counters())
        .with_config(&cfg)
        .build()
        .expect("build");
    let h = m.handle();
    assert_eq!(m.name(), "wrist");
    assert_eq!(m.channel(), 2);
    assert_eq!(h.reference(), 0.5);
    assert!(h.is_enabled());
}
