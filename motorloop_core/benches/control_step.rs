use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use motorloop_core::decoder::classify;
use motorloop_core::mocks::RecordingDriver;
use motorloop_core::{EncoderCounters, MotorLoop, PidCfg, PidController};

// Gray-code walk with an occasional double flip.
fn phase_trace(n: usize) -> Vec<u8> {
    const FWD: [u8; 4] = [0b01, 0b11, 0b10, 0b00];
    (0..n)
        .map(|i| if i % 97 == 0 { 0b11 } else { FWD[i % 4] })
        .collect()
}

fn bench_pid(c: &mut Criterion) {
    let cfg = PidCfg {
        kp: 10.0,
        ki: 40.0,
        kd: 0.1,
        ..PidCfg::default()
    };
    c.bench_function("pid_step_conditional", |b| {
        let mut pid = PidController::new(&cfg);
        let mut x = 0.0f64;
        b.iter(|| {
            x = (x + 0.001) % 1.0;
            black_box(pid.step(black_box(1.0), black_box(x), 0.001))
        });
    });
    c.bench_function("pid_step_back_calculation", |b| {
        let mut pid = PidController::new(&PidCfg {
            anti_windup_gain: 0.5,
            ..cfg
        });
        let mut x = 0.0f64;
        b.iter(|| {
            x = (x + 0.001) % 1.0;
            black_box(pid.step(black_box(1.0), black_box(x), 0.001))
        });
    });
}

fn bench_decode(c: &mut Criterion) {
    let trace = phase_trace(4096);
    c.bench_function("classify_4096", |b| {
        b.iter(|| {
            let mut old = 0u8;
            let mut acc = 0i64;
            for &p in &trace {
                if let motorloop_core::Transition::Step(d) = classify(old, p) {
                    acc += i64::from(d);
                }
                old = p;
            }
            black_box(acc)
        });
    });
    c.bench_function("counters_apply_4096", |b| {
        b.iter_batched(
            || EncoderCounters::new(0),
            |counters| {
                for &p in &trace {
                    counters.apply(p);
                }
                black_box(counters.count())
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_tick(c: &mut Criterion) {
    let counters = Arc::new(EncoderCounters::new(0));
    let mut motor = MotorLoop::builder()
        .with_counts(counters)
        .with_channel(1)
        .with_reference(1.0)
        .enabled(true)
        .build()
        .expect("build");
    let mut drv = RecordingDriver::new();
    let log = drv.log();
    c.bench_function("motor_tick", |b| {
        b.iter(|| {
            log.lock().map(|mut l| l.clear()).ok();
            black_box(motor.tick(&mut drv, 0.001).ok())
        });
    });
}

criterion_group!(benches, bench_pid, bench_decode, bench_tick);
criterion_main!(benches);
