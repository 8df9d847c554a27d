use std::time::Duration;

use motorloop_hardware::{SimShaft, SimulatedDriver, SimulatedEncoder};
use motorloop_traits::{ActuatorDriver, Channel, EdgeSource, ManualClock};

/// Drain every pending edge, returning the (A, B) levels after each one.
fn drain<E: EdgeSource>(enc: &mut E) -> Vec<(bool, bool)> {
    let mut out = Vec::new();
    loop {
        let ready = enc.wait(Duration::ZERO).unwrap();
        if !ready.any() {
            break;
        }
        for ch in Channel::BOTH {
            if ready.is_ready(ch) && enc.read_edge(ch).unwrap().is_some() {
                out.push((
                    enc.level(Channel::A).unwrap(),
                    enc.level(Channel::B).unwrap(),
                ));
            }
        }
    }
    out
}

#[test]
fn reverse_command_walks_sequence_backwards() {
    let clock = ManualClock::new();
    let shaft = SimShaft::new(2_000.0);
    let mut drv = SimulatedDriver::new();
    drv.attach(1, shaft.clone());
    drv.init().unwrap();
    let mut enc = SimulatedEncoder::with_clock(shaft, clock.clone());

    drv.set_speed(1, -800).unwrap();
    clock.advance(Duration::from_millis(2)); // 4 counts at 2000 cps

    let seen = drain(&mut enc);
    assert_eq!(
        seen,
        vec![(true, false), (true, true), (false, true), (false, false)]
    );
}

#[test]
fn edge_timestamps_are_spread_across_the_interval() {
    let clock = ManualClock::new();
    let shaft = SimShaft::new(1_000.0);
    shaft.set_speed(800);
    let mut enc = SimulatedEncoder::with_clock(shaft, clock.clone());
    clock.advance(Duration::from_millis(3));

    let mut stamps = Vec::new();
    loop {
        let ready = enc.wait(Duration::ZERO).unwrap();
        if !ready.any() {
            break;
        }
        for ch in Channel::BOTH {
            if ready.is_ready(ch)
                && let Some(ev) = enc.read_edge(ch).unwrap()
            {
                stamps.push(ev.timestamp_us);
            }
        }
    }
    assert_eq!(stamps, vec![1_000, 2_000, 3_000]);
}

#[test]
fn coast_stops_edge_generation() {
    let clock = ManualClock::new();
    let shaft = SimShaft::new(1_000.0);
    let mut drv = SimulatedDriver::new();
    drv.attach(2, shaft.clone());
    drv.init().unwrap();
    let mut enc = SimulatedEncoder::with_clock(shaft, clock.clone());

    drv.set_speed(2, 800).unwrap();
    clock.advance(Duration::from_millis(2));
    assert_eq!(drain(&mut enc).len(), 2);

    drv.coast_all().unwrap();
    clock.advance(Duration::from_millis(10));
    assert!(drain(&mut enc).is_empty());
}
