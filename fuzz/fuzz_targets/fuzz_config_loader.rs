#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse or validation errors are fine; panics are not.
    if let Ok(cfg) = motorloop_config::load_toml(data) {
        let _ = cfg.validate();
        for m in &cfg.motors {
            let _ = cfg.motor(&m.name);
        }
    }
});
