//! Human-readable error descriptions, exit codes and structured JSON errors.

use motorloop_core::error::{BuildError, ControlError};

/// Exit code for configuration problems (unreadable, unparsable or invalid).
pub const EXIT_CONFIG: i32 = 2;
/// Exit code when hardware could not be brought up.
pub const EXIT_HARDWARE: i32 = 3;
pub const EXIT_GENERIC: i32 = 1;

fn control_error(err: &eyre::Report) -> Option<&ControlError> {
    err.chain().find_map(|e| e.downcast_ref::<ControlError>())
}

fn build_error(err: &eyre::Report) -> Option<&BuildError> {
    err.chain().find_map(|e| e.downcast_ref::<BuildError>())
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = build_error(err) {
        return match be {
            BuildError::MissingEncoder => {
                "What happened: A motor was built without an encoder.\nLikely causes: The encoder failed to start or was not wired into the builder.\nHow to fix: Make sure the decoder is created and passed via with_decoder(...).".to_string()
            }
            BuildError::MissingChannel => {
                "What happened: A motor was built without a driver channel.\nLikely causes: The motor entry has no channel.\nHow to fix: Set motors[].channel (1..=3) in the config.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid motor settings ({msg}).\nLikely causes: Zero or non-finite scale factors in the TOML.\nHow to fix: Edit the motor entry, then rerun."
            ),
        };
    }

    if let Some(ce) = control_error(err) {
        return match ce {
            ControlError::Config(msg) => format!(
                "What happened: Configuration is invalid ({msg}).\nLikely causes: Missing file, TOML syntax error, or out-of-range values.\nHow to fix: Check the path given to --config and edit the TOML; see etc/motorloop.toml for a sample."
            ),
            ControlError::Hardware(msg) | ControlError::HardwareFault(msg) => format!(
                "What happened: Encoder hardware failed ({msg}).\nLikely causes: Wrong encoder_a/encoder_b line numbers, lines already claimed, or no GPIO permission.\nHow to fix: Check the motors[] encoder lines and make sure the user can access /dev/gpiochip*."
            ),
            ControlError::Driver(msg) => format!(
                "What happened: Motor driver failed ({msg}).\nLikely causes: Controller not powered, wrong I2C bus or address, or loose wiring.\nHow to fix: Check [driver] i2c_bus/address and run `i2cdetect -y <bus>`."
            ),
            ControlError::Busy(motor) => format!(
                "What happened: Too many pending parameter changes for motor '{motor}'.\nLikely causes: The control loop is not running or is falling behind.\nHow to fix: Retry after the loop has applied the queued changes."
            ),
            ControlError::Io(msg) => format!(
                "What happened: I/O failure ({msg}).\nLikely causes: Thread or file system resources are exhausted.\nHow to fix: Re-run with --log-level=debug for details."
            ),
        };
    }

    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 for config, 3 for hardware init, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if build_error(err).is_some() {
        return EXIT_CONFIG;
    }
    match control_error(err) {
        Some(ControlError::Config(_)) => EXIT_CONFIG,
        Some(ControlError::Hardware(_) | ControlError::HardwareFault(_) | ControlError::Driver(_)) => {
            EXIT_HARDWARE
        }
        _ => EXIT_GENERIC,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if build_error(err).is_some() {
        return "config";
    }
    match control_error(err) {
        Some(ControlError::Config(_)) => "config",
        Some(ControlError::Hardware(_) | ControlError::HardwareFault(_)) => "hardware",
        Some(ControlError::Driver(_)) => "driver",
        Some(ControlError::Busy(_)) => "busy",
        Some(ControlError::Io(_)) => "io",
        None => "error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
        "error": format!("{err:#}"),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    fn wrapped(e: ControlError) -> eyre::Report {
        Err::<(), _>(eyre::Report::new(e))
            .wrap_err("outer context")
            .unwrap_err()
    }

    #[test]
    fn exit_codes_see_through_context() {
        assert_eq!(exit_code_for_error(&wrapped(ControlError::Config("x".into()))), 2);
        assert_eq!(exit_code_for_error(&wrapped(ControlError::Driver("x".into()))), 3);
        assert_eq!(exit_code_for_error(&wrapped(ControlError::HardwareFault("x".into()))), 3);
        assert_eq!(exit_code_for_error(&wrapped(ControlError::Io("x".into()))), 1);
        assert_eq!(exit_code_for_error(&eyre::Report::new(BuildError::MissingEncoder)), 2);
        assert_eq!(exit_code_for_error(&eyre::eyre!("plain")), 1);
    }

    #[test]
    fn json_error_carries_reason_and_hint() {
        let v: serde_json::Value =
            serde_json::from_str(&format_error_json(&wrapped(ControlError::Driver("nack".into()))))
                .expect("valid json");
        assert_eq!(v["reason"], "driver");
        assert_eq!(v["exit_code"], 3);
        assert!(v["message"].as_str().is_some_and(|m| m.contains("i2cdetect")));
    }
}
