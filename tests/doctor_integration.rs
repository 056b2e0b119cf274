use serde_json::Value;
use std::process::Command;

fn run_chatbridge(args: &[&str], envs: &[(&str, &str)]) -> Value {
    let mut command = Command::new(env!("CARGO_BIN_EXE_chatbridge"));
    command.args(args);
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().expect("failed to execute chatbridge binary");

    assert!(
        output.status.success(),
        "chatbridge failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    serde_json::from_slice(&output.stdout).expect("stdout should be valid json")
}

#[test]
fn doctor_reports_the_resolved_base_url() {
    let value = run_chatbridge(
        &["doctor", "--json"],
        &[("CHATBRIDGE_API_BASE_URL", "http://gateway.test:3000/")],
    );
    assert_eq!(
        value.get("apiBaseUrl").and_then(Value::as_str),
        Some("http://gateway.test:3000")
    );
}

#[test]
fn doctor_reports_the_session_name_and_key_presence() {
    let value = run_chatbridge(
        &["doctor", "--json"],
        &[
            ("CHATBRIDGE_SESSION", "crm-leads"),
            ("CHATBRIDGE_API_KEY", "secret"),
        ],
    );
    assert_eq!(value.get("session").and_then(Value::as_str), Some("crm-leads"));
    assert_eq!(value.get("apiKeySet").and_then(Value::as_bool), Some(true));
}
