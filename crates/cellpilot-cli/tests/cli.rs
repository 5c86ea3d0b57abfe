use assert_cmd::Command;
use serde_json::{Value, json};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;
use tempfile::TempDir;

const LOOP: &str = "for i in range(10): pass";

fn cellpilot(workspace: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cellpilot"));
    cmd.current_dir(workspace).env("HOME", workspace);
    cmd
}

fn run_json(workspace: &Path, args: &[&str]) -> Value {
    let output = cellpilot(workspace)
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

fn write_settings(workspace: &Path, settings: Value) {
    let runtime = workspace.join(".cellpilot");
    fs::create_dir_all(&runtime).expect("runtime dir");
    fs::write(runtime.join("settings.local.json"), settings.to_string()).expect("settings");
}

/// Answer `count` completion requests with `reply`, one connection each.
fn completion_stub(reply: &str, count: usize) -> (String, thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let body = json!({
        "choices": [{"finish_reason": "stop", "message": {"role": "assistant", "content": reply}}]
    })
    .to_string();
    let handle = thread::spawn(move || {
        let mut requests = Vec::new();
        for _ in 0..count {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut request = String::new();
            let mut content_length = 0_usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read header");
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                let done = line == "\r\n" || line.is_empty();
                request.push_str(&line);
                if done {
                    break;
                }
            }
            let mut payload = vec![0_u8; content_length];
            reader.read_exact(&mut payload).expect("read body");
            request.push_str(&String::from_utf8_lossy(&payload));

            let mut stream = stream;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write response");
            requests.push(request);
        }
        requests
    });
    (format!("http://{addr}/v1/chat/completions"), handle)
}

#[test]
fn diff_emits_json_lines() {
    let workspace = TempDir::new().expect("workspace");
    fs::write(workspace.path().join("before.py"), "a\nb\n").expect("before");
    fs::write(workspace.path().join("after.py"), "a\nc\n").expect("after");

    let out = run_json(workspace.path(), &["--json", "diff", "before.py", "after.py"]);
    assert_eq!(out["inserted"], 1);
    assert_eq!(out["deleted"], 1);
    let kinds: Vec<&str> = out["lines"]
        .as_array()
        .expect("lines")
        .iter()
        .filter_map(|l| l["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["unchanged", "deleted", "inserted"]);
}

#[test]
fn diff_prints_marked_lines_and_patches() {
    let workspace = TempDir::new().expect("workspace");
    fs::write(workspace.path().join("before.py"), "a\nb\n").expect("before");
    fs::write(workspace.path().join("after.py"), "a\nc\n").expect("after");

    cellpilot(workspace.path())
        .args(["diff", "before.py", "after.py"])
        .assert()
        .success()
        .stdout(" a\n-b\n+c\n");

    let patch = cellpilot(workspace.path())
        .args(["diff", "--patch", "before.py", "after.py"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let patch = String::from_utf8_lossy(&patch);
    assert!(patch.contains("--- a/before.py"));
    assert!(patch.contains("+++ b/after.py"));
    assert!(patch.contains("-b\n+c"));
}

#[test]
fn missing_input_file_is_a_validation_error() {
    let workspace = TempDir::new().expect("workspace");
    let output = cellpilot(workspace.path())
        .args(["--json", "diff", "nope.py", "also-nope.py"])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let out: Value = serde_json::from_slice(&output).expect("json error");
    assert_eq!(out["error"]["type"], "validation");
    assert_eq!(out["error"]["title"], "Cell File Not Found");
}

#[test]
fn config_merges_layers_and_redacts_key() {
    let workspace = TempDir::new().expect("workspace");
    let runtime = workspace.path().join(".cellpilot");
    fs::create_dir_all(&runtime).expect("runtime dir");
    fs::write(
        runtime.join("settings.json"),
        r#"{"llm":{"model":"project-model"},"chat":{"preview":"unified"}}"#,
    )
    .expect("project settings");
    write_settings(
        workspace.path(),
        json!({"llm": {"api_key": "sk-very-secret", "model": "local-model"}}),
    );

    let out = run_json(workspace.path(), &["--json", "config"]);
    assert_eq!(out["llm"]["model"], "local-model");
    assert_eq!(out["llm"]["api_key"], "***REDACTED***");
    assert_eq!(out["chat"]["preview"], "unified");
    assert_eq!(out["keybindings"]["accept"], "Accel Y");
    assert!(!out.to_string().contains("sk-very-secret"));
}

#[test]
fn completions_are_generated() {
    let workspace = TempDir::new().expect("workspace");
    let output = cellpilot(workspace.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("cellpilot"));
}

#[test]
fn chat_without_api_key_fails_with_configuration_error() {
    let workspace = TempDir::new().expect("workspace");
    fs::write(workspace.path().join("cell.py"), "x = 1").expect("cell");
    write_settings(
        workspace.path(),
        json!({"llm": {"api_key_env": "CELLPILOT_CLI_TEST_UNSET_KEY"}}),
    );
    let output = cellpilot(workspace.path())
        .args(["--json", "chat", "--cell", "cell.py"])
        .write_stdin("/quit\n")
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let out: Value = serde_json::from_slice(&output).expect("json error");
    assert_eq!(out["error"]["type"], "configuration");
    assert!(
        out["error"]["suggestions"][0]
            .as_str()
            .is_some_and(|s| s.contains("CELLPILOT_CLI_TEST_UNSET_KEY"))
    );
}

#[test]
fn chat_accepts_a_proposal_into_the_cell_file() {
    let workspace = TempDir::new().expect("workspace");
    let cell = workspace.path().join("cell.py");
    fs::write(&cell, "x = 1").expect("cell");
    let (endpoint, server) =
        completion_stub(&format!("Here you go:\n```python\n{LOOP}\n```\nDone."), 1);
    write_settings(
        workspace.path(),
        json!({"llm": {"endpoint": endpoint, "api_key": "sk-test", "timeout_seconds": 10}}),
    );

    let output = cellpilot(workspace.path())
        .args(["--json", "chat", "--cell", "cell.py"])
        .write_stdin("write a loop\n/history\n/key Accel Y\n/accept\n/quit\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let events = json_lines(&output);
    assert_eq!(events[0]["event"], "proposed");
    assert_eq!(events[0]["inserted"], 1);
    assert_eq!(events[0]["deleted"], 1);
    assert_eq!(events[1]["event"], "history");
    assert_eq!(events[1]["entries"][0]["text"], "write a loop");
    assert_eq!(events[2]["event"], "accepted");
    assert_eq!(events[3]["event"], "ignored");
    assert_eq!(fs::read_to_string(&cell).expect("cell"), LOOP);

    let requests = server.join().expect("join server");
    assert!(requests[0].contains("Your task: write a loop"));
    assert!(requests[0].contains(r#""role":"system""#));

    let log = fs::read_to_string(workspace.path().join(".cellpilot/observe.log")).expect("log");
    assert!(log.contains("DiffProposed"));
    assert!(log.contains("DiffAccepted"));
}

#[test]
fn chat_reject_restores_the_cell_file() {
    let workspace = TempDir::new().expect("workspace");
    let cell = workspace.path().join("cell.py");
    fs::write(&cell, "x = 1").expect("cell");
    let (endpoint, server) = completion_stub(&format!("```python\n{LOOP}\n```"), 1);
    write_settings(
        workspace.path(),
        json!({"llm": {"endpoint": endpoint, "api_key": "sk-test", "timeout_seconds": 10}}),
    );

    cellpilot(workspace.path())
        .args(["chat", "--cell", "cell.py"])
        .write_stdin("write a loop\n/reject\n/quit\n")
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&cell).expect("cell"), "x = 1");
    server.join().expect("join server");
}

#[test]
fn chat_reports_transport_failures_inline() {
    let workspace = TempDir::new().expect("workspace");
    let cell = workspace.path().join("cell.py");
    fs::write(&cell, "x = 1").expect("cell");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    write_settings(
        workspace.path(),
        json!({"llm": {
            "endpoint": format!("http://{addr}/v1/chat/completions"),
            "api_key": "sk-test",
            "timeout_seconds": 5
        }}),
    );

    let output = cellpilot(workspace.path())
        .args(["--json", "chat", "--cell", "cell.py"])
        .write_stdin("write a loop\n/history\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let events = json_lines(&output);
    assert_eq!(events[0]["event"], "transport_failed");
    assert_eq!(events[1]["entries"][1]["display_type"], "connection-error");
    assert_eq!(fs::read_to_string(&cell).expect("cell"), "x = 1");
}
