use super::*;
use crate::message::MessageKind;
use crate::test_support::{TempDirGuard, emit, fake_agent};
use std::fs;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

#[test]
fn argv_places_managed_prefix_before_options() {
    let command = AgentCommand::new("claude").with_options(strings(&["--model", "opus"]));
    assert_eq!(
        command.argv(),
        strings(&[
            "claude",
            "-p",
            "--verbose",
            "--output-format",
            "stream-json",
            "--model",
            "opus"
        ])
    );
}

#[test]
fn managed_flags_are_rejected_in_any_form() {
    for options in [
        strings(&["--verbose"]),
        strings(&["--output-format", "text"]),
        strings(&["--model", "opus", "--output-format=json"]),
    ] {
        let err = validate_options(&options).expect_err("managed flag should be rejected");
        assert!(matches!(err, ConductorError::ManagedFlag(_)), "{options:?}");
    }
    validate_options(&strings(&["--model", "opus", "--resume", "abc"])).expect("allowed");
}

#[test]
fn resume_options_are_stripped_in_every_form() {
    let options = strings(&[
        "--model",
        "opus",
        "--resume",
        "old",
        "-r",
        "older",
        "--resume=oldest",
        "--add-dir",
        "/x",
    ]);
    assert_eq!(
        strip_resume_options(&options),
        strings(&["--model", "opus", "--add-dir", "/x"])
    );
}

#[test]
fn resume_token_is_read_from_options() {
    let command = AgentCommand::default().with_options(strings(&["--resume", "abc"]));
    assert_eq!(command.resume_token(), Some("abc"));
    let command = AgentCommand::default().with_options(strings(&["--resume=xyz"]));
    assert_eq!(command.resume_token(), Some("xyz"));
    assert_eq!(AgentCommand::default().resume_token(), None);
}

#[test]
fn missing_directory_fails_before_spawning() {
    let temp = TempDirGuard::new("process-missing");
    let session = ProcessSession::new(temp.path().join("absent"), AgentCommand::default());
    let mut delivered = 0;
    let err = session
        .run("hi", |_| delivered += 1)
        .expect_err("missing directory should fail");
    assert!(matches!(err, ConductorError::DirectoryNotFound(_)));
    assert_eq!(delivered, 0);
}

#[test]
fn managed_flag_fails_before_spawning() {
    let temp = TempDirGuard::new("process-managed");
    let marker = temp.path().join("launched");
    let agent = fake_agent(temp.path(), &format!("touch '{}'", marker.display()));
    let command = AgentCommand::new(agent.to_string_lossy())
        .with_options(strings(&["--output-format", "text"]));
    let err = ProcessSession::new(temp.path(), command)
        .run("hi", |_| {})
        .expect_err("should fail");
    assert!(matches!(err, ConductorError::ManagedFlag(_)));
    assert!(!marker.exists());
}

#[cfg(unix)]
#[test]
fn prompt_reaches_stdin_and_events_arrive_in_order() {
    let temp = TempDirGuard::new("process-order");
    let prompt_copy = temp.path().join("prompt.txt");
    let args_copy = temp.path().join("args.txt");
    let body = [
        format!("cat > '{}'", prompt_copy.display()),
        format!("printf '%s\\n' \"$@\" > '{}'", args_copy.display()),
        emit(r#"{"type":"system","subtype":"init","session_id":"s0"}"#),
        emit(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"thinking"}]}}"#),
        "echo 'not json'".to_string(),
        emit(r#"{"type":"result","subtype":"success","result":"4","session_id":"s0"}"#),
    ]
    .join("\n");
    let agent = fake_agent(temp.path(), &body);
    let session = ProcessSession::new(
        temp.path(),
        AgentCommand::new(agent.to_string_lossy()).with_options(strings(&["--model", "x y"])),
    );

    let mut kinds = Vec::new();
    session
        .run("What is 2+2?", |message| kinds.push(message.into_kind()))
        .expect("run should succeed");

    assert_eq!(kinds.len(), 2);
    assert!(matches!(&kinds[0], MessageKind::Text { text, .. } if text == "thinking"));
    assert!(matches!(&kinds[1], MessageKind::TerminalResult(result) if result.content == "4"));
    assert_eq!(
        fs::read_to_string(&prompt_copy).expect("prompt copy"),
        "What is 2+2?"
    );
    assert_eq!(
        fs::read_to_string(&args_copy).expect("args copy"),
        "-p\n--verbose\n--output-format\nstream-json\n--model\nx y\n"
    );
}

#[cfg(unix)]
#[test]
fn nonzero_exit_is_reported_after_partial_output() {
    let temp = TempDirGuard::new("process-fail");
    let body = [
        "cat > /dev/null".to_string(),
        emit(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"partial"}]}}"#),
        "echo boom >&2".to_string(),
        "exit 1".to_string(),
    ]
    .join("\n");
    let agent = fake_agent(temp.path(), &body);
    let session = ProcessSession::new(temp.path(), AgentCommand::new(agent.to_string_lossy()));

    let mut delivered = 0;
    let err = session
        .run("hi", |_| delivered += 1)
        .expect_err("exit 1 should fail");
    assert_eq!(delivered, 1);
    match err {
        ConductorError::ProcessFailed { code, stderr } => {
            assert_eq!(code, 1);
            assert!(stderr.contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[cfg(unix)]
#[test]
fn agent_that_ignores_stdin_still_completes() {
    let temp = TempDirGuard::new("process-no-stdin");
    let body = emit(r#"{"type":"result","subtype":"success","result":"ok"}"#);
    let agent = fake_agent(temp.path(), &body);
    let session = ProcessSession::new(temp.path(), AgentCommand::new(agent.to_string_lossy()));
    let mut results = 0;
    session
        .run(&"x".repeat(256 * 1024), |message| {
            if message.terminal_result().is_some() {
                results += 1;
            }
        })
        .expect("run should succeed");
    assert_eq!(results, 1);
}

#[cfg(unix)]
#[test]
fn missing_program_is_reported_as_process_failure() {
    let temp = TempDirGuard::new("process-missing-program");
    let session = ProcessSession::new(
        temp.path(),
        AgentCommand::new(temp.path().join("no-such-agent").to_string_lossy()),
    );
    let err = session.run("hi", |_| {}).expect_err("should fail");
    assert!(matches!(err, ConductorError::ProcessFailed { code, .. } if code != 0));
}
