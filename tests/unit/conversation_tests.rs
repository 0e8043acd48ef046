use super::*;
use crate::formatter::PlainFormatter;
use crate::output::{MemorySink, SinkRecord};
use crate::test_support::{TempDirGuard, emit, fake_agent};

fn conversation_for(dir: &Path, body: &str, sink: &Arc<MemorySink>) -> Conversation {
    let agent = fake_agent(dir, body);
    Conversation::new(
        dir,
        AgentCommand::new(agent.to_string_lossy()),
        sink.clone(),
        Arc::new(PlainFormatter),
    )
}

#[cfg(unix)]
#[test]
fn successful_run_records_result_and_reports_stats() {
    let temp = TempDirGuard::new("conversation-success");
    let body = [
        "cat > /dev/null".to_string(),
        emit(r#"{"type":"system","subtype":"init","session_id":"s-init"}"#),
        emit(r#"{"type":"assistant","session_id":"s-init","message":{"content":[{"type":"text","text":"adding"}]}}"#),
        emit(
            r#"{"type":"result","subtype":"success","result":"4","session_id":"s-final","num_turns":1,"total_cost_usd":0.01,"usage":{"input_tokens":12,"output_tokens":3},"modelUsage":{"claude-test":{"inputTokens":12,"outputTokens":3,"costUSD":0.01}}}"#,
        ),
    ]
    .join("\n");
    let sink = Arc::new(MemorySink::new());
    let mut conversation = conversation_for(temp.path(), &body, &sink);
    assert_eq!(conversation.state(), ConversationState::Created);

    conversation.execute("What is 2+2?").expect("execute");

    assert_eq!(conversation.state(), ConversationState::Succeeded);
    assert!(conversation.is_success());
    assert_eq!(conversation.result().map(|r| r.content.as_str()), Some("4"));
    assert_eq!(conversation.session_id(), Some("s-final"));
    assert_eq!(conversation.metadata().num_turns, Some(1));
    assert!(conversation.started_at() <= conversation.ended_at());

    let stats = conversation.stats();
    assert_eq!(stats.num_turns, 1);
    assert_eq!(stats.input_tokens, 12);
    assert_eq!(stats.output_tokens, 3);
    assert_eq!(stats.per_model.len(), 1);
    assert_eq!(stats.per_model[0].model, "claude-test");

    let records = sink.records();
    assert!(records.contains(&SinkRecord::UserMessage("What is 2+2?".to_string())));
    assert_eq!(sink.messages(), vec!["assistant: adding"]);
    assert!(records.contains(&SinkRecord::Divider));
    assert_eq!(sink.stat("status").as_deref(), Some("success"));
    assert_eq!(sink.stat("turns").as_deref(), Some("1"));
    assert_eq!(sink.stat("tokens").as_deref(), Some("12 in / 3 out"));
    assert_eq!(sink.stat("tokens[claude-test]").as_deref(), Some("12 in / 3 out"));
    assert_eq!(sink.stat("session").as_deref(), Some("s-final"));
    assert!(sink.errors().is_empty());
    assert!(
        records
            .iter()
            .any(|record| matches!(record, SinkRecord::Summary(summary) if summary.success))
    );
}

#[cfg(unix)]
#[test]
fn system_events_are_neither_forwarded_nor_stored() {
    let temp = TempDirGuard::new("conversation-system");
    let body = [
        "cat > /dev/null".to_string(),
        emit(r#"{"type":"system","subtype":"init"}"#),
        emit(r#"{"type":"result","subtype":"success","result":"ok"}"#),
    ]
    .join("\n");
    let sink = Arc::new(MemorySink::new());
    let mut conversation = conversation_for(temp.path(), &body, &sink);
    conversation.execute("hi").expect("execute");

    assert_eq!(conversation.messages().len(), 1);
    assert!(
        conversation
            .messages()
            .iter()
            .all(|message| !matches!(message.kind(), MessageKind::System { .. }))
    );
    assert!(sink.messages().is_empty());
}

#[cfg(unix)]
#[test]
fn latest_token_wins_without_a_result() {
    let temp = TempDirGuard::new("conversation-token");
    let body = [
        "cat > /dev/null".to_string(),
        emit(r#"{"type":"assistant","session_id":"first","message":{"content":"a"}}"#),
        emit(r#"{"type":"assistant","session_id":"second","message":{"content":"b"}}"#),
        emit(r#"{"type":"assistant","message":{"content":"c"}}"#),
    ]
    .join("\n");
    let sink = Arc::new(MemorySink::new());
    let mut conversation = conversation_for(temp.path(), &body, &sink);
    conversation.execute("hi").expect("clean exit without result is not an error");

    assert_eq!(conversation.session_id(), Some("second"));
    assert!(conversation.result().is_none());
    assert!(!conversation.is_success());
    assert_eq!(conversation.state(), ConversationState::Failed);
    assert_eq!(sink.messages().len(), 3);
}

#[cfg(unix)]
#[test]
fn first_result_wins_and_metadata_comes_from_it() {
    let temp = TempDirGuard::new("conversation-first-result");
    let body = [
        "cat > /dev/null".to_string(),
        emit(r#"{"type":"result","subtype":"success","result":"one","num_turns":1}"#),
        emit(r#"{"type":"result","subtype":"error_max_turns","num_turns":7}"#),
    ]
    .join("\n");
    let sink = Arc::new(MemorySink::new());
    let mut conversation = conversation_for(temp.path(), &body, &sink);
    conversation.execute("hi").expect("execute");

    assert_eq!(conversation.result().map(|r| r.content.as_str()), Some("one"));
    assert_eq!(conversation.metadata().num_turns, Some(1));
    assert_eq!(conversation.messages().len(), 2);
    assert!(conversation.is_success());
}

#[cfg(unix)]
#[test]
fn process_failure_still_reports_stats_and_error() {
    let temp = TempDirGuard::new("conversation-exit");
    let body = [
        "cat > /dev/null".to_string(),
        emit(r#"{"type":"assistant","session_id":"abc","message":{"content":[{"type":"text","text":"partial"}]}}"#),
        "echo boom >&2".to_string(),
        "exit 1".to_string(),
    ]
    .join("\n");
    let sink = Arc::new(MemorySink::new());
    let mut conversation = conversation_for(temp.path(), &body, &sink);

    let err = conversation.execute("hi").expect_err("exit 1 should fail");
    assert!(matches!(err, ConductorError::ProcessFailed { code: 1, .. }));
    assert_eq!(conversation.state(), ConversationState::Failed);
    assert!(conversation.error().is_some_and(|text| text.contains("boom")));
    assert_eq!(conversation.session_id(), Some("abc"));
    assert_eq!(conversation.messages().len(), 1);

    assert_eq!(sink.stat("status").as_deref(), Some("failed"));
    assert_eq!(sink.stat("session").as_deref(), Some("abc"));
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("boom"));
    assert!(errors[0].contains('1'));

    let summary = conversation.summary();
    assert!(!summary.success);
    assert_eq!(summary.session_id.as_deref(), Some("abc"));
}

#[cfg(unix)]
#[test]
fn agent_reported_failure_returns_ok_and_writes_error() {
    let temp = TempDirGuard::new("conversation-agent-fail");
    let body = [
        "cat > /dev/null".to_string(),
        emit(r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"quota exceeded"}"#),
    ]
    .join("\n");
    let sink = Arc::new(MemorySink::new());
    let mut conversation = conversation_for(temp.path(), &body, &sink);
    conversation.execute("hi").expect("agent failure is not a process error");

    assert_eq!(conversation.state(), ConversationState::Failed);
    assert!(!conversation.is_success());
    assert_eq!(sink.errors(), vec!["quota exceeded"]);
    assert_eq!(conversation.summary().error.as_deref(), Some("quota exceeded"));
}

#[test]
fn configuration_error_is_recorded_without_spawning() {
    let temp = TempDirGuard::new("conversation-config");
    let sink = Arc::new(MemorySink::new());
    let mut conversation = Conversation::new(
        temp.path().join("absent"),
        AgentCommand::default(),
        sink.clone(),
        Arc::new(PlainFormatter),
    );
    let err = conversation.execute("hi").expect_err("missing directory");
    assert!(matches!(err, ConductorError::DirectoryNotFound(_)));
    assert_eq!(conversation.state(), ConversationState::Failed);
    assert_eq!(sink.stat("status").as_deref(), Some("failed"));
    assert_eq!(sink.errors().len(), 1);
}

#[test]
fn second_execute_is_rejected() {
    let temp = TempDirGuard::new("conversation-twice");
    let sink = Arc::new(MemorySink::new());
    let mut conversation = Conversation::new(
        temp.path().join("absent"),
        AgentCommand::default(),
        sink.clone(),
        Arc::new(PlainFormatter),
    );
    let _ = conversation.execute("hi");
    let records_after_first = sink.records().len();

    let err = conversation.execute("again").expect_err("second execute");
    assert!(matches!(err, ConductorError::AlreadyExecuted));
    assert_eq!(sink.records().len(), records_after_first);
    assert_eq!(conversation.state(), ConversationState::Failed);
}

#[test]
fn debug_output_names_identity_and_state() {
    let sink = Arc::new(MemorySink::new());
    let conversation = Conversation::new(
        "/work",
        AgentCommand::default(),
        sink,
        Arc::new(PlainFormatter),
    );
    let text = format!("{conversation:?}");
    assert!(text.contains(&conversation.id().to_string()));
    assert!(text.contains("Created"));
    assert!(text.contains("/work"));
}
