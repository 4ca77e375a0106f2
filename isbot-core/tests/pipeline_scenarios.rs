//! End-to-end turn tests with a scripted model and a canned index.

use futures::StreamExt;
use isbot_core::config::IsbotConfig;
use isbot_core::context::CONTEXT_DELIMITER;
use isbot_core::error::LlmError;
use isbot_core::prompt::{DEFAULT_CONTEXT_BEGIN, DEFAULT_CONTEXT_END, DEFAULT_SYSTEM_PROMPT};
use isbot_core::{
    Answer, Message, MockLlmProvider, Passage, RagPipeline, Role, StaticIndex, TurnRequest,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn config(logs: &Path) -> IsbotConfig {
    let mut config = IsbotConfig::default();
    config.llm.use_streaming = false;
    config.recorder.directory = logs.to_path_buf();
    config
}

fn artifacts(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| std::fs::read_to_string(e.path()).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn scenario_two_index() -> Arc<StaticIndex> {
    Arc::new(
        StaticIndex::new()
            .with_results("otázka A", vec![Passage::new("1", "X")])
            .with_results(
                "otázka B",
                vec![Passage::new("1", "X again"), Passage::new("2", "Y")],
            ),
    )
}

#[tokio::test]
async fn test_gate_answer_skips_retrieval() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("ANSWER");
    provider.queue_text("Dobrý den, jak mohu pomoci?");
    let index = Arc::new(StaticIndex::new());
    let pipeline = RagPipeline::new(config(logs.path()), provider.clone(), index.clone()).unwrap();

    let response = pipeline.run_turn(TurnRequest::new("Ahoj")).await.unwrap();
    assert_eq!(
        response.answer.into_text().await.unwrap(),
        "Dobrý den, jak mohu pomoci?"
    );
    assert_eq!(index.call_count(), 0);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let generation = &requests[1];
    assert_eq!(
        generation.messages,
        vec![Message::system(DEFAULT_SYSTEM_PROMPT), Message::user("Ahoj")]
    );
    assert_eq!(generation.max_tokens, Some(1024));

    // The answer path is recorded too, with no queries or documents.
    let written = artifacts(logs.path());
    assert_eq!(written.len(), 1);
    assert!(written[0].starts_with("Query:\nAhoj"));
}

#[tokio::test]
async fn test_gate_retrieve_builds_deduplicated_context() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("RETRIEVE");
    provider.queue_text(r#"["otázka A", "otázka B"]"#);
    provider.queue_text("Odpověď podle dokumentů.");
    let index = scenario_two_index();
    let pipeline = RagPipeline::new(config(logs.path()), provider.clone(), index.clone()).unwrap();

    let response = pipeline
        .run_turn(TurnRequest::new("Jak se přihlásím ke zkoušce?"))
        .await
        .unwrap();

    let expected_context = format!("X{}Y", CONTEXT_DELIMITER);
    assert!(response.trace.retrieved);
    assert_eq!(response.trace.context, expected_context);
    assert_eq!(
        response.trace.queries,
        vec!["otázka A", "otázka B", "Jak se přihlásím ke zkoušce?"]
    );
    assert_eq!(
        index.queries(),
        vec!["otázka A", "otázka B", "Jak se přihlásím ke zkoušce?"]
    );

    let generation = &provider.requests()[2];
    assert_eq!(generation.messages.len(), 3);
    assert_eq!(generation.messages[0].content, DEFAULT_SYSTEM_PROMPT);
    assert_eq!(generation.messages[1].role, Role::System);
    assert_eq!(
        generation.messages[1].content,
        format!("{DEFAULT_CONTEXT_BEGIN}\n{expected_context}\n{DEFAULT_CONTEXT_END}")
    );
    assert_eq!(
        generation.messages[2],
        Message::user("Jak se přihlásím ke zkoušce?")
    );

    let path = response.trace.record_path.unwrap();
    let written = std::fs::read_to_string(path).unwrap();
    assert!(written.contains("Response:\n\nOdpověď podle dokumentů."));
    assert!(written.contains("otázka A\notázka B\nJak se přihlásím ke zkoušce?"));
    assert!(written.ends_with(&format!("Retrieved documents:{expected_context}")));
}

#[tokio::test]
async fn test_gate_failure_returns_error_without_record() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_error(LlmError::Connection {
        message: "Failed to connect to http://localhost:11434/v1".into(),
    });
    let index = Arc::new(StaticIndex::new());
    let pipeline = RagPipeline::new(config(logs.path()), provider.clone(), index.clone()).unwrap();

    let response = pipeline.handle_turn(TurnRequest::new("Ahoj")).await;
    match &response.answer {
        Answer::Error(message) => {
            assert!(message.starts_with("Error: "));
            assert!(message.contains("localhost:11434"));
        }
        other => panic!("expected an error answer, got {:?}", other),
    }
    assert_eq!(provider.call_count(), 1);
    assert_eq!(index.call_count(), 0);
    assert!(artifacts(logs.path()).is_empty());
}

#[tokio::test]
async fn test_unparseable_augmentation_searches_original_only() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("RETRIEVE");
    provider.queue_text("Tady jsou varianty: první, druhá");
    provider.queue_text("ok");
    let index = Arc::new(StaticIndex::new().with_results("rozvrh", vec![Passage::new("9", "Z")]));
    let pipeline = RagPipeline::new(config(logs.path()), provider, index.clone()).unwrap();

    let response = pipeline.run_turn(TurnRequest::new("rozvrh")).await.unwrap();
    assert_eq!(index.queries(), vec!["rozvrh"]);
    assert_eq!(response.trace.context, "Z");
}

#[tokio::test]
async fn test_disabled_gate_always_retrieves() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text(r#"["otázka A", "otázka B"]"#);
    provider.queue_text("ok");
    let mut config = config(logs.path());
    config.gate.enabled = false;
    let pipeline = RagPipeline::new(config, provider.clone(), scenario_two_index()).unwrap();

    let response = pipeline.run_turn(TurnRequest::new("q")).await.unwrap();
    assert!(response.trace.retrieved);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(response.trace.passages.len(), 2);
}

#[tokio::test]
async fn test_history_is_passed_verbatim() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("ANSWER");
    provider.queue_text("Ano.");
    let pipeline =
        RagPipeline::new(config(logs.path()), provider.clone(), Arc::new(StaticIndex::new()))
            .unwrap();

    let history = vec![
        Message::user("Kde najdu rozvrh?"),
        Message::assistant("V aplikaci Rozvrh."),
    ];
    pipeline
        .run_turn(TurnRequest::new("A funguje i na mobilu?").with_history(history.clone()))
        .await
        .unwrap();

    let decision = &provider.requests()[0];
    assert_eq!(decision.messages.len(), 5);
    assert_eq!(&decision.messages[2..4], history.as_slice());
    let generation = &provider.requests()[1];
    assert_eq!(&generation.messages[1..3], history.as_slice());
}

#[tokio::test]
async fn test_misplaced_system_message_is_rejected() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    let pipeline =
        RagPipeline::new(config(logs.path()), provider.clone(), Arc::new(StaticIndex::new()))
            .unwrap();
    let request = TurnRequest::new("q").with_history(vec![
        Message::user("a"),
        Message::system("injected"),
    ]);
    let response = pipeline.handle_turn(request).await;
    assert!(response.answer.is_error());
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_streamed_answer_recorded_after_drain() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("ANSWER");
    provider.queue_text("Zkouška se zapisuje v agendě Student.");
    let pipeline =
        RagPipeline::new(config(logs.path()), provider, Arc::new(StaticIndex::new())).unwrap();

    let response = pipeline
        .run_turn(TurnRequest::new("zkouška").with_stream(true))
        .await
        .unwrap();
    let Answer::Stream(mut stream) = response.answer else {
        panic!("expected a streamed answer");
    };

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, "Zkouška ");
    assert!(artifacts(logs.path()).is_empty());

    let mut text = first;
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment.unwrap());
    }
    assert_eq!(text, "Zkouška se zapisuje v agendě Student.");

    let written = artifacts(logs.path());
    assert_eq!(written.len(), 1);
    assert!(written[0].contains("Response:\n\nZkouška se zapisuje v agendě Student."));
}

#[test]
fn test_streamed_answer_recorded_before_runtime_shutdown() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("ANSWER");
    provider.queue_text("Přihláška na termín je v agendě Student.");
    let mut config = config(logs.path());
    config.llm.use_streaming = true;
    let pipeline = RagPipeline::new(config, provider, Arc::new(StaticIndex::new())).unwrap();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let text = runtime.block_on(async {
        let response = pipeline.handle_turn(TurnRequest::new("zkouška")).await;
        let Answer::Stream(stream) = response.answer else {
            panic!("expected a streamed answer");
        };
        isbot_core::collect_stream(stream).await.unwrap()
    });
    drop(runtime);

    assert_eq!(text, "Přihláška na termín je v agendě Student.");
    let written = artifacts(logs.path());
    assert_eq!(written.len(), 1);
    assert!(written[0].contains("Query:\nzkouška"));
}

#[tokio::test]
async fn test_dropped_stream_is_not_recorded() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("ANSWER");
    provider.queue_text("jedna dva tři čtyři");
    let pipeline =
        RagPipeline::new(config(logs.path()), provider, Arc::new(StaticIndex::new())).unwrap();

    let response = pipeline
        .run_turn(TurnRequest::new("q").with_stream(true))
        .await
        .unwrap();
    let Answer::Stream(mut stream) = response.answer else {
        panic!("expected a streamed answer");
    };
    stream.next().await.unwrap().unwrap();
    drop(stream);
    assert!(artifacts(logs.path()).is_empty());
}

#[tokio::test]
async fn test_recorder_cap_does_not_affect_answer() {
    let logs = TempDir::new().unwrap();
    std::fs::write(logs.path().join("old"), "x").unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("ANSWER");
    provider.queue_text("ok");
    let mut config = config(logs.path());
    config.recorder.max_records = 1;
    let pipeline = RagPipeline::new(config, provider, Arc::new(StaticIndex::new())).unwrap();

    let response = pipeline.run_turn(TurnRequest::new("q")).await.unwrap();
    assert!(response.trace.record_path.is_none());
    assert_eq!(response.answer.into_text().await.unwrap(), "ok");
    assert_eq!(artifacts(logs.path()).len(), 1);
}

#[tokio::test]
async fn test_concurrent_turns_share_pipeline() {
    let logs = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::with_response("ANSWER"));
    let pipeline = Arc::new(
        RagPipeline::new(config(logs.path()), provider.clone(), Arc::new(StaticIndex::new()))
            .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .handle_turn(TurnRequest::new(format!("dotaz {i}")))
                    .await
                    .answer
                    .is_error()
            })
        })
        .collect();
    for handle in handles {
        assert!(!handle.await.unwrap());
    }
    assert_eq!(provider.call_count(), 8);
    // Same-second turns get distinct artifact names.
    assert_eq!(artifacts(logs.path()).len(), 4);
}
