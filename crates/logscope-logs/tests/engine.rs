use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

use logscope_logs::{Engine, EngineError, EngineEvent, EngineSettings, EngineState, compile};
use logscope_reader::{PipeSource, Reader, ReaderError, ReaderOptions};
use logscope_types::{FieldKind, Key, SchemaConfig};

const WAIT: Duration = Duration::from_secs(5);

fn pipe_of(text: &str) -> Reader {
    let source: PipeSource = Box::new(std::io::Cursor::new(text.as_bytes().to_vec()));
    Reader::pipe(source, ReaderOptions::default())
}

/// Drain events until `Stopped`, returning everything seen before it
async fn until_stopped(events: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if event == EngineEvent::Stopped {
                return;
            }
            seen.push(event);
        }
    })
    .await
    .expect("engine never stopped");
    seen
}

async fn settle(engine: &Engine) {
    timeout(WAIT, async {
        while !engine.is_settled() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine never settled");
}

/// The view must equal a fresh evaluation of `query` over the full buffer
fn assert_view_matches(engine: &Engine, query: &str) {
    let expr = compile(query).unwrap();
    let keys = engine.key_map();
    let expected: Vec<_> = (0..engine.total_count())
        .filter_map(|i| engine.record(i))
        .filter(|r| match &expr {
            Some(expr) => expr.apply(r, &keys).unwrap(),
            None => true,
        })
        .collect();
    assert_eq!(engine.view_snapshot(), expected, "view out of sync for {query:?}");
    assert_eq!(engine.matched_count(), expected.len());
}

const SCENARIO: &str = concat!(
    r#"{"level":"ERROR","msg":"x"}"#,
    "\n",
    "bad-json-line\n",
    r#"{"level":"INFO","msg":"y"}"#,
    "\n",
);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filter_keeps_only_matching_records() {
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.submit_filter(r#"level == "ERROR""#).unwrap();
    engine.start(pipe_of(SCENARIO)).await.unwrap();

    until_stopped(&mut events).await;
    settle(&engine).await;

    assert_eq!(engine.total_count(), 3);
    assert_eq!(engine.matched_count(), 1);
    assert_eq!(engine.view_len(), 1);
    assert_eq!(engine.view_record(0), engine.record(0));
    assert!(engine.record(1).unwrap().parse_error().is_some());
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resubmitting_same_filter_is_idempotent() {
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.start(pipe_of(SCENARIO)).await.unwrap();
    until_stopped(&mut events).await;

    engine.submit_filter("msg CONTAINS x OR msg CONTAINS y").unwrap();
    settle(&engine).await;
    let first = engine.view_snapshot();
    let count = engine.matched_count();

    engine.submit_filter("msg CONTAINS x OR msg CONTAINS y").unwrap();
    settle(&engine).await;
    assert_eq!(engine.view_snapshot(), first);
    assert_eq!(engine.matched_count(), count);
    assert_eq!(count, 2);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_filter_wins_over_running_sweep() {
    let mut input = String::new();
    for i in 0..2000 {
        let level = if i % 3 == 0 { "ERROR" } else { "INFO" };
        input.push_str(&format!("{{\"level\":\"{level}\",\"n\":{i}}}\n"));
    }

    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.start(pipe_of(&input)).await.unwrap();
    until_stopped(&mut events).await;
    settle(&engine).await;
    assert_eq!(engine.view_len(), 2000);

    engine.submit_filter("level = ERROR").unwrap();
    engine.submit_filter("n < 10").unwrap();
    settle(&engine).await;

    assert_eq!(engine.matched_count(), 10);
    assert_view_matches(&engine, "n < 10");
    assert_eq!(engine.active_filter().unwrap().to_string(), "n < 10");

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn view_is_consistent_after_changes_during_ingest() {
    let (writer_half, reader_half) = tokio::io::duplex(64 * 1024);
    let reader = Reader::pipe(Box::new(reader_half), ReaderOptions::default());

    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.start(reader).await.unwrap();

    let mut writer = writer_half;
    for i in 0..600 {
        let level = if i % 5 == 0 { "ERROR" } else { "INFO" };
        let line = format!("{{\"level\":\"{level}\",\"n\":{}}}\n", i % 7);
        writer.write_all(line.as_bytes()).await.unwrap();

        match i {
            150 => engine.submit_filter("n > 3").unwrap(),
            300 => engine.submit_filter("level = ERROR OR n = 1").unwrap(),
            301 => engine.clear_filter(),
            450 => engine.submit_filter("level = ERROR OR n = 1").unwrap(),
            _ => {}
        }
    }
    drop(writer);

    until_stopped(&mut events).await;
    settle(&engine).await;

    assert_eq!(engine.total_count(), 600);
    assert_view_matches(&engine, "level = ERROR OR n = 1");

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_filter_is_reset_to_no_filter() {
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine
        .submit_filter("msg MATCH '(['")
        .expect("bad patterns compile and fail on evaluation");
    engine
        .start(pipe_of("{\"msg\":\"a\"}\n{\"msg\":\"b\"}\n{\"msg\":\"c\"}\n"))
        .await
        .unwrap();

    let seen = until_stopped(&mut events).await;
    settle(&engine).await;

    let errors: Vec<_> = seen
        .iter()
        .filter(|e| matches!(e, EngineEvent::FilterError(_)))
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(engine.active_filter().is_none());
    assert_eq!(engine.view_len(), 3);
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn coercion_failure_on_numeric_field_resets_filter() {
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.load_schema(SchemaConfig {
        last_saved_name: Some("service".into()),
        keys: vec![Key::new("count", FieldKind::Number)],
    });
    engine.submit_filter("count > 1").unwrap();
    engine
        .start(pipe_of("{\"count\":5}\n{\"count\":\"lots\"}\n{\"count\":0}\n"))
        .await
        .unwrap();

    let seen = until_stopped(&mut events).await;
    settle(&engine).await;

    assert!(seen.iter().any(|e| matches!(e, EngineEvent::FilterError(m) if m.contains("lots"))));
    assert_eq!(engine.view_len(), 3);
    // A saved schema is never overwritten by sampling
    assert_eq!(engine.schema().last_saved_name.as_deref(), Some("service"));

    engine.stop().await;
}

#[tokio::test]
async fn start_failure_returns_error_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.log");

    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    let err = engine
        .start(Reader::file(&missing, ReaderOptions::default()))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Reader(ReaderError::Open { .. })));
    assert!(err.to_string().contains("missing.log"));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(
        timeout(WAIT, events.recv()).await.unwrap(),
        Some(EngineEvent::Stopped)
    );

    let again = engine.start(pipe_of("x\n")).await;
    assert!(matches!(again, Err(EngineError::AlreadyStarted)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scroll_to_end_every_batch_while_following() {
    let input: String = (0..25).map(|i| format!("{{\"n\":{i}}}\n")).collect();

    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.start(pipe_of(&input)).await.unwrap();
    let seen = until_stopped(&mut events).await;
    let scrolls = seen.iter().filter(|e| **e == EngineEvent::ScrollToEnd).count();
    assert_eq!(scrolls, 2);
    engine.stop().await;

    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.set_following(false);
    engine.start(pipe_of(&input)).await.unwrap();
    let seen = until_stopped(&mut events).await;
    assert!(!seen.contains(&EngineEvent::ScrollToEnd));
    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sampler_infers_key_kinds() {
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine
        .start(pipe_of(
            "{\"level\":\"INFO\",\"count\":3,\"ok\":true}\nbad-json-line\n",
        ))
        .await
        .unwrap();
    until_stopped(&mut events).await;
    settle(&engine).await;

    let keys = engine.key_map();
    assert_eq!(keys.kind("count"), Some(FieldKind::Number));
    assert_eq!(keys.kind("ok"), Some(FieldKind::Boolean));
    assert_eq!(keys.kind("level"), Some(FieldKind::Text));
    let names: Vec<_> = engine.schema().keys.into_iter().map(|k| k.name).collect();
    assert_eq!(names, vec!["level", "count", "ok"]);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn followed_file_keeps_streaming_until_stop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "{\"n\":1}\n").unwrap();

    let options = ReaderOptions::default().with_poll_interval(Duration::from_millis(10));
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.start(Reader::file(&path, options)).await.unwrap();
    assert_eq!(engine.state(), EngineState::Streaming);

    let wait_for = |n: usize| {
        let engine = &engine;
        async move {
            timeout(WAIT, async {
                while engine.total_count() < n {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("record never arrived")
        }
    };

    wait_for(1).await;
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"n\":2}\n").unwrap();
    wait_for(2).await;

    engine.stop().await;
    engine.stop().await;
    assert_eq!(engine.state(), EngineState::Stopped);
    until_stopped(&mut events).await;
}

struct FailingSource;

impl tokio::io::AsyncRead for FailingSource {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Err(std::io::Error::other("device gone")))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_failure_is_announced_before_stopped() {
    for _ in 0..50 {
        let (mut engine, mut events) = Engine::new(EngineSettings::default());
        let reader = Reader::pipe(Box::new(FailingSource), ReaderOptions::default());
        engine.start(reader).await.unwrap();

        let seen = until_stopped(&mut events).await;
        assert!(
            seen.iter()
                .any(|e| matches!(e, EngineEvent::StreamFailed(m) if m.contains("device gone"))),
            "stopped without the failure: {seen:?}"
        );
        assert_eq!(engine.state(), EngineState::Stopped);
        engine.stop().await;
    }
}

// Reading a directory fails with EISDIR after a successful open
#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_file_ends_ingestion_from_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let healthy = dir.path().join("app.log");
    let broken = dir.path().join("not-a-file");
    std::fs::write(&healthy, "{\"n\":1}\n").unwrap();
    std::fs::create_dir(&broken).unwrap();

    let options = ReaderOptions::default().with_poll_interval(Duration::from_millis(10));
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine
        .start(Reader::multi_file(&[&healthy, &broken], options))
        .await
        .unwrap();

    let seen = until_stopped(&mut events).await;
    assert!(seen.iter().any(|e| matches!(e, EngineEvent::StreamFailed(_))));
    assert_eq!(engine.state(), EngineState::Stopped);

    let total = engine.total_count();
    let mut file = OpenOptions::new().append(true).open(&healthy).unwrap();
    file.write_all(b"{\"n\":2}\n{\"n\":3}\n").unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.total_count(), total);

    engine.stop().await;
}

/// Collect every event that is already queued
fn drain(events: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

fn numbered(count: usize) -> String {
    (0..count).map(|i| format!("{{\"n\":{i}}}\n")).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redraws_are_emitted_during_a_resweep() {
    let settings = EngineSettings {
        redraw_interval_ms: 0,
        ..EngineSettings::default()
    };
    let (mut engine, mut events) = Engine::new(settings);
    engine.start(pipe_of(&numbered(2000))).await.unwrap();
    until_stopped(&mut events).await;
    settle(&engine).await;
    sleep(Duration::from_millis(50)).await;
    drain(&mut events);

    engine.submit_filter("n >= 1000").unwrap();
    settle(&engine).await;

    // A zero interval is exceeded after every classified record
    let redraws = drain(&mut events)
        .into_iter()
        .filter(|e| *e == EngineEvent::Redraw)
        .count();
    assert!(redraws >= 2000, "only {redraws} redraws during the sweep");
    assert_eq!(engine.matched_count(), 1000);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redraw_is_emitted_on_reaching_the_live_end() {
    let settings = EngineSettings {
        redraw_interval_ms: 60_000,
        park_interval_ms: 1,
        ..EngineSettings::default()
    };
    let (mut engine, mut events) = Engine::new(settings);
    engine.start(pipe_of(&numbered(500))).await.unwrap();
    until_stopped(&mut events).await;
    settle(&engine).await;
    sleep(Duration::from_millis(50)).await;
    drain(&mut events);

    engine.submit_filter("n < 10").unwrap();

    let event = timeout(WAIT, events.recv()).await.unwrap();
    assert_eq!(event, Some(EngineEvent::Redraw));
    // Mid-sweep redraws are suppressed, so this one shows the finished view
    assert!(engine.is_settled());
    assert_eq!(engine.view_len(), 10);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_lines_are_skipped() {
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine
        .start(pipe_of("{\"n\":1}\n\n\r\n{\"n\":2}\n\n"))
        .await
        .unwrap();
    until_stopped(&mut events).await;
    settle(&engine).await;

    assert_eq!(engine.total_count(), 2);
    assert!(engine.view_snapshot().iter().all(|r| r.parse_error().is_none()));

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn view_generation_changes_when_view_is_rebuilt() {
    let (mut engine, mut events) = Engine::new(EngineSettings::default());
    engine.start(pipe_of(&numbered(5))).await.unwrap();
    until_stopped(&mut events).await;
    settle(&engine).await;

    let (before, all) = engine.view_from(0);
    assert_eq!(all.len(), 5);
    assert_eq!(engine.view_from(3).1.len(), 2);
    assert!(engine.view_from(9).1.is_empty());

    engine.submit_filter("n >= 1").unwrap();
    settle(&engine).await;
    let (after, view) = engine.view_from(0);
    assert_ne!(before, after);
    assert_eq!(after, engine.view_generation());
    assert_eq!(view.len(), 4);

    engine.stop().await;
}
