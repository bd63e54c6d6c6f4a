use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tempfile::NamedTempFile;

use ondevice_ai::chat::{
    Author, ChatSession, ChunkSender, GenerationConfig, GenerationEvent, InferenceModel,
    ScriptedGenerator, TextGenerator,
};

/// Generator whose stream is driven by the test.
#[derive(Clone, Default)]
struct Controlled {
    sink: Arc<Mutex<Option<ChunkSender>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Controlled {
    fn send(&self, text: &str, done: bool) {
        let sink = self.sink.lock().unwrap();
        sink.as_ref()
            .expect("generation started")
            .send(GenerationEvent::Chunk {
                text: text.to_string(),
                done,
            })
            .unwrap();
    }
}

impl TextGenerator for Controlled {
    fn name(&self) -> &'static str {
        "controlled"
    }

    fn generate_async(&self, prompt: &str, sink: ChunkSender) -> Result<()> {
        *self.sink.lock().unwrap() = Some(sink);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(())
    }
}

/// Sends a fixed list of events, then closes the stream.
struct Canned(Vec<GenerationEvent>);

impl TextGenerator for Canned {
    fn name(&self) -> &'static str {
        "canned"
    }

    fn generate_async(&self, _prompt: &str, sink: ChunkSender) -> Result<()> {
        for event in &self.0 {
            sink.send(event.clone())?;
        }
        Ok(())
    }
}

struct Unavailable;

impl TextGenerator for Unavailable {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn generate_async(&self, _prompt: &str, _sink: ChunkSender) -> Result<()> {
        Err(anyhow!("inference runtime unavailable"))
    }
}

fn model_config(file: &NamedTempFile) -> GenerationConfig {
    GenerationConfig {
        model_path: file.path().to_path_buf(),
        ..GenerationConfig::default()
    }
}

fn session_with<G: TextGenerator + 'static>(file: &NamedTempFile, generator: G) -> ChatSession {
    let model = InferenceModel::open(model_config(file), |_| Ok(generator)).expect("open model");
    ChatSession::new(Arc::new(model))
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn streamed_reply_fills_the_placeholder() {
    let file = NamedTempFile::new().unwrap();
    let generator = Controlled::default();
    let session = session_with(&file, generator.clone());
    assert!(session.is_input_enabled());

    let turn = session.send_message("hello").unwrap();
    wait_for("generation to start", || generator.sink.lock().unwrap().is_some());

    let view = session.transcript().read_transcript();
    assert_eq!(view.len(), 2);
    assert_eq!(view[1].text, "hello");
    assert_eq!(view[1].author, Author::User);
    assert!(!view[1].is_loading);
    assert_eq!(view[0].author, Author::Model);
    assert!(view[0].is_loading);
    assert_eq!(view[0].text, "");
    assert!(!session.is_input_enabled());

    generator.send("Hi", false);
    wait_for("first chunk", || {
        session.transcript().read_transcript()[0].text == "Hi"
    });
    assert!(session.transcript().read_transcript()[0].is_loading);
    assert!(!session.is_input_enabled());

    generator.send(" there", true);
    turn.join().unwrap();

    let view = session.transcript().read_transcript();
    assert_eq!(view[0].text, "Hi there");
    assert!(!view[0].is_loading);
    assert!(session.is_input_enabled());

    let snapshot = session.transcript().snapshot();
    assert_eq!(
        snapshot.messages()[1].raw_message,
        "<start_of_turn>model\nHi there<end_of_turn>"
    );
    assert_eq!(
        generator.prompts.lock().unwrap()[0],
        "<start_of_turn>user\nhello<end_of_turn>\n<start_of_turn>model\n"
    );
}

#[test]
fn later_turns_send_only_the_recent_window() {
    let file = NamedTempFile::new().unwrap();
    let generator = Controlled::default();
    let session = session_with(&file, generator.clone());

    for (i, question) in ["one", "two", "three"].iter().enumerate() {
        let turn = session.send_message(*question).unwrap();
        wait_for("generation to start", || {
            generator.prompts.lock().unwrap().len() == i + 1
        });
        generator.send(&format!("answer {}", i), true);
        turn.join().unwrap();
    }

    let prompts = generator.prompts.lock().unwrap();
    let last = &prompts[2];
    assert!(!last.contains("one"));
    assert!(last.contains("two"));
    assert!(last.contains("answer 1"));
    assert!(last.contains("three"));
    assert!(last.ends_with("<start_of_turn>model\n"));
    assert_eq!(session.transcript().snapshot().loading_count(), 0);
}

#[test]
fn generation_failure_becomes_a_model_message() {
    let file = NamedTempFile::new().unwrap();
    let session = session_with(
        &file,
        Canned(vec![
            GenerationEvent::Chunk {
                text: "partial".to_string(),
                done: false,
            },
            GenerationEvent::Failed("out of memory".to_string()),
        ]),
    );

    session.run_turn("hello").unwrap();

    let view = session.transcript().read_transcript();
    assert_eq!(view.len(), 3);
    assert_eq!(view[0].author, Author::Model);
    assert!(view[0].text.contains("out of memory"));
    assert_eq!(view[1].text, "partial");
    assert!(view.iter().all(|m| !m.is_loading));
    assert!(session.is_input_enabled());
}

#[test]
fn stream_closed_early_is_reported() {
    let file = NamedTempFile::new().unwrap();
    let session = session_with(
        &file,
        Canned(vec![GenerationEvent::Chunk {
            text: "Hi".to_string(),
            done: false,
        }]),
    );

    session.run_turn("hello").unwrap();

    let view = session.transcript().read_transcript();
    assert!(view[0].text.contains("closed before the reply finished"));
    assert_eq!(session.transcript().snapshot().loading_count(), 0);
    assert!(session.is_input_enabled());
}

#[test]
fn start_failure_reenables_input() {
    let file = NamedTempFile::new().unwrap();
    let session = session_with(&file, Unavailable);

    session.run_turn("hello").unwrap();

    let view = session.transcript().read_transcript();
    assert_eq!(view.len(), 3);
    assert!(view[0].text.contains("inference runtime unavailable"));
    assert_eq!(view[1].text, "");
    assert!(!view[1].is_loading);
    assert!(session.is_input_enabled());
}

#[test]
fn missing_weights_fail_at_open() {
    let config = GenerationConfig {
        model_path: "/nonexistent/gemma.bin".into(),
        ..GenerationConfig::default()
    };
    let err = InferenceModel::open(config, |cfg| ScriptedGenerator::from_config(cfg, ["hi"]))
        .unwrap_err();
    assert!(err.to_string().contains("/nonexistent/gemma.bin"));
}

#[test]
fn scripted_generator_completes_a_turn() {
    let file = NamedTempFile::new().unwrap();
    let generator = ScriptedGenerator::new(["Hello from the device"]).unwrap();
    let session = session_with(&file, generator);

    session.send_message("  hi  ").unwrap().join().unwrap();

    let view = session.transcript().read_transcript();
    assert_eq!(view[1].text, "  hi  ");
    assert_eq!(view[0].text, "Hello from the device");
    assert!(session.is_input_enabled());
}

#[test]
fn second_send_during_a_turn_is_rejected() {
    let file = NamedTempFile::new().unwrap();
    let generator = Controlled::default();
    let session = session_with(&file, generator.clone());

    let turn = session.send_message("a").unwrap();
    wait_for("generation to start", || generator.sink.lock().unwrap().is_some());
    assert!(!session.is_input_enabled());

    assert!(session.send_message("b").is_err());
    assert!(session.run_turn("c").is_err());
    assert_eq!(session.transcript().snapshot().loading_count(), 1);
    assert_eq!(session.transcript().read_transcript().len(), 2);

    generator.send("done", true);
    turn.join().unwrap();
    assert!(session.is_input_enabled());

    let next = session.send_message("b").unwrap();
    wait_for("second generation", || generator.prompts.lock().unwrap().len() == 2);
    generator.send("ok", true);
    next.join().unwrap();
    assert_eq!(session.transcript().snapshot().loading_count(), 0);
    assert_eq!(session.transcript().read_transcript().len(), 4);
}
