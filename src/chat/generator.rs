use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::chat::inference::{ChunkSender, GenerationConfig, GenerationEvent, TextGenerator};

/// Offline generator that streams canned replies word by word.
///
/// Replies cycle in order. Used by the demo binary and tests where no model
/// runtime is available; the prompt only affects logging.
#[derive(Clone, Debug)]
pub struct ScriptedGenerator {
    replies: Vec<String>,
    next: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    delay: Duration,
    max_tokens: usize,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        if replies.is_empty() {
            return Err(anyhow!("scripted generator needs at least one reply"));
        }
        Ok(Self {
            replies,
            next: Default::default(),
            delay: Duration::ZERO,
            max_tokens: usize::MAX,
        })
    }

    /// Build from sampling settings; only `max_tokens` applies here.
    pub fn from_config<I, S>(config: &GenerationConfig, replies: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut generator = Self::new(replies)?;
        generator.max_tokens = config.max_tokens as usize;
        Ok(generator)
    }

    /// Pause between chunks, to look like a model producing tokens.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn next_reply(&self) -> &str {
        let i = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        &self.replies[i % self.replies.len()]
    }
}

/// Split `reply` into streaming fragments; every word after the first
/// carries its leading space.
fn fragments(reply: &str, max_tokens: usize) -> Vec<String> {
    reply
        .split_whitespace()
        .take(max_tokens)
        .enumerate()
        .map(|(i, word)| {
            if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            }
        })
        .collect()
}

impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn generate_async(&self, prompt: &str, sink: ChunkSender) -> Result<()> {
        let parts = fragments(self.next_reply(), self.max_tokens);
        let delay = self.delay;
        log::debug!(
            "scripted reply of {} chunks for a {}-byte prompt",
            parts.len(),
            prompt.len()
        );

        std::thread::Builder::new()
            .name("scripted-generator".to_string())
            .spawn(move || {
                if parts.is_empty() {
                    let _ = sink.send(GenerationEvent::Chunk {
                        text: String::new(),
                        done: true,
                    });
                    return;
                }
                let last = parts.len() - 1;
                for (i, text) in parts.into_iter().enumerate() {
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    let event = GenerationEvent::Chunk {
                        text,
                        done: i == last,
                    };
                    if sink.send(event).is_err() {
                        break;
                    }
                }
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn collect(generator: &ScriptedGenerator) -> Vec<GenerationEvent> {
        let (tx, rx) = mpsc::channel();
        generator.generate_async("prompt", tx).unwrap();
        rx.iter().collect()
    }

    #[test]
    fn streams_words_and_finishes() {
        let generator = ScriptedGenerator::new(["Hello there friend"]).unwrap();
        let events = collect(&generator);
        assert_eq!(
            events,
            vec![
                GenerationEvent::Chunk { text: "Hello".into(), done: false },
                GenerationEvent::Chunk { text: " there".into(), done: false },
                GenerationEvent::Chunk { text: " friend".into(), done: true },
            ]
        );
    }

    #[test]
    fn replies_cycle() {
        let generator = ScriptedGenerator::new(["one", "two"]).unwrap();
        let texts: Vec<_> = (0..3)
            .map(|_| match &collect(&generator)[0] {
                GenerationEvent::Chunk { text, .. } => text.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["one", "two", "one"]);
    }

    #[test]
    fn max_tokens_truncates() {
        let config = GenerationConfig {
            max_tokens: 2,
            ..GenerationConfig::default()
        };
        let generator = ScriptedGenerator::from_config(&config, ["a b c d"]).unwrap();
        let events = collect(&generator);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            GenerationEvent::Chunk { text: " b".into(), done: true }
        );
    }

    #[test]
    fn empty_reply_still_finishes() {
        let generator = ScriptedGenerator::new([""]).unwrap();
        assert_eq!(
            collect(&generator),
            vec![GenerationEvent::Chunk { text: String::new(), done: true }]
        );
    }

    #[test]
    fn needs_a_reply() {
        assert!(ScriptedGenerator::new(Vec::<String>::new()).is_err());
    }
}
