//! Fakes shared by the integration suites.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley::error::{ParleyError, Result};
use parley::form::RegistrationForm;
use parley::llm::{CompletionService, Prompt};
use parley::pipeline::{Clock, Collaborators};
use parley::store::{NewEvent, ParticipantRecord, RegistrationStore, SqliteStore};
use parley::stt::{Transcriber, Transcript};
use parley::tts::{PcmStream, Synthesizer};

pub const NOW: &str = "2026-12-08T09:00:00Z";

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("timestamp")
        .with_timezone(&Utc)
}

type Responder = Arc<dyn Fn(&Prompt) -> String + Send + Sync>;

struct Rule {
    system: String,
    user: Option<String>,
    delay: Option<Duration>,
    fail: bool,
    respond: Responder,
}

/// Completion fake keyed on a phrase of the system prompt.
#[derive(Default)]
pub struct ScriptedCompletion {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Prompt>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, system: &str, user: Option<&str>, delay: Option<Duration>, fail: bool, respond: Responder) -> Self {
        self.rules.push(Rule {
            system: system.to_owned(),
            user: user.map(str::to_owned),
            delay,
            fail,
            respond,
        });
        self
    }

    pub fn on(self, system: &str, reply: &str) -> Self {
        let reply = reply.to_owned();
        self.push(system, None, None, false, Arc::new(move |_| reply.clone()))
    }

    pub fn delayed_on_user(self, system: &str, user: &str, delay: Duration, reply: &str) -> Self {
        let reply = reply.to_owned();
        self.push(system, Some(user), Some(delay), false, Arc::new(move |_| reply.clone()))
    }

    pub fn respond_with(self, system: &str, f: impl Fn(&Prompt) -> String + Send + Sync + 'static) -> Self {
        self.push(system, None, None, false, Arc::new(f))
    }

    pub fn fail_on(self, system: &str) -> Self {
        self.push(system, None, None, true, Arc::new(|_| String::new()))
    }

    pub fn calls_matching(&self, system: &str) -> Vec<Prompt> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.system.contains(system))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.clone());
        let Some(rule) = self.rules.iter().find(|r| {
            prompt.system.contains(&r.system)
                && r.user.as_ref().is_none_or(|u| prompt.user.contains(u.as_str()))
        }) else {
            return Err(ParleyError::Llm("no script for prompt".to_owned()));
        };
        if let Some(delay) = rule.delay {
            tokio::time::sleep(delay).await;
        }
        if rule.fail {
            return Err(ParleyError::Llm("scripted failure".to_owned()));
        }
        Ok((rule.respond)(prompt))
    }
}

/// Consolidator stand-in that reads back every finding, questions first.
pub fn read_back_findings(prompt: &Prompt) -> String {
    prompt
        .user
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("- QUESTION (").or_else(|| line.strip_prefix("- INFO ("))?;
            rest.split_once("): ").map(|(_, text)| text.to_owned())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Voices text as its UTF-8 bytes in small chunks.
pub struct EchoSynthesizer;

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PcmStream> {
        let chunks: Vec<Result<Vec<u8>>> = text.as_bytes().chunks(16).map(|c| Ok(c.to_vec())).collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// Treats inbound audio bytes as UTF-8 text.
pub struct TextTranscriber;

#[async_trait]
impl Transcriber for TextTranscriber {
    async fn transcribe(&self, pcm: &[u8], _sample_rate: u32, _channels: u16) -> Result<Transcript> {
        let text = String::from_utf8_lossy(pcm).trim().to_owned();
        Ok(if text.is_empty() {
            Transcript::failed()
        } else {
            Transcript::recognised(text)
        })
    }
}

#[derive(Default)]
pub struct RecordingRegistrations {
    pub saved: Mutex<Vec<(String, RegistrationForm)>>,
}

#[async_trait]
impl RegistrationStore for RecordingRegistrations {
    async fn register(&self, subject: &str, form: &RegistrationForm) -> Result<ParticipantRecord> {
        let mut saved = self.saved.lock().unwrap();
        saved.push((subject.to_owned(), form.clone()));
        Ok(ParticipantRecord {
            id: saved.len() as i64,
            event_id: None,
            subject: subject.to_owned(),
            fullname: form.fullname.clone(),
            email: form.email.clone(),
            nickname: form.nickname.clone(),
            event_details: form.event.clone(),
            registered_at: Utc::now(),
        })
    }
}

pub fn new_event(title: &str, starts_at: &str) -> NewEvent {
    NewEvent {
        title: title.to_owned(),
        description: format!("{title} for the whole community"),
        outcome: None,
        organizer: "Community Hub".to_owned(),
        contact_info: "events@example.org".to_owned(),
        starts_at: at(starts_at),
    }
}

/// One past event, one this week, one next month.
pub async fn seeded_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("store");
    for (title, starts_at) in [
        ("Tech Forward Summit", "2026-11-28T09:00:00Z"),
        ("Holiday Code Camp", "2026-12-12T10:00:00Z"),
        ("Future Creators Expo", "2027-01-20T10:00:00Z"),
    ] {
        store.insert_event(new_event(title, starts_at)).await.expect("event");
    }
    store
}

pub fn collaborators(
    completion: Arc<ScriptedCompletion>,
    store: SqliteStore,
) -> (Collaborators, Arc<RecordingRegistrations>) {
    let store = Arc::new(store);
    let registrations = Arc::new(RecordingRegistrations::default());
    let collaborators = Collaborators {
        completion,
        events: store.clone(),
        registrations: registrations.clone(),
        rules: store,
        synthesizer: Arc::new(EchoSynthesizer),
        clock: Arc::new(FixedClock(at(NOW))),
    };
    (collaborators, registrations)
}
