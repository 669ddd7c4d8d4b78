//! Shared fakes used across unit test modules.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ParleyError, Result};
use crate::form::RegistrationForm;
use crate::llm::{CompletionService, Prompt};
use crate::pipeline::{Clock, Collaborators};
use crate::store::{NewEvent, ParticipantRecord, RegistrationStore, SqliteStore};
use crate::tts::{PcmStream, Synthesizer};

/// Parse an RFC 3339 timestamp.
pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("timestamp")
        .with_timezone(&Utc)
}

/// How a scripted completion answers.
#[derive(Clone)]
pub enum Script {
    Reply(String),
    Fail,
    Delayed(Duration, String),
    Respond(Arc<dyn Fn(&Prompt) -> String + Send + Sync>),
}

/// Completion fake that answers by matching the system prompt.
///
/// Rules are checked in insertion order; the first whose system needle (and
/// optional user needle) matches wins. Unmatched prompts fail.
#[derive(Default)]
pub struct ScriptedCompletion {
    rules: Vec<(String, Option<String>, Script)>,
    calls: Mutex<Vec<Prompt>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, system_needle: &str, reply: &str) -> Self {
        self.rule(system_needle, None, Script::Reply(reply.to_owned()))
    }

    pub fn fail_on(self, system_needle: &str) -> Self {
        self.rule(system_needle, None, Script::Fail)
    }

    pub fn delayed(self, system_needle: &str, delay: Duration, reply: &str) -> Self {
        self.rule(
            system_needle,
            None,
            Script::Delayed(delay, reply.to_owned()),
        )
    }

    pub fn respond_with(
        self,
        system_needle: &str,
        f: impl Fn(&Prompt) -> String + Send + Sync + 'static,
    ) -> Self {
        self.rule(system_needle, None, Script::Respond(Arc::new(f)))
    }

    pub fn rule(mut self, system_needle: &str, user_needle: Option<&str>, script: Script) -> Self {
        self.rules.push((
            system_needle.to_owned(),
            user_needle.map(str::to_owned),
            script,
        ));
        self
    }

    pub fn calls(&self) -> Vec<Prompt> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, system_needle: &str) -> Vec<Prompt> {
        self.calls()
            .into_iter()
            .filter(|p| p.system.contains(system_needle))
            .collect()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.clone());
        let script = self
            .rules
            .iter()
            .find(|(sys, user, _)| {
                prompt.system.contains(sys.as_str())
                    && user.as_ref().is_none_or(|u| prompt.user.contains(u.as_str()))
            })
            .map(|(_, _, script)| script.clone());
        match script {
            Some(Script::Reply(reply)) => Ok(reply),
            Some(Script::Delayed(delay, reply)) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            Some(Script::Respond(f)) => Ok(f(prompt)),
            Some(Script::Fail) => Err(ParleyError::Llm("scripted failure".to_owned())),
            None => Err(ParleyError::Llm("no script for prompt".to_owned())),
        }
    }
}

/// Clock pinned to one instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Synthesizer that voices text as its UTF-8 bytes in fixed-size chunks.
pub struct EchoSynthesizer {
    pub chunk_bytes: usize,
}

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PcmStream> {
        let chunks: Vec<Result<Vec<u8>>> = text
            .as_bytes()
            .chunks(self.chunk_bytes.max(1))
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// Registration store that records calls, or refuses them while failing.
#[derive(Default)]
pub struct RecordingRegistrations {
    pub saved: Mutex<Vec<(String, RegistrationForm)>>,
    failing: AtomicBool,
}

impl RecordingRegistrations {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistrationStore for RecordingRegistrations {
    async fn register(&self, subject: &str, form: &RegistrationForm) -> Result<ParticipantRecord> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ParleyError::Store("disk full".to_owned()));
        }
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

/// In-memory store holding the given `(title, starts_at)` events.
pub async fn store_with_events(events: &[(&str, &str)]) -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("store");
    for (title, starts_at) in events {
        store
            .insert_event(NewEvent {
                title: (*title).to_owned(),
                description: format!("{title} for the whole community"),
                outcome: None,
                organizer: "Community Hub".to_owned(),
                contact_info: "events@example.org".to_owned(),
                starts_at: at(starts_at),
            })
            .await
            .expect("insert event");
    }
    store
}

/// Collaborators over `completion` and `store`, with an echo synthesizer, a
/// recording registration store and a clock fixed at `now`.
pub fn collaborators(
    completion: Arc<ScriptedCompletion>,
    store: SqliteStore,
    now: &str,
) -> (Collaborators, Arc<RecordingRegistrations>) {
    let store = Arc::new(store);
    let registrations = Arc::new(RecordingRegistrations::default());
    let collaborators = Collaborators {
        completion,
        events: store.clone(),
        registrations: registrations.clone(),
        rules: store,
        synthesizer: Arc::new(EchoSynthesizer { chunk_bytes: 8 }),
        clock: Arc::new(FixedClock(at(now))),
    };
    (collaborators, registrations)
}
