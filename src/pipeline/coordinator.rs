//! Per-session cancellation controller.
//!
//! Every cleaned transcript is queued on the session as a fragment and
//! starts a new run over all unanswered fragments. A run that is still live
//! when the next transcript arrives is cancelled; its fragments stay queued
//! and are answered together by the new run. Only a run that delivered its
//! reply and still owns the live slot may write back to the session.

use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::messages::{CANCEL_AUDIO, OutboundFrame, RESPONSE_COMPLETE, RunPhase, TRANSCRIPTION_STARTED};
use super::run::{Pipeline, RunContext, RunEffects, RunOutcome};
use super::{Cancelled, Collaborators, cancellable};
use crate::form::RegistrationStage;
use crate::session::{PreemptedRun, RunGuard, RunId, Session, SessionRegistry};
use crate::store::RegistrationStore;
use crate::stt::clean_transcript;
use crate::tts::Synthesizer;

/// How a run ended, from the coordinator's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// Reply delivered and effects applied.
    Completed { reply: String },
    /// Cancelled before its reply was fully delivered.
    Cancelled,
    /// Finished, but a newer run had already taken over; effects dropped.
    Discarded,
}

/// Drives runs for one connected session.
pub struct SessionCoordinator {
    session_id: String,
    session: Arc<Mutex<Session>>,
    registry: Arc<SessionRegistry>,
    pipeline: Pipeline,
    synthesizer: Arc<dyn Synthesizer>,
    registrations: Arc<dyn RegistrationStore>,
    outbound: mpsc::Sender<OutboundFrame>,
    phase: watch::Sender<RunPhase>,
    /// Latest run this coordinator started. Another connection for the same
    /// session may own the live slot; shutdown only touches this one.
    last_run: SyncMutex<Option<RunId>>,
}

impl SessionCoordinator {
    pub fn new(
        session_id: impl Into<String>,
        session: Arc<Mutex<Session>>,
        registry: Arc<SessionRegistry>,
        pipeline: Pipeline,
        collaborators: &Collaborators,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Arc<Self> {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Arc::new(Self {
            session_id: session_id.into(),
            session,
            registry,
            pipeline,
            synthesizer: Arc::clone(&collaborators.synthesizer),
            registrations: Arc::clone(&collaborators.registrations),
            outbound,
            phase,
            last_run: SyncMutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// An utterance arrived and is being transcribed.
    pub async fn begin_transcription(&self) {
        self.send(OutboundFrame::marker(TRANSCRIPTION_STARTED)).await;
        self.phase.send_if_modified(|phase| {
            let idle = *phase == RunPhase::Idle;
            if idle {
                *phase = RunPhase::AwaitingTranscription;
            }
            idle
        });
    }

    /// Transcription produced nothing usable.
    pub fn transcription_failed(&self) {
        self.phase.send_if_modified(|phase| {
            let waiting = *phase == RunPhase::AwaitingTranscription;
            if waiting {
                *phase = RunPhase::Idle;
            }
            waiting
        });
    }

    /// Queue a transcript and start a run over every unanswered fragment,
    /// preempting the live run if there is one. Returns `None` if the
    /// transcript is empty after cleaning.
    pub async fn on_transcript(self: &Arc<Self>, raw: &str) -> Option<JoinHandle<RunReport>> {
        let text = clean_transcript(raw);
        if text.is_empty() {
            debug!(session = %self.session_id, "empty transcript dropped");
            self.transcription_failed();
            return None;
        }
        self.send(OutboundFrame::transcript(&text)).await;

        let (guard, preempted, ctx) = {
            let mut session = self.session.lock().await;
            session.push_fragment(text);
            let (guard, preempted) = self.registry.begin(&self.session_id);
            *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard.run_id());
            let ctx = RunContext {
                session_id: self.session_id.clone(),
                run_id: guard.run_id(),
                input: session.combined_input(),
                consumed_fragments: session.fragments().len(),
                snapshot: session.snapshot(),
                cancel: guard.cancel_token(),
            };
            (guard, preempted, ctx)
        };

        if let Some(previous) = &preempted {
            info!(
                session = %self.session_id,
                cancelled = %previous.run_id,
                fragments = ctx.consumed_fragments,
                "barge-in, restarting with accumulated input"
            );
            self.send(OutboundFrame::marker(CANCEL_AUDIO)).await;
        }

        let span = info_span!("run", session = %self.session_id, run = %ctx.run_id);
        let this = Arc::clone(self);
        Some(tokio::spawn(
            async move { this.drive(guard, preempted, ctx).await }.instrument(span),
        ))
    }

    /// Cancel the live run if this coordinator started it. Queued fragments
    /// are kept.
    pub fn shutdown(&self) {
        let last_run = self
            .last_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(run) = last_run.and_then(|id| self.registry.cancel_run(&self.session_id, id)) {
            info!(session = %self.session_id, run = %run.run_id, "live run cancelled on disconnect");
        }
        self.phase.send_replace(RunPhase::Idle);
    }

    async fn drive(
        self: Arc<Self>,
        guard: RunGuard,
        preempted: Option<PreemptedRun>,
        ctx: RunContext,
    ) -> RunReport {
        if let Some(previous) = preempted {
            previous.finished().await;
        }
        if ctx.cancel.is_cancelled() {
            return RunReport::Cancelled;
        }
        debug!(input = %ctx.input, "run started");

        let outcome = self
            .pipeline
            .execute(&ctx, |phase| self.set_phase(&ctx.cancel, phase))
            .await;
        let effects = match outcome {
            RunOutcome::Completed(effects) => effects,
            RunOutcome::Cancelled => return RunReport::Cancelled,
        };

        self.set_phase(&ctx.cancel, RunPhase::Synthesizing);
        if self.deliver(&effects.reply, &ctx.cancel).await.is_err() {
            debug!("delivery interrupted");
            return RunReport::Cancelled;
        }
        self.commit(guard, effects).await
    }

    fn set_phase(&self, cancel: &CancellationToken, phase: RunPhase) {
        if !cancel.is_cancelled() {
            self.phase.send_replace(phase);
        }
    }

    async fn send(&self, frame: OutboundFrame) {
        if self.outbound.send(frame).await.is_err() {
            debug!(session = %self.session_id, "outbound channel closed");
        }
    }

    /// Send `frame` unless the run is cancelled first. A closed connection
    /// counts as cancellation.
    async fn send_live(&self, frame: OutboundFrame, cancel: &CancellationToken) -> Result<(), Cancelled> {
        match cancellable(cancel, self.outbound.send(frame)).await? {
            Ok(()) => Ok(()),
            Err(_) => {
                debug!(session = %self.session_id, "connection closed during delivery");
                Err(Cancelled)
            }
        }
    }

    /// Send the reply text, then its audio as it is synthesized. A synthesis
    /// failure ends the audio early but still counts as delivered.
    async fn deliver(&self, reply: &str, cancel: &CancellationToken) -> Result<(), Cancelled> {
        self.send_live(OutboundFrame::ai_response(reply), cancel).await?;

        let mut stream = match cancellable(cancel, self.synthesizer.synthesize(reply)).await? {
            Ok(stream) => stream,
            Err(e) => {
                warn!("synthesis failed, reply delivered as text only: {e}");
                return Ok(());
            }
        };
        let mut chunks = 0usize;
        while let Some(chunk) = cancellable(cancel, stream.next()).await? {
            match chunk {
                Ok(pcm) => {
                    self.send_live(OutboundFrame::Audio(pcm), cancel).await?;
                    chunks += 1;
                }
                Err(e) => {
                    warn!(chunks, "synthesis stream failed: {e}");
                    return Ok(());
                }
            }
        }
        debug!(chunks, "reply audio delivered");
        Ok(())
    }

    /// Apply `effects` if this run is still live. A confirmed registration is
    /// persisted first; if that fails the form goes back to `Confirming` so
    /// the next confirmation retries. The slot is released while the session
    /// lock is held, so a transcript arriving now either sees the committed
    /// session or preempts before the check.
    async fn commit(&self, guard: RunGuard, effects: RunEffects) -> RunReport {
        let run_id = guard.run_id();
        {
            let mut session = self.session.lock().await;
            if !guard.is_current() {
                debug!(run = %run_id, "late result discarded");
                return RunReport::Discarded;
            }
            let mut form = effects.form.clone();
            if let Some(confirmed) = &effects.confirmed_registration {
                match self.registrations.register(&self.session_id, confirmed).await {
                    Ok(record) => {
                        info!(participant = record.id, event = %confirmed.event, "registration saved");
                    }
                    Err(e) => {
                        error!("confirmed registration could not be saved: {e}");
                        form = form.with_stage(RegistrationStage::Confirming);
                    }
                }
            }
            session.drain_fragments(effects.consumed_fragments);
            session.record_turn(&effects.user_text, &effects.reply);
            session.set_summary(effects.summary.clone());
            session.set_form(form);
            drop(guard);
        }

        self.send(OutboundFrame::marker(RESPONSE_COMPLETE)).await;
        if self.registry.live_run(&self.session_id).is_none() {
            self.phase.send_replace(RunPhase::Idle);
        }
        info!(run = %run_id, "run committed");
        RunReport::Completed {
            reply: effects.reply,
        }
    }
}
