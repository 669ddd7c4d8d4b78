//! The voice WebSocket: authentication, inbound utterances, outbound frames.
//!
//! Each binary frame is one complete utterance of PCM16 LE audio. Utterances
//! are transcribed one at a time, in arrival order, by a per-connection
//! worker so the read loop stays free to notice barge-in.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::AppState;
use crate::auth::AuthUser;
use crate::config::AudioConfig;
use crate::error::Result;
use crate::pipeline::coordinator::SessionCoordinator;
use crate::pipeline::messages::OutboundFrame;
use crate::stt::{Transcriber, Transcript};

const PING: &str = "PING";
const PONG: &str = "PONG";
const UTTERANCE_QUEUE: usize = 8;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

pub async fn voice_socket(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.token, state))
}

async fn handle_socket(mut socket: WebSocket, token: Option<String>, state: AppState) {
    let user = match state.verifier.verify(token.as_deref()).await {
        Ok(user) => user,
        Err(rejection) => {
            warn!(%rejection, "connection refused");
            let close = Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: rejection.to_string().into(),
            }));
            let _ = socket.send(close).await;
            return;
        }
    };
    let span = info_span!("connection", id = %Uuid::new_v4(), subject = %user.subject);
    run_connection(socket, user, state).instrument(span).await;
}

fn to_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Text(text) => Message::Text(text.into()),
        OutboundFrame::Audio(pcm) => Message::Binary(pcm.into()),
    }
}

async fn run_connection(socket: WebSocket, user: AuthUser, state: AppState) {
    info!("connection accepted");
    let session = state.sessions.open(&user);
    let (out_tx, mut out_rx) = mpsc::channel(state.config.server.outbound_queue.max(1));
    let coordinator = SessionCoordinator::new(
        user.subject.clone(),
        session,
        Arc::clone(&state.registry),
        state.pipeline.clone(),
        &state.collaborators,
        out_tx.clone(),
    );

    let (mut sink, mut source) = socket.split();
    let writer = tokio::spawn(
        async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(to_message(frame)).await.is_err() {
                    debug!("client went away while sending");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let (utterance_tx, utterance_rx) = mpsc::channel(UTTERANCE_QUEUE);
    let (transcript_tx, mut transcript_rx) = mpsc::channel(UTTERANCE_QUEUE);
    let worker = tokio::spawn(
        transcribe_utterances(
            Arc::clone(&state.transcriber),
            state.config.audio.clone(),
            utterance_rx,
            transcript_tx,
        )
        .in_current_span(),
    );

    loop {
        tokio::select! {
            inbound = source.next() => match inbound {
                Some(Ok(Message::Binary(pcm))) => {
                    if pcm.is_empty() {
                        continue;
                    }
                    coordinator.begin_transcription().await;
                    if utterance_tx.send(pcm.to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if text.as_str().trim() == PING {
                        let _ = out_tx.send(OutboundFrame::marker(PONG)).await;
                    } else {
                        debug!("ignoring text frame");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("socket error: {e}");
                    break;
                }
            },
            Some(result) = transcript_rx.recv() => match result {
                Ok(Transcript { text, success: true }) => {
                    let _ = coordinator.on_transcript(&text).await;
                }
                Ok(_) => {
                    debug!("no speech recognised");
                    coordinator.transcription_failed();
                }
                Err(e) => {
                    warn!("transcription failed: {e}");
                    coordinator.transcription_failed();
                }
            },
        }
    }

    coordinator.shutdown();
    worker.abort();
    writer.abort();
    info!("connection closed");
}

async fn transcribe_utterances(
    transcriber: Arc<dyn Transcriber>,
    audio: AudioConfig,
    mut utterances: mpsc::Receiver<Vec<u8>>,
    results: mpsc::Sender<Result<Transcript>>,
) {
    while let Some(pcm) = utterances.recv().await {
        let started = Instant::now();
        let result = transcriber
            .transcribe(&pcm, audio.sample_rate, audio.channels)
            .await;
        debug!(
            bytes = pcm.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "utterance transcribed"
        );
        if results.send(result).await.is_err() {
            break;
        }
    }
}
