//! whisper.cpp command-line transcription.
//!
//! Each utterance is written to a temporary WAV file and passed to
//! `whisper-cli`. A semaphore bounds how many transcriptions run at once so
//! a burst of utterances cannot oversubscribe the CPU.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{Transcriber, Transcript, pcm16_le_to_samples};
use crate::config::SttConfig;
use crate::error::{ParleyError, Result};

/// Transcriber backed by the `whisper-cli` executable.
pub struct WhisperCliTranscriber {
    config: SttConfig,
    permits: Arc<Semaphore>,
}

/// Removes the temporary WAV when dropped, including when the transcription
/// future is abandoned mid-flight.
struct TempWav(PathBuf);

impl Drop for TempWav {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

impl WhisperCliTranscriber {
    pub fn new(config: &SttConfig) -> Self {
        info!(
            "STT configured: {} model={}",
            config.whisper_bin,
            config.model_path.display()
        );
        Self {
            config: config.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let dir = self
            .config
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        dir.join(format!("parley-{}.wav", uuid::Uuid::new_v4()))
    }

    fn command_args(&self, wav: &Path) -> Vec<OsString> {
        vec![
            "-m".into(),
            self.config.model_path.clone().into_os_string(),
            "-f".into(),
            wav.as_os_str().to_owned(),
            "-l".into(),
            self.config.language.clone().into(),
            "-t".into(),
            self.config.threads.to_string().into(),
            "-nt".into(),
            "-np".into(),
        ]
    }
}

fn write_wav(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| ParleyError::Stt(format!("failed to create wav writer: {e}")))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| ParleyError::Stt(format!("failed to write wav sample: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| ParleyError::Stt(format!("failed to finalize wav: {e}")))
}

/// Join whisper's stdout lines, dropping a leading `[hh:mm:ss --> hh:mm:ss]`
/// timestamp if the binary printed one anyway.
fn collect_text(stdout: &str) -> String {
    stdout
        .lines()
        .map(|line| {
            let line = line.trim();
            match (line.starts_with('['), line.find(']')) {
                (true, Some(end)) if line[..end].contains("-->") => line[end + 1..].trim(),
                _ => line,
            }
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Transcript> {
        let samples = pcm16_le_to_samples(pcm);
        if samples.is_empty() {
            return Ok(Transcript::failed());
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ParleyError::Stt(format!("transcription pool closed: {e}")))?;
        let started = Instant::now();

        let wav = TempWav(self.temp_path());
        let path = wav.0.clone();
        tokio::task::spawn_blocking(move || write_wav(&path, &samples, sample_rate, channels))
            .await
            .map_err(|e| ParleyError::Stt(format!("wav writer task failed: {e}")))??;

        let output = Command::new(&self.config.whisper_bin)
            .args(self.command_args(&wav.0))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ParleyError::Stt(format!("failed to run {}: {e}", self.config.whisper_bin))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ParleyError::Stt(format!(
                "{} exited with {}: {}",
                self.config.whisper_bin,
                output.status,
                stderr.trim()
            )));
        }

        let text = collect_text(&String::from_utf8_lossy(&output.stdout));
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "transcription finished");
        if text.is_empty() {
            Ok(Transcript::failed())
        } else {
            Ok(Transcript::recognised(text))
        }
    }
}
