//! Piper command-line synthesis.
//!
//! Text is written to piper's stdin and raw PCM16 LE is read back from
//! stdout in fixed-size chunks. The child process lives inside the returned
//! stream and is killed if the stream is dropped early.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{PcmStream, Synthesizer};
use crate::config::TtsConfig;
use crate::error::{ParleyError, Result};

/// Synthesizer backed by the `piper` executable.
pub struct PiperCliSynthesizer {
    config: TtsConfig,
    permits: Arc<Semaphore>,
}

impl PiperCliSynthesizer {
    pub fn new(config: &TtsConfig) -> Self {
        info!(
            "TTS configured: {} voice={}",
            config.piper_bin,
            config.model_path.display()
        );
        Self {
            config: config.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.piper_bin);
        cmd.arg("--model").arg(&self.config.model_path);
        if let Some(voice_config) = &self.config.config_path {
            cmd.arg("--config").arg(voice_config);
        }
        cmd.arg("--output-raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Stream `reader` as chunks of `chunk_bytes`. The last chunk may be shorter
/// and is trimmed to a whole number of samples.
pub fn chunked_pcm<R>(mut reader: R, chunk_bytes: usize) -> PcmStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let chunk_bytes = chunk_bytes.max(2);
    Box::pin(async_stream::stream! {
        loop {
            let mut buf = vec![0u8; chunk_bytes];
            match read_chunk(&mut reader, &mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n - n % 2);
                    if !buf.is_empty() {
                        yield Ok::<Vec<u8>, ParleyError>(buf);
                    }
                    if n < chunk_bytes {
                        break;
                    }
                }
                Err(e) => {
                    yield Err(ParleyError::Tts(format!("failed to read audio: {e}")));
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl Synthesizer for PiperCliSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PcmStream> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ParleyError::Tts(format!("synthesis pool closed: {e}")))?;

        let mut child = self.command().spawn().map_err(|e| {
            ParleyError::Tts(format!("failed to run {}: {e}", self.config.piper_bin))
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ParleyError::Tts("piper stdin unavailable".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ParleyError::Tts("piper stdout unavailable".to_owned()))?;

        let line = format!("{}\n", text.replace('\n', " "));
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ParleyError::Tts(format!("failed to send text to piper: {e}")))?;
        drop(stdin);
        debug!(chars = text.len(), "synthesis started");

        let mut chunks = chunked_pcm(stdout, self.config.chunk_bytes);
        let bin = self.config.piper_bin.clone();
        Ok(Box::pin(async_stream::stream! {
            // Held until the stream ends or is dropped.
            let _permit = permit;
            let mut child = child;
            while let Some(chunk) = futures_util::StreamExt::next(&mut chunks).await {
                yield chunk;
            }
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    yield Err(ParleyError::Tts(format!("{bin} exited with {status}")));
                }
                Err(e) => {
                    yield Err(ParleyError::Tts(format!("failed to wait for {bin}: {e}")));
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn chunks_are_fixed_size_with_short_tail() {
        let data: Vec<u8> = (0..10u8).collect();
        let chunks: Vec<Vec<u8>> = chunked_pcm(std::io::Cursor::new(data), 4)
            .map(|c| c.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
    }

    #[tokio::test]
    async fn odd_tail_is_trimmed_to_whole_samples() {
        let chunks: Vec<Vec<u8>> = chunked_pcm(std::io::Cursor::new(vec![1u8, 2, 3]), 4)
            .map(|c| c.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks, vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        let mut stream = chunked_pcm(std::io::Cursor::new(Vec::new()), 4);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_tts_error() {
        let config = TtsConfig {
            piper_bin: "/nonexistent/piper".to_owned(),
            ..TtsConfig::default()
        };
        let tts = PiperCliSynthesizer::new(&config);
        assert!(matches!(
            tts.synthesize("hello").await,
            Err(ParleyError::Tts(_))
        ));
    }
}
