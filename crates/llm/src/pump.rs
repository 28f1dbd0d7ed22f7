// Chunk pump: drains a text stream into lifecycle-tagged chunks.
//
//   first token ─▶ first      (empty `first` if the stream ends at once)
//   next tokens ─▶ middle
//   end         ─▶ last ""
//   error       ─▶ last-error ""
//   abort       ─▶ nothing; the caller's abortChat finalizes the row

use futures_util::StreamExt;
use tokio::sync::watch;

use liqua_common::stream::ChunkType;

use crate::error::GenerationError;
use crate::generator::{GenerationRequest, TextGenerator, TextStream};

/// Receives each chunk. Writes are expected to be quick and local.
pub trait ChunkSink: Send {
    fn push_chunk(&mut self, chunk: &str, chunk_type: ChunkType) -> Result<(), GenerationError>;
}

impl<F> ChunkSink for F
where
    F: FnMut(&str, ChunkType) -> Result<(), GenerationError> + Send,
{
    fn push_chunk(&mut self, chunk: &str, chunk_type: ChunkType) -> Result<(), GenerationError> {
        self(chunk, chunk_type)
    }
}

/// Fires an [`AbortSignal`]. Dropping the handle does not abort.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal { rx: self.tx.subscribe() }
    }
}

#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once aborted; never resolves if the handle is gone first.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    Completed { chunks: usize },
    Failed { error: String },
    Aborted,
}

/// Drain `stream` into `sink` until it ends, fails, or `abort` fires.
///
/// Only sink failures are returned as errors; a failing stream is reported
/// to the sink as `last-error` and comes back as [`PumpOutcome::Failed`].
pub async fn pump<S>(mut stream: TextStream, sink: &mut S, mut abort: AbortSignal) -> Result<PumpOutcome, GenerationError>
where
    S: ChunkSink + ?Sized,
{
    let mut chunks = 0usize;
    loop {
        if abort.is_aborted() {
            return Ok(PumpOutcome::Aborted);
        }
        let next = tokio::select! {
            biased;
            _ = abort.aborted() => return Ok(PumpOutcome::Aborted),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(text)) => {
                let chunk_type = if chunks == 0 { ChunkType::First } else { ChunkType::Middle };
                sink.push_chunk(&text, chunk_type)?;
                chunks += 1;
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, chunks, "generation stream failed");
                sink.push_chunk("", ChunkType::LastError)?;
                return Ok(PumpOutcome::Failed { error: err.to_string() });
            }
            None => {
                if chunks == 0 {
                    sink.push_chunk("", ChunkType::First)?;
                }
                sink.push_chunk("", ChunkType::Last)?;
                return Ok(PumpOutcome::Completed { chunks });
            }
        }
    }
}

/// Start `request` on `generator` and pump the result. A request that fails
/// before streaming still finalizes the message as `error`.
pub async fn generate_into<S>(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
    sink: &mut S,
    abort: AbortSignal,
) -> Result<PumpOutcome, GenerationError>
where
    S: ChunkSink + ?Sized,
{
    let model = request.model.clone();
    let mut early_abort = abort.clone();
    let started = tokio::select! {
        biased;
        _ = early_abort.aborted() => return Ok(PumpOutcome::Aborted),
        started = generator.generate(request) => started,
    };

    match started {
        Ok(stream) => {
            let outcome = pump(stream, sink, abort).await?;
            tracing::info!(provider = generator.provider(), %model, ?outcome, "generation finished");
            Ok(outcome)
        }
        Err(err) => {
            tracing::warn!(provider = generator.provider(), %model, error = %err, "generation did not start");
            sink.push_chunk("", ChunkType::LastError)?;
            Ok(PumpOutcome::Failed { error: err.to_string() })
        }
    }
}
