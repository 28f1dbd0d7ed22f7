// liqua-llm: text generation providers and the chunk pump that feeds
// generated text into `pushAssistantMessageChunk`.

pub mod error;
pub mod generator;
mod lines;
pub mod ollama;
pub mod openrouter;
pub mod prompt;
pub mod pump;
pub mod scripted;

pub use error::GenerationError;
pub use generator::{
    build_generator, GenerationRequest, GeneratorSettings, Provider, ReasoningEffort,
    SharedGenerator, TextGenerator, TextStream,
};
pub use pump::{abort_pair, generate_into, pump, AbortHandle, AbortSignal, ChunkSink, PumpOutcome};
