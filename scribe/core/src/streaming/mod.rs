//! Streaming
//!
//! Reassembly of streamed assistant turns into readable text.

mod assembler;

pub use assembler::{
    AssemblerEffect, AssemblerStats, FlushPolicy, FlushTrigger, StreamAssembler, TurnPhase,
    DEFAULT_BOUNDARIES,
};
