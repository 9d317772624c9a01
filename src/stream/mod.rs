pub mod accumulator;
pub mod decoder;
pub mod frame;
pub mod reassembler;
pub mod thinking;

pub use accumulator::{AccumulatorUpdate, MessageAccumulator};
pub use reassembler::{DeltaChunk, DeltaMode, StreamReassembler, StreamState};
