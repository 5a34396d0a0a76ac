// src/layers/mod.rs
// Layers owned by the engine itself. Concrete compute layers live outside
// this crate and only meet the graph through the `Layer` trait.

pub mod accumulation;
pub mod input;

pub use accumulation::GradientAccumulationLayer;
pub use input::{InputFeeder, InputLayer};
