//! DSP building blocks: signal nodes, generators, filters, and envelopes.

pub mod comb;
pub mod envelope;
pub mod filter;
pub mod node;
pub mod oscillator;
