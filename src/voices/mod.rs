//! Voice allocation and the polyphonic render pool.

pub mod ledger;
pub mod pool;
