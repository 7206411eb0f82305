//! Cross-thread primitives. `queue` and `broadcast` belonged to the old
//! combinator-based reactor and have no counterpart in this core's worker
//! pool (see DESIGN.md); only the self-pipe-backed signal channel survives.
pub mod signal;
