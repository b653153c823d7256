//! Per-instruction-family handlers, split out of the main dispatch loop the
//! same way `subset_julia_vm`'s `vm/exec/` groups handlers by concern.

pub mod calls;
pub mod fallback;
pub mod scope;
