// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Workflow coordination only: no tensor math, no printing.

// The training workflow
pub mod train_use_case;

// Checkpoint inspection
pub mod inspect_use_case;
