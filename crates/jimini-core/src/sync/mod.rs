//! Offline-first synchronization engine.
//!
//! One sync cycle:
//!
//! ```text
//!   fetch patients ─┐
//!                   ├─► validate ─► reconcile patients ─► reconcile notes
//!   fetch notes ────┘                                          │
//!                                                              ▼
//!                                  upload pending/failed notes, one at a time
//!                                                              │
//!                                                              ▼
//!                                         purge confirmed deletions, stamp
//! ```
//!
//! - [`Reconciler`]: batch upsert by natural key, one transaction per batch
//! - [`SyncEngine`]: the cycle itself, guarded so only one runs at a time

mod engine;
mod reconciler;

pub use engine::*;
pub use reconciler::*;
