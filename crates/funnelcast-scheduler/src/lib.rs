//! # Funnelcast Scheduler
//!
//! The broadcast subsystem: decides when a campaign is due, who receives it,
//! and pushes it out one recipient at a time.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio interval, one tick per minute)
//!   ├── BotDb::list_due() → armed broadcasts, earliest due first
//!   ├── audience::resolve → recipient ids (all / by-stage-set, deduped)
//!   ├── delivery::deliver → sequential sends with pacing + per-send timeout
//!   └── outcome:
//!         ok     → status 'sent', run stats; recurring → recurrence::next_occurrence → re-arm
//!         failed → status 'failed'; recurring chain halts for operator attention
//! ```
//!
//! A crashed broadcast never crashes the tick, and a crashed tick never
//! crashes the loop; the next tick retries from a fresh `list_due()`
//! snapshot.

pub mod audience;
pub mod delivery;
pub mod engine;
pub mod recurrence;

pub use delivery::{DeliveryOptions, DeliveryReport};
pub use engine::SchedulerEngine;
pub use recurrence::next_occurrence;
