//! Action queue
//!
//! Reconciles create/update/delete lines into per-id [`ActionRecord`]s and exposes them
//! as an ordered queue, together with the operator-curated run list and the element
//! recorder that feeds it.

pub mod queue;
pub mod reconciler;
pub mod recorder;
pub mod runlist;

pub use queue::{ActionQueueEntry, EntrySource};
pub use reconciler::{ActionRecord, ActionStatus, ApplyOutcome, Reconciler};
pub use recorder::{RecordGuard, RecordedElement, RecordedItem, Recorder};
pub use runlist::{RunList, RunListEntry};
