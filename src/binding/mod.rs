//! Binding slots and slot groups
//!
//! A [`BindingSlot`] is one named pipeline attachment point holding a
//! *requested* and a *currently-bound* resource; a [`SlotGroup`] is a
//! fixed-size ordered collection of slots (render targets, vertex streams)
//! bound as one diff-range. The resolve pass that diffs requested against
//! bound state lives on [`BindQueue`](crate::queue::BindQueue), which has
//! the cross-container view conflict resolution needs.

mod group;
mod slot;

pub use group::SlotGroup;
pub use slot::{BindMask, BindingSlot, QueueId, ResolveOutcome, SlotAddr, SlotContainer};
