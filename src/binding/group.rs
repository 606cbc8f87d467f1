use super::slot::{BindingSlot, SlotContainer};

/// A fixed-size ordered collection of [`BindingSlot`]s bound as one
/// diff-range (simultaneous render targets, vertex streams, ...).
///
/// The group itself only stores slot data; the resolve pass on
/// [`BindQueue`](crate::queue::BindQueue) tracks the minimum and maximum
/// changed index and fires a single group-level
/// [`bind_range`](crate::backend::QueueBinder::bind_range) callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGroup {
    container: SlotContainer,
    slots: Vec<BindingSlot>,
}

impl SlotGroup {
    #[must_use]
    pub fn new(container: SlotContainer, len: usize) -> Self {
        Self {
            container,
            slots: vec![BindingSlot::default(); len],
        }
    }

    #[must_use]
    pub fn container(&self) -> SlotContainer {
        self.container
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> &BindingSlot {
        &self.slots[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut BindingSlot {
        &mut self.slots[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BindingSlot> {
        self.slots.iter()
    }

    /// Clear every slot back to the default (nothing requested, nothing
    /// bound).
    pub(crate) fn clear(&mut self) {
        self.slots.fill(BindingSlot::default());
    }

    /// Copy slot data from `src` without reallocating. Both groups come from
    /// the same [`QueueLimits`](crate::backend::QueueLimits), so lengths
    /// always agree.
    pub(crate) fn copy_from(&mut self, src: &SlotGroup) {
        debug_assert_eq!(self.slots.len(), src.slots.len());
        self.container = src.container;
        self.slots.copy_from_slice(&src.slots);
    }
}

impl<'a> IntoIterator for &'a SlotGroup {
    type Item = &'a BindingSlot;
    type IntoIter = std::slice::Iter<'a, BindingSlot>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.iter()
    }
}
