pub mod action_store;

#[cfg(test)]
mod action_store_test;

use std::fmt;

use bytes::Bytes;

pub use action_store::{ActionStore, TimelineMerge};

use crate::component::{
    Action, ActionId, EncodingHandle, EncodingParameters, LinkId, PackageFragmentHandle, Timestamp,
};

/// Progress of one encoding slot toward content the transport can post.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncodingSlotState {
    /// Nothing requested yet; fragments may still bind into this slot.
    #[default]
    Unencoded,

    /// An `encode_bytes` request is in flight.
    Encoding,

    /// Content is ready to hand to the transport.
    Encoded,

    /// Content was staged via `enqueue_content`.
    Enqueued,
}

impl fmt::Display for EncodingSlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            EncodingSlotState::Unencoded => "unencoded",
            EncodingSlotState::Encoding => "encoding",
            EncodingSlotState::Encoded => "encoded",
            EncodingSlotState::Enqueued => "enqueued",
        };
        write!(f, "{s}")
    }
}

/// One declared opportunity within an action to encode up to `max_bytes`
/// under a specific encoding.
#[derive(Debug, Clone)]
pub struct EncodingSlot {
    pub params: EncodingParameters,
    pub max_bytes: u32,
    pub state: EncodingSlotState,
    /// Handle of the in-flight encode request, while `state == Encoding`.
    pub handle: Option<EncodingHandle>,
    /// Encoded content, once `state == Encoded`.
    pub content: Option<Bytes>,
    /// Fragments riding in this slot, in wire order.
    pub fragments: Vec<PackageFragmentHandle>,
    /// Payload bytes already committed to this slot, excluding framing
    /// overhead.
    pub bound_bytes: usize,
}

impl EncodingSlot {
    pub fn new(params: EncodingParameters, max_bytes: u32) -> Self {
        EncodingSlot {
            params,
            max_bytes,
            state: EncodingSlotState::Unencoded,
            handle: None,
            content: None,
            fragments: Vec::new(),
            bound_bytes: 0,
        }
    }

    /// Resets the slot to its pre-encode state, dropping any in-flight
    /// request or staged content. Bound fragments are untouched.
    pub fn reset(&mut self) {
        self.state = EncodingSlotState::Unencoded;
        self.handle = None;
        self.content = None;
    }
}

/// An action the store is tracking: the User Model's `Action` plus the
/// link binding, encoding slots, and merge bookkeeping the core layers on
/// top.
#[derive(Debug, Clone)]
pub struct ScheduledAction {
    pub action: Action,
    /// Target link. `None` while a wildcard action is uncommitted.
    pub link_id: Option<LinkId>,
    /// Whether the transport declared this action's link as a wildcard.
    pub wildcard: bool,
    pub slots: Vec<EncodingSlot>,
    /// Set during timeline merge when the User Model withdrew this action;
    /// it survives only until its fragments have been rescued.
    pub to_be_removed: bool,
}

impl ScheduledAction {
    pub fn new(action: Action) -> Self {
        ScheduledAction {
            action,
            link_id: None,
            wildcard: false,
            slots: Vec::new(),
            to_be_removed: false,
        }
    }

    pub fn id(&self) -> ActionId {
        self.action.action_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.action.timestamp
    }

    /// Whether new fragments may still bind into this action.
    pub fn accepts_fragments(&self) -> bool {
        !self.to_be_removed
            && self
                .slots
                .iter()
                .all(|slot| slot.state == EncodingSlotState::Unencoded)
    }

    /// Every slot that should carry content has it.
    pub fn fully_encoded(&self) -> bool {
        !self.slots.is_empty()
            && self
                .slots
                .iter()
                .all(|slot| slot.state == EncodingSlotState::Encoded)
    }

    /// No encode has been requested for any slot yet.
    pub fn unencoded(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.state == EncodingSlotState::Unencoded)
    }

    /// Whether any slot has an encode request in flight.
    pub fn encoding_in_flight(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.state == EncodingSlotState::Encoding)
    }

    /// Handles of every bound fragment, slot by slot in wire order. This is
    /// the list the transport's `do_action` receives.
    pub fn fragment_handles(&self) -> Vec<PackageFragmentHandle> {
        self.slots
            .iter()
            .flat_map(|slot| slot.fragments.iter().copied())
            .collect()
    }
}
