pub mod package_store;

#[cfg(test)]
mod package_store_test;

use std::fmt;

use bytes::Bytes;

pub use package_store::PackageStore;

use crate::component::{ActionId, LinkId, PackageFragmentHandle, SdkHandle, Timestamp};

/// Internal id of an outbound package in the store.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub u64);

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress of one fragment from binding to a delivery verdict.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PackageFragmentState {
    #[default]
    Unencoded,
    Encoding,
    Encoded,
    /// Handed to the transport; awaiting its per-fragment status report.
    Enqueued,
    /// The transport confirmed this fragment left.
    Sent,
    /// Terminal without confirmation of sending (failed, cancelled, or
    /// timed out).
    Done,
}

impl PackageFragmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PackageFragmentState::Sent | PackageFragmentState::Done)
    }
}

impl fmt::Display for PackageFragmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            PackageFragmentState::Unencoded => "unencoded",
            PackageFragmentState::Encoding => "encoding",
            PackageFragmentState::Encoded => "encoded",
            PackageFragmentState::Enqueued => "enqueued",
            PackageFragmentState::Sent => "sent",
            PackageFragmentState::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// A contiguous `[offset, offset + len)` slice of a package, bound to at
/// most one action's encoding slot at a time.
#[derive(Debug, Clone)]
pub struct PackageFragment {
    pub handle: PackageFragmentHandle,
    /// The action carrying this fragment. `None` after the action fired (the
    /// transport tracks it by handle) or while detached during a rescue.
    pub action_id: Option<ActionId>,
    pub offset: usize,
    pub len: usize,
    pub state: PackageFragmentState,
}

/// An outbound payload plus the fragmentation state the send pipeline
/// layers on it. Fragments are kept in binding order; their slices cover a
/// contiguous prefix of `bytes` with no gaps or overlaps.
#[derive(Debug, Clone)]
pub struct OutboundPackage {
    pub link_id: LinkId,
    pub bytes: Bytes,
    pub sdk_handle: SdkHandle,
    pub deadline: Option<Timestamp>,
    pub fragments: Vec<PackageFragment>,
    /// Set once a failure has been reported upward, so siblings finishing
    /// later cannot produce a second report.
    pub failed: bool,
}

impl OutboundPackage {
    pub fn new(
        link_id: LinkId,
        bytes: Bytes,
        sdk_handle: SdkHandle,
        deadline: Option<Timestamp>,
    ) -> Self {
        OutboundPackage {
            link_id,
            bytes,
            sdk_handle,
            deadline,
            fragments: Vec::new(),
            failed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes covered by fragments. Fragments always cover a prefix, so this
    /// is also the offset of the next fragment to bind.
    pub fn bound_len(&self) -> usize {
        self.fragments.iter().map(|f| f.len).sum()
    }

    /// Bytes not yet bound to any action.
    pub fn unbound_len(&self) -> usize {
        self.len() - self.bound_len()
    }

    pub fn fully_bound(&self) -> bool {
        self.unbound_len() == 0
    }

    /// The package is complete and confirmed: fragments cover all bytes and
    /// every one was reported sent.
    pub fn all_sent(&self) -> bool {
        self.fully_bound()
            && !self.fragments.is_empty()
            && self
                .fragments
                .iter()
                .all(|f| f.state == PackageFragmentState::Sent)
    }

    pub fn all_terminal(&self) -> bool {
        self.fully_bound()
            && !self.fragments.is_empty()
            && self.fragments.iter().all(|f| f.state.is_terminal())
    }

    pub fn fragment(&self, handle: PackageFragmentHandle) -> Option<&PackageFragment> {
        self.fragments.iter().find(|f| f.handle == handle)
    }

    pub fn fragment_mut(&mut self, handle: PackageFragmentHandle) -> Option<&mut PackageFragment> {
        self.fragments.iter_mut().find(|f| f.handle == handle)
    }

    /// The slice of package bytes a fragment stands for.
    pub fn fragment_bytes(&self, fragment: &PackageFragment) -> Bytes {
        self.bytes.slice(fragment.offset..fragment.offset + fragment.len)
    }
}
