use std::collections::HashMap;

use crate::component::{ActionId, PackageFragmentHandle};

use super::{OutboundPackage, PackageFragment, PackageFragmentState, PackageId};

/// Owns every outbound package of a channel and the handle index the
/// transport's per-fragment status reports resolve through. Queue order
/// lives on the links; the store is a flat arena.
#[derive(Debug, Default)]
pub struct PackageStore {
    packages: HashMap<PackageId, OutboundPackage>,
    fragment_index: HashMap<PackageFragmentHandle, PackageId>,
    next_package_id: u64,
    next_fragment_handle: u64,
}

impl PackageStore {
    pub fn new() -> Self {
        PackageStore::default()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn insert(&mut self, package: OutboundPackage) -> PackageId {
        let id = PackageId(self.next_package_id);
        self.next_package_id += 1;
        self.packages.insert(id, package);
        id
    }

    pub fn get(&self, id: PackageId) -> Option<&OutboundPackage> {
        self.packages.get(&id)
    }

    pub fn get_mut(&mut self, id: PackageId) -> Option<&mut OutboundPackage> {
        self.packages.get_mut(&id)
    }

    /// Removes a package and drops every fragment handle it still owned.
    pub fn remove(&mut self, id: PackageId) -> Option<OutboundPackage> {
        let package = self.packages.remove(&id)?;
        for fragment in &package.fragments {
            self.fragment_index.remove(&fragment.handle);
        }
        Some(package)
    }

    pub fn package_of_fragment(&self, handle: PackageFragmentHandle) -> Option<PackageId> {
        self.fragment_index.get(&handle).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.packages.keys().copied()
    }

    /// Binds a fresh fragment covering the next `len` unbound bytes of
    /// `package_id` to `action_id`. The fragment's offset is implied by the
    /// prefix-coverage invariant.
    pub fn bind_fragment(
        &mut self,
        package_id: PackageId,
        action_id: ActionId,
        len: usize,
    ) -> Option<PackageFragmentHandle> {
        let package = self.packages.get_mut(&package_id)?;
        let offset = package.bound_len();
        debug_assert!(offset + len <= package.len());

        let handle = PackageFragmentHandle(self.next_fragment_handle);
        self.next_fragment_handle += 1;
        package.fragments.push(PackageFragment {
            handle,
            action_id: Some(action_id),
            offset,
            len,
            state: PackageFragmentState::Unencoded,
        });
        self.fragment_index.insert(handle, package_id);
        Some(handle)
    }

    /// Drops a not-yet-fired fragment from its package, reopening the bytes
    /// it covered. Only valid for the trailing fragments of a package;
    /// callers unbind from the back to preserve prefix coverage.
    pub fn unbind_fragment(&mut self, handle: PackageFragmentHandle) -> Option<PackageFragment> {
        let package_id = self.fragment_index.remove(&handle)?;
        let package = self.packages.get_mut(&package_id)?;
        let pos = package.fragments.iter().position(|f| f.handle == handle)?;
        Some(package.fragments.remove(pos))
    }
}
