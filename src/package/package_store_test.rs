use bytes::Bytes;

use super::*;
use crate::component::SdkHandle;

fn package(len: usize) -> OutboundPackage {
    OutboundPackage::new(
        "link-1".into(),
        Bytes::from(vec![0xAA; len]),
        SdkHandle(7),
        None,
    )
}

#[test]
fn test_bind_fragments_cover_prefix() {
    let mut store = PackageStore::new();
    let id = store.insert(package(100));

    let frag1 = store.bind_fragment(id, 1, 40).expect("bind");
    let frag2 = store.bind_fragment(id, 2, 40).expect("bind");
    let frag3 = store.bind_fragment(id, 3, 20).expect("bind");

    let pkg = store.get(id).unwrap();
    assert!(pkg.fully_bound());
    assert_eq!(pkg.fragments.len(), 3);
    assert_eq!(pkg.fragments[0].offset, 0);
    assert_eq!(pkg.fragments[1].offset, 40);
    assert_eq!(pkg.fragments[2].offset, 80);

    assert_eq!(store.package_of_fragment(frag1), Some(id));
    assert_eq!(store.package_of_fragment(frag2), Some(id));
    assert_eq!(store.package_of_fragment(frag3), Some(id));
}

#[test]
fn test_fragment_handles_are_unique_across_packages() {
    let mut store = PackageStore::new();
    let a = store.insert(package(10));
    let b = store.insert(package(10));

    let frag_a = store.bind_fragment(a, 1, 10).expect("bind");
    let frag_b = store.bind_fragment(b, 1, 10).expect("bind");
    assert_ne!(frag_a, frag_b);
    assert_eq!(store.package_of_fragment(frag_a), Some(a));
    assert_eq!(store.package_of_fragment(frag_b), Some(b));
}

#[test]
fn test_unbind_reopens_tail_bytes() {
    let mut store = PackageStore::new();
    let id = store.insert(package(100));

    store.bind_fragment(id, 1, 60).expect("bind");
    let tail = store.bind_fragment(id, 2, 40).expect("bind");
    assert!(store.get(id).unwrap().fully_bound());

    let dropped = store.unbind_fragment(tail).expect("unbind");
    assert_eq!(dropped.offset, 60);
    assert_eq!(dropped.len, 40);

    let pkg = store.get(id).unwrap();
    assert_eq!(pkg.bound_len(), 60);
    assert_eq!(pkg.unbound_len(), 40);
    assert_eq!(store.package_of_fragment(tail), None);

    // the reopened bytes bind again at the right offset
    let rebound = store.bind_fragment(id, 5, 40).expect("rebind");
    assert_eq!(store.get(id).unwrap().fragment(rebound).unwrap().offset, 60);
}

#[test]
fn test_remove_drops_fragment_handles() {
    let mut store = PackageStore::new();
    let id = store.insert(package(10));
    let frag = store.bind_fragment(id, 1, 10).expect("bind");

    let removed = store.remove(id).expect("remove");
    assert_eq!(removed.fragments.len(), 1);
    assert_eq!(store.package_of_fragment(frag), None);
    assert!(store.is_empty());
}

#[test]
fn test_all_sent_requires_full_coverage() {
    let mut store = PackageStore::new();
    let id = store.insert(package(10));
    let frag = store.bind_fragment(id, 1, 5).expect("bind");

    {
        let pkg = store.get_mut(id).unwrap();
        pkg.fragment_mut(frag).unwrap().state = PackageFragmentState::Sent;
        // only half the package is covered
        assert!(!pkg.all_sent());
    }

    let frag2 = store.bind_fragment(id, 2, 5).expect("bind");
    let pkg = store.get_mut(id).unwrap();
    pkg.fragment_mut(frag2).unwrap().state = PackageFragmentState::Sent;
    assert!(pkg.all_sent());
    assert!(pkg.all_terminal());
}

#[test]
fn test_all_terminal_with_failed_fragment() {
    let mut store = PackageStore::new();
    let id = store.insert(package(10));
    let frag1 = store.bind_fragment(id, 1, 5).expect("bind");
    let frag2 = store.bind_fragment(id, 2, 5).expect("bind");

    let pkg = store.get_mut(id).unwrap();
    pkg.fragment_mut(frag1).unwrap().state = PackageFragmentState::Sent;
    pkg.fragment_mut(frag2).unwrap().state = PackageFragmentState::Done;

    assert!(pkg.all_terminal());
    assert!(!pkg.all_sent());
}

#[test]
fn test_fragment_bytes_slices_package() {
    let mut store = PackageStore::new();
    let bytes: Vec<u8> = (0u8..10).collect();
    let id = store.insert(OutboundPackage::new(
        "link-1".into(),
        Bytes::from(bytes),
        SdkHandle(1),
        None,
    ));
    store.bind_fragment(id, 1, 4).expect("bind");
    let frag = store.bind_fragment(id, 2, 6).expect("bind");

    let pkg = store.get(id).unwrap();
    let fragment = pkg.fragment(frag).unwrap().clone();
    assert_eq!(&pkg.fragment_bytes(&fragment)[..], &[4, 5, 6, 7, 8, 9]);
}
