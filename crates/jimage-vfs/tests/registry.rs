//! Shared reader registry and handle lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use jimage_reader::testing::ImageBuilder;
use jimage_reader::{Endian, ImageOptions};
use jimage_vfs::{Error, ImageReader, SharedImageReader};
use tempfile::TempDir;

fn write_image(endian: Endian) -> (TempDir, PathBuf) {
    let mut builder = ImageBuilder::new(endian);
    builder
        .add_resource("/java.base/java/lang/Object.class", b"object")
        .add_resource("/java.base/java/lang/Thread.class", b"thread")
        .add_resource("/java.logging/java/util/logging/Logger.class", b"logger")
        .add_module_tree();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("modules");
    builder.write_to(&path).unwrap();
    (dir, path)
}

fn options(endian: Endian) -> ImageOptions {
    ImageOptions::default().with_endian(endian)
}

#[test]
fn handles_share_one_reader() {
    let (_dir, path) = write_image(Endian::Little);

    let first = ImageReader::open_with(&path, options(Endian::Little)).unwrap();
    let second = ImageReader::open_with(&path, options(Endian::Little)).unwrap();
    assert!(SharedImageReader::is_registered(&path));

    let shared = first.shared().unwrap();
    assert!(Arc::ptr_eq(&shared, &second.shared().unwrap()));
    assert_eq!(shared.handle_count(), 2);

    // Nodes built through one handle are visible through the other.
    let node = first
        .find_node("/modules/java.base/java/lang/Object.class")
        .unwrap()
        .unwrap();
    let lookups = shared.image().lookup_count();
    let again = second
        .find_node("/modules/java.base/java/lang/Object.class")
        .unwrap()
        .unwrap();
    assert_eq!(node.id(), again.id());
    assert_eq!(shared.image().lookup_count(), lookups);
    drop(shared);

    first.close().unwrap();
    assert!(SharedImageReader::is_registered(&path));
    assert_eq!(second.read_node(&again).unwrap(), b"object");

    second.close().unwrap();
    assert!(!SharedImageReader::is_registered(&path));
}

#[test]
fn reopen_after_release_parses_again() {
    let (_dir, path) = write_image(Endian::Big);

    let first = ImageReader::open_with(&path, options(Endian::Big)).unwrap();
    let weak = Arc::downgrade(&first.shared().unwrap());
    first.close().unwrap();
    assert!(weak.upgrade().is_none());

    let second = ImageReader::open_with(&path, options(Endian::Big)).unwrap();
    assert_eq!(second.shared().unwrap().handle_count(), 1);
    assert!(second.find_node("/modules/java.logging").unwrap().is_some());
}

#[test]
fn close_twice_and_use_after_close() {
    let (_dir, path) = write_image(Endian::Little);
    let reader = ImageReader::open_with(&path, options(Endian::Little)).unwrap();

    reader.close().unwrap();
    assert!(!reader.is_open());
    assert!(matches!(reader.close(), Err(Error::Closed)));
    assert!(matches!(reader.find_node("/modules"), Err(Error::Closed)));
    assert!(matches!(reader.root_directory(), Err(Error::Closed)));
    assert!(matches!(reader.entry_names(), Err(Error::Closed)));
}

#[test]
fn returned_bytes_outlive_the_reader() {
    let (_dir, path) = write_image(Endian::Little);
    let reader = ImageReader::open_with(&path, options(Endian::Little)).unwrap();

    let bytes = reader
        .read_resource("java.logging", "java/util/logging/Logger.class")
        .unwrap()
        .unwrap();
    reader.close().unwrap();
    assert_eq!(bytes, b"logger");
}

#[test]
fn byte_order_must_match() {
    let (_dir, path) = write_image(Endian::Little);

    let reader = ImageReader::open_with(&path, options(Endian::Little)).unwrap();
    assert!(matches!(
        ImageReader::open_with(&path, options(Endian::Big)),
        Err(Error::ByteOrderMismatch { .. })
    ));
    assert_eq!(reader.shared().unwrap().handle_count(), 1);
}

#[test]
fn failed_open_registers_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken");
    std::fs::write(&path, b"definitely not an image, but long enough to hold a header").unwrap();

    assert!(matches!(
        ImageReader::open(&path),
        Err(Error::Reader(jimage_reader::Error::NotAnImage { .. }))
    ));
    assert!(!SharedImageReader::is_registered(&path));

    assert!(matches!(
        ImageReader::open(dir.path().join("missing")),
        Err(Error::Io(_))
    ));
}

#[test]
fn drop_closes_handle() {
    let (_dir, path) = write_image(Endian::Little);

    let keep = ImageReader::open_with(&path, options(Endian::Little)).unwrap();
    {
        let _temporary = ImageReader::open_with(&path, options(Endian::Little)).unwrap();
        assert_eq!(keep.shared().unwrap().handle_count(), 2);
    }
    assert_eq!(keep.shared().unwrap().handle_count(), 1);

    drop(keep);
    assert!(!SharedImageReader::is_registered(&path));
}

#[test]
fn concurrent_handles() {
    let (_dir, path) = write_image(Endian::Little);
    let paths = [
        "/modules/java.base/java/lang/Object.class",
        "/modules/java.base/java/lang/Thread.class",
        "/packages/java.util.logging/java.logging",
        "/modules/java.logging",
        "/packages",
    ];

    // Keeps one shared reader alive for every thread.
    let keep = ImageReader::open_with(&path, options(Endian::Little)).unwrap();

    let results: Vec<Vec<(String, usize)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = &path;
                scope.spawn(move || {
                    let reader = ImageReader::open_with(path, options(Endian::Little)).unwrap();
                    let mut seen = Vec::new();
                    for offset in 0..paths.len() {
                        let name = paths[(i + offset) % paths.len()];
                        let node = reader.find_node(name).unwrap().unwrap();
                        seen.push((node.name().to_string(), node.id().index()));
                    }
                    reader.close().unwrap();
                    seen.sort();
                    seen
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Every thread saw the same node for each path, whichever built it.
    for seen in &results[1..] {
        assert_eq!(seen, &results[0]);
    }
    assert_eq!(keep.shared().unwrap().handle_count(), 1);

    keep.close().unwrap();
    assert!(!SharedImageReader::is_registered(&path));
}

#[test]
fn concurrent_lookups_on_one_handle() {
    let (_dir, path) = write_image(Endian::Little);
    let reader = ImageReader::open_with(&path, options(Endian::Little)).unwrap();

    let ids: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let node = reader
                        .find_node("/packages/java.lang/java.base")
                        .unwrap()
                        .unwrap();
                    let target = reader.resolve_link(&node, true).unwrap();
                    assert_eq!(target.name(), "/modules/java.base");
                    (node.id(), target.id())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    reader.close().unwrap();
}
