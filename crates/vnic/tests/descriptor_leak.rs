//! Failed device creation must not leave descriptors behind.
//!
//! Kept in its own test binary so no other test opens descriptors concurrently.
#![cfg(target_os = "linux")]

use std::fs;
use vnic::{DeviceHandle, VnicError};

fn open_fds() -> usize {
    fs::read_dir("/proc/self/fd").map(|d| d.count()).unwrap_or(0)
}

#[test]
fn failed_create_releases_descriptors() {
    let before = open_fds();

    // Unprivileged: TUNSETIFF fails after /dev/net/tun was opened.
    // Privileged: a second device with the same name cannot be attached.
    match DeviceHandle::create("vnicleak0") {
        Err(VnicError::ResourceUnavailable { .. }) => {}
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(mut first) => {
            let during = open_fds();
            match DeviceHandle::create("vnicleak0") {
                Err(VnicError::ResourceUnavailable { .. }) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
                Ok(_) => panic!("second attach to vnicleak0 succeeded"),
            }
            assert_eq!(open_fds(), during);
            first.close().unwrap();
        }
    }

    assert_eq!(open_fds(), before);
}
