//! Secure memory wipe: multi-pass overwrite used before any buffer that held
//! request state is released. Pass pattern: 0xFF, 0x00, 0xFF, index pattern,
//! final zero.

use std::sync::atomic::{compiler_fence, Ordering};

/// Overwrite `buf` in place. Writes are volatile so the passes survive
/// dead-store elimination ahead of a deallocation.
pub fn secure_wipe(buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    for pattern in [0xFFu8, 0x00, 0xFF] {
        wipe_pass(buf, |_| pattern);
    }
    wipe_pass(buf, |i| (i % 256) as u8);
    wipe_pass(buf, |_| 0x00);
}

fn wipe_pass(buf: &mut [u8], f: impl Fn(usize) -> u8) {
    let ptr = buf.as_mut_ptr();
    for i in 0..buf.len() {
        // SAFETY: `i` is within `buf`, and the pointer stays valid for the
        // whole loop; volatile keeps the store observable.
        unsafe { ptr.add(i).write_volatile(f(i)) };
    }
    compiler_fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wipe_zeroes_everything() {
        let mut buf = vec![0xABu8; 4096];
        secure_wipe(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_buffer_is_fine() {
        let mut buf: Vec<u8> = Vec::new();
        secure_wipe(&mut buf);
    }
}
