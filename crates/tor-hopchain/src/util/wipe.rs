//! Overwriting memory that used to hold secrets.
//!
//! Anything that held key material is overwritten before it is released, so
//! that freed memory never contains key bits.  Tag buffers are left holding a
//! fixed, recognizable byte, so that a stray read shows an obviously bogus
//! value.
//!
//! All writes here are volatile and followed by a compiler fence (the way
//! [`zeroize`] does it), so they survive even though the memory is about to
//! be freed.

use std::sync::atomic::{Ordering, compiler_fence};

use zeroize::Zeroize;

/// The byte we write over released key material.
pub(crate) const POISON_BYTE: u8 = 0xBB;

/// A type that holds no pointers or references, and for which all-zero bytes
/// are a valid value.
///
/// # Safety
///
/// Implementors must be "flat" in the sense of
/// [`zeroize::zeroize_flat_type`]: they may only contain integers, arrays of
/// integers, and other flat types, and an all-zero bit pattern must be a
/// valid value of the type.
pub(crate) unsafe trait FlatState: Sized {}

// SAFETY: SHA-1's state is five u32 words, a block counter, and a block
// buffer made of a byte array and an integer position.  This holds for the
// RustCrypto state and for OpenSSL's `SHA_CTX`.  All zero is valid.
unsafe impl FlatState for tor_llcrypto::d::Sha1 {}
// SAFETY: SHA3's state is a Keccak array of u64 words and a block buffer made
// of a byte array and a u8 position.  All zero is valid.
unsafe impl FlatState for tor_llcrypto::d::Sha3_256 {}

/// Zeroize `buf`, then overwrite every byte of it with [`POISON_BYTE`].
pub(crate) fn poison(buf: &mut [u8]) {
    buf.zeroize();
    for b in buf.iter_mut() {
        // SAFETY: `b` is a valid, aligned, exclusive reference to a u8.
        unsafe { std::ptr::write_volatile(b, POISON_BYTE) };
    }
    compiler_fence(Ordering::SeqCst);
}

/// Overwrite every byte of `state` with zero.
///
/// The RustCrypto digest types don't zeroize themselves, so this is how we
/// wipe the running digests.  `state` is left as a valid (all-zero) value,
/// which is dropped normally.
pub(crate) fn wipe_state<T: FlatState>(state: &mut T) {
    // SAFETY: `T: FlatState` guarantees that `T` is flat and that all-zero
    // bytes are a valid `T`; the pointer comes from an exclusive reference.
    unsafe { zeroize::zeroize_flat_type(state as *mut T) };
}
