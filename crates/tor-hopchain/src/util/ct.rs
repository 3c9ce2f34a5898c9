//! Constant-time utilities.
use subtle::ConstantTimeEq;

/// Return true if two slices are equal.  Performs its operation in constant
/// time, but returns a bool instead of a subtle::Choice.
pub(crate) fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    let choice = a.ct_eq(b);
    choice.unwrap_u8() == 1
}

/// Return true if all of the bytes in `x` are zero.
pub(crate) fn is_zero(x: &[u8]) -> bool {
    let mut acc: u8 = 0;
    for b in x {
        acc |= b;
    }
    acc.ct_eq(&0).unwrap_u8() == 1
}
