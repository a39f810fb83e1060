//! Wraparound-aware RTP sequence number arithmetic.
//!
//! RTP sequence numbers live in a circular 16-bit space, so ordering and
//! distance are only meaningful modulo 2^16: the packet after 65535 carries
//! sequence number 0 and is one step "newer".

/// Signed difference between two 16-bit RTP sequence numbers, treating the
/// space as circular.
///
/// `seq_delta(a, b)` is the smallest (in magnitude) `d` such that
/// `b.wrapping_add(d) == a`:
///
/// ```
/// use telemetry_shared::seqnum::seq_delta;
///
/// assert_eq!(seq_delta(5, 3), 2);
/// assert_eq!(seq_delta(0, 65535), 1);
/// assert_eq!(seq_delta(3, 5), -2);
/// ```
pub fn seq_delta(a: u16, b: u16) -> i32 {
    i32::from(a.wrapping_sub(b) as i16)
}

/// Whether `a` is strictly newer than `b` under the circular comparison.
pub fn is_newer(a: u16, b: u16) -> bool {
    seq_delta(a, b) > 0
}
