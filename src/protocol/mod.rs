//! Protocol module - Defines the OSC wire format
//!
//! Every field on the wire is big-endian and 4-byte aligned:
//! - Message: address string, `,`-prefixed type tag string, one payload per tag
//! - Bundle: `#bundle\0`, 64-bit NTP time tag, then size-prefixed elements
//!
//! Strings are NUL-terminated and padded with NUL bytes to a multiple of 4.

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Marker that opens every bundle, NUL terminator included
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01)
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Every field is padded to this many bytes
pub const ALIGNMENT: usize = 4;

/// Deepest bundle nesting the decoder will follow
pub const MAX_BUNDLE_DEPTH: usize = 64;

/// Round `len` up to the next multiple of [`ALIGNMENT`]
pub const fn padded_len(len: usize) -> usize {
    (len + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}
