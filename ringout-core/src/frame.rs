//! Packed stereo frame helpers.
//!
//! A frame is one `u32` carrying two signed 16-bit channels: left in the low
//! half, right in the high half. On little-endian targets this is exactly the
//! byte layout of an interleaved `[l, r]` pair of `i16` samples.

/// Bytes per packed stereo frame.
pub const FRAME_BYTES: usize = std::mem::size_of::<u32>();

/// A frame of digital silence.
pub const SILENT_FRAME: u32 = 0;

/// Pack a left/right sample pair into one frame.
pub fn pack_stereo(left: i16, right: i16) -> u32 {
    (left as u16 as u32) | ((right as u16 as u32) << 16)
}

/// Split a frame back into its left/right samples.
pub fn unpack_stereo(frame: u32) -> (i16, i16) {
    (frame as u16 as i16, (frame >> 16) as u16 as i16)
}

/// Convert a frame to a normalised `[left, right]` pair in [-1.0, 1.0).
pub fn frame_to_f32(frame: u32) -> [f32; 2] {
    let (l, r) = unpack_stereo(frame);
    [l as f32 / 32768.0, r as f32 / 32768.0]
}

/// Number of whole frames contained in `byte_len` bytes.
pub fn frames_in(byte_len: usize) -> usize {
    byte_len / FRAME_BYTES
}

/// Decode native-endian frames from a byte buffer. A trailing partial frame is ignored.
pub fn frames_from_bytes(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(FRAME_BYTES)
        .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}
