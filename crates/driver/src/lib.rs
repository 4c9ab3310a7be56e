//! C-ABI read surface for the virtual microphone plug-in.
//!
//! The host audio daemon loads the plug-in shell, which owns one reader per
//! device and calls [`quietmic_reader_read`] from its I/O thread on every
//! input callback. The reader connects to the shared channel lazily, so the
//! plug-in can be loaded long before (or after) the QuietMic app runs; until
//! a producer is live the virtual microphone yields silence, which the host
//! treats as success.

use quietmic_core::constants::{CHANNELS, CHANNEL_NAME};
use quietmic_core::ChannelReader;

/// Creates a reader bound to the well-known channel name.
///
/// The pointer is owned by the caller and must be released with
/// [`quietmic_reader_free`].
#[no_mangle]
pub extern "C" fn quietmic_reader_new() -> *mut ChannelReader {
    Box::into_raw(Box::new(ChannelReader::new(CHANNEL_NAME)))
}

/// Releases a reader created by [`quietmic_reader_new`].
///
/// # Safety
///
/// `reader` must be a pointer returned by [`quietmic_reader_new`] that has
/// not been freed, or null.
#[no_mangle]
pub unsafe extern "C" fn quietmic_reader_free(reader: *mut ChannelReader) {
    if !reader.is_null() {
        drop(Box::from_raw(reader));
    }
}

/// Fills `out` with `frame_count` interleaved stereo f32 frames.
///
/// Always returns 0: when no producer is live (or on underrun) the output is
/// silence, and silence is a valid microphone signal.
///
/// # Safety
///
/// `reader` must be a live pointer from [`quietmic_reader_new`], called from
/// one thread at a time (the host's I/O thread); `out` must point to at
/// least `frame_count * 2` writable f32 values.
#[no_mangle]
pub unsafe extern "C" fn quietmic_reader_read(
    reader: *mut ChannelReader,
    out: *mut f32,
    frame_count: u32,
) -> i32 {
    if reader.is_null() || out.is_null() {
        return 0;
    }
    let samples = std::slice::from_raw_parts_mut(out, frame_count as usize * CHANNELS);
    (*reader).read(samples, frame_count as usize);
    0
}
