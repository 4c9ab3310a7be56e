//! The shared audio channel: a lock-free SPSC ring in POSIX shared memory.
//!
//! The app (producer) and the driver (consumer) are built independently and
//! rendezvous on [`CHANNEL_NAME`](crate::constants::CHANNEL_NAME), so the
//! byte layout of the region is a wire contract:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Header (68 bytes)                                          │
//! │   0  write_index   u64  atomic, producer-owned             │
//! │   8  read_index    u64  atomic, consumer-owned             │
//! │  16  is_active     u8   atomic, producer-owned             │
//! │  17  reserved      [u8; 7]                                 │
//! │  24  sample_rate   u32  = 48000                            │
//! │  28  channels      u32  = 2                                │
//! │  32  ring_frames   u32  = 4096                             │
//! │  36  padding       [u8; 32]                                │
//! ├────────────────────────────────────────────────────────────┤
//! │ 68  audio_data: 4096 frames × 2 ch × f32, interleaved      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Indices are unbounded 64-bit frame counters; ring positions are
//! `index % RING_FRAMES`. The producer publishes `write_index` with release
//! ordering after the samples are in place, and the consumer observes it with
//! acquire before touching them (and symmetrically for `read_index`), which
//! is the only synchronization between the two processes. Sample copies are
//! plain memory accesses bracketed by those publishes.

use std::ffi::CString;
use std::fs::File;
use std::mem::offset_of;
use std::os::fd::FromRawFd;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use memmap2::{MmapMut, MmapOptions};
use thiserror::Error;

use crate::constants::{CHANNELS, RING_FRAMES, SAMPLE_RATE};

/// Errors from opening or creating the shared channel.
///
/// All of these are local to the process that hit them; nothing crosses the
/// channel except samples and the two counters.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The named region does not exist yet. Consumers treat this as a soft
    /// failure and retry on a later callback.
    #[error("shared audio channel does not exist yet")]
    NotFound,

    /// A syscall failed while opening, sizing, or mapping the region.
    #[error("shared memory syscall failed (errno {0})")]
    Io(i32),

    /// The mapped region does not declare the format this binary was built
    /// for. The mapping is discarded; a later open may find a valid region.
    #[error("shared audio channel header does not match the expected format")]
    InvalidHeader,
}

/// Byte size of the header preceding the audio ring.
pub const HEADER_SIZE: usize = 68;

/// Total byte size of the shared region.
pub const CHANNEL_SIZE: usize = HEADER_SIZE + RING_FRAMES * CHANNELS * std::mem::size_of::<f32>();

#[repr(C)]
struct ChannelHeader {
    write_index: AtomicU64,
    read_index: AtomicU64,
    is_active: AtomicU8,
    _reserved: [u8; 7],
    sample_rate: u32,
    channels: u32,
    ring_frames: u32,
    _padding: [u8; 32],
}

// Every offset below is read by an independently built binary.
const _: () = {
    assert!(offset_of!(ChannelHeader, write_index) == 0);
    assert!(offset_of!(ChannelHeader, read_index) == 8);
    assert!(offset_of!(ChannelHeader, is_active) == 16);
    assert!(offset_of!(ChannelHeader, sample_rate) == 24);
    assert!(offset_of!(ChannelHeader, channels) == 28);
    assert!(offset_of!(ChannelHeader, ring_frames) == 32);
    assert!(offset_of!(ChannelHeader, _padding) == 36);
    assert!(offset_of!(ChannelHeader, _padding) + 32 == HEADER_SIZE);
};

/// A mapped shared audio channel.
///
/// Created by the producer with [`AudioChannel::create_or_open`], opened by
/// the consumer with [`AudioChannel::open_existing`]. Dropping a
/// producer-owned channel stores `is_active = false` and unlinks the name;
/// existing consumer mappings stay valid per POSIX shm semantics.
pub struct AudioChannel {
    // Keeps the mapping alive; all access goes through `base`.
    _map: MmapMut,
    base: *mut u8,
    name: CString,
    owner: bool,
}

// Safety: the header fields shared between threads/processes are atomics, and
// the audio region is only written by the single producer and read by the
// single consumer under the release/acquire index protocol above. The raw
// base pointer is valid as long as `_map` lives, which is as long as `self`.
unsafe impl Send for AudioChannel {}
unsafe impl Sync for AudioChannel {}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn channel_cname(name: &str) -> Result<CString, ChannelError> {
    CString::new(name).map_err(|_| ChannelError::Io(libc::EINVAL))
}

impl AudioChannel {
    /// Opens the named region with create-if-absent semantics (producer).
    ///
    /// On first creation the region is sized to [`CHANNEL_SIZE`] and the
    /// header is initialized. A full-size region left behind by a crashed
    /// producer is reused as-is; a short one (crash between create and
    /// truncate) is re-sized and re-initialized.
    pub fn create_or_open(name: &str) -> Result<Self, ChannelError> {
        let c_name = channel_cname(name)?;
        let mode = 0o666 as libc::mode_t;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR | libc::O_CREAT, mode) };
        if fd < 0 {
            return Err(ChannelError::Io(last_errno()));
        }

        // Takes ownership of fd; the mapping outlives the descriptor.
        let file = unsafe { File::from_raw_fd(fd) };

        // A fresh region has length 0; a region abandoned by a crashed
        // producer may be short as well. Either way it was never fully
        // initialized, so size it and (re)write the header. A full-size
        // region is reused as-is, indices included.
        let len = file
            .metadata()
            .map_err(|e| ChannelError::Io(e.raw_os_error().unwrap_or(0)))?
            .len();
        let fresh = (len as usize) < CHANNEL_SIZE;
        if fresh {
            file.set_len(CHANNEL_SIZE as u64)
                .map_err(|e| ChannelError::Io(e.raw_os_error().unwrap_or(0)))?;
        }

        let channel = Self::map(file, c_name, true)?;
        if fresh {
            channel.init_header();
        }
        Ok(channel)
    }

    /// Opens the named region without creating it (consumer).
    ///
    /// The mapping is read/write because the consumer stores `read_index`.
    /// Returns [`ChannelError::NotFound`] while no producer has created the
    /// region, and [`ChannelError::InvalidHeader`] if the region is too small
    /// or declares a different format than this binary was built for.
    pub fn open_existing(name: &str) -> Result<Self, ChannelError> {
        let c_name = channel_cname(name)?;
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let errno = last_errno();
            return Err(if errno == libc::ENOENT {
                ChannelError::NotFound
            } else {
                ChannelError::Io(errno)
            });
        }

        let file = unsafe { File::from_raw_fd(fd) };
        // A short region means the producer died between create and truncate;
        // mapping past the end would fault on access.
        let len = file
            .metadata()
            .map_err(|e| ChannelError::Io(e.raw_os_error().unwrap_or(0)))?
            .len();
        if (len as usize) < CHANNEL_SIZE {
            return Err(ChannelError::InvalidHeader);
        }

        let channel = Self::map(file, c_name, false)?;
        channel.validate_header()?;
        Ok(channel)
    }

    fn map(file: File, name: CString, owner: bool) -> Result<Self, ChannelError> {
        // Safety: the file refers to a shm object of at least CHANNEL_SIZE
        // bytes (sized above or checked by the caller).
        let mut map = unsafe { MmapOptions::new().len(CHANNEL_SIZE).map_mut(&file) }
            .map_err(|e| ChannelError::Io(e.raw_os_error().unwrap_or(0)))?;
        let base = map.as_mut_ptr();
        Ok(Self {
            _map: map,
            base,
            name,
            owner,
        })
    }

    fn init_header(&self) {
        // Fresh shm is zero-filled after ftruncate, so indices, is_active,
        // reserved, and padding are already correct.
        // Safety: the mapping is CHANNEL_SIZE bytes and page-aligned; the
        // header occupies its naturally aligned prefix.
        unsafe {
            let hdr = self.base as *mut ChannelHeader;
            (*hdr).sample_rate = SAMPLE_RATE;
            (*hdr).channels = CHANNELS as u32;
            (*hdr).ring_frames = RING_FRAMES as u32;
        }
    }

    fn validate_header(&self) -> Result<(), ChannelError> {
        let hdr = self.header();
        if hdr.sample_rate != SAMPLE_RATE
            || hdr.channels != CHANNELS as u32
            || hdr.ring_frames != RING_FRAMES as u32
        {
            return Err(ChannelError::InvalidHeader);
        }
        Ok(())
    }

    fn header(&self) -> &ChannelHeader {
        // Safety: see `map`; the header is the aligned prefix of the region.
        unsafe { &*(self.base as *const ChannelHeader) }
    }

    fn audio(&self) -> *mut f32 {
        // Safety: HEADER_SIZE is within the mapping and 4-byte aligned.
        unsafe { self.base.add(HEADER_SIZE) as *mut f32 }
    }

    /// Frames the producer can write without overtaking the consumer.
    ///
    /// Saturates at 0 if the indices are transiently inconsistent (overrun);
    /// the consumer's fast-forward restores the invariant.
    pub fn available_to_write(&self) -> usize {
        let hdr = self.header();
        let write = hdr.write_index.load(Ordering::Relaxed);
        let read = hdr.read_index.load(Ordering::Acquire);
        RING_FRAMES.saturating_sub(write.wrapping_sub(read) as usize)
    }

    /// Frames the consumer can read. May transiently exceed [`RING_FRAMES`]
    /// if the producer state is stale; [`AudioChannel::read_frames`] recovers
    /// from that by fast-forwarding.
    pub fn available_to_read(&self) -> usize {
        let hdr = self.header();
        let write = hdr.write_index.load(Ordering::Acquire);
        let read = hdr.read_index.load(Ordering::Relaxed);
        write.wrapping_sub(read) as usize
    }

    /// Writes `frames` interleaved stereo frames from `samples`
    /// (producer only).
    ///
    /// Returns `false` without touching the ring when there is not enough
    /// space; the caller drops the block rather than blocking.
    pub fn write_frames(&self, samples: &[f32], frames: usize) -> bool {
        assert!(samples.len() >= frames * CHANNELS);
        if self.available_to_write() < frames {
            return false;
        }

        let hdr = self.header();
        let write = hdr.write_index.load(Ordering::Relaxed);
        let start = (write % RING_FRAMES as u64) as usize;
        let first = frames.min(RING_FRAMES - start);
        let audio = self.audio();
        // Safety: start + first <= RING_FRAMES and the wrapped tail begins at
        // slot 0, so both copies stay inside the audio region. The consumer
        // does not touch these frames until write_index is published below.
        unsafe {
            ptr::copy_nonoverlapping(samples.as_ptr(), audio.add(start * CHANNELS), first * CHANNELS);
            if frames > first {
                ptr::copy_nonoverlapping(
                    samples.as_ptr().add(first * CHANNELS),
                    audio,
                    (frames - first) * CHANNELS,
                );
            }
        }

        hdr.write_index
            .store(write.wrapping_add(frames as u64), Ordering::Release);
        true
    }

    /// Reads `frames` interleaved stereo frames into `out` (consumer only).
    ///
    /// On underrun, fills `out` with silence and leaves `read_index` alone.
    /// If the indices claim more than a full ring of data (possible only if
    /// a producer crashed mid-write or an earlier reader lagged badly), the
    /// data is stale: `read_index` fast-forwards to `write_index − 1` and
    /// this call returns silence, bounding recovery to one silent block.
    pub fn read_frames(&self, out: &mut [f32], frames: usize) -> bool {
        let samples = frames * CHANNELS;
        assert!(out.len() >= samples);

        let hdr = self.header();
        let write = hdr.write_index.load(Ordering::Acquire);
        let read = hdr.read_index.load(Ordering::Relaxed);
        let available = write.wrapping_sub(read);

        if available > RING_FRAMES as u64 {
            // Only this process writes read_index, so relaxed is enough.
            hdr.read_index
                .store(write.wrapping_sub(1), Ordering::Relaxed);
            out[..samples].fill(0.0);
            return false;
        }

        if (available as usize) < frames {
            out[..samples].fill(0.0);
            return false;
        }

        let start = (read % RING_FRAMES as u64) as usize;
        let first = frames.min(RING_FRAMES - start);
        let audio = self.audio();
        // Safety: bounds as in write_frames; the acquire load of write_index
        // above makes the producer's sample stores visible.
        unsafe {
            ptr::copy_nonoverlapping(audio.add(start * CHANNELS), out.as_mut_ptr(), first * CHANNELS);
            if frames > first {
                ptr::copy_nonoverlapping(
                    audio,
                    out.as_mut_ptr().add(first * CHANNELS),
                    (frames - first) * CHANNELS,
                );
            }
        }

        hdr.read_index
            .store(read.wrapping_add(frames as u64), Ordering::Release);
        true
    }

    /// Publishes producer liveness. Consumers refuse to drain the ring while
    /// this is false.
    pub fn set_active(&self, active: bool) {
        self.header().is_active.store(active as u8, Ordering::Release);
    }

    /// True while a producer has declared itself live.
    pub fn is_active(&self) -> bool {
        self.header().is_active.load(Ordering::Acquire) != 0
    }

    /// Current value of the producer's frame counter.
    pub fn write_index(&self) -> u64 {
        self.header().write_index.load(Ordering::Relaxed)
    }

    /// Current value of the consumer's frame counter.
    pub fn read_index(&self) -> u64 {
        self.header().read_index.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn force_indices(&self, write: u64, read: u64) {
        let hdr = self.header();
        hdr.write_index.store(write, Ordering::Release);
        hdr.read_index.store(read, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn corrupt_sample_rate(&self) {
        // Safety: test-only, single-threaded access to the format field.
        unsafe {
            (*(self.base as *mut ChannelHeader)).sample_rate = 44_100;
        }
    }
}

impl Drop for AudioChannel {
    fn drop(&mut self) {
        if self.owner {
            self.set_active(false);
            // Unlinking removes the name; a consumer holding a mapping keeps
            // it until it unmaps.
            unsafe {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}
