pub mod channel;
pub mod constants;
pub mod denoise;
pub mod levels;
pub mod pipeline;
pub mod reader;
pub mod resample;
pub mod writer;

pub use channel::{AudioChannel, ChannelError};
pub use denoise::Denoiser;
pub use levels::LevelsUpdate;
pub use pipeline::CapturePipeline;
pub use reader::ChannelReader;
pub use writer::ChannelWriter;

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT_ID: AtomicU32 = AtomicU32::new(0);

    /// Unique shm name so parallel tests never share a region.
    pub(crate) fn test_name(tag: &str) -> String {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        format!("/quietmic_test_{}_{}_{}", std::process::id(), tag, id)
    }
}
