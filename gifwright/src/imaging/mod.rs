//! Pixel work: decoding source images, reducing them to indexed-colour frames, and writing the GIF
//! container.
//!
//! Everything in here is synchronous and CPU-bound. Callers on the async runtime run it through
//! [`tokio::task::spawn_blocking`].
//!
//! The stages are deliberately separate so the animation pipeline can decode and quantize frames
//! in parallel and hand the finished frames to the encoder in their original order:
//!
//! ```text
//! bytes --decode--> ImageAsset --quantize--> AnimationFrame --encode (all frames)--> GIF bytes
//! ```

pub mod decode;
pub mod encode;
pub mod quantize;

use thiserror::Error;

pub use decode::{DecodeLimits, ImageAsset, decode};
pub use encode::{EncodeOptions, encode};
pub use quantize::{AnimationFrame, QuantizeOptions, quantize};

#[derive(Error, Debug)]
pub enum ImagingError {
    /// Bytes are not a recognised raster format, are corrupt, or exceed the decode limits
    #[error("unrecognized or corrupt image data: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image is {width}x{height}; a frame needs at least one pixel")]
    EmptyFrame { width: u32, height: u32 },

    #[error("no frames to encode")]
    NoFrames,

    #[error("frame {index} is {actual_width}x{actual_height} but the animation canvas is {width}x{height}")]
    FrameSizeMismatch {
        index: usize,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame {index} is malformed: {reason}")]
    MalformedFrame { index: usize, reason: String },

    #[error("{width}x{height} exceeds the maximum GIF dimension of {max}")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("GIF encoding failed: {0}")]
    Encode(#[from] gif::EncodingError),
}
