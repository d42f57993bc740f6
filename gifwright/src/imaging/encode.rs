use std::borrow::Cow;

use gif::{DisposalMethod, Encoder, Frame, Repeat};

use super::{AnimationFrame, ImagingError};

#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    /// Number of repetitions; `None` loops forever
    pub loop_count: Option<u16>,
}

/// Encode frames, in the given order, as one animated GIF.
///
/// The first frame fixes the canvas size; every other frame must match it. Each frame carries its
/// own local colour table, so there is no global palette.
pub fn encode(frames: &[AnimationFrame], options: &EncodeOptions) -> Result<Vec<u8>, ImagingError> {
    let first = frames.first().ok_or(ImagingError::NoFrames)?;
    let (width, height) = (first.width, first.height);

    let max = u32::from(u16::MAX);
    if width > max || height > max {
        return Err(ImagingError::TooLarge { width, height, max });
    }

    for (index, frame) in frames.iter().enumerate() {
        if (frame.width, frame.height) != (width, height) {
            return Err(ImagingError::FrameSizeMismatch {
                index,
                width,
                height,
                actual_width: frame.width,
                actual_height: frame.height,
            });
        }
        check_frame(index, frame)?;
    }

    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, width as u16, height as u16, &[])?;
    encoder.set_repeat(match options.loop_count {
        Some(count) => Repeat::Finite(count),
        None => Repeat::Infinite,
    })?;

    for frame in frames {
        let gif_frame = Frame {
            width: width as u16,
            height: height as u16,
            delay: frame.delay_cs,
            dispose: DisposalMethod::Background,
            transparent: frame.transparent_index,
            palette: Some(frame.palette_bytes()),
            buffer: Cow::Borrowed(&frame.indices),
            ..Frame::default()
        };
        encoder.write_frame(&gif_frame)?;
    }

    encoder.into_inner().map_err(gif::EncodingError::from)?;
    Ok(buffer)
}

fn check_frame(index: usize, frame: &AnimationFrame) -> Result<(), ImagingError> {
    let malformed = |reason: String| ImagingError::MalformedFrame { index, reason };

    let expected = frame.width as usize * frame.height as usize;
    if frame.indices.len() != expected {
        return Err(malformed(format!("{} indices for {expected} pixels", frame.indices.len())));
    }
    if frame.palette.is_empty() || frame.palette.len() > 256 {
        return Err(malformed(format!("palette has {} entries", frame.palette.len())));
    }
    if let Some(i) = frame.indices.iter().find(|i| **i as usize >= frame.palette.len()) {
        return Err(malformed(format!("index {i} is outside a {}-entry palette", frame.palette.len())));
    }
    Ok(())
}
