//! Palette reduction for GIF frames.
//!
//! Each frame gets its own palette of at most 256 entries, built by median cut over the frame's
//! colour histogram. Pixels are then mapped to the palette either by nearest colour or with
//! Floyd-Steinberg error diffusion.
//!
//! The whole stage is deterministic: the histogram is sorted before it is split, ties between
//! equally distant palette entries go to the lower index, and error is carried in integer units.
//! The same input always yields byte-identical frames.

use std::collections::HashMap;

use image::RgbaImage;

use super::{ImageAsset, ImagingError};

/// Pixels with alpha below this become fully transparent
const ALPHA_THRESHOLD: u8 = 128;

type Rgb = [u8; 3];

/// One palette-indexed frame, ready for the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major, one palette index per pixel
    pub indices: Vec<u8>,
    pub palette: Vec<Rgb>,
    /// Palette slot reserved for transparent pixels, if the source had any
    pub transparent_index: Option<u8>,
    /// Display duration in hundredths of a second
    pub delay_cs: u16,
}

impl AnimationFrame {
    pub fn with_delay(mut self, delay_cs: u16) -> Self {
        self.delay_cs = delay_cs;
        self
    }

    /// Palette flattened to `r, g, b, r, g, b, ...` as the GIF colour table expects
    pub fn palette_bytes(&self) -> Vec<u8> {
        self.palette.iter().flatten().copied().collect()
    }

    /// Colour at `(x, y)`, or `None` for a transparent pixel
    pub fn color_at(&self, x: u32, y: u32) -> Option<Rgb> {
        let index = *self.indices.get((y * self.width + x) as usize)?;
        if Some(index) == self.transparent_index {
            return None;
        }
        self.palette.get(index as usize).copied()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuantizeOptions {
    /// Palette size, including the transparent slot when one is needed (2..=256)
    pub max_colors: usize,
    pub dither: bool,
}

impl Default for QuantizeOptions {
    fn default() -> Self {
        Self {
            max_colors: 256,
            dither: true,
        }
    }
}

/// Reduce a decoded image to an indexed-colour frame with a per-frame palette.
///
/// The returned frame has `delay_cs == 0`; the caller assigns timing.
pub fn quantize(asset: &ImageAsset, options: &QuantizeOptions) -> Result<AnimationFrame, ImagingError> {
    let (width, height) = (asset.width(), asset.height());
    if width == 0 || height == 0 {
        return Err(ImagingError::EmptyFrame { width, height });
    }

    let pixels = asset.pixels();
    let has_transparency = pixels.pixels().any(|p| p[3] < ALPHA_THRESHOLD);
    let max_colors = options.max_colors.clamp(2, 256);
    let opaque_slots = max_colors - usize::from(has_transparency);

    let mut palette = median_cut(histogram(pixels), opaque_slots);
    if palette.is_empty() {
        // Every pixel is transparent; the encoder still needs one real colour
        palette.push([0, 0, 0]);
    }
    let opaque_len = palette.len();

    let transparent_index = if has_transparency {
        palette.push([0, 0, 0]);
        Some(opaque_len as u8)
    } else {
        None
    };

    let indices = map_to_palette(pixels, &palette[..opaque_len], transparent_index, options.dither);

    Ok(AnimationFrame {
        width,
        height,
        indices,
        palette,
        transparent_index,
        delay_cs: 0,
    })
}

/// Opaque colour counts, sorted by colour
fn histogram(pixels: &RgbaImage) -> Vec<(Rgb, u32)> {
    let mut counts: HashMap<Rgb, u32> = HashMap::new();
    for p in pixels.pixels() {
        if p[3] >= ALPHA_THRESHOLD {
            *counts.entry([p[0], p[1], p[2]]).or_default() += 1;
        }
    }
    let mut colors: Vec<_> = counts.into_iter().collect();
    colors.sort_unstable();
    colors
}

/// A run of histogram entries; its population and widest channel are computed once on creation
struct ColorBox {
    colors: Vec<(Rgb, u32)>,
    population: u64,
    /// Channel with the largest spread, and that spread
    widest: (usize, u8),
}

impl ColorBox {
    fn new(colors: Vec<(Rgb, u32)>) -> Self {
        let population = colors.iter().map(|(_, count)| u64::from(*count)).sum();
        let widest = widest_channel(&colors);
        Self {
            colors,
            population,
            widest,
        }
    }

    /// Population-weighted mean colour, rounded
    fn average(&self) -> Rgb {
        let population = self.population.max(1);
        let mut sums = [0u64; 3];
        for (color, count) in &self.colors {
            for (sum, value) in sums.iter_mut().zip(color) {
                *sum += u64::from(*value) * u64::from(*count);
            }
        }
        sums.map(|sum| ((sum + population / 2) / population) as u8)
    }

    /// Split at the weighted median of the widest channel; both halves are non-empty
    fn split(self) -> (ColorBox, ColorBox) {
        let (channel, _) = self.widest;
        let mut colors = self.colors;
        colors.sort_unstable_by_key(|(color, _)| (color[channel], *color));

        let half = self.population.div_ceil(2);
        let mut running = 0u64;
        let mut cut = colors.len() - 1;
        for (i, (_, count)) in colors.iter().enumerate() {
            running += u64::from(*count);
            if running >= half {
                cut = i + 1;
                break;
            }
        }
        let cut = cut.clamp(1, colors.len() - 1);

        let upper = colors.split_off(cut);
        (ColorBox::new(colors), ColorBox::new(upper))
    }
}

/// Channel with the largest spread across `colors`, and that spread
fn widest_channel(colors: &[(Rgb, u32)]) -> (usize, u8) {
    (0..3)
        .map(|channel| {
            let (min, max) = colors
                .iter()
                .fold((u8::MAX, u8::MIN), |(min, max), (c, _)| (min.min(c[channel]), max.max(c[channel])));
            (channel, max.saturating_sub(min))
        })
        // max_by_key keeps the last maximum; reverse so red wins ties, then green
        .rev()
        .max_by_key(|(_, range)| *range)
        .unwrap_or((0, 0))
}

/// Median-cut palette of at most `max_colors` entries.
///
/// Images with no more distinct colours than slots keep every colour exactly.
fn median_cut(colors: Vec<(Rgb, u32)>, max_colors: usize) -> Vec<Rgb> {
    if colors.len() <= max_colors {
        return colors.into_iter().map(|(color, _)| color).collect();
    }

    let mut boxes = vec![ColorBox::new(colors)];
    while boxes.len() < max_colors {
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.colors.len() > 1)
            .map(|(i, b)| (i, b.widest.1, b.population))
            // Widest box first, then the most populous, then the earliest
            .max_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)).then(b.0.cmp(&a.0)));

        let Some((index, _, _)) = candidate else {
            break;
        };

        let (lower, upper) = boxes.remove(index).split();
        boxes.insert(index, upper);
        boxes.insert(index, lower);
    }

    boxes.iter().map(ColorBox::average).collect()
}

/// Nearest palette entry by squared RGB distance, ties to the lower index
fn nearest(palette: &[Rgb], color: Rgb) -> u8 {
    let mut best = 0;
    let mut best_distance = u32::MAX;
    'entries: for (i, entry) in palette.iter().enumerate() {
        let mut d = 0u32;
        for (a, b) in entry.iter().zip(color) {
            let diff = i32::from(*a) - i32::from(b);
            d += (diff * diff) as u32;
            // Already no closer than the best entry, which wins ties
            if d >= best_distance {
                continue 'entries;
            }
        }
        if d < best_distance {
            best = i;
            best_distance = d;
            if d == 0 {
                break;
            }
        }
    }
    best as u8
}

/// Memoised [`nearest`]; dithering revisits the same adjusted colours constantly
struct NearestCache<'a> {
    palette: &'a [Rgb],
    cache: HashMap<Rgb, u8>,
}

impl<'a> NearestCache<'a> {
    fn new(palette: &'a [Rgb]) -> Self {
        Self {
            palette,
            cache: HashMap::new(),
        }
    }

    fn lookup(&mut self, color: Rgb) -> u8 {
        *self.cache.entry(color).or_insert_with(|| nearest(self.palette, color))
    }
}

/// Map every pixel to `opaque` (or `transparent_index`), optionally diffusing quantisation error
pub(crate) fn map_to_palette(pixels: &RgbaImage, opaque: &[Rgb], transparent_index: Option<u8>, dither: bool) -> Vec<u8> {
    let width = pixels.width() as usize;
    let mut cache = NearestCache::new(opaque);
    let mut indices = Vec::with_capacity(width * pixels.height() as usize);

    // Error rows in sixteenths, padded by one cell either side so neighbours never go out of range
    let mut current = vec![[0i32; 3]; width + 2];
    let mut next = vec![[0i32; 3]; width + 2];

    for row in pixels.rows() {
        for (x, p) in row.enumerate() {
            if let Some(transparent) = transparent_index
                && p[3] < ALPHA_THRESHOLD
            {
                indices.push(transparent);
                continue;
            }

            if !dither {
                indices.push(cache.lookup([p[0], p[1], p[2]]));
                continue;
            }

            let carried = current[x + 1];
            let target: [i32; 3] = std::array::from_fn(|c| (i32::from(p[c]) + carried[c] / 16).clamp(0, 255));
            let index = cache.lookup(target.map(|v| v as u8));
            indices.push(index);

            let chosen = opaque[index as usize];
            for c in 0..3 {
                let error = target[c] - i32::from(chosen[c]);
                current[x + 2][c] += error * 7;
                next[x][c] += error * 3;
                next[x + 1][c] += error * 5;
                next[x + 2][c] += error;
            }
        }

        std::mem::swap(&mut current, &mut next);
        next.fill([0; 3]);
    }

    indices
}
