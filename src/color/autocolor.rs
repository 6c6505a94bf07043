//! Dominant color detection for album art and background images.
//!
//! The image is shrunk to a thumbnail, its distinct colors are filtered by
//! saturation and brightness, bucketed into hue bands, and neighbouring bands
//! are merged through a sliding window. The heaviest merged group wins and its
//! count-weighted mean becomes the bar color.

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::DynamicImage;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::Rgba;
use crate::config::AutocolorConfig;

#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Arc<Vec<u8>>),
    File(PathBuf),
}

impl ImageSource {
    pub fn load(&self) -> image::ImageResult<DynamicImage> {
        match self {
            ImageSource::Bytes(bytes) => image::load_from_memory(bytes),
            ImageSource::File(path) => image::open(path),
        }
    }

    fn is_svg(&self) -> bool {
        match self {
            ImageSource::File(path) => path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("svg")),
            ImageSource::Bytes(_) => false,
        }
    }
}

/// Result of one finished analysis, tagged with the key it was requested for.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorUpdate {
    pub key: String,
    pub color: Rgba,
}

#[derive(Debug, thiserror::Error)]
pub enum AutoColorError {
    #[error("previous color analysis is still running, refusing to start a new one")]
    Busy,
    #[error("failed to spawn color analysis thread: {0}")]
    Spawn(#[from] io::Error),
}

/// One distinct image color with its pixel count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorPoint {
    pub rgb: [f32; 3],
    pub hue: f32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cluster {
    mass: u64,
    sum: [f64; 3],
}

impl Cluster {
    fn add(&mut self, point: &ColorPoint) {
        self.mass += point.count as u64;
        for (acc, c) in self.sum.iter_mut().zip(point.rgb) {
            *acc += c as f64 * point.count as f64;
        }
    }

    fn merge(&mut self, other: &Cluster) {
        self.mass += other.mass;
        for (acc, c) in self.sum.iter_mut().zip(other.sum) {
            *acc += c;
        }
    }

    pub fn mass(&self) -> u64 {
        self.mass
    }

    /// Count-weighted mean color.
    pub fn color(&self) -> [f32; 3] {
        let mass = self.mass.max(1) as f64;
        self.sum.map(|c| (c / mass) as f32)
    }
}

/// HSV of a unit-range RGB triple, all components in [0, 1].
pub fn rgb_to_hsv([r, g, b]: [f32; 3]) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta <= 0.0 {
        return [0.0, 0.0, max];
    }
    let s = delta / max;
    let h = if max == r {
        (g - b) / delta
    } else if max == g {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };
    [(h / 6.0).rem_euclid(1.0), s, max]
}

/// Distinct colors of `image` that pass the saturation and value limits.
pub fn collect_points(image: &DynamicImage, config: &AutocolorConfig) -> Vec<ColorPoint> {
    let mut counts: HashMap<[u8; 3], u32> = HashMap::new();
    for px in image.to_rgb8().pixels() {
        *counts.entry(px.0).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(raw, count)| {
            let rgb = raw.map(|c| c as f32 / 255.0);
            let [hue, saturation, value] = rgb_to_hsv(rgb);
            (saturation > config.saturation_min && value > config.value_min).then_some(ColorPoint {
                rgb,
                hue,
                count,
            })
        })
        .collect()
}

/// Bucket points into `bands` hue bands, then merge every band with its
/// `window - 1` successors, wrapping around the hue circle.
pub fn allocate(points: &[ColorPoint], bands: usize, window: usize) -> Vec<Cluster> {
    let bands = bands.max(1);
    let window = window.clamp(1, bands);

    let mut clusters = vec![Cluster::default(); bands];
    for point in points {
        let index = ((point.hue * bands as f32) as usize).min(bands - 1);
        clusters[index].add(point);
    }

    (0..bands)
        .map(|start| {
            let mut merged = Cluster::default();
            for offset in 0..window {
                merged.merge(&clusters[(start + offset) % bands]);
            }
            merged
        })
        .collect()
}

/// Representative color of `image`, or `None` when no pixel passes the filters.
pub fn dominant_color(image: &DynamicImage, config: &AutocolorConfig) -> Option<[f32; 3]> {
    let [w, h] = config.isize;
    let points = if image.width() > w || image.height() > h {
        collect_points(&image.thumbnail(w, h), config)
    } else {
        collect_points(image, config)
    };
    // first heaviest band wins ties
    allocate(&points, config.bands, config.window)
        .into_iter()
        .rev()
        .max_by_key(Cluster::mass)
        .filter(|cluster| cluster.mass() > 0)
        .map(|cluster| cluster.color())
}

/// Runs color analysis off the UI thread, one job at a time.
pub struct AutoColor {
    config: AutocolorConfig,
    alpha: u8,
    tx: Sender<ColorUpdate>,
    rx: Receiver<ColorUpdate>,
    worker: Option<JoinHandle<()>>,
}

impl AutoColor {
    pub fn new(config: AutocolorConfig, alpha: u8) -> Self {
        let (tx, rx) = unbounded();
        Self {
            config,
            alpha,
            tx,
            rx,
            worker: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start analysing `source`; the result arrives through [`Self::try_recv`].
    ///
    /// SVG files are skipped silently.
    pub fn request(&mut self, key: String, source: ImageSource) -> Result<(), AutoColorError> {
        if source.is_svg() {
            log::debug!("Skipping color analysis for vector image {}", key);
            return Ok(());
        }
        if self.is_busy() {
            return Err(AutoColorError::Busy);
        }
        if let Some(done) = self.worker.take() {
            let _ = done.join();
        }

        let config = self.config.clone();
        let alpha = self.alpha;
        let tx = self.tx.clone();
        let handle = thread::Builder::new()
            .name("autocolor".into())
            .spawn(move || {
                let image = match source.load() {
                    Ok(image) => image,
                    Err(err) => {
                        log::warn!("Can't analyze image {}: {}", key, err);
                        return;
                    }
                };
                match dominant_color(&image, &config) {
                    Some(rgb) => {
                        let color = Rgba::from_unit(rgb, alpha);
                        log::debug!("Detected color {} for {}", color, key);
                        let _ = tx.send(ColorUpdate { key, color });
                    }
                    None => log::debug!("No dominant color found for {}", key),
                }
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    pub fn try_recv(&self) -> Option<ColorUpdate> {
        self.rx.try_recv().ok()
    }
}
