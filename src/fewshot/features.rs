use image::RgbImage;
use image::imageops::FilterType;
use ndarray::{Array1, Array2, Array3, Array4, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::warn;

/// Square input resolution every image is resized to
pub const INPUT_SIZE: u32 = 64;

pub const DEFAULT_FEATURE_DIM: usize = 512;

/// Seed for the fixed network weights. Changing this invalidates every
/// persisted learned-object representation.
const WEIGHT_SEED: u64 = 0x6f62_6a74_616c_6c79;

const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

struct ConvLayer {
    weight: Array4<f32>, // [out, in, 3, 3]
    bias: Array1<f32>,
}

impl ConvLayer {
    fn new(in_channels: usize, out_channels: usize, rng: &mut StdRng) -> Self {
        let scale = (2.0 / (in_channels * 9) as f32).sqrt();
        let weight = Array4::from_shape_fn((out_channels, in_channels, 3, 3), |_| {
            rng.gen_range(-1.0f32..1.0) * scale
        });
        Self {
            weight,
            bias: Array1::zeros(out_channels),
        }
    }

    /// 3x3 convolution with padding 1, followed by ReLU
    fn forward(&self, input: &Array3<f32>) -> Array3<f32> {
        let (in_channels, height, width) = input.dim();
        let out_channels = self.weight.dim().0;
        let mut output = Array3::zeros((out_channels, height, width));

        for o in 0..out_channels {
            for y in 0..height {
                for x in 0..width {
                    let mut acc = self.bias[o];
                    for c in 0..in_channels {
                        for ky in 0..3usize {
                            for kx in 0..3usize {
                                let sy = y + ky;
                                let sx = x + kx;
                                if sy == 0 || sx == 0 || sy > height || sx > width {
                                    continue;
                                }
                                acc += self.weight[[o, c, ky, kx]] * input[[c, sy - 1, sx - 1]];
                            }
                        }
                    }
                    output[[o, y, x]] = acc.max(0.0);
                }
            }
        }
        output
    }
}

/// 2x2 max pooling with stride 2
fn max_pool2(input: &Array3<f32>) -> Array3<f32> {
    let (channels, height, width) = input.dim();
    let (out_h, out_w) = (height / 2, width / 2);
    let mut output = Array3::zeros((channels, out_h, out_w));
    for c in 0..channels {
        for y in 0..out_h {
            for x in 0..out_w {
                let mut best = f32::NEG_INFINITY;
                for dy in 0..2 {
                    for dx in 0..2 {
                        best = best.max(input[[c, y * 2 + dy, x * 2 + dx]]);
                    }
                }
                output[[c, y, x]] = best;
            }
        }
    }
    output
}

/// Average pooling to a fixed `bins x bins` output
fn adaptive_avg_pool(input: &Array3<f32>, bins: usize) -> Array3<f32> {
    let (channels, height, width) = input.dim();
    let mut output = Array3::zeros((channels, bins, bins));
    for c in 0..channels {
        for by in 0..bins {
            let y0 = by * height / bins;
            let y1 = ((by + 1) * height / bins).max(y0 + 1);
            for bx in 0..bins {
                let x0 = bx * width / bins;
                let x1 = ((bx + 1) * width / bins).max(x0 + 1);
                let mut sum = 0.0;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += input[[c, y, x]];
                    }
                }
                output[[c, by, bx]] = sum / ((y1 - y0) * (x1 - x0)) as f32;
            }
        }
    }
    output
}

/// Fixed convolutional feature pipeline: 64x64 RGB input through three
/// conv/ReLU/max-pool stages (3 -> 8 -> 16 -> 32 channels), a 4x4
/// average pool, and a fixed linear projection to `feature_dim`.
///
/// The weights are deterministic (seeded, never trained), so the same
/// image always produces the same embedding. Batched inputs are
/// processed independently.
pub struct FeatureExtractor {
    conv: Vec<ConvLayer>,
    proj_weight: Array2<f32>, // [feature_dim, 512]
    proj_bias: Array1<f32>,
    feature_dim: usize,
}

impl FeatureExtractor {
    pub fn new(feature_dim: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(WEIGHT_SEED);
        let conv = vec![
            ConvLayer::new(3, 8, &mut rng),
            ConvLayer::new(8, 16, &mut rng),
            ConvLayer::new(16, 32, &mut rng),
        ];
        let flat_dim = 32 * 4 * 4;
        let scale = (2.0 / flat_dim as f32).sqrt();
        let proj_weight =
            Array2::from_shape_fn((feature_dim, flat_dim), |_| rng.gen_range(-1.0f32..1.0) * scale);
        Self {
            conv,
            proj_weight,
            proj_bias: Array1::zeros(feature_dim),
            feature_dim,
        }
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Embed an in-memory image.
    pub fn extract(&self, image: &RgbImage) -> Array1<f32> {
        let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        let size = INPUT_SIZE as usize;
        let mut input = Array3::zeros((3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                input[[c, y as usize, x as usize]] = (v - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
            }
        }

        let mut activation = input;
        for layer in &self.conv {
            activation = max_pool2(&layer.forward(&activation));
        }
        let pooled = adaptive_avg_pool(&activation, 4);

        let flat = Array1::from_iter(pooled.iter().copied());
        self.proj_weight.dot(&flat) + &self.proj_bias
    }

    /// Embed the image at `path`. An unreadable image becomes an
    /// all-zero vector rather than aborting the batch.
    pub fn extract_path(&self, path: &Path) -> Array1<f32> {
        match image::open(path) {
            Ok(img) => self.extract(&img.to_rgb8()),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "image failed to load, substituting zero features"
                );
                Array1::zeros(self.feature_dim)
            }
        }
    }
}

/// Normalized dot product; 0.0 when either vector is all zeros.
pub fn cosine_similarity(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let dot = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
