//! Multi-resolution wavelet focus metric
//!
//! Scores frame sharpness by recursively applying a one-level 2-D separable
//! wavelet transform (LeGall-style 5-tap low-pass / 2-tap high-pass pair) and
//! summing the variance of each level's low-resolution image, the original
//! frame included. More high-frequency detail survives decimation in a sharp
//! image, so a higher score means better focus. The metric is not normalized
//! across frame sizes or lighting; scores are only comparable within one
//! continuous run.

use crate::Frame;

/// 5-tap low-pass analysis filter: [-1, 2, 6, 2, -1] / 8
const LOW_PASS: [f64; 5] = [-0.125, 0.25, 0.75, 0.25, -0.125];

/// 2-tap high-pass analysis filter: [-1, 1] / 4
const HIGH_PASS: [f64; 2] = [-0.25, 0.25];

/// Smallest sub-band dimension the 5-tap filter can still cover. Recursion
/// stops before producing a level whose halved dimension would fall below
/// this, so undersized frames simply contribute fewer levels to the sum.
const MIN_BAND_DIM: usize = LOW_PASS.len();

/// Dense row-major matrix of pixel intensities.
#[derive(Debug, Clone)]
struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    fn from_frame(frame: &Frame) -> Self {
        Self {
            rows: frame.height(),
            cols: frame.width(),
            data: frame.data().iter().map(|&p| p as f64).collect(),
        }
    }

    fn at(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    fn set(&mut self, r: usize, c: usize, v: f64) {
        self.data[r * self.cols + c] = v;
    }

    fn transpose(&self) -> Matrix {
        let mut out = Matrix::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out.set(c, r, self.at(r, c));
            }
        }
        out
    }

    /// Copy `src` into this matrix with its top-left corner at (row0, col0).
    fn paste(&mut self, src: &Matrix, row0: usize, col0: usize) {
        for r in 0..src.rows {
            for c in 0..src.cols {
                self.set(row0 + r, col0 + c, src.at(r, c));
            }
        }
    }

    fn crop_top_left(&self, rows: usize, cols: usize) -> Matrix {
        let mut out = Matrix::zeros(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                out.set(r, c, self.at(r, c));
            }
        }
        out
    }
}

/// Symmetric boundary extension indices for a row of `cols` samples.
///
/// Odd-length filters extend without repeating the edge samples; even-length
/// filters repeat the edge once. Values are clamped into the valid column
/// range so degenerate widths cannot index out of bounds.
fn extension_indices(cols: usize, filter_len: usize) -> Vec<usize> {
    let c = cols as isize;
    let m2 = (filter_len / 2) as isize;
    let mut xe: Vec<isize> = Vec::with_capacity(cols + filter_len + 1);

    if filter_len % 2 == 1 {
        for i in (1..=m2).rev() {
            xe.push(i);
        }
        xe.extend(0..c);
        for i in 1..=m2 {
            xe.push(c - 1 - i);
        }
    } else {
        for i in (0..=m2).rev() {
            xe.push(i);
        }
        xe.extend(0..=c);
        for i in 1..=m2 + 1 {
            xe.push(c - i);
        }
    }

    xe.into_iter()
        .map(|i| i.clamp(0, c - 1) as usize)
        .collect()
}

/// Filter the rows of `x` with `h` and decimate by 2.
///
/// `phase` selects which of each sample pair the output aligns with: 0 keeps
/// the even grid (low-pass convention here), 1 the odd grid (high-pass).
fn row_decimate(x: &Matrix, h: &[f64], phase: usize) -> Matrix {
    let c = x.cols;
    let xe = extension_indices(c, h.len());

    let taps: Vec<usize> = if phase == 0 {
        (0..c.saturating_sub(1)).step_by(2).collect()
    } else {
        (1..c).step_by(2).collect()
    };

    let mut out = Matrix::zeros(x.rows, taps.len());
    for r in 0..x.rows {
        for (j, &t) in taps.iter().enumerate() {
            let mut acc = 0.0;
            for (i, &coeff) in h.iter().enumerate() {
                acc += coeff * x.at(r, xe[t + i]);
            }
            out.set(r, j, acc);
        }
    }
    out
}

/// One level of the 2-D transform: rows then columns (via transpose).
///
/// The output matrix holds the four sub-bands in quadrants; the top-left
/// `rows/2 x cols/2` low-low quadrant feeds the next level.
fn dwt_level(x: &Matrix) -> Matrix {
    let (m, n) = (x.rows, x.cols);
    let n2 = n / 2;
    let m2 = m / 2;

    let mut y = Matrix::zeros(m, n);
    y.paste(&row_decimate(x, &LOW_PASS, 0), 0, 0);
    y.paste(&row_decimate(x, &HIGH_PASS, 1), 0, n2);

    let xt = y.transpose();
    y.paste(&row_decimate(&xt, &LOW_PASS, 0).transpose(), 0, 0);
    y.paste(&row_decimate(&xt, &HIGH_PASS, 1).transpose(), m2, 0);
    y
}

/// Population variance.
fn variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    data.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Focus scorer based on the recursive wavelet decomposition.
#[derive(Debug, Clone, Copy)]
pub struct WaveletScorer {
    levels: usize,
}

impl Default for WaveletScorer {
    fn default() -> Self {
        Self { levels: 3 }
    }
}

impl WaveletScorer {
    pub fn new(levels: usize) -> Self {
        Self { levels }
    }

    /// Score a frame's sharpness. Deterministic, pure in the pixel content,
    /// always >= 0, and invariant to a global brightness offset.
    ///
    /// Dimensions that are not divisible by 2 truncate the remainder at each
    /// level; levels stop early once a halved dimension would drop below the
    /// filter support (see [`MIN_BAND_DIM`]).
    pub fn score(&self, frame: &Frame) -> f64 {
        let mut x = Matrix::from_frame(frame);
        let mut score = variance(&x.data);

        for _ in 0..self.levels {
            if x.rows / 2 < MIN_BAND_DIM || x.cols / 2 < MIN_BAND_DIM {
                break;
            }
            let y = dwt_level(&x);
            x = y.crop_top_left(x.rows / 2, x.cols / 2);
            score += variance(&x.data);
        }
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic noise pattern.
    fn noise_frame(width: usize, height: usize, seed: u64) -> Frame {
        let mut state = seed;
        let data: Vec<u8> = (0..width * height)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) % 200) as u8
            })
            .collect();
        Frame::from_luma(width, height, data).unwrap()
    }

    /// Naive box blur with the given radius, clamped at the borders.
    fn box_blur(frame: &Frame, radius: usize) -> Frame {
        let (w, h) = (frame.width(), frame.height());
        let r = radius as isize;
        let mut out = Vec::with_capacity(w * h);
        for y in 0..h as isize {
            for x in 0..w as isize {
                let mut sum = 0.0;
                let mut count = 0.0;
                for dy in -r..=r {
                    for dx in -r..=r {
                        let sx = (x + dx).clamp(0, w as isize - 1) as usize;
                        let sy = (y + dy).clamp(0, h as isize - 1) as usize;
                        sum += frame.pixel(sx, sy) as f64;
                        count += 1.0;
                    }
                }
                out.push((sum / count).round() as u8);
            }
        }
        Frame::from_luma(w, h, out).unwrap()
    }

    #[test]
    fn flat_frame_scores_zero() {
        let frame = Frame::from_luma(32, 32, vec![117; 32 * 32]).unwrap();
        assert_eq!(WaveletScorer::default().score(&frame), 0.0);
    }

    #[test]
    fn score_is_brightness_invariant() {
        let frame = noise_frame(48, 48, 7);
        let brighter = Frame::from_luma(
            48,
            48,
            frame.data().iter().map(|&p| p + 30).collect(),
        )
        .unwrap();

        let scorer = WaveletScorer::default();
        let a = scorer.score(&frame);
        let b = scorer.score(&brighter);
        assert!((a - b).abs() < 1e-6 * a.max(1.0), "offset changed score: {a} vs {b}");
    }

    #[test]
    fn blur_strictly_decreases_score() {
        let sharp = noise_frame(64, 64, 42);
        let soft = box_blur(&sharp, 1);
        let softer = box_blur(&sharp, 2);

        let scorer = WaveletScorer::default();
        let s0 = scorer.score(&sharp);
        let s1 = scorer.score(&soft);
        let s2 = scorer.score(&softer);
        assert!(s0 > s1, "radius-1 blur did not lower the score: {s0} vs {s1}");
        assert!(s1 > s2, "radius-2 blur did not lower the score: {s1} vs {s2}");
    }

    #[test]
    fn undersized_frames_stop_at_level_zero() {
        // 8/2 = 4 < filter support, so only the level-0 variance contributes
        let frame = noise_frame(8, 8, 3);
        let expected = {
            let data: Vec<f64> = frame.data().iter().map(|&p| p as f64).collect();
            variance(&data)
        };
        assert_eq!(WaveletScorer::default().score(&frame), expected);

        // degenerate crops must not panic
        let empty = frame.crop(8, 8, 1, 1);
        assert_eq!(WaveletScorer::default().score(&empty), 0.0);
    }

    #[test]
    fn odd_dimensions_truncate() {
        // 45 -> 22 -> 11 -> 5: all three levels still run
        let frame = noise_frame(45, 45, 11);
        let score = WaveletScorer::default().score(&frame);
        assert!(score.is_finite());
        assert!(score > 0.0);
    }

    #[test]
    fn variance_basics() {
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(variance(&[5.0, 5.0, 5.0]), 0.0);
        assert!((variance(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }
}
