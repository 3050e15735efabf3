//! Bright blob detection for star fields.
//!
//! The detector works on a single-channel intensity image. Colour input is
//! reduced with the BT.601 luma weights (`0.299 R + 0.587 G + 0.114 B`) in
//! 14-bit fixed point.
//!
//! 1. Pick a global threshold with Otsu's method (maximum between-class
//!    variance over the 256-bin histogram) and binarise the image.
//! 2. Label 8-connected foreground components and keep only the outermost
//!    ones. A component sitting inside the hole of another component has no
//!    external contour of its own.
//! 3. Trace the outer boundary of each component and treat it as a polygon.
//!    Its area and first-order moments come from Green's theorem, so a lone
//!    pixel or a one pixel wide line encloses zero area.
//! 4. Contours enclosing at least `min_area` square pixels yield a centroid
//!    `(m10 / m00, m01 / m00)`, truncated to whole pixels.

use std::collections::VecDeque;

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;

/// Image-space pixel coordinate of a detected blob centroid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Clockwise neighbour ring starting west, in image coordinates (y down).
const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// BT.601 luma weights scaled by `1 << LUMA_SHIFT`; they sum to 16384.
const LUMA_WEIGHTS: [u32; 3] = [4899, 9617, 1868];
const LUMA_SHIFT: u32 = 14;

const DOT_RADIUS: i64 = 2;
const DOT_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);

/// Global-threshold blob finder.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobDetector {
    config: DetectionConfig,
}

impl BlobDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Detects star-like blobs. The returned order follows discovery order
    /// (raster scan of each component's top-left pixel) and carries no
    /// meaning downstream.
    pub fn detect(&self, image: &DynamicImage) -> Vec<Point> {
        self.detect_gray(&intensity(image))
    }

    pub fn detect_gray(&self, gray: &GrayImage) -> Vec<Point> {
        let threshold = otsu_threshold(gray);
        let mask = BinaryMask::from_threshold(gray, threshold);
        let outside = mask.outside_background();

        let mut points = Vec::new();
        let mut components = 0usize;
        for component in mask.components(&outside) {
            components += 1;
            if !component.external {
                continue;
            }

            let contour = mask.trace_boundary(&component);
            let moments = PolygonMoments::from_contour(&contour);
            if moments.m00.abs() < self.config.min_area || moments.m00 == 0.0 {
                continue;
            }

            if let Some(point) = moments.centroid() {
                points.push(point);
            }
        }

        tracing::debug!(
            threshold,
            components,
            stars = points.len(),
            width = gray.width(),
            height = gray.height(),
            "blob detection finished"
        );
        points
    }
}

/// Detects stars with the default configuration.
pub fn detect(image: &DynamicImage) -> Vec<Point> {
    BlobDetector::default().detect(image)
}

/// Single-channel intensity of `image` using BT.601 weights.
pub fn intensity(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }

    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        Luma([luma(r, g, b)])
    })
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let [wr, wg, wb] = LUMA_WEIGHTS;
    let weighted = r as u32 * wr + g as u32 * wg + b as u32 * wb;
    ((weighted + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8
}

/// Returns an RGB copy of `image` with a filled red dot on every point.
pub fn annotate(image: &DynamicImage, points: &[Point]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = (canvas.width() as i64, canvas.height() as i64);

    for point in points {
        for dy in -DOT_RADIUS..=DOT_RADIUS {
            for dx in -DOT_RADIUS..=DOT_RADIUS {
                if dx * dx + dy * dy > DOT_RADIUS * DOT_RADIUS {
                    continue;
                }
                let (x, y) = (point.x as i64 + dx, point.y as i64 + dy);
                if (0..width).contains(&x) && (0..height).contains(&y) {
                    canvas.put_pixel(x as u32, y as u32, DOT_COLOUR);
                }
            }
        }
    }

    canvas
}

/// Computes the Otsu threshold of an 8-bit image. Pixels strictly above the
/// returned level are foreground.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total = gray.width() as f64 * gray.height() as f64;
    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut weight_b = 0.0;
    let mut max_variance = 0.0;
    let mut threshold = 0u8;

    for (level, &count) in histogram.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }

        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }

        sum_b += level as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f).powi(2);

        if variance > max_variance {
            max_variance = variance;
            threshold = level as u8;
        }
    }

    threshold
}

struct BinaryMask {
    width: i64,
    height: i64,
    pixels: Vec<bool>,
}

struct Component {
    start: (i64, i64),
    external: bool,
}

struct ComponentIter<'a> {
    mask: &'a BinaryMask,
    outside: &'a [bool],
    labels: Vec<u32>,
    cursor: usize,
    next_label: u32,
}

impl BinaryMask {
    fn from_threshold(gray: &GrayImage, threshold: u8) -> Self {
        Self {
            width: gray.width() as i64,
            height: gray.height() as i64,
            pixels: gray.pixels().map(|p| p.0[0] > threshold).collect(),
        }
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            None
        } else {
            Some((y * self.width + x) as usize)
        }
    }

    fn is_set(&self, x: i64, y: i64) -> bool {
        self.index(x, y).map(|i| self.pixels[i]).unwrap_or(false)
    }

    /// Background pixels 4-connected to the image border. Whatever background
    /// is left over forms the holes of some component.
    fn outside_background(&self) -> Vec<bool> {
        let mut outside = vec![false; self.pixels.len()];
        let mut queue = VecDeque::new();

        for y in 0..self.height {
            for x in 0..self.width {
                let on_border = x == 0 || y == 0 || x == self.width - 1 || y == self.height - 1;
                if let Some(i) = self.index(x, y) {
                    if on_border && !self.pixels[i] {
                        outside[i] = true;
                        queue.push_back((x, y));
                    }
                }
            }
        }

        while let Some((x, y)) = queue.pop_front() {
            for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
                if let Some(i) = self.index(x + dx, y + dy) {
                    if !self.pixels[i] && !outside[i] {
                        outside[i] = true;
                        queue.push_back((x + dx, y + dy));
                    }
                }
            }
        }

        outside
    }

    fn components<'a>(&'a self, outside: &'a [bool]) -> ComponentIter<'a> {
        ComponentIter {
            mask: self,
            outside,
            labels: vec![0; self.pixels.len()],
            cursor: 0,
            next_label: 1,
        }
    }

    /// Moore-neighbour tracing of the outer boundary, starting from the
    /// component's first pixel in raster order.
    fn trace_boundary(&self, component: &Component) -> Vec<(i64, i64)> {
        let start = component.start;
        let mut contour = vec![start];
        let mut current = start;
        let mut backtrack = 0usize;
        let mut first_step = None;
        // A boundary walk never visits a pixel more than four times.
        let step_limit = self.pixels.len().saturating_mul(4).max(8);

        for _ in 0..step_limit {
            let Some((next, dir)) = (1..=8)
                .map(|offset| (backtrack + offset) % 8)
                .map(|dir| {
                    let (dx, dy) = NEIGHBOURS[dir];
                    ((current.0 + dx, current.1 + dy), dir)
                })
                .find(|&((x, y), _)| self.is_set(x, y))
            else {
                break;
            };

            if current == start {
                match first_step {
                    None => first_step = Some(next),
                    Some(step) if step == next => break,
                    Some(_) => {}
                }
            }

            let (bx, by) = NEIGHBOURS[(dir + 7) % 8];
            let from = (current.0 + bx - next.0, current.1 + by - next.1);
            backtrack = NEIGHBOURS
                .iter()
                .position(|&offset| offset == from)
                .unwrap_or(0);
            current = next;
            contour.push(current);
        }

        if contour.len() > 1 && contour.last() == Some(&start) {
            contour.pop();
        }
        contour
    }
}

impl Iterator for ComponentIter<'_> {
    type Item = Component;

    fn next(&mut self) -> Option<Component> {
        let mask = self.mask;
        while self.cursor < mask.pixels.len() {
            let seed = self.cursor;
            self.cursor += 1;
            if !mask.pixels[seed] || self.labels[seed] != 0 {
                continue;
            }

            let label = self.next_label;
            self.next_label += 1;
            let start = (seed as i64 % mask.width, seed as i64 / mask.width);
            let mut external = false;
            let mut stack = vec![start];
            self.labels[seed] = label;

            while let Some((x, y)) = stack.pop() {
                for (dx, dy) in NEIGHBOURS {
                    let (nx, ny) = (x + dx, y + dy);
                    match mask.index(nx, ny) {
                        // Beyond the border counts as outside background.
                        None => external = true,
                        Some(i) if mask.pixels[i] => {
                            if self.labels[i] == 0 {
                                self.labels[i] = label;
                                stack.push((nx, ny));
                            }
                        }
                        Some(i) => {
                            let four_connected = dx == 0 || dy == 0;
                            if four_connected && self.outside[i] {
                                external = true;
                            }
                        }
                    }
                }
            }

            return Some(Component {
                start,
                external,
            });
        }
        None
    }
}

/// Area and first-order moments of a closed polygon.
#[derive(Debug, Clone, Copy, Default)]
struct PolygonMoments {
    m00: f64,
    m10: f64,
    m01: f64,
}

impl PolygonMoments {
    fn from_contour(contour: &[(i64, i64)]) -> Self {
        if contour.len() < 3 {
            return Self::default();
        }

        let mut a00 = 0.0;
        let mut a10 = 0.0;
        let mut a01 = 0.0;
        for (i, &(x0, y0)) in contour.iter().enumerate() {
            let (x1, y1) = contour[(i + 1) % contour.len()];
            let (x0, y0, x1, y1) = (x0 as f64, y0 as f64, x1 as f64, y1 as f64);
            let cross = x0 * y1 - x1 * y0;
            a00 += cross;
            a10 += cross * (x0 + x1);
            a01 += cross * (y0 + y1);
        }

        // Normalise orientation so the enclosed area is positive.
        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        Self {
            m00: sign * a00 / 2.0,
            m10: sign * a10 / 6.0,
            m01: sign * a01 / 6.0,
        }
    }

    fn centroid(&self) -> Option<Point> {
        if self.m00 == 0.0 {
            return None;
        }
        let x = (self.m10 / self.m00).max(0.0);
        let y = (self.m01 / self.m00).max(0.0);
        Some(Point::new(x as u32, y as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(width: u32, height: u32) -> GrayImage {
        GrayImage::new(width, height)
    }

    fn fill(image: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, level: u8) {
        for y in y0..=y1 {
            for x in x0..=x1 {
                image.put_pixel(x, y, Luma([level]));
            }
        }
    }

    fn detect(gray: &GrayImage) -> Vec<Point> {
        BlobDetector::default().detect_gray(gray)
    }

    #[test]
    fn dark_frame_has_no_stars() {
        assert!(detect(&black(32, 32)).is_empty());
    }

    #[test]
    fn finds_centroid_of_square_blob() {
        let mut gray = black(40, 40);
        fill(&mut gray, 9, 19, 11, 21, 255);

        assert_eq!(detect(&gray), vec![Point::new(10, 20)]);
    }

    #[test]
    fn drops_blobs_below_minimum_area() {
        let mut gray = black(40, 40);
        gray.put_pixel(5, 5, Luma([255]));
        fill(&mut gray, 20, 20, 22, 20, 255);
        fill(&mut gray, 30, 30, 31, 31, 255);

        assert!(detect(&gray).is_empty());
    }

    #[test]
    fn reports_blobs_in_discovery_order() {
        let mut gray = black(64, 64);
        fill(&mut gray, 40, 4, 44, 8, 200);
        fill(&mut gray, 4, 30, 8, 34, 220);

        assert_eq!(detect(&gray), vec![Point::new(42, 6), Point::new(6, 32)]);
    }

    #[test]
    fn ignores_blobs_inside_holes() {
        let mut gray = black(40, 40);
        fill(&mut gray, 10, 10, 18, 10, 255);
        fill(&mut gray, 10, 18, 18, 18, 255);
        fill(&mut gray, 10, 10, 10, 18, 255);
        fill(&mut gray, 18, 10, 18, 18, 255);
        fill(&mut gray, 13, 13, 15, 15, 255);

        assert_eq!(detect(&gray), vec![Point::new(14, 14)]);
    }

    #[test]
    fn handles_blobs_on_the_border() {
        let mut gray = black(20, 20);
        fill(&mut gray, 0, 0, 2, 2, 255);

        assert_eq!(detect(&gray), vec![Point::new(1, 1)]);
    }

    #[test]
    fn otsu_separates_bimodal_histogram() {
        let mut gray = black(10, 10);
        fill(&mut gray, 0, 0, 9, 4, 40);
        fill(&mut gray, 0, 5, 9, 9, 200);

        let threshold = otsu_threshold(&gray);
        assert!((40..200).contains(&threshold));
    }

    #[test]
    fn min_area_is_configurable() {
        let mut gray = black(40, 40);
        fill(&mut gray, 9, 19, 11, 21, 255);

        let strict = BlobDetector::new(DetectionConfig { min_area: 5.0 });
        assert!(strict.detect_gray(&gray).is_empty());
    }

    #[test]
    fn colour_uses_bt601_weights() {
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
        assert_eq!(luma(0, 60, 0), 35);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
    }

    #[test]
    fn colour_frame_thresholds_on_luma() {
        // Blue sky (29), a red blob (76) and a dim green blob (35): the
        // threshold lands on 35, so only the red blob stands out.
        let mut rgb = RgbImage::from_pixel(30, 30, Rgb([0, 0, 255]));
        for y in 4..=6 {
            for x in 4..=6 {
                rgb.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        for y in 20..=22 {
            for x in 20..=22 {
                rgb.put_pixel(x, y, Rgb([0, 60, 0]));
            }
        }
        let image = DynamicImage::ImageRgb8(rgb);

        assert_eq!(otsu_threshold(&intensity(&image)), 35);
        assert_eq!(BlobDetector::default().detect(&image), vec![Point::new(5, 5)]);
    }

    #[test]
    fn annotates_points_in_red() {
        let image = DynamicImage::ImageLuma8(black(10, 10));
        let marked = annotate(&image, &[Point::new(0, 0), Point::new(5, 5)]);

        assert_eq!(marked.get_pixel(5, 5), &DOT_COLOUR);
        assert_eq!(marked.get_pixel(7, 5), &DOT_COLOUR);
        assert_eq!(marked.get_pixel(7, 7), &Rgb([0, 0, 0]));
        assert_eq!(marked.get_pixel(0, 2), &DOT_COLOUR);
    }
}
