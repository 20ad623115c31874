use crate::dim::geometry::Rect;
use crate::dim::source::{Bitmap, BrightRegion, BrightnessAnalyzer, RegionParams};
use image::Rgba;

/// Upper bound on pixels sampled per grid cell.
const MAX_SAMPLES_PER_AXIS: u32 = 16;

/// Grid-based analyzer: downsample to a fixed grid, threshold, flood-fill
/// adjacent bright cells into clusters and bounding-box each cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridAnalyzer;

pub fn luminance(px: &Rgba<u8>) -> f64 {
    let [r, g, b, _] = px.0;
    (0.2126 * r as f64 + 0.7152 * g as f64 + 0.0722 * b as f64) / 255.0
}

#[derive(Debug, Clone, Copy)]
struct Cluster {
    min_col: u32,
    min_row: u32,
    max_col: u32,
    max_row: u32,
    brightness_sum: f64,
    cells: u32,
}

impl GridAnalyzer {
    /// Mean luminance of every grid cell, row-major.
    fn cell_grid(bitmap: &Bitmap, cols: u32, rows: u32) -> Vec<f64> {
        let (width, height) = bitmap.dimensions();
        let mut grid = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            let y0 = row * height / rows;
            let y1 = ((row + 1) * height / rows).max(y0 + 1);
            for col in 0..cols {
                let x0 = col * width / cols;
                let x1 = ((col + 1) * width / cols).max(x0 + 1);
                grid.push(Self::block_mean(bitmap, x0, y0, x1, y1));
            }
        }
        grid
    }

    fn block_mean(bitmap: &Bitmap, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        let step_x = ((x1 - x0) / MAX_SAMPLES_PER_AXIS).max(1);
        let step_y = ((y1 - y0) / MAX_SAMPLES_PER_AXIS).max(1);
        let mut sum = 0.0;
        let mut count = 0u32;
        let mut y = y0;
        while y < y1 {
            let mut x = x0;
            while x < x1 {
                sum += luminance(bitmap.get_pixel(x, y));
                count += 1;
                x += step_x;
            }
            y += step_y;
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    fn flood_fill(mask: &[bool], grid: &[f64], cols: u32, rows: u32) -> Vec<Cluster> {
        let mut visited = vec![false; mask.len()];
        let mut clusters = Vec::new();
        let mut stack = Vec::new();

        for start in 0..mask.len() {
            if !mask[start] || visited[start] {
                continue;
            }
            let mut cluster = Cluster {
                min_col: u32::MAX,
                min_row: u32::MAX,
                max_col: 0,
                max_row: 0,
                brightness_sum: 0.0,
                cells: 0,
            };
            visited[start] = true;
            stack.push(start);
            while let Some(idx) = stack.pop() {
                let col = idx as u32 % cols;
                let row = idx as u32 / cols;
                cluster.min_col = cluster.min_col.min(col);
                cluster.min_row = cluster.min_row.min(row);
                cluster.max_col = cluster.max_col.max(col);
                cluster.max_row = cluster.max_row.max(row);
                cluster.brightness_sum += grid[idx];
                cluster.cells += 1;

                let mut neighbours = [None; 4];
                if col > 0 {
                    neighbours[0] = Some(idx - 1);
                }
                if col + 1 < cols {
                    neighbours[1] = Some(idx + 1);
                }
                if row > 0 {
                    neighbours[2] = Some(idx - cols as usize);
                }
                if row + 1 < rows {
                    neighbours[3] = Some(idx + cols as usize);
                }
                for next in neighbours.into_iter().flatten() {
                    if mask[next] && !visited[next] {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }
            clusters.push(cluster);
        }
        clusters
    }

    /// Merges overlapping boxes until none overlap. Brightness is area weighted.
    fn merge_overlapping(mut regions: Vec<BrightRegion>) -> Vec<BrightRegion> {
        loop {
            let mut merged_any = false;
            let mut out: Vec<BrightRegion> = Vec::with_capacity(regions.len());
            for region in regions {
                if let Some(existing) = out.iter_mut().find(|r| r.rect.intersects(&region.rect)) {
                    let a = existing.rect.area();
                    let b = region.rect.area();
                    let total = (a + b).max(f64::EPSILON);
                    existing.brightness = (existing.brightness * a + region.brightness * b) / total;
                    existing.rect = existing.rect.union(&region.rect);
                    merged_any = true;
                } else {
                    out.push(region);
                }
            }
            regions = out;
            if !merged_any {
                return regions;
            }
        }
    }
}

impl BrightnessAnalyzer for GridAnalyzer {
    fn average_luminance(&self, bitmap: &Bitmap) -> f64 {
        let (width, height) = bitmap.dimensions();
        if width == 0 || height == 0 {
            return 0.0;
        }
        Self::block_mean(bitmap, 0, 0, width, height)
    }

    fn detect_bright_regions(&self, bitmap: &Bitmap, params: &RegionParams) -> Vec<BrightRegion> {
        let (width, height) = bitmap.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let cols = params.grid_size.clamp(1, width);
        let rows = params.grid_size.clamp(1, height);
        let grid = Self::cell_grid(bitmap, cols, rows);
        let mask: Vec<bool> = grid.iter().map(|&l| l >= params.threshold).collect();

        let cell_w = width as f64 / cols as f64;
        let cell_h = height as f64 / rows as f64;
        let boxes = Self::flood_fill(&mask, &grid, cols, rows)
            .into_iter()
            .map(|c| BrightRegion {
                rect: Rect::new(
                    c.min_col as f64 * cell_w,
                    c.min_row as f64 * cell_h,
                    (c.max_col - c.min_col + 1) as f64 * cell_w,
                    (c.max_row - c.min_row + 1) as f64 * cell_h,
                ),
                brightness: c.brightness_sum / c.cells.max(1) as f64,
            })
            .collect();

        let mut regions: Vec<BrightRegion> = Self::merge_overlapping(boxes)
            .into_iter()
            .filter(|r| r.rect.width >= params.min_size && r.rect.height >= params.min_size)
            .collect();
        regions.sort_by(|a, b| {
            a.rect
                .y
                .total_cmp(&b.rect.y)
                .then(a.rect.x.total_cmp(&b.rect.x))
        });
        regions
    }
}
