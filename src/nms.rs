// nms.rs — 3×3 non-maximum suppression for FAST corners on one level.
//
// FAST fires on clusters of adjacent pixels around every real corner. Only
// the strongest pixel of each 3×3 neighbourhood is kept, so the per-level
// feature budget is not wasted on near-duplicates.
//
// The corners are scattered into a dense score grid (0.0 = no corner), and
// each corner is compared against its 8 neighbours. Ties are broken by
// raster order: a corner survives an equal neighbour only if it comes first
// (smaller y, then smaller x), so a plateau keeps exactly one pixel.

use crate::fast::Corner;
use crate::image::Image;

/// Keep only corners that are the strict local maximum of their 3×3
/// neighbourhood. `width × height` is the size of the level the corners
/// were detected on. Output keeps the input order.
pub fn suppress_3x3(corners: &[Corner], width: usize, height: usize) -> Vec<Corner> {
    if corners.is_empty() {
        return Vec::new();
    }

    let mut grid = Image::<f32>::new(width, height);
    for c in corners {
        grid.set(c.x, c.y, c.score);
    }

    corners
        .iter()
        .filter(|c| is_local_max(&grid, c))
        .copied()
        .collect()
}

fn is_local_max(grid: &Image<f32>, c: &Corner) -> bool {
    let x0 = c.x.saturating_sub(1);
    let y0 = c.y.saturating_sub(1);
    let x1 = (c.x + 1).min(grid.width() - 1);
    let y1 = (c.y + 1).min(grid.height() - 1);

    for ny in y0..=y1 {
        for nx in x0..=x1 {
            if nx == c.x && ny == c.y {
                continue;
            }
            let other = grid.get(nx, ny);
            if other > c.score {
                return false;
            }
            // Equal neighbour earlier in raster order wins the plateau.
            if other == c.score && (ny, nx) < (c.y, c.x) {
                return false;
            }
        }
    }
    true
}
