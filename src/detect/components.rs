//! Connected-component analysis over a foreground mask.

use std::collections::VecDeque;

use super::background::ForegroundMask;

/// Bounding box and pixel count of one 8-connected foreground component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentBox {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
    pub pixels: usize,
}

impl ComponentBox {
    /// Width over height, 0 for an empty box.
    pub fn aspect_ratio(&self) -> f64 {
        if self.h == 0 {
            0.0
        } else {
            self.w as f64 / self.h as f64
        }
    }
}

const NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Largest component by pixel count. Ties keep the first found in scan order.
pub fn largest_component(mask: &ForegroundMask) -> Option<ComponentBox> {
    let (w, h) = (mask.width, mask.height);
    let mut visited = vec![false; w * h];
    let mut queue = VecDeque::new();
    let mut best: Option<ComponentBox> = None;

    for start in 0..w * h {
        if visited[start] || !mask.is_foreground(start % w, start / w) {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut pixels = 0usize;

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            pixels += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for &(dx, dy) in &NEIGHBORS {
                let nx = x as isize + dx;
                let ny = y as isize + dy;
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if !visited[n] && mask.is_foreground(nx as usize, ny as usize) {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        if best.map_or(true, |b| pixels > b.pixels) {
            best = Some(ComponentBox {
                x: min_x,
                y: min_y,
                w: max_x - min_x + 1,
                h: max_y - min_y + 1,
                pixels,
            });
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::background::PixelClass;

    fn mask_from(rows: &[&str]) -> ForegroundMask {
        let height = rows.len();
        let width = rows[0].len();
        let classes = rows
            .iter()
            .flat_map(|r| r.chars())
            .map(|c| match c {
                '#' => PixelClass::Foreground,
                's' => PixelClass::Shadow,
                _ => PixelClass::Background,
            })
            .collect();
        ForegroundMask {
            width,
            height,
            classes,
        }
    }

    #[test]
    fn picks_largest_blob() {
        let mask = mask_from(&[
            "#.......",
            "....###.",
            "....###.",
            "...#....",
            "........",
        ]);
        let best = largest_component(&mask).expect("component");
        // Diagonal neighbour joins (3,3) to the block.
        assert_eq!(
            best,
            ComponentBox {
                x: 3,
                y: 1,
                w: 4,
                h: 3,
                pixels: 7
            }
        );
    }

    #[test]
    fn shadows_and_empty_masks_have_no_component() {
        assert_eq!(largest_component(&mask_from(&["ss..", "...."])), None);
        assert_eq!(ComponentBox { x: 0, y: 0, w: 3, h: 0, pixels: 0 }.aspect_ratio(), 0.0);
    }
}
