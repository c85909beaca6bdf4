//! Binary morphology on 3D masks.
use ndarray::{Array3, ArrayView3, Zip};

/// Structuring element centred on the voxel being updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Structure {
    /// Centre plus its 6 face neighbours.
    #[default]
    Cross,
    /// Full 3x3x3 neighbourhood.
    Cube,
}

impl Structure {
    pub fn offsets(self) -> Vec<[isize; 3]> {
        let mut offsets = Vec::with_capacity(27);
        for dx in -1isize..=1 {
            for dy in -1isize..=1 {
                for dz in -1isize..=1 {
                    let distance = dx.abs() + dy.abs() + dz.abs();
                    if self == Structure::Cube || distance <= 1 {
                        offsets.push([dx, dy, dz]);
                    }
                }
            }
        }
        offsets
    }
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    Dilate,
    Erode,
}

fn step(mask: &ArrayView3<bool>, offsets: &[[isize; 3]], rule: Rule) -> Array3<bool> {
    let (nx, ny, nz) = mask.dim();
    let bounds = [nx as isize, ny as isize, nz as isize];
    // Outside the grid counts as background for dilation and foreground for erosion,
    // so neither operation is driven by the border.
    let border = matches!(rule, Rule::Erode);

    let mut out = Array3::from_elem(mask.raw_dim(), false);
    Zip::indexed(&mut out).par_for_each(|(x, y, z), value| {
        let centre = [x as isize, y as isize, z as isize];
        let mut neighbours = offsets.iter().map(|offset| {
            let p = [
                centre[0] + offset[0],
                centre[1] + offset[1],
                centre[2] + offset[2],
            ];
            if (0..3).all(|i| p[i] >= 0 && p[i] < bounds[i]) {
                mask[[p[0] as usize, p[1] as usize, p[2] as usize]]
            } else {
                border
            }
        });
        *value = match rule {
            Rule::Dilate => neighbours.any(|v| v),
            Rule::Erode => neighbours.all(|v| v),
        };
    });
    out
}

fn repeat(
    mask: &ArrayView3<bool>,
    structure: Structure,
    iterations: usize,
    rule: Rule,
) -> Array3<bool> {
    let offsets = structure.offsets();
    let mut current = mask.to_owned();
    for _ in 0..iterations {
        current = step(&current.view(), &offsets, rule);
    }
    current
}

pub fn dilate(mask: &ArrayView3<bool>, structure: Structure, iterations: usize) -> Array3<bool> {
    repeat(mask, structure, iterations, Rule::Dilate)
}

pub fn erode(mask: &ArrayView3<bool>, structure: Structure, iterations: usize) -> Array3<bool> {
    repeat(mask, structure, iterations, Rule::Erode)
}

/// Dilation followed by erosion. Fills holes smaller than the structure and never
/// removes foreground.
pub fn close(mask: &ArrayView3<bool>, structure: Structure, iterations: usize) -> Array3<bool> {
    let dilated = dilate(mask, structure, iterations);
    erode(&dilated.view(), structure, iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3};
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    fn count(mask: &Array3<bool>) -> usize {
        mask.iter().filter(|&&v| v).count()
    }

    fn point(shape: (usize, usize, usize), at: [usize; 3]) -> Array3<bool> {
        let mut mask = Array3::from_elem(shape, false);
        mask[at] = true;
        mask
    }

    #[rstest]
    #[case(Structure::Cross, 1, 7)]
    #[case(Structure::Cross, 2, 25)]
    #[case(Structure::Cube, 1, 27)]
    #[case(Structure::Cube, 2, 125)]
    #[case(Structure::Cube, 0, 1)]
    fn test_dilate_point(
        #[case] structure: Structure,
        #[case] iterations: usize,
        #[case] expected: usize,
    ) {
        let mask = point((9, 9, 9), [4, 4, 4]);
        assert_eq!(count(&dilate(&mask.view(), structure, iterations)), expected);
    }

    #[test]
    fn test_dilate_clipped_at_border() {
        let mask = point((4, 4, 4), [0, 0, 0]);
        assert_eq!(count(&dilate(&mask.view(), Structure::Cross, 1)), 4);
    }

    #[test]
    fn test_erode_block() {
        let mut mask = Array3::from_elem((9, 9, 9), false);
        mask.slice_mut(s![2..7, 2..7, 2..7]).fill(true);
        let eroded = erode(&mask.view(), Structure::Cube, 1);
        assert_eq!(count(&eroded), 27);
        assert!(eroded[[3, 3, 3]] && eroded[[5, 5, 5]]);
        assert!(!eroded[[2, 4, 4]]);
    }

    #[test]
    fn test_close_fills_single_voxel_hole() {
        let mut filled = Array3::from_elem((20, 20, 20), false);
        filled.slice_mut(s![6..13, 6..13, 6..13]).fill(true);
        let mut holed = filled.clone();
        holed[[9, 9, 9]] = false;

        let closed = close(&holed.view(), Structure::Cube, 3);
        assert!(closed[[9, 9, 9]]);
        assert_eq!(closed, filled);
    }

    #[test]
    fn test_close_is_extensive() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mask = Array3::from_shape_fn((12, 10, 8), |_| rng.gen_bool(0.4));
        let closed = close(&mask.view(), Structure::Cube, 3);
        assert!(mask.iter().zip(closed.iter()).all(|(&m, &c)| !m || c));
    }

    #[test]
    fn test_close_keeps_border_foreground() {
        let mut mask = Array3::from_elem((12, 6, 6), false);
        mask.slice_mut(s![0..3, .., ..]).fill(true);
        let closed = close(&mask.view(), Structure::Cube, 3);
        assert_eq!(closed, mask);
    }
}
