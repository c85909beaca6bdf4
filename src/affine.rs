use nifti::NiftiHeader;

/// NIfTI code for a transform aligned to some other scan.
const XFORM_ALIGNED: i16 = 2;
/// NIfTI code for spatial units in millimetres.
const UNITS_MM: u8 = 2;
const SINGULAR_EPSILON: f64 = 1e-12;

/// Voxel-to-world transform in homogeneous coordinates, row major, RAS+ world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub matrix: [[f64; 4]; 4],
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn identity() -> Self {
        Self::diagonal([1.0; 3], [0.0; 3])
    }

    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        Affine {
            matrix: [rows[0], rows[1], rows[2], [0.0, 0.0, 0.0, 1.0]],
        }
    }

    pub fn diagonal(scale: [f64; 3], translation: [f64; 3]) -> Self {
        Self::from_rows([
            [scale[0], 0.0, 0.0, translation[0]],
            [0.0, scale[1], 0.0, translation[1]],
            [0.0, 0.0, scale[2], translation[2]],
        ])
    }

    /// RAS+ grid of `shape` voxels with spacing `voxel_size` whose centre sits at the world origin.
    pub fn centered(shape: [usize; 3], voxel_size: [f64; 3]) -> Self {
        Self::centered_on(shape, voxel_size, [0.0; 3])
    }

    /// RAS+ grid of `shape` voxels with spacing `voxel_size` whose centre sits at `world`.
    pub fn centered_on(shape: [usize; 3], voxel_size: [f64; 3], world: [f64; 3]) -> Self {
        let translation: [f64; 3] =
            std::array::from_fn(|i| world[i] - (shape[i] as f64 - 1.0) / 2.0 * voxel_size[i]);
        Self::diagonal(voxel_size, translation)
    }

    /// World position of the centre of a grid of `shape` voxels.
    pub fn grid_center(&self, shape: [usize; 3]) -> [f64; 3] {
        self.apply(shape.map(|n| (n as f64 - 1.0) / 2.0))
    }

    /// Read the transform the way most tools do: sform when set, then qform, then pixdim scaling.
    pub fn from_header(header: &NiftiHeader) -> Self {
        if header.sform_code > 0 {
            let row = |r: [f32; 4]| r.map(f64::from);
            Self::from_rows([row(header.srow_x), row(header.srow_y), row(header.srow_z)])
        } else if header.qform_code > 0 {
            Self::from_quaternion(header)
        } else {
            let pixdim = std::array::from_fn(|i| pixdim_or_one(header.pixdim[i + 1]));
            Self::diagonal(pixdim, [0.0; 3])
        }
    }

    fn from_quaternion(header: &NiftiHeader) -> Self {
        let (b, c, d) = (
            header.quatern_b as f64,
            header.quatern_c as f64,
            header.quatern_d as f64,
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let rotation = [
            [
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
            ],
            [
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
            ],
            [
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - c * c - b * b,
            ],
        ];
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let scale = [
            pixdim_or_one(header.pixdim[1]),
            pixdim_or_one(header.pixdim[2]),
            pixdim_or_one(header.pixdim[3]) * qfac,
        ];
        let offset = [
            header.quatern_x as f64,
            header.quatern_y as f64,
            header.quatern_z as f64,
        ];
        let rows = std::array::from_fn(|i| {
            [
                rotation[i][0] * scale[0],
                rotation[i][1] * scale[1],
                rotation[i][2] * scale[2],
                offset[i],
            ]
        });
        Self::from_rows(rows)
    }

    /// Store the transform as an aligned sform together with the matching voxel spacing.
    pub fn write_to_header(&self, header: &mut NiftiHeader) {
        let row = |i: usize| self.matrix[i].map(|v| v as f32);
        header.srow_x = row(0);
        header.srow_y = row(1);
        header.srow_z = row(2);
        header.sform_code = XFORM_ALIGNED;
        header.qform_code = 0;
        header.pixdim[0] = 1.0;
        for (i, size) in self.voxel_sizes().into_iter().enumerate() {
            header.pixdim[i + 1] = size as f32;
        }
        header.xyzt_units = UNITS_MM;
    }

    pub fn linear(&self) -> [[f64; 3]; 3] {
        std::array::from_fn(|i| [self.matrix[i][0], self.matrix[i][1], self.matrix[i][2]])
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.matrix[0][3], self.matrix[1][3], self.matrix[2][3]]
    }

    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        std::array::from_fn(|i| {
            let row = &self.matrix[i];
            row[0] * point[0] + row[1] * point[1] + row[2] * point[2] + row[3]
        })
    }

    /// Matrix product `self * other`, i.e. `other` is applied first.
    pub fn compose(&self, other: &Affine) -> Affine {
        let mut matrix = [[0.0; 4]; 4];
        for (i, row) in matrix.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = (0..4).map(|k| self.matrix[i][k] * other.matrix[k][j]).sum();
            }
        }
        Affine { matrix }
    }

    pub fn inverse(&self) -> Option<Affine> {
        let m = self.linear();
        let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
        if det.abs() < SINGULAR_EPSILON {
            return None;
        }
        let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };
        let inv = [
            [cofactor(1, 2, 1, 2), -cofactor(0, 2, 1, 2), cofactor(0, 1, 1, 2)],
            [-cofactor(1, 2, 0, 2), cofactor(0, 2, 0, 2), -cofactor(0, 1, 0, 2)],
            [cofactor(1, 2, 0, 1), -cofactor(0, 2, 0, 1), cofactor(0, 1, 0, 1)],
        ]
        .map(|row| row.map(|v| v / det));
        let t = self.translation();
        let rows = std::array::from_fn(|i| {
            let shift = -(inv[i][0] * t[0] + inv[i][1] * t[1] + inv[i][2] * t[2]);
            [inv[i][0], inv[i][1], inv[i][2], shift]
        });
        Some(Self::from_rows(rows))
    }

    /// Length of each voxel axis in world units.
    pub fn voxel_sizes(&self) -> [f64; 3] {
        let m = self.linear();
        std::array::from_fn(|j| (0..3).map(|i| m[i][j] * m[i][j]).sum::<f64>().sqrt())
    }
}

fn pixdim_or_one(value: f32) -> f64 {
    if value > 0.0 {
        value as f64
    } else {
        1.0
    }
}
