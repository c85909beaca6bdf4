use ndarray::ArrayView3;
use tracing::debug;

use crate::errors::ModelError;
use crate::model::SliceModel;
use crate::pipeline::config::{Geometry, MaskSettings};
use crate::stages::cropping::{apply_mask, brain_mask};
use crate::transform::{roll, InvertibleTransform, SpatialShift};
use crate::volume::{normalize, Volume};

/// Skull-stripped volume on the working grid, with the translation that centred it.
#[derive(Debug, Clone, PartialEq)]
pub struct Stripped {
    pub volume: Volume,
    pub shift: SpatialShift,
}

/// Integer-truncated centre of mass of a mask. An empty mask yields `fallback`.
pub fn center_of_mass(mask: &ArrayView3<bool>, fallback: [usize; 3]) -> [usize; 3] {
    let mut total = [0u64; 3];
    let mut count = 0u64;
    for ((x, y, z), _) in mask.indexed_iter().filter(|(_, &v)| v) {
        total[0] += x as u64;
        total[1] += y as u64;
        total[2] += z as u64;
        count += 1;
    }
    if count == 0 {
        return fallback;
    }
    total.map(|t| (t / count) as usize)
}

/// Strip the skull from the conformed volume and move the brain onto the working grid.
///
/// The mask comes from the normalized cropped volume and is applied to the conformed
/// intensities. The result is rolled so the mask's centre of mass sits on the working centre,
/// then the margins are cut away.
pub fn strip_skull<M>(
    cropped: &ArrayView3<f32>,
    conformed: &ArrayView3<f32>,
    model: &mut M,
    geometry: &Geometry,
    settings: &MaskSettings,
) -> Result<Stripped, ModelError>
where
    M: SliceModel + ?Sized,
{
    let normalized = normalize(cropped);
    let mask = brain_mask(&normalized.view(), model, settings)?;
    let stripped = apply_mask(conformed, &mask.view());

    let com = center_of_mass(&mask.view(), geometry.center);
    let shift = SpatialShift::between(com, geometry.center);
    debug!("Brain centre of mass {:?}, shift {:?}", com, shift.offsets);

    let centred = roll(&stripped.view(), shift.offsets);
    let volume = geometry.padding().invert(&centred);
    Ok(Stripped { volume, shift })
}
