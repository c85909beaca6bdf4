use ndarray::{Array3, ArrayView3, Zip};
use std::collections::BTreeSet;
use tracing::warn;

use crate::remap::RemapTable;
use crate::transform::{InvertibleTransform, Padding, SpatialShift, Transform};

/// Combined labels on the working grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub labels: Array3<u16>,
    /// Voxels that needed a label but whose key has no table entry.
    pub unmapped_voxels: usize,
    /// Distinct `(laterality, parcel)` keys behind `unmapped_voxels`.
    pub unmapped_keys: BTreeSet<(u8, u8)>,
}

/// Join parcel and laterality labels through the remap table.
///
/// A voxel keeps its table label if it has a hemisphere or its parcel is one of the
/// `midline` parcels. Everything else, and every key missing from the table, is 0.
pub fn reconcile(
    parcels: &ArrayView3<u8>,
    laterality: &ArrayView3<u8>,
    table: &RemapTable,
    midline: &[u8],
) -> Reconciled {
    assert_eq!(
        parcels.shape(),
        laterality.shape(),
        "parcel and laterality labels must share a grid"
    );
    let mut labels = Array3::zeros(parcels.raw_dim());
    Zip::from(&mut labels)
        .and(parcels)
        .and(laterality)
        .par_for_each(|label, &parcel, &side| {
            if side > 0 || midline.contains(&parcel) {
                *label = table.get(side, parcel).unwrap_or(0);
            }
        });

    let mut unmapped_voxels = 0;
    let mut unmapped_keys = BTreeSet::new();
    Zip::from(parcels)
        .and(laterality)
        .for_each(|&parcel, &side| {
            if (side > 0 || midline.contains(&parcel)) && table.get(side, parcel).is_none() {
                unmapped_voxels += 1;
                unmapped_keys.insert((side, parcel));
            }
        });

    Reconciled {
        labels,
        unmapped_voxels,
        unmapped_keys,
    }
}

/// Put working-grid labels back onto the conformed grid: pad the margins, then undo the
/// stripping shift.
pub fn restore_geometry(
    labels: &Array3<u16>,
    padding: &Padding,
    shift: &SpatialShift,
) -> Array3<u16> {
    shift.invert(&padding.apply(labels))
}

/// Reconcile and restore, reporting unmapped keys.
pub fn postprocess(
    parcels: &ArrayView3<u8>,
    laterality: &ArrayView3<u8>,
    table: &RemapTable,
    midline: &[u8],
    padding: &Padding,
    shift: &SpatialShift,
) -> Array3<u16> {
    let reconciled = reconcile(parcels, laterality, table, midline);
    if reconciled.unmapped_voxels > 0 {
        warn!(
            "{} voxels have no remap entry and were left at 0, keys (laterality, parcel): {:?}",
            reconciled.unmapped_voxels, reconciled.unmapped_keys
        );
    }
    restore_geometry(&reconciled.labels, padding, shift)
}
