//! Positional renaming of the segments of saved label volumes.
//!
//! Loading a label volume as a segmentation and writing `.seg.nrrd` files belongs to the
//! host application, which provides them through [`SegmentationHost`].
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::file::{VolumeFileOperations, LABEL_MARKER};
use crate::report::RegionNames;

pub const SEGMENTATION_EXTENSION: &str = ".seg.nrrd";

/// A loaded segmentation whose segments are addressed by id.
pub trait Segmentation {
    /// Segment ids in display order.
    fn segment_ids(&self) -> Vec<String>;

    /// Current name of a segment, `None` if the id does not resolve to a segment.
    fn segment_name(&self, id: &str) -> Option<String>;

    /// Returns false if the id does not resolve to a segment.
    fn rename_segment(&mut self, id: &str, name: &str) -> bool;
}

pub trait SegmentationHost {
    type Segmentation: Segmentation;
    type Error: std::fmt::Display;

    fn load(&self, path: &Path) -> Result<Self::Segmentation, Self::Error>;

    fn save(&self, segmentation: &Self::Segmentation, path: &Path) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameSummary {
    pub renamed: usize,
    /// Ids listed by the segmentation that could not be resolved.
    pub invalid: Vec<String>,
}

/// Rename segments by position. Segments beyond the end of `names` become `Segment_<i>`.
pub fn rename_segments<S: Segmentation + ?Sized>(
    segmentation: &mut S,
    names: &[&str],
) -> RenameSummary {
    let ids = segmentation.segment_ids();
    if ids.len() != names.len() {
        warn!(
            "{} segments were expected but {} were found",
            names.len(),
            ids.len()
        );
    }

    let mut summary = RenameSummary::default();
    for (index, id) in ids.iter().enumerate() {
        let Some(old_name) = segmentation.segment_name(id) else {
            summary.invalid.push(id.clone());
            continue;
        };
        let new_name = match names.get(index) {
            Some(name) => name.to_string(),
            None => format!("Segment_{}", index),
        };
        if segmentation.rename_segment(id, &new_name) {
            info!("Renamed segment {}: {} -> {}", id, old_name, new_name);
            summary.renamed += 1;
        } else {
            summary.invalid.push(id.clone());
        }
    }
    if !summary.invalid.is_empty() {
        warn!(
            "{} segments are invalid: {:?}",
            summary.invalid.len(),
            summary.invalid
        );
    }
    summary
}

/// `<stem>.seg.nrrd` next to a label volume.
pub fn segmentation_path(label_path: &Path) -> Option<PathBuf> {
    let stem = label_path.volume_stem()?;
    Some(label_path.with_file_name(format!("{}{}", stem, SEGMENTATION_EXTENSION)))
}

fn find_label_volume(folder: &Path) -> Option<PathBuf> {
    let mut entries = std::fs::read_dir(folder)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_label_volume())
        .collect::<Vec<_>>();
    entries.sort();
    entries.into_iter().next()
}

/// Rename the segments of the label volume in every subfolder of `output_folder` and save
/// each as a segmentation file. Subfolders that cannot be processed are skipped.
///
/// Returns the written segmentation paths.
pub fn update_segment_names<H: SegmentationHost>(
    output_folder: &Path,
    names: &RegionNames,
    host: &H,
) -> std::io::Result<Vec<PathBuf>> {
    let names = names.names().collect::<Vec<_>>();
    let mut subfolders = std::fs::read_dir(output_folder)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    subfolders.sort();

    let mut written = Vec::new();
    for folder in subfolders {
        let Some(label_path) = find_label_volume(&folder) else {
            warn!(
                "No {} label volume found under {}",
                LABEL_MARKER,
                folder.display()
            );
            continue;
        };
        let mut segmentation = match host.load(&label_path) {
            Ok(segmentation) => segmentation,
            Err(e) => {
                warn!("Failed to load segmentation {}: {}", label_path.display(), e);
                continue;
            }
        };
        rename_segments(&mut segmentation, &names);

        let Some(output) = segmentation_path(&label_path) else {
            continue;
        };
        match host.save(&segmentation, &output) {
            Ok(()) => {
                info!("Segmentation saved: {}", output.display());
                written.push(output);
            }
            Err(e) => warn!("Error saving segmentation {}: {}", output.display(), e),
        }
    }
    Ok(written)
}
