use itertools::Itertools;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rust_search::SearchBuilder;

/// Marker in the file name of combined label volumes.
pub const LABEL_MARKER: &str = "_280";

type IOResult<T> = Result<T, std::io::Error>;

const BAR_TEMPLATE: &str =
    "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} subjects ({eta} left, {per_sec})";
const SPINNER_TEMPLATE: &str = "{spinner:.blue} {msg} [{elapsed}]";

pub fn default_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap(),
    );
    pb
}

pub fn default_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template(SPINNER_TEMPLATE)
            .unwrap(),
    );
    spinner
}

pub trait SourceFileOperations
where
    Self: AsRef<Path>,
{
    /// Read a file containing one path per line. Blank lines are skipped.
    fn read_paths(&self) -> IOResult<Vec<PathBuf>> {
        let reader = BufReader::new(File::open(self.as_ref())?);
        reader
            .lines()
            .filter_map_ok(|line| {
                let line = line.trim();
                (!line.is_empty()).then(|| PathBuf::from(line))
            })
            .collect()
    }
}

impl<P: AsRef<Path>> SourceFileOperations for P {}

pub trait VolumeFileOperations
where
    Self: AsRef<Path>,
{
    /// Check if a file has a `.nii` or `.nii.gz` extension.
    fn has_nifti_extension(&self) -> bool {
        match self.as_ref().file_name().and_then(|name| name.to_str()) {
            Some(name) => {
                let name = name.to_ascii_lowercase();
                name.ends_with(".nii") || name.ends_with(".nii.gz")
            }
            None => false,
        }
    }

    /// Check if a path is an existing NIfTI file.
    fn is_nifti_file(&self) -> bool {
        self.as_ref().is_file() && self.has_nifti_extension()
    }

    /// Check if a path is a combined label volume written by the pipeline.
    fn is_label_volume(&self) -> bool {
        self.is_nifti_file()
            && self
                .as_ref()
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.contains(LABEL_MARKER))
    }

    /// File name without the `.nii` or `.nii.gz` extension.
    fn volume_stem(&self) -> Option<String> {
        let name = self.as_ref().file_name()?.to_str()?;
        let lower = name.to_ascii_lowercase();
        let stem = if lower.ends_with(".nii.gz") {
            &name[..name.len() - ".nii.gz".len()]
        } else if lower.ends_with(".nii") {
            &name[..name.len() - ".nii".len()]
        } else {
            return None;
        };
        Some(stem.to_string())
    }

    /// Find all NIfTI files under a directory, sorted by path.
    fn find_volumes(&self) -> IOResult<Vec<PathBuf>> {
        let dir = self.as_ref();
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Not a directory",
            ));
        }
        let result = SearchBuilder::default()
            .location(dir)
            .build()
            .map(PathBuf::from)
            .filter(|file| file.is_nifti_file())
            .sorted()
            .collect();
        Ok(result)
    }

    /// Find all NIfTI files in a directory, with a progress spinner.
    fn find_volumes_with_spinner(&self) -> IOResult<Vec<PathBuf>> {
        let spinner = default_spinner();
        spinner.set_message("Searching for NIfTI files");
        let result = self.find_volumes()?;
        spinner.finish_and_clear();
        Ok(result)
    }
}

impl<P: AsRef<Path>> VolumeFileOperations for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_progress_templates() {
        assert!(BAR_TEMPLATE.contains("{pos}/{len} subjects"));
        assert!(ProgressStyle::default_bar().template(BAR_TEMPLATE).is_ok());
        assert!(ProgressStyle::default_spinner().template(SPINNER_TEMPLATE).is_ok());
        assert_eq!(default_bar(3).length(), Some(3));
    }

    #[rstest]
    #[case("subject.nii", true, Some("subject"))]
    #[case("subject.nii.gz", true, Some("subject"))]
    #[case("Subject.NII.GZ", true, Some("Subject"))]
    #[case("subject.v2.nii", true, Some("subject.v2"))]
    #[case("subject.nrrd", false, None)]
    #[case("subject", false, None)]
    fn test_nifti_names(
        #[case] name: &str,
        #[case] is_nifti: bool,
        #[case] stem: Option<&str>,
    ) {
        let path = PathBuf::from("/data").join(name);
        assert_eq!(path.has_nifti_extension(), is_nifti);
        assert_eq!(path.volume_stem().as_deref(), stem);
    }

    #[test]
    fn test_find_volumes() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("b").join("c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("z.nii"), b"").unwrap();
        fs::write(nested.join("a.nii.gz"), b"").unwrap();
        fs::write(nested.join("notes.txt"), b"").unwrap();

        let found = temp_dir.path().find_volumes().unwrap();
        assert_eq!(
            found,
            vec![nested.join("a.nii.gz"), temp_dir.path().join("z.nii")]
        );
    }

    #[test]
    fn test_find_volumes_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.nii");
        fs::write(&file, b"").unwrap();
        assert!(file.find_volumes().is_err());
    }

    #[test]
    fn test_is_label_volume() {
        let temp_dir = TempDir::new().unwrap();
        let labels = temp_dir.path().join("subject_280.nii");
        let source = temp_dir.path().join("subject.nii");
        fs::write(&labels, b"").unwrap();
        fs::write(&source, b"").unwrap();
        assert!(labels.is_label_volume());
        assert!(!source.is_label_volume());
    }

    #[test]
    fn test_read_paths() {
        let temp_dir = TempDir::new().unwrap();
        let list = temp_dir.path().join("paths.txt");
        let mut file = File::create(&list).unwrap();
        writeln!(file, "/a/one_280.nii").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  /b/two_280.nii.gz  ").unwrap();
        drop(file);

        let paths = list.read_paths().unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/a/one_280.nii"),
                PathBuf::from("/b/two_280.nii.gz")
            ]
        );
    }
}
