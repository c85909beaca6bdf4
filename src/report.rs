//! Per-region voxel counts of combined label volumes.
use arrow::array::{ArrayRef, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::ArrayView3;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use snafu::ResultExt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use crate::errors::table::{ArrowSnafu, IOSnafu, InvalidLineSnafu, ParquetSnafu, WriteCsvSnafu};
use crate::errors::TableError;

/// Ordered table of region numbers and names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionNames {
    entries: Vec<(u16, String)>,
}

impl RegionNames {
    pub fn new(entries: Vec<(u16, String)>) -> Self {
        RegionNames { entries }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = File::open(path).context(IOSnafu { path })?;
        Self::parse(BufReader::new(file), path)
    }

    /// Parse `number name` lines. Blank lines and lines without a name are skipped.
    pub fn parse<R: BufRead>(reader: R, path: &Path) -> Result<Self, TableError> {
        let mut entries = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.context(IOSnafu { path })?;
            let fields = line.split_whitespace().collect::<Vec<_>>();
            if fields.len() < 2 {
                continue;
            }
            let number = match fields[0].parse::<u16>() {
                Ok(number) => number,
                Err(_) => {
                    return InvalidLineSnafu {
                        path,
                        line: index + 1,
                        content: line.clone(),
                    }
                    .fail()
                }
            };
            let name = fields[1..].join(" ");
            entries.push((number, name));
        }
        Ok(RegionNames { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn numbers(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(|(number, _)| *number)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(_, name)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u16, String)> + '_ {
        self.entries.iter()
    }
}

/// Voxel counts of one image, in region table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeReport {
    pub uid: String,
    pub counts: Vec<u64>,
}

/// Count the voxels of every region in `names`.
pub fn region_volumes(uid: &str, labels: &ArrayView3<u16>, names: &RegionNames) -> VolumeReport {
    let mut histogram = vec![0u64; u16::MAX as usize + 1];
    for &label in labels.iter() {
        histogram[label as usize] += 1;
    }
    VolumeReport {
        uid: uid.to_string(),
        counts: names.numbers().map(|n| histogram[n as usize]).collect(),
    }
}

fn write_csv_rows<W: Write>(
    writer: W,
    reports: &[VolumeReport],
    names: &RegionNames,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(std::iter::once("uid").chain(names.names()))?;
    for report in reports {
        writer.write_record(
            std::iter::once(report.uid.clone()).chain(report.counts.iter().map(|c| c.to_string())),
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Write reports as CSV with the header `uid,<region names...>`.
pub fn write_reports_csv<P: AsRef<Path>>(
    path: P,
    reports: &[VolumeReport],
    names: &RegionNames,
) -> Result<(), TableError> {
    let path = path.as_ref();
    let file = File::create(path).context(IOSnafu { path })?;
    write_csv_rows(file, reports, names).context(WriteCsvSnafu { path })
}

/// Write reports as a single Parquet row group: a `uid` column plus one column per region.
pub fn write_reports_parquet<P: AsRef<Path>>(
    path: P,
    reports: &[VolumeReport],
    names: &RegionNames,
) -> Result<(), TableError> {
    let path = path.as_ref();
    let mut fields = vec![Field::new("uid", DataType::Utf8, false)];
    fields.extend(names.names().map(|name| Field::new(name, DataType::UInt64, false)));

    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from(
        reports.iter().map(|r| r.uid.as_str()).collect::<Vec<_>>(),
    ))];
    for region in 0..names.len() {
        let counts = reports
            .iter()
            .map(|r| r.counts.get(region).copied().unwrap_or(0))
            .collect::<Vec<_>>();
        columns.push(Arc::new(UInt64Array::from(counts)));
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).context(ArrowSnafu)?;

    let file = File::create(path).context(IOSnafu { path })?;
    let props = WriterProperties::builder().build();
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).context(ParquetSnafu)?;
    writer.write(&batch).context(ParquetSnafu)?;
    writer.close().context(ParquetSnafu)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::io::Read;

    const LEVEL: &str = "1 Frontal_L\n2 Frontal_R\n\n3\n280 Superior temporal gyrus\n";

    fn names() -> RegionNames {
        RegionNames::parse(LEVEL.as_bytes(), Path::new("Level5.txt")).unwrap()
    }

    #[test]
    fn test_parse_region_names() {
        let names = names();
        assert_eq!(names.len(), 3);
        assert_eq!(names.numbers().collect::<Vec<_>>(), vec![1, 2, 280]);
        assert_eq!(
            names.names().collect::<Vec<_>>(),
            vec!["Frontal_L", "Frontal_R", "Superior temporal gyrus"]
        );
    }

    #[test]
    fn test_parse_invalid_number() {
        let result = RegionNames::parse("x Frontal_L\n".as_bytes(), Path::new("Level5.txt"));
        assert!(matches!(result, Err(TableError::InvalidLine { line: 1, .. })));
    }

    #[test]
    fn test_region_volumes() {
        let mut labels = Array3::<u16>::zeros((4, 4, 4));
        labels[[0, 0, 0]] = 1;
        labels[[0, 0, 1]] = 1;
        labels[[1, 0, 0]] = 280;
        labels[[2, 0, 0]] = 17;
        let report = region_volumes("subject", &labels.view(), &names());
        assert_eq!(report.uid, "subject");
        assert_eq!(report.counts, vec![2, 0, 1]);
    }

    #[test]
    fn test_write_reports_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("subject_volume.csv");
        let report = VolumeReport {
            uid: "subject".to_string(),
            counts: vec![2, 0, 1],
        };
        write_reports_csv(&path, &[report], &names()).unwrap();

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(
            contents,
            "uid,Frontal_L,Frontal_R,Superior temporal gyrus\nsubject,2,0,1\n"
        );
    }

    #[test]
    fn test_write_reports_parquet() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("volumes.parquet");
        let reports = vec![
            VolumeReport {
                uid: "a".to_string(),
                counts: vec![2, 0, 1],
            },
            VolumeReport {
                uid: "b".to_string(),
                counts: vec![5, 6, 7],
            },
        ];
        write_reports_parquet(&path, &reports, &names()).unwrap();

        let file = File::open(&path).unwrap();
        let reader =
            parquet::arrow::arrow_reader::ParquetRecordBatchReader::try_new(file, 1024).unwrap();
        let batch = reader.into_iter().next().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 4);
        assert!(batch.schema().field_with_name("Frontal_R").is_ok());
    }
}
