use csv::{ReaderBuilder, WriterBuilder};
use nalgebra::{DMatrix, DVector};
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_npy::{NpzReader, NpzWriter};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use crate::error::{OrangeError, Result};

/// Leading non-feature columns: replicate id, train/test flag, label.
pub const META_COLUMNS: usize = 3;

/// Array names inside the input archive, also used as CSV file stems.
pub const NO_NOISE: &str = "no_noise";
pub const SIX_NOISE: &str = "six_noise";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    /// Zero marks a training record and any other finite value a test
    /// record.
    #[allow(clippy::float_cmp)]
    pub fn from_flag(flag: f64) -> Option<Self> {
        if !flag.is_finite() {
            None
        } else if flag == 0.0 {
            Some(Split::Train)
        } else {
            Some(Split::Test)
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            Split::Train => 0,
            Split::Test => 1,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Test => write!(f, "test"),
        }
    }
}

#[allow(clippy::float_cmp)]
fn check_label(label: f64) -> Result<f64> {
    if label == 1.0 || label == -1.0 {
        Ok(label)
    } else {
        Err(OrangeError::InvalidLabel(label))
    }
}

/// Features and labels for one side of a replicate.
#[derive(Debug, Clone)]
pub struct Partition {
    pub features: Array2<f64>,
    pub labels: Array1<f64>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.features.nrows(), self.features.ncols(), |i, j| {
            self.features[(i, j)]
        })
    }

    pub fn to_label_vector(&self) -> DVector<f64> {
        DVector::from_iterator(self.labels.len(), self.labels.iter().copied())
    }
}

/// One simulation replicate split into disjoint train and test partitions.
#[derive(Debug, Clone)]
pub struct Replicate {
    pub id: usize,
    pub train: Partition,
    pub test: Partition,
}

/// Immutable table of simulated records.
#[derive(Debug, Clone)]
pub struct Dataset {
    replicate_ids: Vec<usize>,
    splits: Vec<Split>,
    labels: Array1<f64>,
    features: Array2<f64>,
}

impl Dataset {
    pub fn new(
        replicate_ids: Vec<usize>,
        splits: Vec<Split>,
        labels: Array1<f64>,
        features: Array2<f64>,
    ) -> Result<Self> {
        let n = replicate_ids.len();
        if splits.len() != n {
            return Err(OrangeError::LengthMismatch {
                what: "splits",
                expected: n,
                got: splits.len(),
            });
        }
        if labels.len() != n {
            return Err(OrangeError::LengthMismatch {
                what: "labels",
                expected: n,
                got: labels.len(),
            });
        }
        if features.nrows() != n {
            return Err(OrangeError::LengthMismatch {
                what: "feature rows",
                expected: n,
                got: features.nrows(),
            });
        }
        if features.ncols() == 0 {
            return Err(OrangeError::FeatureMismatch {
                expected: 1,
                got: 0,
            });
        }
        for &label in &labels {
            check_label(label)?;
        }

        Ok(Self {
            replicate_ids,
            splits,
            labels,
            features,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn labels(&self) -> ArrayView1<'_, f64> {
        self.labels.view()
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    /// Distinct replicate ids in ascending order.
    pub fn replicate_ids(&self) -> Vec<usize> {
        self.replicate_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn partition_where(&self, keep: impl Fn(usize) -> bool) -> Partition {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| keep(i)).collect();

        Partition {
            features: self.features.select(Axis(0), &rows),
            labels: self.labels.select(Axis(0), &rows),
        }
    }

    pub fn replicate(&self, id: usize) -> Result<Replicate> {
        let train =
            self.partition_where(|i| self.replicate_ids[i] == id && self.splits[i] == Split::Train);
        let test =
            self.partition_where(|i| self.replicate_ids[i] == id && self.splits[i] == Split::Test);

        if train.is_empty() {
            return Err(OrangeError::EmptyPartition {
                replicate: id,
                split: Split::Train,
            });
        }
        if test.is_empty() {
            return Err(OrangeError::EmptyPartition {
                replicate: id,
                split: Split::Test,
            });
        }

        Ok(Replicate { id, train, test })
    }

    /// Every test record across all replicates.
    pub fn test_records(&self) -> Partition {
        self.partition_where(|i| self.splits[i] == Split::Test)
    }

    /// Copy keeping only the first `n_features` feature columns.
    pub fn with_leading_features(&self, n_features: usize) -> Result<Self> {
        if n_features == 0 || n_features > self.n_features() {
            return Err(OrangeError::FeatureMismatch {
                expected: n_features,
                got: self.n_features(),
            });
        }

        Ok(Self {
            replicate_ids: self.replicate_ids.clone(),
            splits: self.splits.clone(),
            labels: self.labels.clone(),
            features: self.features.slice(s![.., ..n_features]).to_owned(),
        })
    }

    /// Stack the records of `other` below this dataset's records.
    pub fn concat(&self, other: &Dataset) -> Result<Self> {
        if self.n_features() != other.n_features() {
            return Err(OrangeError::FeatureMismatch {
                expected: self.n_features(),
                got: other.n_features(),
            });
        }

        let features = concatenate(Axis(0), &[self.features.view(), other.features.view()])
            .map_err(|e| OrangeError::InvalidConfig(e.to_string()))?;
        let labels = concatenate(Axis(0), &[self.labels.view(), other.labels.view()])
            .map_err(|e| OrangeError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            replicate_ids: [self.replicate_ids.as_slice(), &other.replicate_ids].concat(),
            splits: [self.splits.as_slice(), &other.splits].concat(),
            labels,
            features,
        })
    }

    /// Builds a dataset from a numeric table laid out as replicate id,
    /// train/test flag, label, then the feature columns.
    #[allow(clippy::float_cmp)]
    pub fn from_table(table: ArrayView2<'_, f64>) -> Result<Self> {
        if table.ncols() <= META_COLUMNS {
            return Err(OrangeError::MalformedRecord {
                row: 0,
                message: format!(
                    "expected more than {META_COLUMNS} columns, got {}",
                    table.ncols()
                ),
            });
        }

        let mut replicate_ids = Vec::with_capacity(table.nrows());
        let mut splits = Vec::with_capacity(table.nrows());

        for (row, record) in table.rows().into_iter().enumerate() {
            let id = record[0];
            let whole = id >= 0.0 && id.fract() == 0.0;
            if !whole {
                return Err(OrangeError::MalformedRecord {
                    row,
                    message: format!("replicate id {id} is not a non-negative integer"),
                });
            }
            #[allow(clippy::cast_possible_truncation)]
            #[allow(clippy::cast_sign_loss)]
            replicate_ids.push(id as usize);

            splits.push(
                Split::from_flag(record[1]).ok_or_else(|| OrangeError::MalformedRecord {
                    row,
                    message: format!("train/test flag {} is not finite", record[1]),
                })?,
            );
        }

        Self::new(
            replicate_ids,
            splits,
            table.column(2).to_owned(),
            table.slice(s![.., META_COLUMNS..]).to_owned(),
        )
    }

    /// Inverse of [`Dataset::from_table`].
    pub fn to_table(&self) -> Array2<f64> {
        let mut table = Array2::zeros((self.len(), META_COLUMNS + self.n_features()));

        for (i, mut record) in table.rows_mut().into_iter().enumerate() {
            record[0] = self.replicate_ids[i] as f64;
            record[1] = f64::from(self.splits[i].flag());
            record[2] = self.labels[i];
        }
        table
            .slice_mut(s![.., META_COLUMNS..])
            .assign(&self.features);

        table
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

        let mut values = Vec::new();
        let mut rows = 0;
        let mut width: Option<usize> = None;

        for (row, result) in reader.records().enumerate() {
            let record = result?;

            let fields = record
                .iter()
                .map(|field| field.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()
                .map_err(|e| OrangeError::MalformedRecord {
                    row,
                    message: e.to_string(),
                })?;

            match width {
                None => width = Some(fields.len()),
                Some(expected) if expected != fields.len() => {
                    return Err(OrangeError::FeatureMismatch {
                        expected: expected.saturating_sub(META_COLUMNS),
                        got: fields.len().saturating_sub(META_COLUMNS),
                    });
                }
                Some(_) => {}
            }

            values.extend(fields);
            rows += 1;
        }

        let table = Array2::from_shape_vec((rows, width.unwrap_or(0)), values)
            .map_err(|e| OrangeError::InvalidConfig(e.to_string()))?;

        Self::from_table(table.view())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = WriterBuilder::new().from_writer(writer);

        let mut header = vec![
            "replicate".to_string(),
            "split".to_string(),
            "label".to_string(),
        ];
        header.extend((1..=self.n_features()).map(|j| format!("x{j}")));
        writer.write_record(&header)?;

        for (i, row) in self.features.rows().into_iter().enumerate() {
            let mut record = vec![
                self.replicate_ids[i].to_string(),
                self.splits[i].flag().to_string(),
                self.labels[i].to_string(),
            ];
            record.extend(row.iter().map(f64::to_string));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }
}

/// numpy's `savez` stores `name` as `name.npy`; both spellings are accepted.
fn read_array<R: Read + Seek>(
    archive: &mut NpzReader<R>,
    names: &[String],
    name: &str,
) -> Result<Dataset> {
    let entry = names
        .iter()
        .find(|entry| entry.as_str() == name || entry.strip_suffix(".npy") == Some(name))
        .ok_or_else(|| OrangeError::MissingArray(name.to_string()))?;

    let table: Array2<f64> = archive.by_name(entry)?;
    Dataset::from_table(table.view())
}

fn is_npz(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == "npz")
}

/// The two benchmark variants: informative features only, and with six
/// pure-noise features appended.
#[derive(Debug, Clone)]
pub struct DatasetPair {
    pub no_noise: Dataset,
    pub six_noise: Dataset,
}

impl DatasetPair {
    /// Loads a directory of CSV tables, or otherwise an `.npz` archive with
    /// the arrays `no_noise` and `six_noise`.
    pub fn load(path: &Path) -> Result<Self> {
        if path.is_dir() {
            Self::load_csv_dir(path)
        } else {
            Self::load_npz(path)
        }
    }

    pub fn load_npz(path: &Path) -> Result<Self> {
        let mut archive = NpzReader::new(BufReader::new(File::open(path)?))?;
        let names = archive.names()?;

        Ok(Self {
            no_noise: read_array(&mut archive, &names, NO_NOISE)?,
            six_noise: read_array(&mut archive, &names, SIX_NOISE)?,
        })
    }

    pub fn load_csv_dir(dir: &Path) -> Result<Self> {
        Ok(Self {
            no_noise: Dataset::load(&dir.join(format!("{NO_NOISE}.csv")))?,
            six_noise: Dataset::load(&dir.join(format!("{SIX_NOISE}.csv")))?,
        })
    }

    /// Writes an `.npz` archive when `path` has that extension, otherwise a
    /// directory of CSV tables.
    pub fn save(&self, path: &Path) -> Result<()> {
        if is_npz(path) {
            self.save_npz(path)
        } else {
            self.save_csv_dir(path)
        }
    }

    pub fn save_npz(&self, path: &Path) -> Result<()> {
        let mut archive = NpzWriter::new(BufWriter::new(File::create(path)?));
        archive.add_array(NO_NOISE, &self.no_noise.to_table())?;
        archive.add_array(SIX_NOISE, &self.six_noise.to_table())?;
        archive.finish()?.flush()?;
        Ok(())
    }

    pub fn save_csv_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.no_noise.save(&dir.join(format!("{NO_NOISE}.csv")))?;
        self.six_noise.save(&dir.join(format!("{SIX_NOISE}.csv")))
    }
}
