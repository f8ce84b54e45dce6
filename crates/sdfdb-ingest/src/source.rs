//! Input file discovery and decompression

use flate2::read::MultiGzDecoder;
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::IngestError;

/// Read buffer per input file
const READ_BUFFER_SIZE: usize = 1 << 20;

/// PubChem's bulk files are named after the CID range they hold
const CID_RANGE_PATTERN: &str = r"^Compound_(\d+)_(\d+)\.sdf(?:\.gz)?$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Plain,
    Gzip,
}

/// One SD file to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// File name without directories, used as the ledger key
    pub name: String,
    pub compression: Compression,
    /// Lowest and highest CID, when the name follows PubChem's convention
    pub cid_range: Option<(i64, i64)>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, IngestError> {
        Ok(Self::with_pattern(path.into(), &Regex::new(CID_RANGE_PATTERN)?))
    }

    fn with_pattern(path: PathBuf, pattern: &Regex) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let compression = if name.ends_with(".gz") {
            Compression::Gzip
        } else {
            Compression::Plain
        };

        let cid_range = pattern.captures(&name).and_then(|caps| {
            let lo = caps.get(1)?.as_str().parse().ok()?;
            let hi = caps.get(2)?.as_str().parse().ok()?;
            Some((lo, hi))
        });

        Self {
            path,
            name,
            compression,
            cid_range,
        }
    }

    /// Open the file as a decompressed line-oriented stream
    pub fn open(&self) -> io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(&self.path)?;
        Ok(match self.compression {
            // PubChem archives are sometimes concatenated gzip members
            Compression::Gzip => Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                MultiGzDecoder::new(file),
            )),
            Compression::Plain => Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)),
        })
    }
}

/// Expand the given inputs into SD files
///
/// Files are taken as given. Directories contribute their `*.sdf` and
/// `*.sdf.gz` entries in name order. A file listed twice is loaded once.
/// The ledger keys files by name, so two different files sharing a name
/// are refused.
pub fn discover(inputs: &[PathBuf]) -> Result<Vec<SourceFile>, IngestError> {
    let pattern = Regex::new(CID_RANGE_PATTERN)?;
    // file name -> canonical path
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut files = Vec::new();

    for input in inputs {
        let meta = std::fs::metadata(input).map_err(|source| IngestError::Source {
            path: input.clone(),
            source,
        })?;

        let paths = if meta.is_dir() {
            list_sd_files(input)?
        } else {
            vec![input.clone()]
        };

        for path in paths {
            let canonical = std::fs::canonicalize(&path).map_err(|source| IngestError::Source {
                path: path.clone(),
                source,
            })?;
            let file = SourceFile::with_pattern(path, &pattern);
            match seen.get(&file.name).cloned() {
                Some(previous) if previous == canonical => continue,
                Some(previous) => {
                    return Err(IngestError::Input(format!(
                        "{} and {} share the file name '{}'",
                        previous.display(),
                        canonical.display(),
                        file.name
                    )));
                },
                None => {
                    seen.insert(file.name.clone(), canonical);
                    files.push(file);
                },
            }
        }
    }

    if files.is_empty() {
        return Err(IngestError::Input(format!(
            "no SD files found in {}",
            inputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(files)
}

fn list_sd_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let io_err = |source: io::Error| IngestError::Source {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_sd = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".sdf") || n.ends_with(".sdf.gz"));
        if is_sd && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
