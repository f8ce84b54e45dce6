//! Shared fixtures for the integration tests

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use sdfdb_ingest::{ColumnSpec, Dtype, SchemaSpec};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Builder for one SD record
#[derive(Debug, Clone, Default)]
pub struct RecordFixture {
    title: String,
    tags: Vec<(String, String)>,
}

impl RecordFixture {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((tag.into(), value.into()));
        self
    }

    pub fn to_sdf(&self) -> String {
        let mut out = format!(
            "{}\n  sdfdb-test\n\n  0  0  0     0  0  0  0  0  0999 V2000\nM  END\n",
            self.title
        );
        for (tag, value) in &self.tags {
            out.push_str(&format!("> <{}>\n{}\n\n", tag, value));
        }
        out.push_str("$$$$\n");
        out
    }
}

/// Compound with a CID and a molecular weight
pub fn compound(cid: i64, weight: f64) -> RecordFixture {
    RecordFixture::new(cid.to_string())
        .with_tag("COMPOUND_CID", cid.to_string())
        .with_tag("MOLECULAR_WEIGHT", weight.to_string())
}

pub fn sdf(records: &[RecordFixture]) -> String {
    records.iter().map(RecordFixture::to_sdf).collect()
}

/// The two-column layout used by most pipeline tests
pub fn cid_weight_schema() -> SchemaSpec {
    SchemaSpec::new(
        "compounds",
        vec![
            ColumnSpec::new("cid", ["COMPOUND_CID"], Dtype::Integer)
                .not_null()
                .primary_key(),
            ColumnSpec::new("weight", ["MOLECULAR_WEIGHT"], Dtype::Real).with_index(),
        ],
    )
    .expect("valid layout")
}

/// The three records of the documented end-to-end scenario
pub fn scenario_records() -> Vec<RecordFixture> {
    vec![
        compound(100, 18.02),
        compound(100, 30.0),
        RecordFixture::new("no cid").with_tag("MOLECULAR_WEIGHT", "44.01"),
    ]
}

pub fn write_sdf(dir: &Path, name: &str, records: &[RecordFixture]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, sdf(records)).expect("write fixture");
    path
}

pub fn write_sdf_gz(dir: &Path, name: &str, records: &[RecordFixture]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).expect("create fixture");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(sdf(records).as_bytes())
        .expect("write fixture");
    encoder.finish().expect("finish gzip");
    path
}

/// `n` distinct compounds starting at `first`
pub fn compounds(first: i64, n: i64) -> Vec<RecordFixture> {
    (first..first + n)
        .map(|cid| compound(cid, cid as f64 / 10.0))
        .collect()
}
