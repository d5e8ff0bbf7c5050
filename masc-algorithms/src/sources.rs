//! Feature sources: where a classifier reads each of its input values from. A list of sources is stored next to a
//! trained model so that the same values can be looked up again on another cloud without recomputing anything

use std::{
    borrow::Cow,
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    str::FromStr,
};

use masc_core::cloud::PointCloud;
use serde::{Deserialize, Serialize};

use crate::error::{MascError, Result};

/// First line of a serialized feature sources list
pub const SOURCES_HEADER: &str = "#MASC feature sources";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureSourceKind {
    ScalarField,
    DimX,
    DimY,
    DimZ,
    Red,
    Green,
    Blue,
}

impl FeatureSourceKind {
    const ALL: [FeatureSourceKind; 7] = [
        FeatureSourceKind::ScalarField,
        FeatureSourceKind::DimX,
        FeatureSourceKind::DimY,
        FeatureSourceKind::DimZ,
        FeatureSourceKind::Red,
        FeatureSourceKind::Green,
        FeatureSourceKind::Blue,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            FeatureSourceKind::ScalarField => "ScalarField",
            FeatureSourceKind::DimX => "DimX",
            FeatureSourceKind::DimY => "DimY",
            FeatureSourceKind::DimZ => "DimZ",
            FeatureSourceKind::Red => "Red",
            FeatureSourceKind::Green => "Green",
            FeatureSourceKind::Blue => "Blue",
        }
    }
}

impl Display for FeatureSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

impl FromStr for FeatureSourceKind {
    type Err = MascError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.keyword() == s)
            .ok_or_else(|| MascError::InvalidFeatureType(format!("unknown feature source '{}'", s)))
    }
}

/// Identifies one input value of a classifier. `name` is the field name for [`FeatureSourceKind::ScalarField`]
/// and informative only for the other kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSource {
    pub kind: FeatureSourceKind,
    pub name: String,
}

impl FeatureSource {
    pub fn new<S: Into<String>>(kind: FeatureSourceKind, name: S) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn scalar_field<S: Into<String>>(name: S) -> Self {
        Self::new(FeatureSourceKind::ScalarField, name)
    }

    /// Human readable label, e.g. for variable importance reports
    pub fn label(&self) -> &str {
        match self.kind {
            FeatureSourceKind::ScalarField => &self.name,
            FeatureSourceKind::DimX => "X",
            FeatureSourceKind::DimY => "Y",
            FeatureSourceKind::DimZ => "Z",
            FeatureSourceKind::Red => "R",
            FeatureSourceKind::Green => "G",
            FeatureSourceKind::Blue => "B",
        }
    }

    /// Reads the value of this source for every point of `cloud`. Scalar fields are looked up by their exact name
    ///
    /// # Errors
    ///
    /// [`MascError::MissingField`] if the field or the colors are missing on `cloud`
    pub fn values<'a>(&self, cloud: &'a PointCloud) -> Result<Cow<'a, [f64]>> {
        let channel = |index: usize| -> Result<Cow<'a, [f64]>> {
            let colors = cloud.colors().ok_or_else(|| {
                MascError::MissingField(format!("cloud {} has no colors", cloud.name()))
            })?;
            Ok(Cow::Owned(colors.iter().map(|c| c[index] as f64).collect()))
        };
        match self.kind {
            FeatureSourceKind::ScalarField => cloud
                .field_by_name(&self.name)
                .map(|field| Cow::Borrowed(field.values()))
                .ok_or_else(|| {
                    MascError::MissingField(format!(
                        "scalar field '{}' not found on cloud {}",
                        self.name,
                        cloud.name()
                    ))
                }),
            FeatureSourceKind::DimX => Ok(Cow::Owned(cloud.positions().iter().map(|p| p.x).collect())),
            FeatureSourceKind::DimY => Ok(Cow::Owned(cloud.positions().iter().map(|p| p.y).collect())),
            FeatureSourceKind::DimZ => Ok(Cow::Owned(cloud.positions().iter().map(|p| p.z).collect())),
            FeatureSourceKind::Red => channel(0),
            FeatureSourceKind::Green => channel(1),
            FeatureSourceKind::Blue => channel(2),
        }
    }
}

impl Display for FeatureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

impl FromStr for FeatureSource {
    type Err = MascError;

    /// Parses a `kind:name` pair. The name is everything after the first colon and may contain colons itself
    fn from_str(s: &str) -> Result<Self> {
        let separator = s
            .find(':')
            .ok_or_else(|| MascError::Config(format!("malformed feature source '{}'", s)))?;
        let kind = s[..separator].parse()?;
        Ok(Self::new(kind, &s[separator + 1..]))
    }
}

/// Writes `sources` as a header line followed by one `kind:name` line per source
pub fn write_sources<W: Write>(sources: &[FeatureSource], mut writer: W) -> Result<()> {
    writeln!(writer, "{}", SOURCES_HEADER)?;
    for source in sources {
        writeln!(writer, "{}", source)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a sources list written by [`write_sources`]. Empty lines are skipped
pub fn read_sources<R: BufRead>(reader: R) -> Result<Vec<FeatureSource>> {
    let mut lines = reader.lines();
    let header = lines.next().transpose()?;
    if header.as_deref().map(str::trim_end) != Some(SOURCES_HEADER) {
        return Err(MascError::Config(
            "feature sources list has no valid header".into(),
        ));
    }
    let mut sources = vec![];
    for line in lines {
        let line = line?;
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
        if line.is_empty() {
            continue;
        }
        sources.push(line.parse()?);
    }
    Ok(sources)
}

pub fn write_sources_to_file<P: AsRef<Path>>(sources: &[FeatureSource], path: P) -> Result<()> {
    let file = File::create(path)?;
    write_sources(sources, BufWriter::new(file))
}

pub fn read_sources_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<FeatureSource>> {
    let file = File::open(path)?;
    read_sources(BufReader::new(file))
}
