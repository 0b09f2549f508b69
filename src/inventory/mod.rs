//! Inventory index: the manifest-driven region → cruise table.
//!
//! The manifest is a headerless TSV with one row per cruise:
//!
//! ```text
//! region  cruise  total  bad  shard_count
//! NGDC    cruiseA 250000 500  3
//! ```
//!
//! It is parsed once per run into an immutable [`Inventory`]; nothing scans
//! the data directory. Cruises with zero shards are dropped at load time and
//! never reach the locator, flattener or loader.

mod locator;

pub use locator::{assigned_total, shard_counts, CruiseShards, ShardLocator, ShardRef};

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// One cruise row of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cruise {
    region: String,
    name: String,
    total: u64,
    bad: u64,
    shard_count: u64,
}

impl Cruise {
    /// Create a cruise entry.
    #[must_use]
    pub fn new(
        region: impl Into<String>,
        name: impl Into<String>,
        total: u64,
        bad: u64,
        shard_count: u64,
    ) -> Self {
        Self {
            region: region.into(),
            name: name.into(),
            total,
            bad,
            shard_count,
        }
    }

    /// Owning region
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Cruise name (shard file stem)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total record count
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Records labelled bad (0)
    #[must_use]
    pub const fn bad(&self) -> u64 {
        self.bad
    }

    /// Number of on-disk shards
    #[must_use]
    pub const fn shard_count(&self) -> u64 {
        self.shard_count
    }

    /// Manifest row for this cruise, without trailing newline.
    #[must_use]
    pub fn to_manifest_row(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            self.region, self.name, self.total, self.bad, self.shard_count
        )
    }
}

/// Immutable region → cruises mapping built from the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    regions: BTreeMap<String, Vec<Cruise>>,
}

/// Read the manifest at `path`. See [`Inventory::load`].
///
/// # Errors
/// [`Error::ManifestIo`] if unreadable, [`Error::ManifestFormat`] on a bad row.
pub fn load_inventory<P: AsRef<Path>>(path: P) -> Result<Inventory> {
    Inventory::load(path)
}

impl Inventory {
    /// Read and parse a manifest file.
    ///
    /// # Errors
    /// [`Error::ManifestIo`] if unreadable, [`Error::ManifestFormat`] on a bad row.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ManifestIo {
            path: path.to_path_buf(),
            source,
        })?;
        let inventory = Self::parse(&text)?;
        tracing::debug!(
            manifest = %path.display(),
            regions = inventory.regions.len(),
            cruises = inventory.cruise_count(),
            "inventory loaded"
        );
        Ok(inventory)
    }

    /// Parse manifest text. Blank lines are ignored.
    ///
    /// A region whose cruises all have zero shards is still known, with an
    /// empty cruise list.
    ///
    /// # Errors
    /// [`Error::ManifestFormat`] if a row does not hold five fields or a
    /// count is not an unsigned integer.
    pub fn parse(text: &str) -> Result<Self> {
        let mut regions: BTreeMap<String, Vec<Cruise>> = BTreeMap::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let cruise = parse_row(i + 1, line)?;
            let entry = regions.entry(cruise.region.clone()).or_default();
            if cruise.shard_count > 0 {
                entry.push(cruise);
            }
        }
        Ok(Self { regions })
    }

    /// Build an inventory directly from cruise entries (zero-shard cruises dropped).
    #[must_use]
    pub fn from_cruises(cruises: impl IntoIterator<Item = Cruise>) -> Self {
        let mut regions: BTreeMap<String, Vec<Cruise>> = BTreeMap::new();
        for cruise in cruises {
            let entry = regions.entry(cruise.region.clone()).or_default();
            if cruise.shard_count > 0 {
                entry.push(cruise);
            }
        }
        Self { regions }
    }

    /// Region keys in sorted order.
    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    /// Cruises of a region, in manifest order.
    ///
    /// # Errors
    /// [`Error::UnknownRegion`] if the manifest never mentions `region`.
    pub fn cruises(&self, region: &str) -> Result<&[Cruise]> {
        self.regions
            .get(region)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownRegion(region.to_string()))
    }

    /// Look up a single cruise.
    #[must_use]
    pub fn cruise(&self, region: &str, name: &str) -> Option<&Cruise> {
        self.regions.get(region)?.iter().find(|c| c.name == name)
    }

    /// Number of cruises with at least one shard.
    #[must_use]
    pub fn cruise_count(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    /// Serialize back to manifest text.
    #[must_use]
    pub fn to_manifest(&self) -> String {
        let mut out = String::new();
        for cruise in self.regions.values().flatten() {
            let _ = writeln!(out, "{}", cruise.to_manifest_row());
        }
        out
    }

    /// Write the manifest to `path`, overwriting it.
    ///
    /// # Errors
    /// [`Error::ManifestIo`] if the file cannot be written.
    pub fn write_manifest<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_manifest()).map_err(|source| Error::ManifestIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_row(line: usize, row: &str) -> Result<Cruise> {
    let fields: Vec<&str> = row.split('\t').collect();
    if fields.len() != 5 {
        return Err(Error::ManifestFormat {
            line,
            reason: format!("expected 5 tab-separated fields, found {}", fields.len()),
        });
    }
    let number = |idx: usize, what: &str| -> Result<u64> {
        fields[idx].trim().parse().map_err(|_| Error::ManifestFormat {
            line,
            reason: format!("{what} is not an unsigned integer: {:?}", fields[idx]),
        })
    };
    let region = fields[0].trim();
    let name = fields[1].trim();
    if region.is_empty() || name.is_empty() {
        return Err(Error::ManifestFormat {
            line,
            reason: "empty region or cruise name".to_string(),
        });
    }
    Ok(Cruise::new(
        region,
        name,
        number(2, "total")?,
        number(3, "bad")?,
        number(4, "shard_count")?,
    ))
}
