//! Catalog readers.
//!
//! # Format
//!
//! CSV catalogs start with a header row naming their columns, any of
//! `x,y,z,vx,vy,vz,mualpha,mudelta,radvel,appmag,absmag,color,size,hip,id,name`
//! in any order. Only `x`, `y` and `z` are required; `name` holds
//! `|`-separated aliases. Blank lines and lines starting with `#` are skipped,
//! and a row without an `id` gets its row number.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use lodstar::{Error, ParticleRecord, Result};
use tracing::{debug, info};

use crate::args::CatalogFormat;

/// Read the catalog at `path`.
pub fn load(path: &Path, format: CatalogFormat) -> Result<Vec<ParticleRecord>> {
    let io_error = |source: std::io::Error| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let records = match format {
        CatalogFormat::Csv => read_csv(BufReader::new(File::open(path).map_err(io_error)?))?,
        CatalogFormat::Binary => {
            let data = fs::read(path).map_err(io_error)?;
            lodstar_codec::decode_particles(&data)?
        }
    };
    info!("Read {} objects from {}", records.len(), path.display());
    Ok(records)
}

/// Keep only objects within `cap` of the origin.
pub fn cap_distance(records: Vec<ParticleRecord>, cap: f64) -> Vec<ParticleRecord> {
    let before = records.len();
    let kept: Vec<_> = records.into_iter().filter(|r| r.distance() <= cap).collect();
    info!(
        "Distance cap {cap} dropped {} of {before} objects",
        before - kept.len()
    );
    kept
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    X,
    Y,
    Z,
    Vx,
    Vy,
    Vz,
    MuAlpha,
    MuDelta,
    RadVel,
    AppMag,
    AbsMag,
    Color,
    Size,
    Hip,
    Id,
    Name,
    Ignored,
}

impl Column {
    fn from_header(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "x" => Self::X,
            "y" => Self::Y,
            "z" => Self::Z,
            "vx" => Self::Vx,
            "vy" => Self::Vy,
            "vz" => Self::Vz,
            "mualpha" => Self::MuAlpha,
            "mudelta" => Self::MuDelta,
            "radvel" => Self::RadVel,
            "appmag" => Self::AppMag,
            "absmag" => Self::AbsMag,
            "color" => Self::Color,
            "size" => Self::Size,
            "hip" => Self::Hip,
            "id" => Self::Id,
            "name" => Self::Name,
            other => {
                debug!("Ignoring catalog column '{other}'");
                Self::Ignored
            }
        }
    }
}

fn catalog_error(line: usize, detail: impl std::fmt::Display) -> Error {
    Error::Catalog {
        detail: format!("line {line}: {detail}"),
    }
}

/// Parse a CSV catalog.
pub fn read_csv(reader: impl BufRead) -> Result<Vec<ParticleRecord>> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty() || l.starts_with('#')));

    let Some((number, header)) = lines.next() else {
        return Err(Error::Catalog {
            detail: "catalog has no header row".to_string(),
        });
    };
    let header = header.map_err(|e| catalog_error(number, e))?;
    let columns: Vec<Column> = header.split(',').map(Column::from_header).collect();
    for required in [Column::X, Column::Y, Column::Z] {
        if !columns.contains(&required) {
            return Err(Error::Catalog {
                detail: format!("catalog header lacks the {required:?} column"),
            });
        }
    }

    let mut records = Vec::new();
    for (number, line) in lines {
        let line = line.map_err(|e| catalog_error(number, e))?;
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != columns.len() {
            return Err(catalog_error(
                number,
                format!("expected {} fields, found {}", columns.len(), fields.len()),
            ));
        }
        let mut record = ParticleRecord {
            id: i64::try_from(records.len()).unwrap_or(i64::MAX),
            ..ParticleRecord::default()
        };
        for (&column, field) in columns.iter().zip(&fields) {
            set_field(&mut record, column, field.trim())
                .map_err(|e| catalog_error(number, format!("{column:?}: {e}")))?;
        }
        records.push(record);
    }
    Ok(records)
}

fn set_field(
    record: &mut ParticleRecord,
    column: Column,
    value: &str,
) -> std::result::Result<(), String> {
    let float = || value.parse::<f32>().map_err(|e| format!("'{value}': {e}"));
    match column {
        Column::X | Column::Y | Column::Z => {
            let axis = match column {
                Column::X => 0,
                Column::Y => 1,
                _ => 2,
            };
            record.position[axis] = value.parse().map_err(|e| format!("'{value}': {e}"))?;
        }
        Column::Vx => record.velocity[0] = float()?,
        Column::Vy => record.velocity[1] = float()?,
        Column::Vz => record.velocity[2] = float()?,
        Column::MuAlpha => record.mualpha = float()?,
        Column::MuDelta => record.mudelta = float()?,
        Column::RadVel => record.radvel = float()?,
        Column::AppMag => record.appmag = float()?,
        Column::AbsMag => record.absmag = float()?,
        Column::Color => record.color = float()?,
        Column::Size => record.size = float()?,
        Column::Hip => record.hip = value.parse().map_err(|e| format!("'{value}': {e}"))?,
        Column::Id => record.id = value.parse().map_err(|e| format!("'{value}': {e}"))?,
        Column::Name => {
            record.names = value
                .split('|')
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
        }
        Column::Ignored => {}
    }
    Ok(())
}
