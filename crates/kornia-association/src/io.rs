//! Plain-text landmark maps.
//!
//! One landmark per line as `ID X Y`, separated by whitespace. Empty lines and
//! lines starting with `#` are skipped.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::point::Point2D;

/// Error types for the map file module.
#[derive(Debug, thiserror::Error)]
pub enum MapFileError {
    /// Error reading or writing file
    #[error("error reading or writing file")]
    IoError(#[from] std::io::Error),

    /// Malformed line
    #[error("Parse error at line {line}: {message}")]
    ParseError {
        /// One-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },
}

/// A landmark of a map file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapLandmark {
    /// Identifier of the landmark.
    pub id: u64,
    /// Position in the map frame.
    pub point: Point2D,
}

/// Read a landmark map.
///
/// # Arguments
///
/// * `path` - The path to the map file.
///
/// # Returns
///
/// The landmarks in file order.
pub fn read_landmarks_txt(path: impl AsRef<Path>) -> Result<Vec<MapLandmark>, MapFileError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut landmarks = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        landmarks.push(parse_landmark_line(line, i + 1)?);
    }

    log::debug!("Read {} landmarks", landmarks.len());

    Ok(landmarks)
}

/// Write a landmark map readable by [`read_landmarks_txt`].
pub fn write_landmarks_txt(
    path: impl AsRef<Path>,
    landmarks: &[MapLandmark],
) -> Result<(), MapFileError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "# Landmark map: ID X Y")?;
    for lm in landmarks {
        writeln!(writer, "{} {} {}", lm.id, lm.point.x, lm.point.y)?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_part<T: std::str::FromStr>(s: &str, line: usize) -> Result<T, MapFileError>
where
    T::Err: std::fmt::Display,
{
    s.parse::<T>().map_err(|e| MapFileError::ParseError {
        line,
        message: format!("{s}: {e}"),
    })
}

fn parse_landmark_line(line: &str, line_number: usize) -> Result<MapLandmark, MapFileError> {
    let parts = line.split_whitespace().collect::<Vec<_>>();
    if parts.len() != 3 {
        return Err(MapFileError::ParseError {
            line: line_number,
            message: format!("expected 3 fields, got {}", parts.len()),
        });
    }

    let id = parse_part(parts[0], line_number)?;
    let x: f64 = parse_part(parts[1], line_number)?;
    let y: f64 = parse_part(parts[2], line_number)?;
    if !x.is_finite() || !y.is_finite() {
        return Err(MapFileError::ParseError {
            line: line_number,
            message: "non-finite coordinate".to_string(),
        });
    }

    Ok(MapLandmark {
        id,
        point: Point2D::new(x, y),
    })
}
