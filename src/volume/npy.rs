// Minimal NumPy `.npy` support for dense 3-D occupancy arrays.
// Only one-byte element types (`|u1`, `|b1`) in C order are accepted.

use super::{voxel_count, Volume, MAX_VOXELS};
use std::fs;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, thiserror::Error)]
pub enum NpyError {
    #[error("not an .npy file")]
    BadMagic,

    #[error("unsupported .npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("malformed .npy header: {0}")]
    MalformedHeader(String),

    #[error("unsupported dtype {0}: expected a one-byte type")]
    UnsupportedDtype(String),

    #[error("Fortran-ordered arrays are not supported")]
    FortranOrder,

    #[error("expected a 3-D array, found shape {0:?}")]
    NotThreeDimensional(Vec<usize>),

    #[error("shape {0:?} exceeds {max} voxels", max = MAX_VOXELS)]
    TooLarge([usize; 3]),

    #[error("payload holds {found} bytes, shape needs {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("npy i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses an in-memory `.npy` file. Non-zero elements become foreground.
pub fn parse(bytes: &[u8]) -> Result<Volume, NpyError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(NpyError::BadMagic);
    }

    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(NpyError::MalformedHeader("truncated header length".into()));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        _ => return Err(NpyError::UnsupportedVersion(major, minor)),
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| NpyError::MalformedHeader("header runs past end of file".into()))?;
    let header = std::str::from_utf8(header)
        .map_err(|e| NpyError::MalformedHeader(e.to_string()))?;

    let descr = dict_value(header, "descr")?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    if !matches!(descr, "|u1" | "|b1" | "u1" | "b1" | "|i1" | "i1") {
        return Err(NpyError::UnsupportedDtype(descr.to_string()));
    }

    if dict_value(header, "fortran_order")? == "True" {
        return Err(NpyError::FortranOrder);
    }

    let shape = parse_shape(dict_value(header, "shape")?)?;
    let dims: [usize; 3] = shape
        .clone()
        .try_into()
        .map_err(|_| NpyError::NotThreeDimensional(shape))?;

    let payload = &bytes[data_start..];
    let expected = voxel_count(dims)
        .filter(|&n| n <= MAX_VOXELS)
        .ok_or(NpyError::TooLarge(dims))?;
    if payload.len() != expected {
        return Err(NpyError::LengthMismatch {
            expected,
            found: payload.len(),
        });
    }

    let data = payload.iter().map(|&v| u8::from(v != 0)).collect();
    Volume::from_raw(dims, data).ok_or(NpyError::LengthMismatch {
        expected,
        found: payload.len(),
    })
}

/// Returns the raw text of `key`'s value in the header dictionary.
fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let quoted = format!("'{}'", key);
    let start = header
        .find(&quoted)
        .ok_or_else(|| NpyError::MalformedHeader(format!("missing key {}", key)))?;
    let rest = &header[start + quoted.len()..];
    let rest = rest
        .trim_start()
        .strip_prefix(':')
        .ok_or_else(|| NpyError::MalformedHeader(format!("missing ':' after {}", key)))?
        .trim_start();

    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find([',', '}'])
    }
    .ok_or_else(|| NpyError::MalformedHeader(format!("unterminated value for {}", key)))?;

    Ok(rest[..end].trim())
}

fn parse_shape(text: &str) -> Result<Vec<usize>, NpyError> {
    text.trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| NpyError::MalformedHeader(format!("bad shape entry '{}': {}", s, e)))
        })
        .collect()
}

pub fn read(path: &Path) -> Result<Volume, NpyError> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// Serializes a volume as a version 1.0 `.npy` file of dtype `|u1`.
pub fn to_bytes(volume: &Volume) -> Vec<u8> {
    let [nx, ny, nz] = volume.dims();
    let mut header = format!(
        "{{'descr': '|u1', 'fortran_order': False, 'shape': ({}, {}, {}), }}",
        nx, ny, nz
    );
    // Pad so the payload starts on a 64-byte boundary; the header ends in '\n'.
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + volume.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(volume.as_bytes());
    out
}

pub fn write(path: &Path, volume: &Volume) -> Result<(), NpyError> {
    let mut file = fs::File::create(path)?;
    file.write_all(&to_bytes(volume))?;
    Ok(())
}
