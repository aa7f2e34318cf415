// Block dispatch wire protocol.
//
// Request:  application/x-www-form-urlencoded fields
//           dtype, shape ("x|y|z"), bytes (raw C-order payload), offset ("x|y|z")
// Response: JSON { dtype, shape ("n|3|3"), bytes (base64 of the raw array) }
//
// Raw arrays use native byte order, matching the workers' array libraries.

use crate::mesh::types::Triangle;
use crate::volume::Volume;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("missing form field '{0}'")]
    MissingField(&'static str),

    #[error("malformed percent-encoding in form body")]
    BadEncoding,

    #[error("field '{field}' is not valid text")]
    NotText { field: &'static str },

    #[error("malformed shape '{0}'")]
    BadShape(String),

    #[error("unsupported dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("payload holds {found} bytes, shape needs {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("surface extraction failed: {0}")]
    Extraction(String),
}

/// Element types a block request may carry. Both are one byte per voxel.
const REQUEST_DTYPES: [&str; 2] = ["uint8", "bool"];

fn join_shape(values: &[usize]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

fn parse_shape(text: &str) -> Result<Vec<usize>, WireError> {
    text.split('|')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| WireError::BadShape(text.to_string()))
        })
        .collect()
}

/// Element count of `shape`, or `None` if it does not fit in `usize`.
fn checked_product(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

fn parse_triple(text: &str) -> Result<[usize; 3], WireError> {
    parse_shape(text)?
        .try_into()
        .map_err(|_| WireError::BadShape(text.to_string()))
}

fn percent_encode_into(out: &mut Vec<u8>, bytes: &[u8]) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &b in bytes {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'*' | b'-' | b'.' | b'_' => out.push(b),
            b' ' => out.push(b'+'),
            _ => {
                out.push(b'%');
                out.push(HEX[(b >> 4) as usize]);
                out.push(HEX[(b & 0x0f) as usize]);
            }
        }
    }
}

fn percent_decode(bytes: &[u8]) -> Result<Vec<u8>, WireError> {
    let hex = |c: u8| match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    };

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex);
                let lo = bytes.get(i + 2).copied().and_then(hex);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => return Err(WireError::BadEncoding),
                }
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    Ok(out)
}

/// One dispatch block as sent to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub dtype: String,
    pub shape: [usize; 3],
    pub bytes: Vec<u8>,
    pub offset: [usize; 3],
}

impl BlockRequest {
    pub fn from_volume(block: &Volume, offset: [usize; 3]) -> Self {
        Self {
            dtype: "uint8".to_string(),
            shape: block.dims(),
            bytes: block.as_bytes().to_vec(),
            offset,
        }
    }

    pub fn to_form_body(&self) -> Vec<u8> {
        let shape = join_shape(&self.shape);
        let offset = join_shape(&self.offset);
        let fields: [(&str, &[u8]); 4] = [
            ("dtype", self.dtype.as_bytes()),
            ("shape", shape.as_bytes()),
            ("bytes", &self.bytes),
            ("offset", offset.as_bytes()),
        ];

        let mut body = Vec::with_capacity(self.bytes.len() * 3 + 64);
        for (i, (key, value)) in fields.iter().enumerate() {
            if i > 0 {
                body.push(b'&');
            }
            percent_encode_into(&mut body, key.as_bytes());
            body.push(b'=');
            percent_encode_into(&mut body, value);
        }
        body
    }

    pub fn from_form_body(body: &[u8]) -> Result<Self, WireError> {
        let mut dtype = None;
        let mut shape = None;
        let mut bytes = None;
        let mut offset = None;

        for pair in body.split(|&b| b == b'&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.iter().position(|&b| b == b'=') {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &pair[pair.len()..]),
            };
            let value = percent_decode(value)?;
            match percent_decode(key)?.as_slice() {
                b"dtype" => dtype = Some(value),
                b"shape" => shape = Some(value),
                b"bytes" => bytes = Some(value),
                b"offset" => offset = Some(value),
                _ => {}
            }
        }

        let text = |value: Option<Vec<u8>>, field: &'static str| -> Result<String, WireError> {
            let value = value.ok_or(WireError::MissingField(field))?;
            String::from_utf8(value).map_err(|_| WireError::NotText { field })
        };

        let dtype = text(dtype, "dtype")?;
        let shape = parse_triple(&text(shape, "shape")?)?;
        let offset = parse_triple(&text(offset, "offset")?)?;
        let bytes = bytes.ok_or(WireError::MissingField("bytes"))?;

        Ok(Self {
            dtype,
            shape,
            bytes,
            offset,
        })
    }

    /// Rebuilds the block, binarizing the payload.
    pub fn to_volume(&self) -> Result<Volume, WireError> {
        if !REQUEST_DTYPES.contains(&self.dtype.as_str()) {
            return Err(WireError::UnsupportedDtype(self.dtype.clone()));
        }
        let expected = checked_product(&self.shape)
            .ok_or_else(|| WireError::BadShape(join_shape(&self.shape)))?;
        if self.bytes.len() != expected {
            return Err(WireError::LengthMismatch {
                expected,
                found: self.bytes.len(),
            });
        }
        let data = self.bytes.iter().map(|&v| u8::from(v != 0)).collect();
        Volume::from_raw(self.shape, data).ok_or(WireError::LengthMismatch {
            expected,
            found: self.bytes.len(),
        })
    }
}

/// A worker's reply: an N x 3 x 3 triangle-of-vertices array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriangleResponse {
    pub dtype: String,
    pub shape: String,
    pub bytes: String,
}

impl TriangleResponse {
    /// Reply for a block without any surface.
    pub fn empty() -> Self {
        Self {
            dtype: "float32".to_string(),
            shape: "0|0|0".to_string(),
            bytes: String::new(),
        }
    }

    pub fn from_triangles(triangles: &[Triangle]) -> Self {
        if triangles.is_empty() {
            return Self::empty();
        }
        let raw: &[u8] = bytemuck::cast_slice(triangles);
        Self {
            dtype: "float32".to_string(),
            shape: join_shape(&[triangles.len(), 3, 3]),
            bytes: general_purpose::STANDARD.encode(raw),
        }
    }

    /// Decodes the payload. `Ok(None)` means the worker found no surface.
    pub fn into_triangles(self) -> Result<Option<Vec<Triangle>>, WireError> {
        let shape = parse_shape(&self.shape)?;
        if shape.contains(&0) {
            return Ok(None);
        }
        let count = match shape.as_slice() {
            [n, 3, 3] => *n,
            _ => return Err(WireError::BadShape(self.shape.clone())),
        };

        let raw = general_purpose::STANDARD
            .decode(self.bytes.as_bytes())
            .map_err(|e| WireError::Base64(e.to_string()))?;

        let element = match self.dtype.as_str() {
            "float32" => 4,
            "float64" => 8,
            other => return Err(WireError::UnsupportedDtype(other.to_string())),
        };
        let expected = checked_product(&[count, 9, element])
            .ok_or_else(|| WireError::BadShape(self.shape.clone()))?;
        if raw.len() != expected {
            return Err(WireError::LengthMismatch {
                expected,
                found: raw.len(),
            });
        }

        let triangles = if element == 4 {
            raw.chunks_exact(std::mem::size_of::<Triangle>())
                .map(bytemuck::pod_read_unaligned::<Triangle>)
                .collect()
        } else {
            raw.chunks_exact(9 * 8)
                .map(|chunk| {
                    let mut tri = [[0.0f32; 3]; 3];
                    for (n, value) in chunk.chunks_exact(8).enumerate() {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(value);
                        tri[n / 3][n % 3] = f64::from_ne_bytes(b) as f32;
                    }
                    tri
                })
                .collect()
        };
        Ok(Some(triangles))
    }
}
