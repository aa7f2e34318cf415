// Decoder for the compressed sparse-volume body format produced by upstream
// annotation stores.
//
// Layout (little-endian, read strictly sequentially):
//   body header   gx:u32 gy:u32 gz:u32 label:u64
//   block*        x:i32 y:i32 z:i32 flag:u8 [subblock * gx*gy*gz if MIXED]
//   subblock      flag:u8 [64 bytes if MIXED]

use super::{voxel_count, Volume};
use flate2::read::GzDecoder;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

/// Edge length of a subblock in voxels
pub const SUBBLOCK_SIZE: usize = 8;

/// Bytes in a packed MIXED subblock (8x8 columns, one byte per 8 voxels)
pub const SUBBLOCK_BYTES: usize = SUBBLOCK_SIZE * SUBBLOCK_SIZE;

/// Largest full-resolution block a body header may declare
pub const MAX_BLOCK_VOXELS: usize = 1 << 27;

const BODY_HEADER_BYTES: usize = 4 + 4 + 4 + 8;
const BLOCK_HEADER_BYTES: usize = 4 + 4 + 4 + 1;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("stream ended inside {context}: got {got} of {expected} bytes")]
    Truncated {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid content flag {flag} in {context}")]
    InvalidContentFlag { flag: u8, context: String },

    #[error("subblock grid {grid:?} exceeds {max} voxels per block", max = MAX_BLOCK_VOXELS)]
    GridTooLarge { grid: [u32; 3] },

    #[error("failed to read sparse volume: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolution at which a block is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Full voxel resolution, (8*gx, 8*gy, 8*gz)
    Bit,
    /// One cell per subblock, (gx, gy, gz)
    #[default]
    Subblock,
    /// A single cell per block
    Block,
}

impl Granularity {
    /// Block shape before the final axis reversal.
    pub fn block_shape(&self, header: &GridHeader) -> [usize; 3] {
        let grid = header.grid();
        match self {
            Granularity::Bit => grid.map(|g| g * SUBBLOCK_SIZE),
            Granularity::Subblock => grid,
            Granularity::Block => [1, 1, 1],
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bit" => Ok(Granularity::Bit),
            "subblock" => Ok(Granularity::Subblock),
            "block" => Ok(Granularity::Block),
            other => Err(format!(
                "invalid granularity '{}': expected bit, subblock or block",
                other
            )),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Bit => "bit",
            Granularity::Subblock => "subblock",
            Granularity::Block => "block",
        };
        f.write_str(name)
    }
}

/// Marks a block or subblock as uniform or needing explicit data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentFlag {
    BackgroundOnly = 0,
    ForegroundOnly = 1,
    Mixed = 2,
}

impl TryFrom<u8> for ContentFlag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ContentFlag::BackgroundOnly),
            1 => Ok(ContentFlag::ForegroundOnly),
            2 => Ok(ContentFlag::Mixed),
            other => Err(other),
        }
    }
}

/// Subblock grid shape shared by every block of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridHeader {
    pub gx: u32,
    pub gy: u32,
    pub gz: u32,
    pub label: u64,
}

impl GridHeader {
    pub fn grid(&self) -> [usize; 3] {
        [self.gx as usize, self.gy as usize, self.gz as usize]
    }

    fn subblock_count(&self) -> usize {
        let [gx, gy, gz] = self.grid();
        gx * gy * gz
    }
}

/// A decoded block and its absolute grid coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub mask: Volume,
}

impl BlockRecord {
    pub fn position(&self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Reads exactly `buf.len()` bytes. Returns `Ok(false)` on a clean end of
/// stream before the first byte.
fn read_record<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<bool, DecodeError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if filled == 0 {
        return Ok(false);
    }
    if filled < buf.len() {
        return Err(DecodeError::Truncated {
            context,
            expected: buf.len(),
            got: filled,
        });
    }
    Ok(true)
}

fn read_required<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<(), DecodeError> {
    if read_record(reader, buf, context)? {
        Ok(())
    } else {
        Err(DecodeError::Truncated {
            context,
            expected: buf.len(),
            got: 0,
        })
    }
}

fn read_body_header<R: Read>(reader: &mut R) -> Result<GridHeader, DecodeError> {
    let mut buf = [0u8; BODY_HEADER_BYTES];
    read_required(reader, &mut buf, "body header")?;

    let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    let mut label = [0u8; 8];
    label.copy_from_slice(&buf[12..20]);

    let header = GridHeader {
        gx: u32_at(0),
        gy: u32_at(4),
        gz: u32_at(8),
        label: u64::from_le_bytes(label),
    };

    // Mixed blocks are built at full resolution whatever the granularity
    let edges = header.grid().map(|g| g.checked_mul(SUBBLOCK_SIZE));
    let voxels = match edges {
        [Some(x), Some(y), Some(z)] => voxel_count([x, y, z]),
        _ => None,
    };
    match voxels {
        Some(n) if n <= MAX_BLOCK_VOXELS => Ok(header),
        _ => {
            error!(
                "sparse body declares an oversized grid ({}, {}, {})",
                header.gx, header.gy, header.gz
            );
            Err(DecodeError::GridTooLarge {
                grid: [header.gx, header.gy, header.gz],
            })
        }
    }
}

fn parse_flag(raw: u8, context: impl FnOnce() -> String) -> Result<ContentFlag, DecodeError> {
    ContentFlag::try_from(raw).map_err(|flag| {
        let context = context();
        error!("invalid content flag {} in {}", flag, context);
        DecodeError::InvalidContentFlag { flag, context }
    })
}

/// Decodes every block of a sparse body at the requested granularity.
///
/// Each returned mask is in (x, y, z) order: the working array is built in
/// the stream's memory order and reversed once before the record is emitted,
/// for constant and mixed blocks alike.
pub fn decode<R: Read>(
    mut reader: R,
    granularity: Granularity,
) -> Result<(GridHeader, Vec<BlockRecord>), DecodeError> {
    let header = read_body_header(&mut reader)?;
    debug!(
        "sparse body: grid ({}, {}, {}), label {}",
        header.gx, header.gy, header.gz, header.label
    );

    let [sx, sy, sz] = granularity.block_shape(&header);
    let shape = [sz, sy, sx];

    let mut blocks = Vec::new();
    let mut buf = [0u8; BLOCK_HEADER_BYTES];
    while read_record(&mut reader, &mut buf, "block header")? {
        let x = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let y = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let z = i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let flag = parse_flag(buf[12], || format!("block ({}, {}, {})", x, y, z))?;

        let mask = match flag {
            ContentFlag::BackgroundOnly => Volume::zeros(shape),
            ContentFlag::ForegroundOnly => Volume::filled(shape, 1),
            ContentFlag::Mixed => read_mixed_block(&mut reader, &header, granularity, [x, y, z])?,
        };

        blocks.push(BlockRecord { x, y, z, mask });
    }

    info!("decoded {} blocks at {} granularity", blocks.len(), granularity);
    Ok((header, blocks))
}

fn read_mixed_block<R: Read>(
    reader: &mut R,
    header: &GridHeader,
    granularity: Granularity,
    position: [i32; 3],
) -> Result<Volume, DecodeError> {
    let [gx, gy, gz] = header.grid();
    let mut work = Volume::zeros([gx * SUBBLOCK_SIZE, gy * SUBBLOCK_SIZE, gz * SUBBLOCK_SIZE]);
    let mut flag_buf = [0u8; 1];
    let mut bits = [0u8; SUBBLOCK_BYTES];

    for s in 0..header.subblock_count() {
        let x_index = s / (gy * gz);
        let y_index = (s / gz) % gy;
        let z_index = s % gz;
        let origin = [
            x_index * SUBBLOCK_SIZE,
            y_index * SUBBLOCK_SIZE,
            z_index * SUBBLOCK_SIZE,
        ];

        read_required(reader, &mut flag_buf, "subblock header")?;
        let flag = parse_flag(flag_buf[0], || {
            format!(
                "subblock {} of block ({}, {}, {})",
                s, position[0], position[1], position[2]
            )
        })?;

        match flag {
            // The working array starts zeroed
            ContentFlag::BackgroundOnly => {}
            ContentFlag::ForegroundOnly => {
                work.fill_region(origin, [SUBBLOCK_SIZE; 3], 1);
            }
            ContentFlag::Mixed => {
                read_required(reader, &mut bits, "subblock payload")?;
                unpack_subblock(&mut work, origin, &bits);
            }
        }
    }

    let reduced = match granularity {
        Granularity::Bit => work,
        Granularity::Subblock => work.downsample_max(SUBBLOCK_SIZE),
        Granularity::Block => Volume::filled([1, 1, 1], work.max_value()),
    };

    Ok(reduced.reversed_axes())
}

/// Expands 64 packed bytes into an 8x8x8 region. Byte `i * 8 + j` holds the
/// column `(i, j, 0..8)`, least significant bit first.
fn unpack_subblock(work: &mut Volume, origin: [usize; 3], bits: &[u8; SUBBLOCK_BYTES]) {
    for (n, &byte) in bits.iter().enumerate() {
        let i = n / SUBBLOCK_SIZE;
        let j = n % SUBBLOCK_SIZE;
        for k in 0..SUBBLOCK_SIZE {
            let bit = (byte >> k) & 1;
            work.set(origin[0] + i, origin[1] + j, origin[2] + k, bit);
        }
    }
}

/// Decodes a sparse body file, transparently inflating gzip input.
pub fn decode_file(
    path: &Path,
    granularity: Granularity,
) -> Result<(GridHeader, Vec<BlockRecord>), DecodeError> {
    let mut reader = BufReader::new(File::open(path)?);
    let is_gzip = reader.fill_buf()?.starts_with(&[0x1f, 0x8b]);

    if is_gzip {
        debug!("{} is gzip compressed", path.display());
        decode(GzDecoder::new(reader), granularity)
    } else {
        decode(reader, granularity)
    }
}
