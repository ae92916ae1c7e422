// Binary — Header codec for NNEF tensor data files
//
// Every `.dat` file starts with a fixed 128-byte little-endian header:
//
//   offset  size  field
//        0     2  magic 0x4E 0xEF
//        2     1  major version (1)
//        3     1  minor version
//        4     4  data length in bytes
//        8     4  rank (at most 8)
//       12    32  extents, 8 × u32
//       44     4  bits per item
//       48     4  item type code
//       52    76  quantization parameters, opaque here
//
// Only the header is decoded. After a successful read the stream sits at
// the first payload byte.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::graph::Shape;

pub const MAGIC: [u8; 2] = [0x4E, 0xEF];
pub const HEADER_SIZE: usize = 128;
pub const MAX_RANK: usize = 8;
pub const QUANTIZATION_SIZE: usize = 76;

/// Why a header could not be decoded.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("file is shorter than the {HEADER_SIZE}-byte header")]
    Truncated,
    #[error("bad magic number {0:02x?}")]
    BadMagic([u8; 2]),
    #[error("unsupported version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("rank {0} exceeds the maximum of {MAX_RANK}")]
    RankTooLarge(u32),
    #[error("extent {axis} is zero")]
    ZeroExtent { axis: usize },
    #[error("unknown item type code {0}")]
    UnknownItemType(u32),
    #[error("{bits} bits per item is not valid for {item_type} items")]
    BadBitWidth { item_type: ItemType, bits: u32 },
    #[error("data length {declared} does not match the shape and item size (expected {expected})")]
    DataLength { declared: u32, expected: u64 },
    #[error("tensor data does not fit in a 32-bit length")]
    TooLarge,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// How the items of a tensor are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Float,
    Unsigned,
    QuantizedUnsigned,
    QuantizedSigned,
    Signed,
    Logical,
}

impl ItemType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => ItemType::Float,
            1 => ItemType::Unsigned,
            2 => ItemType::QuantizedUnsigned,
            3 => ItemType::QuantizedSigned,
            4 => ItemType::Signed,
            5 => ItemType::Logical,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        match self {
            ItemType::Float => 0,
            ItemType::Unsigned => 1,
            ItemType::QuantizedUnsigned => 2,
            ItemType::QuantizedSigned => 3,
            ItemType::Signed => 4,
            ItemType::Logical => 5,
        }
    }

    pub fn accepts_bits(self, bits: u32) -> bool {
        match self {
            ItemType::Float => matches!(bits, 16 | 32 | 64),
            ItemType::Logical => matches!(bits, 1 | 8),
            _ => (1..=64).contains(&bits),
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ItemType::Float => "float",
            ItemType::Unsigned => "unsigned",
            ItemType::QuantizedUnsigned => "quantized unsigned",
            ItemType::QuantizedSigned => "quantized signed",
            ItemType::Signed => "signed",
            ItemType::Logical => "logical",
        };
        f.write_str(name)
    }
}

/// A decoded tensor file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorHeader {
    pub version: (u8, u8),
    pub data_length: u32,
    pub shape: Shape,
    pub bits_per_item: u32,
    pub item_type: ItemType,
    pub quantization: [u8; QUANTIZATION_SIZE],
}

impl TensorHeader {
    /// A version 1.0 header for a tensor of `shape`.
    pub fn new(shape: Shape, item_type: ItemType, bits_per_item: u32) -> Result<Self, HeaderError> {
        check_layout(&shape, item_type, bits_per_item)?;
        let expected = data_length(&shape, bits_per_item).ok_or(HeaderError::TooLarge)?;
        let data_length = u32::try_from(expected).map_err(|_| HeaderError::TooLarge)?;
        Ok(Self {
            version: (1, 0),
            data_length,
            shape,
            bits_per_item,
            item_type,
            quantization: [0; QUANTIZATION_SIZE],
        })
    }
}

/// `ceil(volume * bits / 8)`, or `None` on overflow.
fn data_length(shape: &[usize], bits: u32) -> Option<u64> {
    let volume = shape
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(u64::try_from(d).ok()?))?;
    Some(volume.checked_mul(u64::from(bits))?.div_ceil(8))
}

fn check_layout(shape: &[usize], item_type: ItemType, bits: u32) -> Result<(), HeaderError> {
    if shape.len() > MAX_RANK {
        return Err(HeaderError::RankTooLarge(shape.len() as u32));
    }
    if let Some(axis) = shape.iter().position(|&d| d == 0) {
        return Err(HeaderError::ZeroExtent { axis });
    }
    if !item_type.accepts_bits(bits) {
        return Err(HeaderError::BadBitWidth { item_type, bits });
    }
    Ok(())
}

fn u32_at(buf: &[u8; HEADER_SIZE], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Decode a header from the start of `reader`.
pub fn read_tensor_header(reader: &mut impl Read) -> Result<TensorHeader, HeaderError> {
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => HeaderError::Truncated,
        _ => HeaderError::Io(e),
    })?;

    let magic = [buf[0], buf[1]];
    if magic != MAGIC {
        return Err(HeaderError::BadMagic(magic));
    }
    let version = (buf[2], buf[3]);
    if version.0 != 1 {
        return Err(HeaderError::UnsupportedVersion(version.0, version.1));
    }

    let data_len = u32_at(&buf, 4);
    let rank = u32_at(&buf, 8);
    if rank as usize > MAX_RANK {
        return Err(HeaderError::RankTooLarge(rank));
    }
    let shape: Shape = (0..rank as usize)
        .map(|i| u32_at(&buf, 12 + 4 * i) as usize)
        .collect();

    let bits_per_item = u32_at(&buf, 44);
    let code = u32_at(&buf, 48);
    let item_type = ItemType::from_code(code).ok_or(HeaderError::UnknownItemType(code))?;
    check_layout(&shape, item_type, bits_per_item)?;

    let expected = data_length(&shape, bits_per_item).unwrap_or(u64::MAX);
    if u64::from(data_len) != expected {
        return Err(HeaderError::DataLength {
            declared: data_len,
            expected,
        });
    }

    let mut quantization = [0u8; QUANTIZATION_SIZE];
    quantization.copy_from_slice(&buf[52..]);

    Ok(TensorHeader {
        version,
        data_length: data_len,
        shape,
        bits_per_item,
        item_type,
        quantization,
    })
}

/// Encode `header` in the 128-byte layout.
pub fn write_tensor_header(writer: &mut impl Write, header: &TensorHeader) -> Result<(), HeaderError> {
    if header.shape.len() > MAX_RANK {
        return Err(HeaderError::RankTooLarge(header.shape.len() as u32));
    }

    let mut buf = [0u8; HEADER_SIZE];
    buf[..2].copy_from_slice(&MAGIC);
    buf[2] = header.version.0;
    buf[3] = header.version.1;
    buf[4..8].copy_from_slice(&header.data_length.to_le_bytes());
    buf[8..12].copy_from_slice(&(header.shape.len() as u32).to_le_bytes());
    for (i, &extent) in header.shape.iter().enumerate() {
        let extent = u32::try_from(extent).map_err(|_| HeaderError::TooLarge)?;
        buf[12 + 4 * i..16 + 4 * i].copy_from_slice(&extent.to_le_bytes());
    }
    buf[44..48].copy_from_slice(&header.bits_per_item.to_le_bytes());
    buf[48..52].copy_from_slice(&header.item_type.code().to_le_bytes());
    buf[52..].copy_from_slice(&header.quantization);

    writer.write_all(&buf)?;
    Ok(())
}
