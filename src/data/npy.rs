//! Minimal `.npy` reader and writer for little-endian float arrays
//!
//! Supports format versions 1.x and 2.x, C order, `<f4` and `<f8` payloads.
//! `<f8` data is narrowed to `f32` on load.

use crate::error::{Error, Result};
use std::path::Path;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Decoded array: row-major values and shape
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

/// Load an `f32` array with its shape from a `.npy` file
pub fn load_npy_f32(path: &Path) -> Result<NpyArray> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
    parse_npy_f32(&bytes).map_err(|message| Error::Npy { path: path.to_path_buf(), message })
}

fn parse_npy_f32(bytes: &[u8]) -> std::result::Result<NpyArray, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("missing NPY magic".into());
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated header".into());
            }
            (u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12)
        }
        v => return Err(format!("unsupported format version {v}")),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err("truncated header".into());
    }
    let header = String::from_utf8_lossy(&bytes[header_start..data_start]);

    if header.contains("'fortran_order': True") {
        return Err("fortran-ordered arrays are not supported".into());
    }
    let descr = header_field(&header, "'descr':")
        .and_then(|rest| rest.split('\'').nth(1))
        .ok_or("missing descr")?;
    let shape = parse_npy_shape(&header)?;
    let count: usize = shape.iter().product();
    let payload = &bytes[data_start..];

    let data = match descr {
        "<f4" => {
            if payload.len() < count * 4 {
                return Err(format!("expected {} values, found {}", count, payload.len() / 4));
            }
            payload[..count * 4]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        }
        "<f8" => {
            if payload.len() < count * 8 {
                return Err(format!("expected {} values, found {}", count, payload.len() / 8));
            }
            payload[..count * 8]
                .chunks_exact(8)
                .map(|b| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(b);
                    f64::from_le_bytes(raw) as f32
                })
                .collect()
        }
        other => return Err(format!("unsupported dtype {other}")),
    };

    Ok(NpyArray { data, shape })
}

fn header_field<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    header.find(key).map(|start| &header[start + key.len()..])
}

/// Parse shape from NPY header string; `()` is a scalar
fn parse_npy_shape(header: &str) -> std::result::Result<Vec<usize>, String> {
    let rest = header_field(header, "'shape':").ok_or("missing shape")?;
    let open = rest.find('(').ok_or("malformed shape")?;
    let close = rest.find(')').ok_or("malformed shape")?;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("bad shape entry '{s}': {e}")))
        .collect()
}

/// Write a C-ordered `<f4` array (format 1.0)
pub fn write_npy_f32(path: &Path, data: &[f32], shape: &[usize]) -> Result<()> {
    let count: usize = shape.iter().product();
    if count != data.len() {
        return Err(Error::ShapeMismatch {
            name: path.display().to_string(),
            expected: shape.to_vec(),
            actual: vec![data.len()],
        });
    }
    let dims = match shape {
        [single] => format!("{single},"),
        _ => shape.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
    };
    let mut header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({dims}), }}");
    // magic + version + length prefix + header + newline is a multiple of 64
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut bytes = Vec::with_capacity(10 + header.len() + data.len() * 4);
    bytes.extend_from_slice(NPY_MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    std::fs::write(path, bytes).map_err(|e| Error::io(format!("writing {}", path.display()), e))
}
