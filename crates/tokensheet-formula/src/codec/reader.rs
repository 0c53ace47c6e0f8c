//! Low-level binary reading helpers for the token stream.
//!
//! All multi-byte integers are little-endian.

use crate::error::{FormulaError, FormulaResult};

/// Read a `u8` from a byte slice at `offset`, advancing `offset`.
#[inline]
pub fn read_u8(data: &[u8], offset: &mut usize) -> FormulaResult<u8> {
    if *offset >= data.len() {
        return Err(FormulaError::Truncated {
            offset: *offset,
            need: 1,
        });
    }
    let v = data[*offset];
    *offset += 1;
    Ok(v)
}

/// Read a `u16` (little-endian) from a byte slice at `offset`, advancing `offset`.
#[inline]
pub fn read_u16(data: &[u8], offset: &mut usize) -> FormulaResult<u16> {
    if *offset + 2 > data.len() {
        return Err(FormulaError::Truncated {
            offset: *offset,
            need: 2,
        });
    }
    let v = u16::from_le_bytes([data[*offset], data[*offset + 1]]);
    *offset += 2;
    Ok(v)
}

/// Read an `f64` (IEEE 754 double, little-endian) from a byte slice.
#[inline]
pub fn read_f64(data: &[u8], offset: &mut usize) -> FormulaResult<f64> {
    if *offset + 8 > data.len() {
        return Err(FormulaError::Truncated {
            offset: *offset,
            need: 8,
        });
    }
    let bytes: [u8; 8] = data[*offset..*offset + 8]
        .try_into()
        .map_err(|_| FormulaError::Truncated {
            offset: *offset,
            need: 8,
        })?;
    *offset += 8;
    Ok(f64::from_le_bytes(bytes))
}

/// Read exactly `N` bytes into an array, advancing `offset`.
#[inline]
pub fn read_array<const N: usize>(data: &[u8], offset: &mut usize) -> FormulaResult<[u8; N]> {
    if *offset + N > data.len() {
        return Err(FormulaError::Truncated {
            offset: *offset,
            need: N,
        });
    }
    let bytes: [u8; N] = data[*offset..*offset + N]
        .try_into()
        .map_err(|_| FormulaError::Truncated {
            offset: *offset,
            need: N,
        })?;
    *offset += N;
    Ok(bytes)
}

/// Read a length-prefixed string: `cch` already consumed, `flags` bit 0
/// selects two-byte UTF-16LE units over single-byte Latin-1.
pub fn read_string(data: &[u8], offset: &mut usize, cch: usize, flags: u8) -> FormulaResult<String> {
    if flags & 0x01 != 0 {
        let need = cch * 2;
        if *offset + need > data.len() {
            return Err(FormulaError::Truncated {
                offset: *offset,
                need,
            });
        }
        let units: Vec<u16> = data[*offset..*offset + need]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        *offset += need;
        Ok(String::from_utf16_lossy(&units))
    } else {
        if *offset + cch > data.len() {
            return Err(FormulaError::Truncated {
                offset: *offset,
                need: cch,
            });
        }
        let s = data[*offset..*offset + cch]
            .iter()
            .map(|&b| b as char)
            .collect();
        *offset += cch;
        Ok(s)
    }
}
