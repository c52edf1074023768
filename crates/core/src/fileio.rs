//! Shared plumbing for the binary VF and FL formats: text header lines
//! followed by little-endian IEEE-754 single-precision payload.

use std::path::{Path, PathBuf};

use crate::error::FlowError;

/// Appends `.ext` to `path` unless it already ends with it.
///
/// `field` becomes `field.vec`, `field.vec` stays as is, and `field.old`
/// becomes `field.old.vec`.
pub(crate) fn ensure_extension(path: &Path, ext: &str) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some(ext) {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Splits `bytes` after `lines` newline-terminated header lines.
///
/// Returns the header text and the remaining payload.
pub(crate) fn split_header<'a>(
    bytes: &'a [u8],
    lines: usize,
    what: &str,
) -> Result<(&'a str, &'a [u8]), FlowError> {
    let mut seen = 0;
    let mut end = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            seen += 1;
            if seen == lines {
                end = i + 1;
                break;
            }
        }
    }
    if seen < lines {
        return Err(FlowError::Format(format!("{what}: truncated header")));
    }
    let header = std::str::from_utf8(&bytes[..end])
        .map_err(|_| FlowError::Format(format!("{what}: header is not text")))?;
    Ok((header, &bytes[end..]))
}

/// Parses whitespace-separated unsigned integers from a header.
pub(crate) fn parse_dims<'a>(
    tokens: impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<Vec<usize>, FlowError> {
    tokens
        .map(|t| {
            t.parse::<usize>()
                .map_err(|_| FlowError::Format(format!("{what}: bad header value '{t}'")))
        })
        .collect()
}

/// Decodes exactly `count` little-endian f32 values from `payload`.
pub(crate) fn decode_f32(payload: &[u8], count: usize, what: &str) -> Result<Vec<f64>, FlowError> {
    let needed = count
        .checked_mul(4)
        .ok_or_else(|| FlowError::Format(format!("{what}: size overflow")))?;
    if payload.len() < needed {
        return Err(FlowError::Format(format!(
            "{what}: expected {needed} payload bytes, found {}",
            payload.len()
        )));
    }
    Ok(payload[..needed]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
        .collect())
}

/// Appends `v` as a little-endian f32.
pub(crate) fn encode_f32(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&(v as f32).to_le_bytes());
}
