//! Size strings reported by the LVM tools
//!
//! With `--units g` sizes look like `475.94g`, `<475.94g` (rounded down) or
//! `0 ` (free space of a full group). Only the magnitude is parsed; the unit
//! suffix is dropped, so comparing two sizes is only meaningful when both
//! were reported in the same unit.

use crate::error::{Error, Result};

/// Parse the numeric magnitude of a reported size.
pub fn parse_size(value: &str) -> Result<f64> {
    let magnitude = value
        .trim()
        .trim_start_matches(&['<', '>'][..])
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .trim();

    magnitude.parse::<f64>().map_err(|e| Error::SizeParse {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Share of `total` occupied by `part`, truncated to a whole percent.
pub fn fill_percent(part: &str, total: &str) -> Result<u32> {
    let part_size = parse_size(part)?;
    let total_size = parse_size(total)?;
    if total_size <= 0.0 {
        return Err(Error::SizeParse {
            value: total.to_string(),
            reason: "total size must be positive".to_string(),
        });
    }
    Ok((part_size / total_size * 100.0) as u32)
}
