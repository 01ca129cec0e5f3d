//! Human-readable numbers for the report line.

const SUFFIXES: [&str; 6] = ["", "k", "M", "G", "T", "P"];

fn scaled(value: f64, base: f64) -> String {
    let mut value = value.max(0.0);
    let mut unit = 0;
    while value >= base && unit < SUFFIXES.len() - 1 {
        value /= base;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0}")
    } else if value < 100.0 {
        format!("{value:.1}{}", SUFFIXES[unit])
    } else {
        format!("{value:.0}{}", SUFFIXES[unit])
    }
}

/// Byte count with 1024-based suffixes, e.g. `1.5G`.
#[allow(clippy::cast_precision_loss)]
pub fn format_storage(bytes: u64) -> String {
    scaled(bytes as f64, 1024.0)
}

/// Count with 1000-based suffixes, e.g. `12.3M`.
pub fn format_numeric(value: f64) -> String {
    scaled(value, 1000.0)
}

/// Per-second rate, e.g. `4.2M/s`.
pub fn format_rate(per_second: f64) -> String {
    format!("{}/s", format_numeric(per_second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_storage() {
        assert_eq!(format_storage(0), "0");
        assert_eq!(format_storage(1023), "1023");
        assert_eq!(format_storage(1024), "1.0k");
        assert_eq!(format_storage(1536 * 1024 * 1024), "1.5G");
        assert_eq!(format_storage(200 * 1024 * 1024), "200M");
    }

    #[test]
    fn test_format_numeric_and_rate() {
        assert_eq!(format_numeric(999.0), "999");
        assert_eq!(format_numeric(12_345_678.0), "12.3M");
        assert_eq!(format_rate(4_200_000.0), "4.2M/s");
        assert_eq!(format_rate(-1.0), "0/s");
    }
}
