//! Byte size formatting for reports

use std::fmt;

/// Decimal unit for [`format_bytes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteUnit {
    /// Kilobytes (1 000 bytes)
    #[default]
    Kb,
    /// Megabytes (1 000 000 bytes)
    Mb,
    /// Gigabytes (1 000 000 000 bytes)
    Gb,
}

impl ByteUnit {
    #[inline]
    fn divisor(self) -> f64 {
        match self {
            ByteUnit::Kb => 1e3,
            ByteUnit::Mb => 1e6,
            ByteUnit::Gb => 1e9,
        }
    }
}

impl fmt::Display for ByteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ByteUnit::Kb => "kb",
            ByteUnit::Mb => "mb",
            ByteUnit::Gb => "gb",
        })
    }
}

/// Options for [`format_bytes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteFormat {
    /// Unit used when no `limit` is set
    pub unit: ByteUnit,
    /// Pick the unit automatically: kb from `limit` bytes, mb from
    /// `limit * 1000`, gb from `limit * 1_000_000`
    pub limit: Option<u64>,
    /// Decimal places for fractional amounts; 0 rounds up to a whole number
    pub fixed: usize,
    /// Group thousands with commas
    pub commas: bool,
}

impl Default for ByteFormat {
    fn default() -> Self {
        Self {
            unit: ByteUnit::Kb,
            limit: None,
            fixed: 0,
            commas: true,
        }
    }
}

impl ByteFormat {
    /// Automatic unit selection from `limit`
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Decimal places
    #[inline]
    #[must_use]
    pub fn with_fixed(mut self, fixed: usize) -> Self {
        self.fixed = fixed;
        self
    }

    fn unit_for(&self, bytes: u64) -> ByteUnit {
        match self.limit {
            Some(limit) if bytes >= limit.saturating_mul(1_000_000) => ByteUnit::Gb,
            Some(limit) if bytes >= limit.saturating_mul(1_000) => ByteUnit::Mb,
            Some(_) => ByteUnit::Kb,
            None => self.unit,
        }
    }
}

/// Format a byte count, e.g. `1,235 kb` or `1.23 mb`
#[must_use]
pub fn format_bytes(bytes: u64, options: &ByteFormat) -> String {
    let unit = options.unit_for(bytes);
    let amount = bytes as f64 / unit.divisor();

    let number = if options.fixed > 0 && amount.fract() != 0.0 {
        format!("{amount:.prec$}", prec = options.fixed)
    } else {
        format!("{}", amount.ceil() as u64)
    };

    let number = if options.commas {
        add_commas(&number)
    } else {
        number
    };
    format!("{number} {unit}")
}

fn add_commas(number: &str) -> String {
    let (whole, decimal) = match number.split_once('.') {
        Some((w, d)) => (w, Some(d)),
        None => (number, None),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match decimal {
        Some(d) => format!("{grouped}.{d}"),
        None => grouped,
    }
}
