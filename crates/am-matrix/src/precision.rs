use std::fmt;

/// Element type of every matrix in the process.
///
/// Chosen at build time: `f32` by default, `f64` with the `f64` feature. The
/// same width must be used when compiling device programs.
#[cfg(not(feature = "f64"))]
pub type Real = f32;

/// Element type of every matrix in the process.
///
/// Chosen at build time: `f32` by default, `f64` with the `f64` feature. The
/// same width must be used when compiling device programs.
#[cfg(feature = "f64")]
pub type Real = f64;

/// Supported element widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 64-bit IEEE 754 floating point.
    F64,
}

impl Precision {
    /// The width `Real` was compiled with.
    #[cfg(not(feature = "f64"))]
    pub const HOST: Precision = Precision::F32;

    /// The width `Real` was compiled with.
    #[cfg(feature = "f64")]
    pub const HOST: Precision = Precision::F64;

    /// Returns the size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Precision::F32 => 4,
            Precision::F64 => 8,
        }
    }

    /// Returns true for 64-bit elements.
    pub fn is_double(&self) -> bool {
        matches!(self, Precision::F64)
    }

    /// Maps the `CONFIG_USE_DOUBLE` preprocessor value back to a precision.
    ///
    /// Any non-zero integer selects `F64`, mirroring how `#if` evaluates it.
    pub fn from_define(value: &str) -> Option<Precision> {
        match value.trim() {
            "true" => Some(Precision::F64),
            "false" => Some(Precision::F32),
            v => v.parse::<i64>().ok().map(|n| {
                if n != 0 {
                    Precision::F64
                } else {
                    Precision::F32
                }
            }),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::F32 => write!(f, "f32"),
            Precision::F64 => write!(f, "f64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(Precision::F32.size_in_bytes(), 4);
        assert_eq!(Precision::F64.size_in_bytes(), 8);
    }

    #[test]
    fn test_host_matches_real() {
        assert_eq!(Precision::HOST.size_in_bytes(), std::mem::size_of::<Real>());
    }

    #[test]
    fn test_from_define() {
        assert_eq!(Precision::from_define("1"), Some(Precision::F64));
        assert_eq!(Precision::from_define("0"), Some(Precision::F32));
        assert_eq!(Precision::from_define("false"), Some(Precision::F32));
        assert_eq!(Precision::from_define("true"), Some(Precision::F64));
        assert!(Precision::from_define("maybe").is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Precision::F32.to_string(), "f32");
        assert_eq!(Precision::F64.to_string(), "f64");
    }
}
