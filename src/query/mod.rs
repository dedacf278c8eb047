pub mod decompose;
pub mod filter;
pub mod granularity;
pub mod server;

pub use decompose::*;
pub use filter::*;
pub use granularity::*;
pub use server::*;

use serde::Serialize;

use crate::core::CoordinateCodec;
use crate::error::{IndexError, Result};

/// 拆分后的范围查询：归一化 bound、网格指数、每个覆盖格一个字典序 sub-range
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    pub ranges: Vec<Bounds>,
    pub exponent: u32,
    pub sub_ranges: Vec<SubRange>,
}

impl QueryPlan {
    /// 归一化、选指数、拆分
    pub fn build(codec: &CoordinateCodec, ranges: &[Bounds], fanout_threshold: u64) -> Result<Self> {
        let ranges = checked_ranges(codec, ranges)?;
        let exponent = select_exponent(&ranges, codec.precision(), fanout_threshold);
        Self::decomposed(codec, ranges, exponent)
    }

    /// 归一化后按调用方指定的指数拆分
    pub fn with_exponent(codec: &CoordinateCodec, ranges: &[Bounds], exponent: u32) -> Result<Self> {
        if exponent > codec.precision() {
            return Err(IndexError::Configuration(format!(
                "exponent {exponent} exceeds {}-bit precision",
                codec.precision()
            )));
        }
        let ranges = checked_ranges(codec, ranges)?;
        Self::decomposed(codec, ranges, exponent)
    }

    fn decomposed(codec: &CoordinateCodec, ranges: Vec<Bounds>, exponent: u32) -> Result<Self> {
        let sub_ranges = decompose(codec, &ranges, exponent)?;
        tracing::debug!(exponent, fanout = sub_ranges.len(), ?ranges, "query plan");
        Ok(Self {
            ranges,
            exponent,
            sub_ranges,
        })
    }

    pub fn fanout(&self) -> usize {
        self.sub_ranges.len()
    }
}

fn checked_ranges(codec: &CoordinateCodec, ranges: &[Bounds]) -> Result<Vec<Bounds>> {
    codec.check_arity(ranges.len())?;
    for &(lo, hi) in ranges {
        codec.check_coord(lo)?;
        codec.check_coord(hi)?;
    }
    Ok(normalize(ranges))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_normalizes_before_planning() {
        let codec = CoordinateCodec::new(2, 64);
        let a = QueryPlan::build(&codec, &[(50, 40), (115_000, 100_000)], 20).unwrap();
        let b = QueryPlan::build(&codec, &[(40, 50), (100_000, 115_000)], 20).unwrap();
        assert_eq!(a.ranges, b.ranges);
        assert_eq!(a.exponent, b.exponent);
        assert_eq!(a.sub_ranges, b.sub_ranges);
        assert!(a.fanout() < 20);
    }

    #[test]
    fn bounds_are_validated() {
        let codec = CoordinateCodec::new(2, 8);
        assert!(matches!(
            QueryPlan::build(&codec, &[(0, 1)], 20),
            Err(IndexError::DimensionMismatch { expected: 2, got: 1 })
        ));
        assert!(matches!(
            QueryPlan::build(&codec, &[(0, 256), (0, 1)], 20),
            Err(IndexError::EncodingRange { value: 256, precision: 8 })
        ));
        assert!(QueryPlan::with_exponent(&codec, &[(0, 1), (0, 1)], 9).is_err());
        assert_eq!(QueryPlan::with_exponent(&codec, &[(0, 255), (0, 255)], 0).unwrap().fanout(), 65536);
    }
}
