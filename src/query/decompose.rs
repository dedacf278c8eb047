use serde::Serialize;

use crate::core::{CoordinateCodec, FIELD_SEPARATOR, RANGE_SENTINEL};
use crate::error::Result;
use crate::query::granularity::{shr, Bounds};

/// 覆盖单个网格全部条目 key 的字典序闭区间
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl SubRange {
    /// `<lo_prefix>:` 到 `<hi_prefix>:\xff`
    pub fn from_prefixes(lo_prefix: &str, hi_prefix: &str) -> Self {
        let mut start = Vec::with_capacity(lo_prefix.len() + 1);
        start.extend_from_slice(lo_prefix.as_bytes());
        start.push(FIELD_SEPARATOR);

        let mut end = Vec::with_capacity(hi_prefix.len() + 2);
        end.extend_from_slice(hi_prefix.as_bytes());
        end.push(FIELD_SEPARATOR);
        end.push(RANGE_SENTINEL);

        Self { start, end }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.start.as_slice() <= key && key <= self.end.as_slice()
    }

    /// 文本 lex-range 语法形式，开头的 `[` 表示闭区间
    pub fn lex_bounds(&self) -> (Vec<u8>, Vec<u8>) {
        let mut start = Vec::with_capacity(self.start.len() + 1);
        start.push(b'[');
        start.extend_from_slice(&self.start);

        let mut end = Vec::with_capacity(self.end.len() + 1);
        end.push(b'[');
        end.extend_from_slice(&self.end);

        (start, end)
    }
}

/// 遍历网格 `lo[d]..=hi[d]` 的混合进制计数器
///
/// 第 0 维变化最快：前进时找到第一个未到上界的维度加一，并把它之前的维度全部复位。
/// 最后产出的是 `hi`。
#[derive(Debug, Clone)]
pub(crate) struct CellOdometer {
    lo: Vec<u64>,
    hi: Vec<u64>,
    current: Option<Vec<u64>>,
}

impl CellOdometer {
    /// 任一维 `lo[d] > hi[d]`（或维数不一致）时为空迭代器
    pub(crate) fn new(lo: Vec<u64>, hi: Vec<u64>) -> Self {
        let valid = lo.len() == hi.len() && lo.iter().zip(&hi).all(|(l, h)| l <= h);
        let current = valid.then(|| lo.clone());
        Self { lo, hi, current }
    }
}

impl Iterator for CellOdometer {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Vec<u64>> {
        let cur = self.current.take()?;

        let mut succ = cur.clone();
        for d in 0..succ.len() {
            if succ[d] != self.hi[d] {
                succ[d] += 1;
                self.current = Some(succ);
                break;
            }
            succ[d] = self.lo[d];
        }
        // 没有维度能前进：`cur == hi`，遍历结束

        Some(cur)
    }
}

/// 指数 `exp` 下第 `idx` 格的坐标闭区间：`[idx << exp, (idx << exp) | (2^exp - 1)]`
pub fn cell_bounds(idx: u64, exp: u32) -> Bounds {
    let lo = idx.checked_shl(exp).unwrap_or(0);
    let mask = if exp >= 64 { u64::MAX } else { (1u64 << exp) - 1 };
    (lo, lo | mask)
}

/// 用边长 `2^exp` 的网格覆盖已归一化的 `ranges`，每格一个 sub-range
///
/// `ranges` 内每个点恰好落在一个格子里。边缘格子会超出查询范围，多取的 key 由过滤器丢弃。
pub(crate) fn decompose(codec: &CoordinateCodec, ranges: &[Bounds], exp: u32) -> Result<Vec<SubRange>> {
    let lo: Vec<u64> = ranges.iter().map(|&(lo, _)| shr(lo, exp)).collect();
    let hi: Vec<u64> = ranges.iter().map(|&(_, hi)| shr(hi, exp)).collect();

    let mut out = Vec::new();
    for cell in CellOdometer::new(lo, hi) {
        let (cell_lo, cell_hi): (Vec<u64>, Vec<u64>) =
            cell.iter().map(|&idx| cell_bounds(idx, exp)).unzip();
        let s = codec.encode(&cell_lo)?;
        let e = codec.encode(&cell_hi)?;
        tracing::trace!(?cell, %s, %e, "cover cell");
        out.push(SubRange::from_prefixes(&s, &e));
    }
    Ok(out)
}
