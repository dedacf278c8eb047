use crate::core::{parse_entry, Hit};
use crate::error::Result;
use crate::query::granularity::Bounds;

/// scan 结果的精确过滤
///
/// 用 key 里保存的原始坐标对照调用方的 bound（而不是格子扩展后的范围）。
/// 同一指数下格子互不相交，不会重复出现同一 key，无需去重。
pub struct ResultFilter<'a> {
    ranges: &'a [Bounds],
}

impl<'a> ResultFilter<'a> {
    /// `ranges` 必须已归一化
    pub fn new(ranges: &'a [Bounds]) -> Self {
        Self { ranges }
    }

    pub fn accepts(&self, coords: &[u64]) -> bool {
        coords.len() == self.ranges.len()
            && coords
                .iter()
                .zip(self.ranges)
                .all(|(&v, &(lo, hi))| lo <= v && v <= hi)
    }

    /// 按 scan 顺序保留匹配项
    pub fn apply<I, K>(&self, candidates: I) -> Result<Vec<Hit>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let dims = self.ranges.len();
        let mut hits = Vec::new();
        for key in candidates {
            let hit = parse_entry(key.as_ref(), dims)?;
            if self.accepts(&hit.coords) {
                hits.push(hit);
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::element_key;
    use crate::error::IndexError;

    #[test]
    fn drops_cell_overhang() {
        let ranges = [(40, 50), (100_000, 115_000)];
        let filter = ResultFilter::new(&ranges);
        let keys = vec![
            element_key("aa", &[45, 120_000], "Josh"),
            element_key("ab", &[50, 110_000], "Pamela"),
            element_key("ac", &[39, 110_000], "Edge"),
            element_key("ad", &[40, 100_000], "Corner"),
        ];
        let hits = filter.apply(keys).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["Pamela", "Corner"]);
    }

    #[test]
    fn malformed_candidate_fails_the_query() {
        let ranges = [(0, 10)];
        let filter = ResultFilter::new(&ranges);
        let err = filter.apply([b"00:abc:id".to_vec()]).unwrap_err();
        assert!(matches!(err, IndexError::MalformedEntry(_)));
    }
}
