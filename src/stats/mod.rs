use std::fmt;

use serde::{Deserialize, Serialize};

/// 单次查询的执行统计
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStats {
    /// 覆盖所用网格指数（格边长 `2^exponent`）
    pub exponent: u32,
    /// 发出的 range scan 数（每格一次）
    pub fanout: usize,
    /// 过滤前 store 返回的 key 数
    pub scanned: usize,
    /// 通过精确过滤的 key 数
    pub matched: usize,
}

impl QueryStats {
    /// 取回但被过滤掉的数量
    pub fn overfetch(&self) -> usize {
        self.scanned.saturating_sub(self.matched)
    }

    /// 命中率；没有 scan 到任何 key 时为 1.0
    pub fn precision(&self) -> f64 {
        if self.scanned == 0 {
            1.0
        } else {
            self.matched as f64 / self.scanned as f64
        }
    }
}

impl fmt::Display for QueryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exp={} scans={} scanned={} matched={} overfetch={} ({:.1}% useful)",
            self.exponent,
            self.fanout,
            self.scanned,
            self.matched,
            self.overfetch(),
            self.precision() * 100.0
        )
    }
}
