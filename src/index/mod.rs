//! `DimIndex`：构建在 `StoreAdapter` 之上的 D 维范围索引
//!
//! 每个点是一个 sorted set 成员，key 为 Z-order 前缀 + 原始坐标 + id。
//! 范围查询拆成若干覆盖网格，每格一次字典序 scan，合并成一个 batch 发出，最后精确过滤。

pub mod mutator;

use crate::config::IndexConfig;
use crate::core::{element_key, CoordinateCodec, Hit};
use crate::error::{Result, StoreError};
use crate::query::{Bounds, QueryPlan, ResultFilter};
use crate::stats::QueryStats;
use crate::storage::{ReadOp, StoreAdapter};

pub struct DimIndex<S> {
    store: S,
    config: IndexConfig,
    codec: CoordinateCodec,
    idx_ns: String,
    map_ns: Option<String>,
}

impl<S: StoreAdapter> DimIndex<S> {
    pub fn new(store: S, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let codec = CoordinateCodec::new(config.dims, config.precision);
        let idx_ns = config.index_namespace();
        let map_ns = config.map_namespace();
        tracing::debug!(
            dims = config.dims,
            precision = config.precision,
            %idx_ns,
            ?map_ns,
            "index opened"
        );
        Ok(Self {
            store,
            config,
            codec,
            idx_ns,
            map_ns,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn codec(&self) -> &CoordinateCodec {
        &self.codec
    }

    pub fn index_namespace(&self) -> &str {
        &self.idx_ns
    }

    pub fn map_namespace(&self) -> Option<&str> {
        self.map_ns.as_deref()
    }

    /// `point` 的交织 hex 前缀
    pub fn encode(&self, point: &[u64]) -> Result<String> {
        self.codec.encode(point)
    }

    /// `(point, id)` 对应的完整成员 key
    pub fn element_key(&self, point: &[u64], id: &str) -> Result<Vec<u8>> {
        let prefix = self.codec.encode(point)?;
        Ok(element_key(&prefix, point, id))
    }

    pub fn plan(&self, ranges: &[Bounds]) -> Result<QueryPlan> {
        QueryPlan::build(&self.codec, ranges, self.config.fanout_threshold)
    }

    /// 落在 `ranges` 内的全部条目（闭区间，bound 顺序无关）
    ///
    /// 结果按 scan 顺序返回；需要有序请自行排序。
    pub fn query(&self, ranges: &[Bounds]) -> Result<Vec<Hit>> {
        Ok(self.query_with_stats(ranges)?.0)
    }

    pub fn query_with_stats(&self, ranges: &[Bounds]) -> Result<(Vec<Hit>, QueryStats)> {
        let plan = self.plan(ranges)?;
        self.execute(&plan)
    }

    /// 同 `query`，但网格指数由调用方指定
    pub fn query_raw(&self, ranges: &[Bounds], exponent: u32) -> Result<Vec<Hit>> {
        let plan = QueryPlan::with_exponent(&self.codec, ranges, exponent)?;
        Ok(self.execute(&plan)?.0)
    }

    /// 执行查询计划：所有 sub-range scan 放进一个 batch
    pub fn execute(&self, plan: &QueryPlan) -> Result<(Vec<Hit>, QueryStats)> {
        let ops: Vec<ReadOp> = plan
            .sub_ranges
            .iter()
            .map(|r| ReadOp::RangeByLex {
                namespace: self.idx_ns.clone(),
                start: r.start.clone(),
                end: r.end.clone(),
            })
            .collect();

        let replies = self.store.batch(&ops)?;
        if replies.len() != ops.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "batch of {} scans returned {} replies",
                ops.len(),
                replies.len()
            ))
            .into());
        }

        let filter = ResultFilter::new(&plan.ranges);
        let mut hits = Vec::new();
        let mut scanned = 0usize;
        for reply in replies {
            let members = reply.into_members()?;
            scanned += members.len();
            hits.extend(filter.apply(members)?);
        }

        let stats = QueryStats {
            exponent: plan.exponent,
            fanout: plan.fanout(),
            scanned,
            matched: hits.len(),
        };
        tracing::debug!(%stats, "query executed");
        Ok((hits, stats))
    }
}
