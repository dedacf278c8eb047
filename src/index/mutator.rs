//! 写入协议
//!
//! 每次变更都是一个 store 事务。有 reverse map 时，先在事务外读出 id 当前对应的 key，
//! 再在事务里用 `MapExpect` 守卫这次读取：若提交前 map 已被别的写者改动，整个事务以
//! `StoreError::Conflict` 失败，不做任何修改，也不重试。同一 id 的并发写者因此只有一个
//! 能提交，索引里每个 id 至多一个条目。

use crate::error::{IndexError, Result};
use crate::index::DimIndex;
use crate::storage::{StoreAdapter, WriteOp};

impl<S: StoreAdapter> DimIndex<S> {
    /// 以 `id` 索引 `point`
    ///
    /// 有 reverse map 时，同一事务内替换该 id 之前的条目；没有时只做插入，调用方需自行
    /// 避免同一 id 留下旧条目。
    pub fn index(&self, point: &[u64], id: &str) -> Result<()> {
        let ele = self.element_key(point, id)?;
        match self.map_ns.as_deref() {
            Some(map_ns) => self.replace(map_ns, ele, id),
            None => {
                self.store.transaction(&[WriteOp::InsertSorted {
                    namespace: self.idx_ns.clone(),
                    member: ele,
                }])?;
                tracing::debug!(id, ?point, "indexed");
                Ok(())
            }
        }
    }

    /// 把 `id` 移到 `point`，丢弃它原来的条目。需要 reverse map。
    pub fn update(&self, point: &[u64], id: &str) -> Result<()> {
        let map_ns = self.require_map("update")?;
        let ele = self.element_key(point, id)?;
        self.replace(map_ns, ele, id)
    }

    /// 删除 `id` 的条目。需要 reverse map。
    ///
    /// id 未被索引不算错误：不写任何东西，返回 `Ok(false)`。
    pub fn unindex_by_id(&self, id: &str) -> Result<bool> {
        let map_ns = self.require_map("unindex_by_id")?;
        let Some(ele) = self.store.map_get(map_ns, id.as_bytes())? else {
            tracing::debug!(id, "unindex_by_id: id not indexed, nothing to do");
            return Ok(false);
        };

        self.store.transaction(&[
            WriteOp::MapExpect {
                namespace: map_ns.to_string(),
                field: id.as_bytes().to_vec(),
                value: Some(ele.clone()),
            },
            WriteOp::RemoveSorted {
                namespace: self.idx_ns.clone(),
                member: ele,
            },
            WriteOp::MapDelete {
                namespace: map_ns.to_string(),
                field: id.as_bytes().to_vec(),
            },
        ])?;
        tracing::debug!(id, "unindexed");
        Ok(true)
    }

    /// 删除精确的 `(point, id)` 条目
    ///
    /// 不需要 reverse map。有 map 且它正指向这个条目时，同一事务里一并删除 map 字段；
    /// 指向别处的 map 值保持不动。
    pub fn unindex(&self, point: &[u64], id: &str) -> Result<()> {
        let ele = self.element_key(point, id)?;

        let mut ops = Vec::with_capacity(3);
        let mut owned_map = None;
        if let Some(map_ns) = self.map_ns.as_deref() {
            let current = self.store.map_get(map_ns, id.as_bytes())?;
            if current.as_deref() == Some(ele.as_slice()) {
                owned_map = Some(map_ns);
            }
            ops.push(WriteOp::MapExpect {
                namespace: map_ns.to_string(),
                field: id.as_bytes().to_vec(),
                value: current,
            });
        }

        ops.push(WriteOp::RemoveSorted {
            namespace: self.idx_ns.clone(),
            member: ele,
        });
        if let Some(map_ns) = owned_map {
            ops.push(WriteOp::MapDelete {
                namespace: map_ns.to_string(),
                field: id.as_bytes().to_vec(),
            });
        }

        self.store.transaction(&ops)?;
        tracing::debug!(id, ?point, "unindexed entry");
        Ok(())
    }

    fn replace(&self, map_ns: &str, ele: Vec<u8>, id: &str) -> Result<()> {
        let old = self.store.map_get(map_ns, id.as_bytes())?;
        let replaced = old.is_some();

        let mut ops = Vec::with_capacity(4);
        ops.push(WriteOp::MapExpect {
            namespace: map_ns.to_string(),
            field: id.as_bytes().to_vec(),
            value: old.clone(),
        });
        if let Some(old) = old {
            ops.push(WriteOp::RemoveSorted {
                namespace: self.idx_ns.clone(),
                member: old,
            });
        }
        ops.push(WriteOp::InsertSorted {
            namespace: self.idx_ns.clone(),
            member: ele.clone(),
        });
        ops.push(WriteOp::MapSet {
            namespace: map_ns.to_string(),
            field: id.as_bytes().to_vec(),
            value: ele,
        });

        self.store.transaction(&ops)?;
        tracing::debug!(id, replaced, "indexed");
        Ok(())
    }

    fn require_map(&self, op: &str) -> Result<&str> {
        self.map_ns.as_deref().ok_or_else(|| {
            IndexError::Configuration(format!(
                "{op} needs a reverse map; build the index with `reverse_map` enabled"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::IndexConfig;
    use crate::error::{IndexError, StoreError};
    use crate::index::DimIndex;
    use crate::storage::{MemoryStore, ReadOp, ReadReply, StoreAdapter, WriteOp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn mapped() -> DimIndex<MemoryStore> {
        DimIndex::new(
            MemoryStore::new(),
            IndexConfig::new("t", 2).with_reverse_map(true),
        )
        .unwrap()
    }

    fn entries(idx: &DimIndex<MemoryStore>) -> Vec<Vec<u8>> {
        idx.store()
            .image()
            .sorted
            .get(idx.index_namespace())
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn update_twice_leaves_one_entry() {
        let idx = mapped();
        idx.update(&[3, 4], "a").unwrap();
        idx.update(&[3, 4], "a").unwrap();
        let want = idx.element_key(&[3, 4], "a").unwrap();
        assert_eq!(entries(&idx), vec![want.clone()]);
        assert_eq!(idx.store().map_get("t:map", b"a").unwrap(), Some(want));
    }

    #[test]
    fn update_moves_entry() {
        let idx = mapped();
        idx.index(&[1, 1], "a").unwrap();
        idx.update(&[9, 9], "a").unwrap();
        assert_eq!(entries(&idx), vec![idx.element_key(&[9, 9], "a").unwrap()]);
        assert_eq!(idx.store().map_len("t:map"), 1);
    }

    #[test]
    fn index_without_map_only_inserts() {
        let idx = DimIndex::new(MemoryStore::new(), IndexConfig::new("t", 2)).unwrap();
        idx.index(&[1, 1], "a").unwrap();
        idx.index(&[2, 2], "a").unwrap();
        assert_eq!(entries(&idx).len(), 2);
        assert_eq!(idx.store().map_len("t:map"), 0);
    }

    #[test]
    fn map_operations_need_a_map() {
        let idx = DimIndex::new(MemoryStore::new(), IndexConfig::new("t", 2)).unwrap();
        assert!(matches!(idx.update(&[1, 1], "a"), Err(IndexError::Configuration(_))));
        assert!(matches!(idx.unindex_by_id("a"), Err(IndexError::Configuration(_))));
    }

    #[test]
    fn unindex_by_missing_id_is_noop() {
        let idx = mapped();
        idx.index(&[1, 1], "a").unwrap();
        assert!(!idx.unindex_by_id("nobody").unwrap());
        assert_eq!(entries(&idx).len(), 1);
        assert!(idx.unindex_by_id("a").unwrap());
        assert!(entries(&idx).is_empty());
        assert_eq!(idx.store().map_len("t:map"), 0);
    }

    #[test]
    fn unindex_exact_pair() {
        let idx = mapped();
        idx.index(&[5, 6], "a").unwrap();
        // 同一 id 的过期坐标：条目不动，map 保留
        idx.unindex(&[1, 1], "a").unwrap();
        assert_eq!(entries(&idx).len(), 1);
        assert_eq!(idx.store().map_len("t:map"), 1);

        idx.unindex(&[5, 6], "a").unwrap();
        assert!(entries(&idx).is_empty());
        assert_eq!(idx.store().map_len("t:map"), 0);
    }

    #[test]
    fn unindex_without_map() {
        let idx = DimIndex::new(MemoryStore::new(), IndexConfig::new("t", 2)).unwrap();
        idx.index(&[5, 6], "a").unwrap();
        idx.unindex(&[5, 6], "a").unwrap();
        assert!(entries(&idx).is_empty());
    }

    #[test]
    fn rejects_bad_points() {
        let idx = DimIndex::new(
            MemoryStore::new(),
            IndexConfig::new("t", 2).with_precision(8).with_reverse_map(true),
        )
        .unwrap();
        assert!(matches!(
            idx.index(&[1, 2, 3], "a"),
            Err(IndexError::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert!(matches!(
            idx.update(&[256, 0], "a"),
            Err(IndexError::EncodingRange { value: 256, .. })
        ));
        assert!(entries_is_empty(&idx));
    }

    fn entries_is_empty(idx: &DimIndex<MemoryStore>) -> bool {
        idx.store().image().sorted.is_empty() && idx.store().image().maps.is_empty()
    }

    /// 读请求透传，所有事务都被拒绝
    struct ReadOnly(MemoryStore);

    impl StoreAdapter for ReadOnly {
        fn batch(&self, ops: &[ReadOp]) -> Result<Vec<ReadReply>, StoreError> {
            self.0.batch(ops)
        }

        fn transaction(&self, _ops: &[WriteOp]) -> Result<(), StoreError> {
            Err(StoreError::Backend("read-only replica".into()))
        }
    }

    #[test]
    fn store_failure_propagates_and_changes_nothing() {
        let seeded = mapped();
        seeded.index(&[1, 1], "a").unwrap();
        let before = seeded.store().image();

        let idx = DimIndex::new(
            ReadOnly(MemoryStore::from_image(before.clone())),
            IndexConfig::new("t", 2).with_reverse_map(true),
        )
        .unwrap();
        assert!(matches!(
            idx.update(&[2, 2], "a"),
            Err(IndexError::Store(StoreError::Backend(_)))
        ));
        assert!(matches!(idx.unindex_by_id("a"), Err(IndexError::Store(_))));
        assert_eq!(idx.store().0.image(), before);
        assert_eq!(idx.query(&[(0, 10), (0, 10)]).unwrap().len(), 1);
    }

    /// 前两次 `MapGet` 在 barrier 处会合，让两个写者读到同一个旧值后再提交。
    struct LockstepReads {
        inner: MemoryStore,
        gate: Barrier,
        map_reads: AtomicUsize,
    }

    impl StoreAdapter for LockstepReads {
        fn batch(&self, ops: &[ReadOp]) -> Result<Vec<ReadReply>, StoreError> {
            let replies = self.inner.batch(ops)?;
            if matches!(ops, [ReadOp::MapGet { .. }]) && self.map_reads.fetch_add(1, Ordering::SeqCst) < 2 {
                self.gate.wait();
            }
            Ok(replies)
        }

        fn transaction(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
            self.inner.transaction(ops)
        }
    }

    #[test]
    fn racing_updates_of_one_id_leave_one_entry() {
        let idx = Arc::new(
            DimIndex::new(
                LockstepReads {
                    inner: MemoryStore::new(),
                    gate: Barrier::new(2),
                    map_reads: AtomicUsize::new(0),
                },
                IndexConfig::new("t", 2).with_reverse_map(true),
            )
            .unwrap(),
        );

        let outcomes: Vec<_> = [[2u64, 2], [3, 3]]
            .into_iter()
            .map(|point| {
                let idx = idx.clone();
                std::thread::spawn(move || idx.update(&point, "x"))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let committed = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(committed, 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(IndexError::Store(StoreError::Conflict(_))))));

        let image = idx.store().inner.image();
        let members: Vec<Vec<u8>> = image.sorted["t:idx"].iter().cloned().collect();
        assert_eq!(members.len(), 1);
        assert_eq!(image.maps["t:map"].get(b"x".as_slice()), Some(&members[0]));

        assert!(idx.unindex_by_id("x").unwrap());
        assert!(idx.store().inner.image().sorted.is_empty());
    }

    #[test]
    fn stale_map_guard_keeps_newer_entry() {
        let idx = mapped();
        idx.index(&[1, 1], "a").unwrap();
        let stale = idx.element_key(&[1, 1], "a").unwrap();
        idx.update(&[2, 2], "a").unwrap();

        // 读到的是旧值：守卫失败，新条目保留
        let err = idx.store().transaction(&[
            WriteOp::MapExpect {
                namespace: "t:map".into(),
                field: b"a".to_vec(),
                value: Some(stale),
            },
            WriteOp::MapDelete {
                namespace: "t:map".into(),
                field: b"a".to_vec(),
            },
        ]);
        assert!(matches!(err, Err(StoreError::Conflict(_))));
        assert_eq!(entries(&idx), vec![idx.element_key(&[2, 2], "a").unwrap()]);
    }
}
