use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::storage::adapter::{ReadOp, ReadReply, StoreAdapter, WriteOp};

/// `MemoryStore` 的纯数据内容（快照落盘的就是它）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreImage {
    pub sorted: BTreeMap<String, BTreeSet<Vec<u8>>>,
    pub maps: BTreeMap<String, HashMap<Vec<u8>, Vec<u8>>>,
}

impl StoreImage {
    fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::InsertSorted { namespace, member } => {
                self.sorted
                    .entry(namespace.clone())
                    .or_default()
                    .insert(member.clone());
            }
            WriteOp::RemoveSorted { namespace, member } => {
                if let Some(set) = self.sorted.get_mut(namespace) {
                    set.remove(member);
                    if set.is_empty() {
                        self.sorted.remove(namespace);
                    }
                }
            }
            WriteOp::MapSet {
                namespace,
                field,
                value,
            } => {
                self.maps
                    .entry(namespace.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
            }
            WriteOp::MapDelete { namespace, field } => {
                if let Some(map) = self.maps.get_mut(namespace) {
                    map.remove(field);
                    if map.is_empty() {
                        self.maps.remove(namespace);
                    }
                }
            }
            // 守卫只在提交前检查，不改动状态
            WriteOp::MapExpect { .. } => {}
        }
    }

    fn map_value(&self, namespace: &str, field: &[u8]) -> Option<&Vec<u8>> {
        self.maps.get(namespace).and_then(|m| m.get(field))
    }

    /// 检查所有 `MapExpect` 守卫；任何一个不成立都返回 Conflict。
    fn check_guards(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        for op in ops {
            if let WriteOp::MapExpect {
                namespace,
                field,
                value,
            } = op
            {
                if self.map_value(namespace, field) != value.as_ref() {
                    return Err(StoreError::Conflict(format!(
                        "{}[{}] changed since it was read",
                        namespace,
                        String::from_utf8_lossy(field)
                    )));
                }
            }
        }
        Ok(())
    }

    fn read(&self, op: &ReadOp) -> ReadReply {
        match op {
            ReadOp::RangeByLex {
                namespace,
                start,
                end,
            } => {
                let members = match self.sorted.get(namespace) {
                    // BTreeSet::range 遇到反向区间会 panic
                    Some(set) if start <= end => set
                        .range::<[u8], _>((
                            Bound::Included(start.as_slice()),
                            Bound::Included(end.as_slice()),
                        ))
                        .cloned()
                        .collect(),
                    _ => Vec::new(),
                };
                ReadReply::Members(members)
            }
            ReadOp::MapGet { namespace, field } => {
                ReadReply::Value(self.map_value(namespace, field).cloned())
            }
        }
    }
}

/// 进程内有序存储
///
/// 单个 `RwLock` 保护全部状态：
/// - batch 在一次 read guard 内完成所有读取
/// - transaction 在一次 write guard 内完成校验、守卫检查与写入
///
/// 因此读者永远看不到半个事务。
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreImage>,
    generation: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_image(image: StoreImage) -> Self {
        Self {
            state: RwLock::new(image),
            generation: AtomicU64::new(0),
        }
    }

    /// 当前内容的一致性副本
    pub fn image(&self) -> StoreImage {
        self.state.read().clone()
    }

    /// 副本及其对应的 generation
    pub fn image_at(&self) -> (u64, StoreImage) {
        let state = self.state.read();
        (self.generation.load(Ordering::Acquire), state.clone())
    }

    /// 自构造以来已提交的事务数
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn sorted_len(&self, namespace: &str) -> usize {
        self.state
            .read()
            .sorted
            .get(namespace)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn map_len(&self, namespace: &str) -> usize {
        self.state
            .read()
            .maps
            .get(namespace)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

fn validate(op: &WriteOp) -> Result<(), StoreError> {
    let namespace = match op {
        WriteOp::InsertSorted { namespace, .. }
        | WriteOp::RemoveSorted { namespace, .. }
        | WriteOp::MapSet { namespace, .. }
        | WriteOp::MapDelete { namespace, .. }
        | WriteOp::MapExpect { namespace, .. } => namespace,
    };
    if namespace.is_empty() {
        return Err(StoreError::Backend(format!("empty namespace in {op:?}")));
    }
    Ok(())
}

impl StoreAdapter for MemoryStore {
    fn batch(&self, ops: &[ReadOp]) -> Result<Vec<ReadReply>, StoreError> {
        let state = self.state.read();
        Ok(ops.iter().map(|op| state.read(op)).collect())
    }

    fn transaction(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        let mut state = self.state.write();
        // 先全部校验再写入：失败的事务不留下任何改动
        ops.iter().try_for_each(validate)?;
        state.check_guards(ops)?;
        for op in ops {
            state.apply(op);
        }
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }
}
