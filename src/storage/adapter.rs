use crate::error::StoreError;

/// pipeline batch 中的读操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOp {
    /// sorted set `namespace` 中 `start..=end` 的成员，按字典序
    RangeByLex {
        namespace: String,
        start: Vec<u8>,
        end: Vec<u8>,
    },
    MapGet {
        namespace: String,
        field: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadReply {
    Members(Vec<Vec<u8>>),
    Value(Option<Vec<u8>>),
}

impl ReadReply {
    pub fn into_members(self) -> Result<Vec<Vec<u8>>, StoreError> {
        match self {
            ReadReply::Members(m) => Ok(m),
            other => Err(StoreError::UnexpectedReply(format!("expected members, got {other:?}"))),
        }
    }

    pub fn into_value(self) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            ReadReply::Value(v) => Ok(v),
            other => Err(StoreError::UnexpectedReply(format!("expected value, got {other:?}"))),
        }
    }
}

/// 事务内的写操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    InsertSorted { namespace: String, member: Vec<u8> },
    RemoveSorted { namespace: String, member: Vec<u8> },
    MapSet { namespace: String, field: Vec<u8>, value: Vec<u8> },
    MapDelete { namespace: String, field: Vec<u8> },
    /// 守卫：仅当 `field` 当前值等于 `value`（`None` 表示不存在）时事务才生效。
    /// 以事务执行前的状态为准。
    MapExpect { namespace: String, field: Vec<u8>, value: Option<Vec<u8>> },
}

/// 索引所依赖的有序 KV 存储
///
/// 实现只需提供两个原语：
/// - `batch`：一次往返发出的多个独立读，回复按提交顺序
/// - `transaction`：写操作要么全部可见，要么全部不生效；`MapExpect` 守卫失败时整个事务
///   以 `StoreError::Conflict` 中止
///
/// 超时、重试、连接管理都由实现负责，索引层原样返回 `StoreError`。
pub trait StoreAdapter: Send + Sync {
    fn batch(&self, ops: &[ReadOp]) -> Result<Vec<ReadReply>, StoreError>;

    fn transaction(&self, ops: &[WriteOp]) -> Result<(), StoreError>;

    fn insert_sorted(&self, namespace: &str, member: &[u8]) -> Result<(), StoreError> {
        self.transaction(&[WriteOp::InsertSorted {
            namespace: namespace.to_string(),
            member: member.to_vec(),
        }])
    }

    fn remove_sorted(&self, namespace: &str, member: &[u8]) -> Result<(), StoreError> {
        self.transaction(&[WriteOp::RemoveSorted {
            namespace: namespace.to_string(),
            member: member.to_vec(),
        }])
    }

    fn range_by_lex(&self, namespace: &str, start: &[u8], end: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        single_reply(self.batch(&[ReadOp::RangeByLex {
            namespace: namespace.to_string(),
            start: start.to_vec(),
            end: end.to_vec(),
        }])?)?
        .into_members()
    }

    fn map_get(&self, namespace: &str, field: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        single_reply(self.batch(&[ReadOp::MapGet {
            namespace: namespace.to_string(),
            field: field.to_vec(),
        }])?)?
        .into_value()
    }

    fn map_set(&self, namespace: &str, field: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.transaction(&[WriteOp::MapSet {
            namespace: namespace.to_string(),
            field: field.to_vec(),
            value: value.to_vec(),
        }])
    }

    fn map_delete(&self, namespace: &str, field: &[u8]) -> Result<(), StoreError> {
        self.transaction(&[WriteOp::MapDelete {
            namespace: namespace.to_string(),
            field: field.to_vec(),
        }])
    }
}

impl<S: StoreAdapter + ?Sized> StoreAdapter for std::sync::Arc<S> {
    fn batch(&self, ops: &[ReadOp]) -> Result<Vec<ReadReply>, StoreError> {
        (**self).batch(ops)
    }

    fn transaction(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        (**self).transaction(ops)
    }
}

fn single_reply(mut replies: Vec<ReadReply>) -> Result<ReadReply, StoreError> {
    if replies.len() != 1 {
        return Err(StoreError::UnexpectedReply(format!(
            "expected exactly one reply, got {}",
            replies.len()
        )));
    }
    replies
        .pop()
        .ok_or_else(|| StoreError::UnexpectedReply("empty reply".into()))
}
