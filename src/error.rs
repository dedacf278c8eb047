use thiserror::Error;

/// `StoreAdapter` 实现返回的错误
///
/// 索引层不解析这些错误，原样透传给调用方。
#[derive(Error, Debug)]
pub enum StoreError {
    /// 后端拒绝或执行失败
    #[error("store backend error: {0}")]
    Backend(String),

    /// `MapExpect` 守卫不成立，事务里的操作都未生效
    #[error("store conflict: {0}")]
    Conflict(String),

    /// 回复类型与提交的操作不匹配
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 索引错误
#[derive(Error, Debug)]
pub enum IndexError {
    /// 点或查询的维数与配置不一致
    #[error("dimension mismatch: index has {expected} dimensions, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// 配置非法，或在没有 reverse map 的索引上调用依赖它的操作
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 坐标超出配置的位精度
    #[error("coordinate {value} out of range for {precision}-bit precision")]
    EncodingRange { value: u64, precision: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// 索引 namespace 中有无法解析的成员
    #[error("malformed index entry: {0}")]
    MalformedEntry(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
