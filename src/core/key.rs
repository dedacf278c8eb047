use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// 条目 key 内前缀、坐标与 id 的分隔符
pub const FIELD_SEPARATOR: u8 = b':';

/// range scan 上界哨兵。后缀只含 ASCII 数字、分隔符和 UTF-8 id，UTF-8 不会出现 0xFF，
/// 所以它大于后缀里的任何字节。
pub const RANGE_SENTINEL: u8 = 0xFF;

/// 一条查询结果：条目里保存的原始坐标与 id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hit {
    pub coords: Vec<u64>,
    pub id: String,
}

/// 主集合成员：`<prefix>:<c0>:...:<cD-1>:<id>`
pub fn element_key(prefix: &str, point: &[u64], id: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + point.len() * 8 + id.len() + point.len() + 1);
    out.extend_from_slice(prefix.as_bytes());
    for v in point {
        out.push(FIELD_SEPARATOR);
        out.extend_from_slice(v.to_string().as_bytes());
    }
    out.push(FIELD_SEPARATOR);
    out.extend_from_slice(id.as_bytes());
    out
}

/// 把条目 key 解析回坐标与 id
///
/// 交织前缀直接跳过，不做解码。最后一个坐标之后的全部内容都是 id，所以 id 里可以含分隔符。
pub fn parse_entry(key: &[u8], dims: usize) -> Result<Hit> {
    let malformed = || IndexError::MalformedEntry(String::from_utf8_lossy(key).into_owned());

    let text = std::str::from_utf8(key).map_err(|_| malformed())?;
    let mut fields = text.splitn(dims + 2, FIELD_SEPARATOR as char);

    let prefix = fields.next().ok_or_else(malformed)?;
    if prefix.is_empty() {
        return Err(malformed());
    }

    let mut coords = Vec::with_capacity(dims);
    for _ in 0..dims {
        let v = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(malformed)?;
        coords.push(v);
    }

    let id = fields.next().ok_or_else(malformed)?;
    Ok(Hit {
        coords,
        id: id.to_string(),
    })
}
