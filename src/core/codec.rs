use crate::error::{IndexError, Result};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Z-order（Morton）编码器
///
/// 从最高位开始，所有坐标的第 `i` 位都排在任何坐标的第 `i - 1` 位之前，同一位内按维度顺序。
/// 结果渲染为定宽小写 hex，因此两个前缀的字节序比较等价于交织值的数值比较。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateCodec {
    dims: usize,
    precision: u32,
}

impl CoordinateCodec {
    pub fn new(dims: usize, precision: u32) -> Self {
        Self { dims, precision }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// 当前精度下可表示的最大坐标
    pub fn max_coord(&self) -> u64 {
        if self.precision >= 64 {
            u64::MAX
        } else {
            (1u64 << self.precision) - 1
        }
    }

    /// 交织后的位数（hex 补齐之前）
    pub fn bit_len(&self) -> usize {
        self.dims * self.precision as usize
    }

    /// 编码前缀宽度（hex 位数）
    pub fn prefix_len(&self) -> usize {
        self.bit_len().div_ceil(4)
    }

    pub fn check_arity(&self, got: usize) -> Result<()> {
        if got != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got,
            });
        }
        Ok(())
    }

    pub fn check_coord(&self, value: u64) -> Result<()> {
        if value > self.max_coord() {
            return Err(IndexError::EncodingRange {
                value,
                precision: self.precision,
            });
        }
        Ok(())
    }

    pub fn check_point(&self, point: &[u64]) -> Result<()> {
        self.check_arity(point.len())?;
        point.iter().try_for_each(|&v| self.check_coord(v))
    }

    pub fn encode(&self, point: &[u64]) -> Result<String> {
        self.check_point(point)?;

        let width = self.prefix_len() * 4;
        let mut bits = BitBuf::zeroed(width);
        // D*prec 不是 4 的倍数时，在高位补 0 保持右对齐
        let mut cursor = width - self.bit_len();
        for i in (0..self.precision).rev() {
            for &v in point {
                if (v >> i) & 1 == 1 {
                    bits.set(cursor);
                }
                cursor += 1;
            }
        }
        Ok(bits.to_hex())
    }
}

/// 定长大端位数组：bit 0 是 byte 0 的最高位
struct BitBuf {
    bytes: Vec<u8>,
    len: usize,
}

impl BitBuf {
    fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    fn set(&mut self, pos: usize) {
        debug_assert!(pos < self.len);
        self.bytes[pos / 8] |= 0x80 >> (pos % 8);
    }

    fn to_hex(&self) -> String {
        let digits = self.len / 4;
        let mut out = String::with_capacity(digits);
        for n in 0..digits {
            let byte = self.bytes[n / 2];
            let nibble = if n % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            out.push(HEX_DIGITS[nibble as usize] as char);
        }
        out
    }
}
