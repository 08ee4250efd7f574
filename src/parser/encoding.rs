//! 文本编码解码
//!
//! 名称字段使用 Shift-JIS（PMD/VMD/VPD）或由 PMX 头部标志选择的
//! UTF-16LE / UTF-8。

use encoding_rs::{SHIFT_JIS, UTF_16LE};

/// 文本编码
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextCodec {
    ShiftJis,
    Utf16Le,
    Utf8,
}

impl TextCodec {
    /// 解码字节序列
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextCodec::ShiftJis => SHIFT_JIS.decode(bytes).0.into_owned(),
            TextCodec::Utf16Le => UTF_16LE.decode(bytes).0.into_owned(),
            TextCodec::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// 解码定长 null 填充字段：截断到第一个终止符再解码
    pub fn decode_padded(self, bytes: &[u8]) -> String {
        let trimmed = match self {
            // UTF-16 的终止符是 0x0000 双字节
            TextCodec::Utf16Le => {
                let end = bytes
                    .chunks_exact(2)
                    .position(|pair| pair == [0, 0])
                    .map(|i| i * 2)
                    .unwrap_or(bytes.len());
                &bytes[..end]
            }
            _ => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                &bytes[..end]
            }
        };
        self.decode(trimmed)
    }
}
