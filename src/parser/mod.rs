//! 解析器组合子库
//!
//! 二进制与文本两套游标，契约相同：解析器是纯函数
//! `Cursor -> Result<(值, 新游标)>`，失败时返回带字节偏移的 [`ParseError`]，
//! 调用方手中的游标不变（无部分消费）。

mod binary;
mod encoding;
mod text;

pub use binary::{and_then, literal, map, repeat, run_document, Cursor, PResult};
pub use encoding::TextCodec;
pub use text::{repeat as repeat_text, TextCursor, TResult};

use thiserror::Error;

/// 解析错误（携带失败处的偏移）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (offset {offset})")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}
