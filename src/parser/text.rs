//! 文本游标与组合子
//!
//! BVH / VPD 等文本格式的字符流游标。分词跳过空白与（可选的）
//! `//` 行注释；数字字面量接受符号、小数与科学计数法指数
//! （BVH 导出器会输出 `1.5E-05` 这类偏移值）。

use super::ParseError;

pub type TResult<'a, T> = Result<(T, TextCursor<'a>), ParseError>;

/// 只读文本游标（偏移以字节计）
#[derive(Clone, Copy, Debug)]
pub struct TextCursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> TextCursor<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn advance(self, n: usize) -> Self {
        Self {
            src: self.src,
            pos: self.pos + n,
        }
    }

    pub fn at_eof(&self) -> bool {
        self.rest().is_empty()
    }

    pub fn fail<T>(self, message: impl Into<String>) -> TResult<'a, T> {
        Err(ParseError::new(self.pos, message))
    }

    /// 跳过空白
    pub fn skip_ws(self) -> Self {
        let n = self
            .rest()
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(self.rest().len());
        self.advance(n)
    }

    /// 跳过空白与 `//` 行注释
    pub fn skip_ws_comments(self) -> Self {
        let mut cur = self.skip_ws();
        while cur.rest().starts_with("//") {
            let n = cur.rest().find('\n').unwrap_or(cur.rest().len());
            cur = cur.advance(n).skip_ws();
        }
        cur
    }

    /// 在当前位置精确匹配字符串；不匹配则失败且不消费
    pub fn expect(self, tag: &str) -> TResult<'a, ()> {
        if self.rest().starts_with(tag) {
            Ok(((), self.advance(tag.len())))
        } else {
            self.fail(format!("expected {tag:?}"))
        }
    }

    /// 跳过空白后匹配关键字
    pub fn keyword(self, word: &str) -> TResult<'a, ()> {
        self.skip_ws().expect(word)
    }

    /// 下一个非空白 token
    pub fn token(self) -> TResult<'a, &'a str> {
        let cur = self.skip_ws();
        let end = cur
            .rest()
            .find(|c: char| c.is_whitespace())
            .unwrap_or(cur.rest().len());
        if end == 0 {
            return cur.fail("expected token");
        }
        Ok((&cur.rest()[..end], cur.advance(end)))
    }

    /// 当前行剩余部分（不含换行符），游标落到下一行
    pub fn line(self) -> TResult<'a, &'a str> {
        if self.at_eof() {
            return self.fail("expected line");
        }
        match self.rest().find('\n') {
            Some(n) => Ok((self.rest()[..n].trim_end_matches('\r'), self.advance(n + 1))),
            None => Ok((self.rest(), self.advance(self.rest().len()))),
        }
    }

    /// 消费到指定字符前（不含该字符）
    pub fn until(self, ch: char) -> TResult<'a, &'a str> {
        match self.rest().find(ch) {
            Some(n) => Ok((&self.rest()[..n], self.advance(n))),
            None => self.fail(format!("expected {ch:?} before end of input")),
        }
    }

    /// 浮点字面量：可选符号、十进制尾数、可选 E±指数
    pub fn float(self) -> TResult<'a, f32> {
        let cur = self.skip_ws();
        let bytes = cur.rest().as_bytes();
        let mut i = 0;

        if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let mantissa_start = i;
        while matches!(bytes.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
        if matches!(bytes.get(i), Some(b'.')) {
            i += 1;
            while matches!(bytes.get(i), Some(b'0'..=b'9')) {
                i += 1;
            }
        }
        if i == mantissa_start {
            return cur.fail("expected number");
        }
        if matches!(bytes.get(i), Some(b'e') | Some(b'E')) {
            let mut j = i + 1;
            if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
                j += 1;
            }
            if matches!(bytes.get(j), Some(b'0'..=b'9')) {
                i = j;
                while matches!(bytes.get(i), Some(b'0'..=b'9')) {
                    i += 1;
                }
            }
        }

        match cur.rest()[..i].parse::<f32>() {
            Ok(v) => Ok((v, cur.advance(i))),
            Err(_) => cur.fail("malformed number"),
        }
    }

    /// 无符号整数字面量
    pub fn uint(self) -> TResult<'a, u32> {
        let cur = self.skip_ws();
        let bytes = cur.rest().as_bytes();
        let mut i = 0;
        while matches!(bytes.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
        if i == 0 {
            return cur.fail("expected integer");
        }
        match cur.rest()[..i].parse::<u32>() {
            Ok(v) => Ok((v, cur.advance(i))),
            Err(_) => cur.fail("integer out of range"),
        }
    }
}

/// 恰好运行 n 次；失败即整体失败
pub fn repeat<'a, T>(
    p: impl Fn(TextCursor<'a>) -> TResult<'a, T>,
    n: usize,
) -> impl Fn(TextCursor<'a>) -> TResult<'a, Vec<T>> {
    move |mut cur| {
        let mut out = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            let (value, rest) = p(cur)?;
            out.push(value);
            cur = rest;
        }
        Ok((out, cur))
    }
}
