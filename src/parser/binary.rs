//! 二进制游标与组合子
//!
//! 零拷贝游标：持有原始缓冲区引用和当前偏移，读取返回值与前进后的
//! 新游标。所有读取小端序。

use byteorder::{ByteOrder, LittleEndian};
use glam::{Quat, Vec2, Vec3, Vec4};

use super::encoding::TextCodec;
use super::ParseError;

/// 解析结果：值 + 剩余游标
pub type PResult<'a, T> = Result<(T, Cursor<'a>), ParseError>;

/// 只读二进制游标
#[derive(Clone, Copy, Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// 当前字节偏移
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// 剩余字节数
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(self, n: usize, what: &str) -> PResult<'a, &'a [u8]> {
        if self.remaining() < n {
            return Err(ParseError::new(
                self.pos,
                format!("unexpected end of data reading {what}"),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        Ok((
            slice,
            Cursor {
                buf: self.buf,
                pos: self.pos + n,
            },
        ))
    }

    pub fn read_u8(self) -> PResult<'a, u8> {
        let (b, rest) = self.take(1, "u8")?;
        Ok((b[0], rest))
    }

    pub fn read_i8(self) -> PResult<'a, i8> {
        let (b, rest) = self.take(1, "i8")?;
        Ok((b[0] as i8, rest))
    }

    pub fn read_u16(self) -> PResult<'a, u16> {
        let (b, rest) = self.take(2, "u16")?;
        Ok((LittleEndian::read_u16(b), rest))
    }

    pub fn read_i16(self) -> PResult<'a, i16> {
        let (b, rest) = self.take(2, "i16")?;
        Ok((LittleEndian::read_i16(b), rest))
    }

    pub fn read_u32(self) -> PResult<'a, u32> {
        let (b, rest) = self.take(4, "u32")?;
        Ok((LittleEndian::read_u32(b), rest))
    }

    pub fn read_i32(self) -> PResult<'a, i32> {
        let (b, rest) = self.take(4, "i32")?;
        Ok((LittleEndian::read_i32(b), rest))
    }

    pub fn read_f32(self) -> PResult<'a, f32> {
        let (b, rest) = self.take(4, "f32")?;
        Ok((LittleEndian::read_f32(b), rest))
    }

    /// 读取定长字节切片
    pub fn read_bytes(self, n: usize) -> PResult<'a, &'a [u8]> {
        self.take(n, "bytes")
    }

    /// 读取定长 null 填充字符串
    pub fn read_text(self, n: usize, codec: TextCodec) -> PResult<'a, String> {
        let (bytes, rest) = self.take(n, "text")?;
        Ok((codec.decode_padded(bytes), rest))
    }

    /// 读取长度前缀字符串（u32 字节长度 + 负载）
    pub fn read_var_text(self, codec: TextCodec) -> PResult<'a, String> {
        let (len, rest) = self.read_u32()?;
        let (bytes, rest) = rest.take(len as usize, "string payload")?;
        Ok((codec.decode(bytes), rest))
    }

    pub fn read_vec2(self) -> PResult<'a, Vec2> {
        let (x, rest) = self.read_f32()?;
        let (y, rest) = rest.read_f32()?;
        Ok((Vec2::new(x, y), rest))
    }

    pub fn read_vec3(self) -> PResult<'a, Vec3> {
        let (x, rest) = self.read_f32()?;
        let (y, rest) = rest.read_f32()?;
        let (z, rest) = rest.read_f32()?;
        Ok((Vec3::new(x, y, z), rest))
    }

    pub fn read_vec4(self) -> PResult<'a, Vec4> {
        let (x, rest) = self.read_f32()?;
        let (y, rest) = rest.read_f32()?;
        let (z, rest) = rest.read_f32()?;
        let (w, rest) = rest.read_f32()?;
        Ok((Vec4::new(x, y, z, w), rest))
    }

    pub fn read_quat(self) -> PResult<'a, Quat> {
        let (v, rest) = self.read_vec4()?;
        Ok((Quat::from_xyzw(v.x, v.y, v.z, v.w), rest))
    }

    /// 失败并报告当前偏移
    pub fn fail<T>(self, message: impl Into<String>) -> PResult<'a, T> {
        Err(ParseError::new(self.pos, message))
    }
}

/// 变换解析结果，保持剩余游标不动
pub fn map<'a, A, B>(
    p: impl Fn(Cursor<'a>) -> PResult<'a, A>,
    f: impl Fn(A) -> B,
) -> impl Fn(Cursor<'a>) -> PResult<'a, B> {
    move |cur| {
        let (value, rest) = p(cur)?;
        Ok((f(value), rest))
    }
}

/// 顺序组合：前一个解析器的值决定后续解析器
pub fn and_then<'a, A, B, Q>(
    p: impl Fn(Cursor<'a>) -> PResult<'a, A>,
    f: impl Fn(A) -> Q,
) -> impl Fn(Cursor<'a>) -> PResult<'a, B>
where
    Q: Fn(Cursor<'a>) -> PResult<'a, B>,
{
    move |cur| {
        let (value, rest) = p(cur)?;
        f(value)(rest)
    }
}

/// 恰好运行 n 次；任何一次失败即整体失败，不产出部分数组
pub fn repeat<'a, T>(
    p: impl Fn(Cursor<'a>) -> PResult<'a, T>,
    n: usize,
) -> impl Fn(Cursor<'a>) -> PResult<'a, Vec<T>> {
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

/// 精确匹配字节序列，不匹配则失败且不消费
pub fn literal<'a>(expected: &'static [u8]) -> impl Fn(Cursor<'a>) -> PResult<'a, ()> {
    move |cur| {
        let (bytes, rest) = cur.take(expected.len(), "literal")?;
        if bytes == expected {
            Ok(((), rest))
        } else {
            cur.fail(format!("expected literal {expected:?}"))
        }
    }
}

/// 运行文档级解析器：嵌套失败或尾随未消费字节都归结为单个
/// 带偏移的解析错误
pub fn run_document<'a, T>(
    buf: &'a [u8],
    p: impl FnOnce(Cursor<'a>) -> PResult<'a, T>,
) -> Result<T, ParseError> {
    let (value, rest) = p(Cursor::new(buf))?;
    if !rest.is_empty() {
        return Err(ParseError::new(
            rest.offset(),
            format!("{} trailing bytes after document end", rest.remaining()),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_reads() {
        let buf = [0x01, 0x02, 0x00, 0x00, 0x00, 0x80, 0x3f];
        let cur = Cursor::new(&buf);
        let (a, cur) = cur.read_u8().unwrap();
        let (b, cur) = cur.read_u16().unwrap();
        let (f, cur) = cur.read_f32().unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!((f - 1.0).abs() < 1e-6);
        assert!(cur.is_empty());
    }

    #[test]
    fn test_failure_keeps_cursor() {
        let buf = [0x01];
        let cur = Cursor::new(&buf);
        let err = cur.read_u32().unwrap_err();
        assert_eq!(err.offset, 0);
        // 原游标仍可用
        let (v, _) = cur.read_u8().unwrap();
        assert_eq!(v, 1);
    }

    #[test]
    fn test_repeat_is_atomic() {
        let short = [1u8, 2, 3];
        let full = [1u8, 0, 2, 0];
        let p = repeat(|c: Cursor| c.read_u16(), 2);
        assert!(p(Cursor::new(&short)).is_err());
        let (v, _) = p(Cursor::new(&full)).unwrap();
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn test_literal_match() {
        let p = literal(b"Pmd");
        assert!(p(Cursor::new(b"Pmd rest")).is_ok());
        let err = p(Cursor::new(b"Xmd rest")).unwrap_err();
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_map_and_then() {
        let buf = [3u8, 10, 20, 30];
        // 长度前缀数组：读 u8 个数，再读这么多字节
        let p = and_then(
            |c: Cursor| c.read_u8(),
            |n| move |c: Cursor| repeat(|c: Cursor| c.read_u8(), n as usize)(c),
        );
        let (v, rest) = p(Cursor::new(&buf)).unwrap();
        assert_eq!(v, vec![10, 20, 30]);
        assert!(rest.is_empty());

        let doubled = map(|c: Cursor| c.read_u8(), |x| x * 2);
        let (d, _) = doubled(Cursor::new(&buf)).unwrap();
        assert_eq!(d, 6);
    }

    #[test]
    fn test_run_document_rejects_trailing() {
        let buf = [1u8, 2];
        let err = run_document(&buf, |c| c.read_u8()).unwrap_err();
        assert_eq!(err.offset, 1);
        assert!(err.message.contains("trailing"));
    }
}
