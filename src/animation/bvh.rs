//! BVH 动作捕捉解析器
//!
//! 递归文法：`ROOT`/`JOINT` 节点带名称、`OFFSET` 三元组和
//! `CHANNELS` 声明；子节点是一到多个 `JOINT` 或单个 `End Site`
//! 叶子，统一收进同一个子节点列表。`MOTION` 段的 `Frames:` /
//! `Frame Time:` 进入字符串键属性表（未知属性容忍），之后是
//! 逐帧一行的浮点矩阵——每行浮点数必须恰好等于整棵树声明的
//! 通道总数，多一个或少一个都是致命错误。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use glam::{Mat3, Quat, Vec3};

use crate::parser::{ParseError, TResult, TextCursor};
use crate::{MmdError, Result};

use super::keyframe::BoneKeyframe;
use super::motion::MotionDocument;

/// 通道类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    XPosition,
    YPosition,
    ZPosition,
    XRotation,
    YRotation,
    ZRotation,
}

impl Channel {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "Xposition" => Some(Channel::XPosition),
            "Yposition" => Some(Channel::YPosition),
            "Zposition" => Some(Channel::ZPosition),
            "Xrotation" => Some(Channel::XRotation),
            "Yrotation" => Some(Channel::YRotation),
            "Zrotation" => Some(Channel::ZRotation),
            _ => None,
        }
    }
}

/// 层级节点；`End Site` 叶子没有名称和通道
#[derive(Clone, Debug, PartialEq)]
pub struct BvhNode {
    pub name: Option<String>,
    pub offset: Vec3,
    pub channels: Vec<Channel>,
    pub children: Vec<BvhNode>,
}

impl BvhNode {
    /// 全树通道总数
    pub fn channel_total(&self) -> usize {
        self.channels.len()
            + self
                .children
                .iter()
                .map(BvhNode::channel_total)
                .sum::<usize>()
    }
}

/// BVH 文档：节点树 + 帧优先浮点矩阵
#[derive(Clone, Debug, PartialEq)]
pub struct BvhDocument {
    pub root: BvhNode,
    /// `MOTION` 段属性（`Frames` / `Frame Time` 等）
    pub properties: HashMap<String, String>,
    pub frames: Vec<Vec<f32>>,
    pub frame_time: f32,
}

impl BvhDocument {
    /// 按声明顺序做深度优先通道应用，转为动作文档。
    /// 旋转通道按文件声明顺序逐轴合成旋转矩阵再转四元数——
    /// 顺序由文件决定，不能写死。
    pub fn to_motion(&self) -> MotionDocument {
        let name = self.root.name.clone().unwrap_or_default();
        let fps = if self.frame_time > 0.0 {
            1.0 / self.frame_time
        } else {
            30.0
        };
        let mut doc = MotionDocument::new(name, fps);
        for (frame_index, row) in self.frames.iter().enumerate() {
            let mut values = row.iter();
            apply_node(&self.root, frame_index as u32, &mut values, &mut doc);
        }
        doc
    }
}

fn apply_node<'a>(
    node: &BvhNode,
    frame: u32,
    values: &mut impl Iterator<Item = &'a f32>,
    doc: &mut MotionDocument,
) {
    let mut translation = Vec3::ZERO;
    let mut rotation = Mat3::IDENTITY;
    for channel in &node.channels {
        // 行宽已在解析时校验，这里不会耗尽
        let v = *values.next().expect("row width checked at parse time");
        match channel {
            Channel::XPosition => translation.x = v,
            Channel::YPosition => translation.y = v,
            Channel::ZPosition => translation.z = v,
            Channel::XRotation => rotation *= Mat3::from_rotation_x(v.to_radians()),
            Channel::YRotation => rotation *= Mat3::from_rotation_y(v.to_radians()),
            Channel::ZRotation => rotation *= Mat3::from_rotation_z(v.to_radians()),
        }
    }
    if let Some(ref name) = node.name {
        if !node.channels.is_empty() {
            doc.insert_bone_keyframe(
                name,
                BoneKeyframe::new(frame, translation, Quat::from_mat3(&rotation)),
            );
        }
    }
    for child in &node.children {
        apply_node(child, frame, values, doc);
    }
}

/// 从文件加载 BVH
pub fn load<P: AsRef<Path>>(path: P) -> Result<BvhDocument> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// 解析 BVH 字节缓冲
pub fn parse(bytes: &[u8]) -> Result<BvhDocument> {
    let text = String::from_utf8_lossy(bytes);
    parse_str(&text)
}

/// 解析 BVH 文本
pub fn parse_str(src: &str) -> Result<BvhDocument> {
    let (doc, _) = document(TextCursor::new(src)).map_err(MmdError::BvhParse)?;
    log::info!(
        "BVH 解析完成: {} ({} 通道, {} 帧)",
        doc.root.name.as_deref().unwrap_or("?"),
        doc.root.channel_total(),
        doc.frames.len()
    );
    Ok(doc)
}

fn document(cur: TextCursor) -> TResult<BvhDocument> {
    let ((), cur) = cur.keyword("HIERARCHY")?;
    let ((), cur) = cur.keyword("ROOT")?;
    let (root, cur) = node(cur)?;

    let ((), cur) = cur.keyword("MOTION")?;
    let (properties, cur) = property_map(cur)?;

    let frame_count = match properties.get("Frames") {
        Some(v) => match v.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => return cur.fail(format!("malformed Frames value {v:?}")),
        },
        None => return cur.fail("missing Frames property"),
    };
    let frame_time = match properties.get("Frame Time") {
        Some(v) => match v.trim().parse::<f32>() {
            Ok(t) => t,
            Err(_) => return cur.fail(format!("malformed Frame Time value {v:?}")),
        },
        None => {
            log::warn!("BVH 缺少 Frame Time，按 30fps 处理");
            1.0 / 30.0
        }
    };

    let expected = root.channel_total();
    let (frames, cur) = frame_rows(cur, frame_count, expected)?;

    let cur = cur.skip_ws();
    if !cur.at_eof() {
        return cur.fail("trailing content after motion data");
    }

    Ok((
        BvhDocument {
            root,
            properties,
            frames,
            frame_time,
        },
        cur,
    ))
}

/// 节点体：名称已由调用方读掉 ROOT/JOINT 关键字
fn node(cur: TextCursor) -> TResult<BvhNode> {
    let (name, cur) = cur.token()?;
    let name = name.to_string();
    let ((), cur) = cur.keyword("{")?;
    let ((), cur) = cur.keyword("OFFSET")?;
    let (offset, cur) = offset_triple(cur)?;
    let ((), cur) = cur.keyword("CHANNELS")?;
    let (count, cur) = cur.uint()?;
    let mut channels = Vec::with_capacity(count as usize);
    let mut cur = cur;
    for _ in 0..count {
        let (word, rest) = cur.token()?;
        match Channel::from_keyword(word) {
            Some(ch) => channels.push(ch),
            None => return cur.fail(format!("unknown channel kind {word:?}")),
        }
        cur = rest;
    }

    let (children, cur) = children(cur)?;
    let ((), cur) = cur.keyword("}")?;
    Ok((
        BvhNode {
            name: Some(name),
            offset,
            channels,
            children,
        },
        cur,
    ))
}

/// 子节点：一到多个 JOINT，或单个 End Site 叶子
fn children(mut cur: TextCursor) -> TResult<Vec<BvhNode>> {
    let mut out = Vec::new();
    loop {
        let probe = cur.skip_ws();
        if probe.expect("JOINT").is_ok() {
            let ((), rest) = probe.expect("JOINT")?;
            let (child, rest) = node(rest)?;
            out.push(child);
            cur = rest;
        } else if probe.expect("End").is_ok() {
            let ((), rest) = probe.expect("End")?;
            let ((), rest) = rest.keyword("Site")?;
            let ((), rest) = rest.keyword("{")?;
            let ((), rest) = rest.keyword("OFFSET")?;
            let (offset, rest) = offset_triple(rest)?;
            let ((), rest) = rest.keyword("}")?;
            out.push(BvhNode {
                name: None,
                offset,
                channels: Vec::new(),
                children: Vec::new(),
            });
            cur = rest;
        } else {
            return Ok((out, cur));
        }
    }
}

fn offset_triple(cur: TextCursor) -> TResult<Vec3> {
    let (x, cur) = cur.float()?;
    let (y, cur) = cur.float()?;
    let (z, cur) = cur.float()?;
    Ok((Vec3::new(x, y, z), cur))
}

/// `Key: value` 行组成的属性表，直到出现非属性行
fn property_map(cur: TextCursor) -> TResult<HashMap<String, String>> {
    let mut properties = HashMap::new();
    let mut cur = cur.skip_ws();
    while !cur.at_eof() {
        let probe = cur;
        let (line, rest) = probe.line()?;
        let Some(colon) = line.find(':') else {
            break;
        };
        let key = line[..colon].trim();
        if key.is_empty() || !key.chars().next().unwrap().is_ascii_alphabetic() {
            break;
        }
        properties.insert(key.to_string(), line[colon + 1..].trim().to_string());
        cur = rest.skip_ws();
    }
    Ok((properties, cur))
}

/// 帧数据行：每行浮点数必须恰好等于通道总数
fn frame_rows(mut cur: TextCursor, count: usize, expected: usize) -> TResult<Vec<Vec<f32>>> {
    let mut frames = Vec::with_capacity(count.min(1 << 16));
    for i in 0..count {
        let start = cur.skip_ws();
        if start.at_eof() {
            return start.fail(format!("expected {count} frame rows, found {i}"));
        }
        let (line, rest) = start.line()?;
        let mut row = Vec::with_capacity(expected);
        let mut line_cur = TextCursor::new(line);
        loop {
            let probe = line_cur.skip_ws();
            if probe.at_eof() {
                break;
            }
            let (v, r) = probe.float().map_err(|e| {
                ParseError::new(start.offset() + e.offset, format!("frame row {i}: {}", e.message))
            })?;
            row.push(v);
            line_cur = r;
        }
        if row.len() != expected {
            return Err(ParseError::new(
                start.offset(),
                format!(
                    "frame row {i} has {} values, hierarchy declares {expected} channels",
                    row.len()
                ),
            ));
        }
        frames.push(row);
        cur = rest;
    }
    Ok((frames, cur))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
HIERARCHY
ROOT Hips
{
\tOFFSET 0.0 0.0 0.0
\tCHANNELS 6 Xposition Yposition Zposition Zrotation Xrotation Yrotation
\tJOINT Chest
\t{
\t\tOFFSET 0.0 5.21 0.0
\t\tCHANNELS 3 Zrotation Xrotation Yrotation
\t\tEnd Site
\t\t{
\t\t\tOFFSET 0.0 1.0E+01 0.0
\t\t}
\t}
}
MOTION
Frames: 2
Frame Time: 0.033333
0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0
1.0 2.0 3.0 90.0 0.0 0.0 0.0 90.0 0.0
";

    #[test]
    fn test_hierarchy_shape() {
        let doc = parse_str(SAMPLE).unwrap();
        assert_eq!(doc.root.name.as_deref(), Some("Hips"));
        assert_eq!(doc.root.channels.len(), 6);
        assert_eq!(doc.root.children.len(), 1);
        let chest = &doc.root.children[0];
        assert_eq!(chest.name.as_deref(), Some("Chest"));
        // End Site 统一为无名无通道的子节点
        assert_eq!(chest.children.len(), 1);
        assert!(chest.children[0].name.is_none());
        assert!(chest.children[0].channels.is_empty());
        // 指数写法的 OFFSET
        assert!((chest.children[0].offset.y - 10.0).abs() < 1e-5);
        assert_eq!(doc.root.channel_total(), 9);
    }

    #[test]
    fn test_properties_map() {
        let doc = parse_str(SAMPLE).unwrap();
        assert_eq!(doc.properties["Frames"], "2");
        assert!((doc.frame_time - 0.033333).abs() < 1e-6);
        assert_eq!(doc.frames.len(), 2);
    }

    #[test]
    fn test_row_width_mismatch_is_fatal() {
        // 少一个值
        let short = SAMPLE.replace(
            "1.0 2.0 3.0 90.0 0.0 0.0 0.0 90.0 0.0",
            "1.0 2.0 3.0 90.0 0.0 0.0 0.0 90.0",
        );
        match parse_str(&short) {
            Err(MmdError::BvhParse(e)) => assert!(e.message.contains("8 values")),
            other => panic!("unexpected: {other:?}"),
        }
        // 多一个值
        let long = SAMPLE.replace(
            "1.0 2.0 3.0 90.0 0.0 0.0 0.0 90.0 0.0",
            "1.0 2.0 3.0 90.0 0.0 0.0 0.0 90.0 0.0 5.0",
        );
        assert!(parse_str(&long).is_err());
    }

    #[test]
    fn test_missing_rows_is_fatal() {
        let cut = SAMPLE.replace("1.0 2.0 3.0 90.0 0.0 0.0 0.0 90.0 0.0\n", "");
        assert!(parse_str(&cut).is_err());
    }

    #[test]
    fn test_channel_application_order() {
        let doc = parse_str(SAMPLE).unwrap();
        let motion = doc.to_motion();
        assert_eq!(motion.bone_tracks.len(), 2);

        let track = &motion.bone_tracks["Hips"];
        let (t, r) = {
            let kf = &track.keyframes[&1];
            (kf.translation, kf.rotation)
        };
        assert!((t - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
        // 第 1 帧 Hips 仅 Z 轴 90 度
        let expected = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        assert!(r.angle_between(expected) < 1e-4);

        // Chest 声明顺序是 Z X Y：X 轴 90 度落在中间
        let chest = &motion.bone_tracks["Chest"].keyframes[&1];
        let expected = Quat::from_rotation_x(std::f32::consts::FRAC_PI_2);
        assert!(chest.rotation.angle_between(expected) < 1e-4);
    }

    #[test]
    fn test_fps_from_frame_time() {
        let doc = parse_str(SAMPLE).unwrap();
        let motion = doc.to_motion();
        assert!((motion.fps - 30.0).abs() < 0.1);
    }

    #[test]
    fn test_unknown_channel_kind_rejected() {
        let bad = SAMPLE.replace("Yrotation", "Wrotation");
        assert!(parse_str(&bad).is_err());
    }
}
