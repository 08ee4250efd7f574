//! VPD 姿势解析器
//!
//! Shift-JIS 文本格式：魔法行、以分号结尾的属性行、`Bone<n>{...}`
//! 块，`//` 行注释随处可见。头部声明骨骼数，后面必须恰好跟这么多
//! 个骨骼块。Morph 块是 MikuMikuMoving 的扩展，存在即接受。

use std::fs;
use std::path::Path;

use glam::{Quat, Vec3};

use crate::parser::{repeat_text, TResult, TextCodec, TextCursor};
use crate::{MmdError, Result};

use super::keyframe::{BoneKeyframe, MorphKeyframe};
use super::motion::MotionDocument;

const MAGIC: &str = "Vocaloid Pose Data file";

/// VPD 姿势骨骼
#[derive(Clone, Debug, PartialEq)]
pub struct PoseBone {
    pub name: String,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// VPD 姿势 Morph
#[derive(Clone, Debug, PartialEq)]
pub struct PoseMorph {
    pub name: String,
    pub weight: f32,
}

/// 姿势文档：无层级的命名骨骼局部变换列表。
/// 层级在应用时按名称匹配到模型骨骼解析。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseDocument {
    pub model_name: String,
    pub bones: Vec<PoseBone>,
    pub morphs: Vec<PoseMorph>,
}

impl PoseDocument {
    /// 转为单帧动作文档（每根骨骼一个第 0 帧关键帧）
    pub fn to_motion(&self) -> MotionDocument {
        let mut doc = MotionDocument::new(self.model_name.clone(), super::vmd::VMD_FPS);
        for bone in &self.bones {
            doc.insert_bone_keyframe(
                &bone.name,
                BoneKeyframe::new(0, bone.translation, bone.rotation),
            );
        }
        for morph in &self.morphs {
            doc.insert_morph_keyframe(
                &morph.name,
                MorphKeyframe {
                    frame: 0,
                    weight: morph.weight,
                },
            );
        }
        doc
    }
}

/// 从文件加载 VPD
pub fn load<P: AsRef<Path>>(path: P) -> Result<PoseDocument> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// 解析 VPD 字节缓冲（Shift-JIS）
pub fn parse(bytes: &[u8]) -> Result<PoseDocument> {
    let text = TextCodec::ShiftJis.decode(bytes);
    parse_str(&text)
}

/// 解析已解码的 VPD 文本
pub fn parse_str(src: &str) -> Result<PoseDocument> {
    let (doc, _) = document(TextCursor::new(src)).map_err(MmdError::VpdParse)?;
    log::info!(
        "VPD 解析完成: {} ({} 骨骼, {} Morph)",
        doc.model_name,
        doc.bones.len(),
        doc.morphs.len()
    );
    Ok(doc)
}

fn document(cur: TextCursor) -> TResult<PoseDocument> {
    let ((), cur) = cur.skip_ws_comments().expect(MAGIC)?;

    // 親ファイル名行
    let cur = cur.skip_ws_comments();
    let (model_line, cur) = cur.until(';')?;
    let ((), cur) = cur.expect(";")?;
    let model_name = model_line.trim().to_string();

    // 声明的骨骼数
    let (bone_count, cur) = cur.skip_ws_comments().uint()?;
    let ((), cur) = cur.expect(";")?;

    let (bones, cur) = repeat_text(bone_block, bone_count as usize)(cur)?;

    // 可选 Morph 块
    let mut morphs = Vec::new();
    let mut cur = cur;
    loop {
        let probe = cur.skip_ws_comments();
        if probe.expect("Morph").is_err() {
            break;
        }
        let (morph, rest) = morph_block(probe)?;
        morphs.push(morph);
        cur = rest;
    }

    let cur = cur.skip_ws_comments();
    if !cur.at_eof() {
        return cur.fail("trailing content after pose data");
    }

    Ok((
        PoseDocument {
            model_name,
            bones,
            morphs,
        },
        cur,
    ))
}

/// `Bone<n>{名前 … trans; quat; }`
fn bone_block(cur: TextCursor) -> TResult<PoseBone> {
    let ((), cur) = cur.skip_ws_comments().expect("Bone")?;
    let (_index, cur) = cur.uint()?;
    let ((), cur) = cur.skip_ws().expect("{")?;
    let (name_line, cur) = cur.line()?;
    let name = name_line.trim().to_string();

    let (translation, cur) = vec3(cur)?;
    let ((), cur) = cur.skip_ws().expect(";")?;
    let (rotation, cur) = quat(cur)?;
    let ((), cur) = cur.skip_ws().expect(";")?;
    let ((), cur) = cur.skip_ws_comments().expect("}")?;

    Ok((
        PoseBone {
            name,
            translation,
            rotation,
        },
        cur,
    ))
}

fn morph_block(cur: TextCursor) -> TResult<PoseMorph> {
    let ((), cur) = cur.expect("Morph")?;
    let (_index, cur) = cur.uint()?;
    let ((), cur) = cur.skip_ws().expect("{")?;
    let (name_line, cur) = cur.line()?;
    let name = name_line.trim().to_string();
    let (weight, cur) = cur.skip_ws_comments().float()?;
    let ((), cur) = cur.skip_ws().expect(";")?;
    let ((), cur) = cur.skip_ws_comments().expect("}")?;
    Ok((PoseMorph { name, weight }, cur))
}

fn vec3(cur: TextCursor) -> TResult<Vec3> {
    let (x, cur) = cur.skip_ws_comments().float()?;
    let ((), cur) = cur.skip_ws().expect(",")?;
    let (y, cur) = cur.float()?;
    let ((), cur) = cur.skip_ws().expect(",")?;
    let (z, cur) = cur.float()?;
    Ok((Vec3::new(x, y, z), cur))
}

fn quat(cur: TextCursor) -> TResult<Quat> {
    let (x, cur) = cur.skip_ws_comments().float()?;
    let ((), cur) = cur.skip_ws().expect(",")?;
    let (y, cur) = cur.float()?;
    let ((), cur) = cur.skip_ws().expect(",")?;
    let (z, cur) = cur.float()?;
    let ((), cur) = cur.skip_ws().expect(",")?;
    let (w, cur) = cur.float()?;
    Ok((Quat::from_xyzw(x, y, z, w), cur))
}
