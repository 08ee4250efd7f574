//! VMD 动作解析器
//!
//! 30 字节签名 + 20 字节目标模型名，之后是计数前缀的骨骼帧与
//! Morph 帧数组。较新的文件在其后还有相机/光照/自阴影/IK 段，
//! 旧文件没有——这些尾部段存在才解析，缺失不算错误。

use std::fs;
use std::path::Path;

use crate::parser::{repeat, run_document, Cursor, PResult, TextCodec};
use crate::{MmdError, Result};

use super::keyframe::{BoneKeyframe, CameraKeyframe, IkKeyframe, MorphKeyframe};
use super::motion::MotionDocument;

const SIGNATURE_V2: &[u8] = b"Vocaloid Motion Data 0002";
const SIGNATURE_V1: &[u8] = b"Vocaloid Motion Data file";
const CODEC: TextCodec = TextCodec::ShiftJis;

/// VMD 固定帧率
pub const VMD_FPS: f32 = 30.0;

/// 从文件加载 VMD
pub fn load<P: AsRef<Path>>(path: P) -> Result<MotionDocument> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// 解析 VMD 字节缓冲
pub fn parse(bytes: &[u8]) -> Result<MotionDocument> {
    let doc = run_document(bytes, document).map_err(MmdError::VmdParse)?;
    log::info!(
        "VMD 解析完成: {} ({} 骨骼轨道, {} Morph 轨道, {} 帧)",
        doc.name,
        doc.bone_tracks.len(),
        doc.morph_tracks.len(),
        doc.duration()
    );
    Ok(doc)
}

fn document(cur: Cursor) -> PResult<MotionDocument> {
    let (header, cur) = cur.read_bytes(30)?;
    if &header[..25] != SIGNATURE_V2 && &header[..25] != SIGNATURE_V1 {
        return Err(crate::parser::ParseError::new(0, "invalid VMD signature"));
    }
    let (model_name, cur) = cur.read_text(20, CODEC)?;

    let mut doc = MotionDocument::new(model_name, VMD_FPS);

    let (bone_count, cur) = cur.read_u32()?;
    let (bone_frames, cur) = repeat(bone_frame, bone_count as usize)(cur)?;
    for (name, kf) in bone_frames {
        doc.insert_bone_keyframe(&name, kf);
    }

    let (morph_count, cur) = cur.read_u32()?;
    let (morph_frames, cur) = repeat(morph_frame, morph_count as usize)(cur)?;
    for (name, kf) in morph_frames {
        doc.insert_morph_keyframe(&name, kf);
    }

    // 可选尾部段：相机 → 光照 → 自阴影 → IK
    let mut cur = cur;
    if !cur.is_empty() {
        let (camera_count, rest) = cur.read_u32()?;
        let (camera_frames, rest) = repeat(camera_frame, camera_count as usize)(rest)?;
        for kf in camera_frames {
            doc.camera_track.insert(kf);
        }
        cur = rest;
    }
    if !cur.is_empty() {
        // 光照帧 28 字节，按数据跳过
        let (light_count, rest) = cur.read_u32()?;
        let (_, rest) = rest.read_bytes(light_count as usize * 28)?;
        cur = rest;
    }
    if !cur.is_empty() {
        // 自阴影帧 9 字节
        let (shadow_count, rest) = cur.read_u32()?;
        let (_, rest) = rest.read_bytes(shadow_count as usize * 9)?;
        cur = rest;
    }
    if !cur.is_empty() {
        let (ik_count, rest) = cur.read_u32()?;
        let mut rest = rest;
        for _ in 0..ik_count {
            let (entries, r) = ik_frame(rest)?;
            for (name, kf) in entries {
                doc.insert_ik_keyframe(&name, kf);
            }
            rest = r;
        }
        cur = rest;
    }

    Ok((doc, cur))
}

fn bone_frame(cur: Cursor) -> PResult<(String, BoneKeyframe)> {
    let (name, cur) = cur.read_text(15, CODEC)?;
    let (frame, cur) = cur.read_u32()?;
    let (translation, cur) = cur.read_vec3()?;
    let (rotation, cur) = cur.read_quat()?;
    let (interp, cur) = cur.read_bytes(64)?;
    let mut interpolation = [0u8; 64];
    interpolation.copy_from_slice(interp);
    Ok((
        (
            name,
            BoneKeyframe {
                frame,
                translation,
                rotation,
                interpolation,
            },
        ),
        cur,
    ))
}

fn morph_frame(cur: Cursor) -> PResult<(String, MorphKeyframe)> {
    let (name, cur) = cur.read_text(15, CODEC)?;
    let (frame, cur) = cur.read_u32()?;
    let (weight, cur) = cur.read_f32()?;
    Ok(((name, MorphKeyframe { frame, weight }), cur))
}

/// 相机帧：61 字节
fn camera_frame(cur: Cursor) -> PResult<CameraKeyframe> {
    let (frame, cur) = cur.read_u32()?;
    let (distance, cur) = cur.read_f32()?;
    let (look_at, cur) = cur.read_vec3()?;
    let (angle, cur) = cur.read_vec3()?;
    let (interp, cur) = cur.read_bytes(24)?;
    let (fov, cur) = cur.read_u32()?;
    let (perspective, cur) = cur.read_u8()?;
    let mut interpolation = [0u8; 24];
    interpolation.copy_from_slice(interp);
    Ok((
        CameraKeyframe {
            frame,
            distance,
            look_at,
            angle,
            fov: fov as f32,
            // 0 表示透视投影
            perspective: perspective == 0,
            interpolation,
        },
        cur,
    ))
}

/// IK 帧：帧号 + 显示标志 + 若干 (名称, 开关) 条目
fn ik_frame(cur: Cursor) -> PResult<Vec<(String, IkKeyframe)>> {
    let (frame, cur) = cur.read_u32()?;
    let (_show, cur) = cur.read_u8()?;
    let (info_count, cur) = cur.read_u32()?;
    let (entries, cur) = repeat(
        |c| {
            let (name, rest) = c.read_text(20, CODEC)?;
            let (enabled, rest) = rest.read_u8()?;
            Ok(((name, enabled != 0), rest))
        },
        info_count as usize,
    )(cur)?;
    Ok((
        entries
            .into_iter()
            .map(|(name, enabled)| (name, IkKeyframe { frame, enabled }))
            .collect(),
        cur,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn push_name(buf: &mut Vec<u8>, name: &str, width: usize) {
        let mut field = vec![0u8; width];
        field[..name.len()].copy_from_slice(name.as_bytes());
        buf.extend_from_slice(&field);
    }

    fn minimal_vmd(bone_frames: &[(&str, u32)], morph_frames: &[(&str, u32, f32)]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_name(&mut buf, "Vocaloid Motion Data 0002", 30);
        push_name(&mut buf, "TestModel", 20);
        buf.extend_from_slice(&(bone_frames.len() as u32).to_le_bytes());
        for (name, frame) in bone_frames {
            push_name(&mut buf, name, 15);
            buf.extend_from_slice(&frame.to_le_bytes());
            for v in [0.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0] {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            buf.extend_from_slice(&[0u8; 64]);
        }
        buf.extend_from_slice(&(morph_frames.len() as u32).to_le_bytes());
        for (name, frame, weight) in morph_frames {
            push_name(&mut buf, name, 15);
            buf.extend_from_slice(&frame.to_le_bytes());
            buf.extend_from_slice(&weight.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_single_bone_frame() {
        let doc = parse(&minimal_vmd(&[("center", 0)], &[])).unwrap();
        assert_eq!(doc.name, "TestModel");
        assert_eq!(doc.bone_tracks.len(), 1);
        let track = &doc.bone_tracks["center"];
        assert_eq!(track.len(), 1);
        let (t, r) = track.sample(0.0);
        assert_eq!(t, Vec3::ZERO);
        assert_eq!(r, Quat::IDENTITY);
    }

    #[test]
    fn test_old_files_without_camera_section() {
        // 没有相机/光照/IK 段也能解析
        let doc = parse(&minimal_vmd(&[], &[("笑い", 3, 0.5)])).unwrap();
        assert!(doc.camera_track.is_empty());
        assert_eq!(doc.morph_tracks.len(), 1);
    }

    #[test]
    fn test_bad_signature() {
        let mut buf = minimal_vmd(&[], &[]);
        buf[0] = b'X';
        match parse(&buf) {
            Err(MmdError::VmdParse(e)) => assert_eq!(e.offset, 0),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_bone_frame() {
        let mut buf = minimal_vmd(&[("center", 0)], &[]);
        buf.truncate(buf.len() - 70);
        assert!(parse(&buf).is_err());
    }

    #[test]
    fn test_interpolation_bytes_preserved() {
        let mut buf = minimal_vmd(&[("center", 0)], &[]);
        // 骨骼帧的插值区从名称(15)+帧号(4)+位移(12)+旋转(16)之后开始
        let interp_start = 30 + 20 + 4 + 15 + 4 + 12 + 16;
        buf[interp_start] = 0x14;
        buf[interp_start + 1] = 0x6b;
        let doc = parse(&buf).unwrap();
        let kf = &doc.bone_tracks["center"].keyframes[&0];
        assert_eq!(kf.interpolation[0], 0x14);
        assert_eq!(kf.interpolation[1], 0x6b);
    }

    #[test]
    fn test_trailing_camera_section() {
        let mut buf = minimal_vmd(&[("center", 0)], &[]);
        buf.extend_from_slice(&1u32.to_le_bytes()); // 1 个相机帧
        buf.extend_from_slice(&0u32.to_le_bytes()); // frame
        buf.extend_from_slice(&(-10.0f32).to_le_bytes()); // distance
        for v in [0.0f32; 6] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&[0u8; 24]);
        buf.extend_from_slice(&30u32.to_le_bytes()); // fov
        buf.push(0); // perspective
        let doc = parse(&buf).unwrap();
        assert!(!doc.camera_track.is_empty());
        let s = doc.camera_track.sample(0.0);
        assert!((s.distance + 10.0).abs() < 1e-6);
        assert!(s.perspective);
    }
}
