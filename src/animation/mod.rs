//! 动作/姿势文档与格式解析器

mod keyframe;
mod motion;

pub mod bvh;
pub mod vmd;
pub mod vpd;

pub use bvh::{BvhDocument, BvhNode, Channel};
pub use keyframe::{BoneKeyframe, CameraKeyframe, IkKeyframe, MorphKeyframe};
pub use motion::{BoneTrack, CameraSample, CameraTrack, IkTrack, MorphTrack, MotionDocument};
pub use vpd::{PoseBone, PoseDocument, PoseMorph};

use std::path::Path;

use crate::{MmdError, Result};

/// 动作格式（由调用方按扩展名分派）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionFormat {
    Vmd,
    Vpd,
    Bvh,
}

/// 解析动作字节缓冲，统一产出 [`MotionDocument`]。
/// VPD 姿势转为单帧动作；BVH 按声明顺序做通道应用。
pub fn parse_motion(bytes: &[u8], format: MotionFormat) -> Result<MotionDocument> {
    match format {
        MotionFormat::Vmd => vmd::parse(bytes),
        MotionFormat::Vpd => Ok(vpd::parse(bytes)?.to_motion()),
        MotionFormat::Bvh => Ok(bvh::parse(bytes)?.to_motion()),
    }
}

/// 按扩展名加载动作文件
pub fn load_motion<P: AsRef<Path>>(path: P) -> Result<MotionDocument> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let bytes = std::fs::read(path)?;
    match ext.as_str() {
        "vmd" => parse_motion(&bytes, MotionFormat::Vmd),
        "vpd" => parse_motion(&bytes, MotionFormat::Vpd),
        "bvh" => parse_motion(&bytes, MotionFormat::Bvh),
        other => Err(MmdError::UnsupportedFormat(format!(
            "unknown motion extension {other:?}"
        ))),
    }
}
