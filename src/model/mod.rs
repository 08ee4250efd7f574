//! 模型文档与格式解析器

mod document;
pub mod pmd;
pub mod pmx;

pub use document::{
    Bone, BoneAppend, BoneMorphOffset, BoneTail, DisplayItem, DisplayPanel, GroupMorphOffset,
    IkConfig, IkLink, ImpulseMorphOffset, Joint, LocalAxis, Material, MaterialMorphOffset,
    ModelDocument, Morph, MorphOffsets, RigidBody, RigidMode, RigidShape, Toon, UvMorphOffset,
    Vertex, VertexMorphOffset, VertexWeight,
};

use std::path::Path;

use crate::{MmdError, Result};

/// 模型格式（由调用方按扩展名分派）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFormat {
    Pmd,
    Pmx,
}

/// 解析模型字节缓冲
pub fn parse_model(bytes: &[u8], format: ModelFormat) -> Result<ModelDocument> {
    match format {
        ModelFormat::Pmd => pmd::parse(bytes),
        ModelFormat::Pmx => pmx::parse(bytes),
    }
}

/// 按扩展名加载模型文件
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<ModelDocument> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pmd" => pmd::load(path),
        "pmx" => pmx::load(path),
        other => Err(MmdError::UnsupportedFormat(format!(
            "unknown model extension {other:?}"
        ))),
    }
}
