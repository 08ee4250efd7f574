//! MMD 查看器核心
//!
//! 提供：
//! - PMD/PMX 模型与 VMD/VPD/BVH 动作文件解析（解析器组合子实现）
//! - 场景图、关键帧曲线求值与顶点蒙皮
//! - 后端无关的渲染资源/命令层与逐帧重放循环
//!
//! 窗口、相机交互、对话框等桌面外壳不在此 crate 内——外壳传入
//! 文件路径/字节，取回文档、场景姿势或渲染帧。

pub mod animation;
pub mod model;
pub mod parser;
pub mod render;
pub mod scene;
pub mod skinning;

pub use animation::{load_motion, parse_motion, MotionDocument, MotionFormat, PoseDocument};
pub use model::{load_model, parse_model, ModelDocument, ModelFormat};
pub use render::{RenderError, Renderer};
pub use scene::{ImportOptions, MotionHandle, NodeHandle, Pose, Scene, SceneEvent};

use parser::ParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MmdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PMD parse error: {0}")]
    PmdParse(ParseError),

    #[error("PMX parse error: {0}")]
    PmxParse(ParseError),

    #[error("VMD parse error: {0}")]
    VmdParse(ParseError),

    #[error("VPD parse error: {0}")]
    VpdParse(ParseError),

    #[error("BVH parse error: {0}")]
    BvhParse(ParseError),

    #[error("model validation error: {0}")]
    Validate(String),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("scene error: {0}")]
    Scene(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
