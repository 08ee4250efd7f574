//! 动画关键帧

use glam::{Quat, Vec3};

/// 骨骼关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct BoneKeyframe {
    pub frame: u32,
    pub translation: Vec3,
    pub rotation: Quat,
    /// VMD 64 字节插值曲线原始数据。仅保留结构，不解释语义；
    /// 求值统一采用线性插值
    pub interpolation: [u8; 64],
}

impl BoneKeyframe {
    pub fn new(frame: u32, translation: Vec3, rotation: Quat) -> Self {
        Self {
            frame,
            translation,
            rotation,
            interpolation: [0; 64],
        }
    }
}

/// Morph 关键帧
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MorphKeyframe {
    pub frame: u32,
    pub weight: f32,
}

/// IK 开关关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct IkKeyframe {
    pub frame: u32,
    pub enabled: bool,
}

/// 相机关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct CameraKeyframe {
    pub frame: u32,
    pub distance: f32,
    pub look_at: Vec3,
    /// 欧拉角（弧度）
    pub angle: Vec3,
    pub fov: f32,
    pub perspective: bool,
    /// 24 字节插值数据，与骨骼插值一样按原始字节保留
    pub interpolation: [u8; 24],
}
