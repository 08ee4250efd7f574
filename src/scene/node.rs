//! 场景节点

use glam::{Mat4, Quat, Vec3};

/// 场景树节点。子节点由场景的节点表独占持有（按索引），
/// `parent` 是仅供遍历的非拥有回引。
#[derive(Clone, Debug)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,

    /// 相对父节点的静态偏移（绑定姿势）
    pub offset: Vec3,
    /// 当前关键帧平移
    pub animation_translate: Vec3,
    /// 当前关键帧旋转
    pub animation_rotate: Quat,
    /// 最近一次传播得到的世界变换
    pub world_transform: Mat4,
    pub selected: bool,
}

impl SceneNode {
    pub fn new(name: String, offset: Vec3) -> Self {
        Self {
            name,
            parent: None,
            children: Vec::new(),
            offset,
            animation_translate: Vec3::ZERO,
            animation_rotate: Quat::IDENTITY,
            world_transform: Mat4::IDENTITY,
            selected: false,
        }
    }

    /// 局部变换 = 关键帧旋转 + (静态偏移 + 关键帧平移)
    pub fn local_transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(
            self.animation_rotate,
            self.offset + self.animation_translate,
        )
    }

    /// 清除关键帧状态
    pub fn reset_animation(&mut self) {
        self.animation_translate = Vec3::ZERO;
        self.animation_rotate = Quat::IDENTITY;
    }
}
