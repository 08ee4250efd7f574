//! 顶点蒙皮计算

mod skinning;

pub use skinning::compute_skinning;

use glam::{Mat4, Vec3};

use crate::model::VertexWeight;

/// 蒙皮输入数据
pub struct SkinningInput<'a> {
    /// 原始顶点位置（Morph 偏移已套用）
    pub positions: &'a [Vec3],
    /// 原始顶点法线
    pub normals: &'a [Vec3],
    /// 顶点权重
    pub weights: &'a [VertexWeight],
    /// 骨骼蒙皮矩阵（全局变换 × 逆绑定矩阵）
    pub bone_matrices: &'a [Mat4],
}

/// 蒙皮输出数据
pub struct SkinningOutput {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}
