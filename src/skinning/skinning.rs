//! 线性混合蒙皮
//!
//! SDEF 记录按 BDEF2 等价的双骨线性混合处理——球面修正向量在
//! 解析时保留，蒙皮阶段不使用，与参考实现的近似保持一致。

use glam::{Mat4, Vec3};

use crate::model::VertexWeight;

use super::{SkinningInput, SkinningOutput};

/// 计算整个顶点流的蒙皮
pub fn compute_skinning(input: &SkinningInput) -> SkinningOutput {
    let vertex_count = input.positions.len();
    let mut positions = Vec::with_capacity(vertex_count);
    let mut normals = Vec::with_capacity(vertex_count);

    for i in 0..vertex_count {
        let (pos, norm) = compute_single_vertex(
            input.positions[i],
            input.normals[i],
            &input.weights[i],
            input.bone_matrices,
        );
        positions.push(pos);
        normals.push(norm);
    }

    SkinningOutput { positions, normals }
}

fn compute_single_vertex(
    position: Vec3,
    normal: Vec3,
    weight: &VertexWeight,
    matrices: &[Mat4],
) -> (Vec3, Vec3) {
    match weight {
        VertexWeight::Bdef1 { bone } => {
            let m = get_matrix(matrices, *bone);
            (
                m.transform_point3(position),
                m.transform_vector3(normal).normalize_or_zero(),
            )
        }
        VertexWeight::Bdef2 { bones, weight } | VertexWeight::Sdef { bones, weight, .. } => {
            let m0 = get_matrix(matrices, bones[0]);
            let m1 = get_matrix(matrices, bones[1]);
            let w0 = *weight;
            let w1 = 1.0 - w0;
            let pos = m0.transform_point3(position) * w0 + m1.transform_point3(position) * w1;
            let norm = (m0.transform_vector3(normal) * w0 + m1.transform_vector3(normal) * w1)
                .normalize_or_zero();
            (pos, norm)
        }
        VertexWeight::Bdef4 { bones, weights } | VertexWeight::Qdef { bones, weights } => {
            let mut pos = Vec3::ZERO;
            let mut norm = Vec3::ZERO;
            for i in 0..4 {
                let m = get_matrix(matrices, bones[i]);
                let w = weights[i];
                pos += m.transform_point3(position) * w;
                norm += m.transform_vector3(normal) * w;
            }
            (pos, norm.normalize_or_zero())
        }
    }
}

fn get_matrix(matrices: &[Mat4], index: Option<u32>) -> Mat4 {
    index
        .and_then(|i| matrices.get(i as usize).copied())
        .unwrap_or(Mat4::IDENTITY)
}
