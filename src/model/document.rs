//! 模型文档数据结构
//!
//! PMD / PMX 解析器共同填充的目标结构。数组间的交叉引用一律使用
//! 索引；文件里的哨兵值（-1 / 0xFF / 0xFFFF）在读取时就解码为
//! `Option`，不允许泄漏到下游。

use glam::{Quat, Vec2, Vec3, Vec4};

/// 顶点骨骼权重（蒙皮变形方式）
#[derive(Clone, Debug, PartialEq)]
pub enum VertexWeight {
    Bdef1 {
        bone: Option<u32>,
    },
    Bdef2 {
        bones: [Option<u32>; 2],
        weight: f32,
    },
    Bdef4 {
        bones: [Option<u32>; 4],
        weights: [f32; 4],
    },
    /// SDEF 附带球面修正向量；蒙皮阶段按 BDEF2 等价处理
    Sdef {
        bones: [Option<u32>; 2],
        weight: f32,
        c: Vec3,
        r0: Vec3,
        r1: Vec3,
    },
    Qdef {
        bones: [Option<u32>; 4],
        weights: [f32; 4],
    },
}

impl Default for VertexWeight {
    fn default() -> Self {
        VertexWeight::Bdef1 { bone: None }
    }
}

/// 顶点
#[derive(Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    /// PMX 附加 UV（0–4 通道，由头部标志决定）
    pub extra_uvs: Vec<Vec4>,
    pub weight: VertexWeight,
    pub edge_scale: f32,
}

/// 卡通贴图引用
#[derive(Clone, Debug, PartialEq)]
pub enum Toon {
    /// 引用纹理表
    Texture(Option<u32>),
    /// 引用共享卡通贴图槽位
    Internal(u8),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub english_name: Option<String>,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_strength: f32,
    pub ambient: Vec3,
    pub draw_flags: u8,
    pub edge_color: Vec4,
    pub edge_scale: f32,
    pub texture: Option<u32>,
    pub environment: Option<u32>,
    pub environment_mode: u8,
    pub toon: Toon,
    pub memo: String,
    /// 此材质覆盖的索引数量（子网格大小）
    pub index_count: u32,
}

/// 骨骼尾部：坐标偏移或指向另一根骨骼
#[derive(Clone, Debug, PartialEq)]
pub enum BoneTail {
    Offset(Vec3),
    Bone(Option<u32>),
}

/// 附加变换（旋转/平移继承）
#[derive(Clone, Debug, PartialEq)]
pub struct BoneAppend {
    pub parent: Option<u32>,
    pub rate: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalAxis {
    pub x: Vec3,
    pub z: Vec3,
}

/// IK 链接
#[derive(Clone, Debug, PartialEq)]
pub struct IkLink {
    pub bone: Option<u32>,
    /// 角度限制（下限，上限），按链接可选
    pub limits: Option<(Vec3, Vec3)>,
}

/// IK 配置
#[derive(Clone, Debug, PartialEq)]
pub struct IkConfig {
    pub target: Option<u32>,
    pub iterations: u32,
    pub limit_angle: f32,
    pub links: Vec<IkLink>,
}

/// 骨骼
#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub name: String,
    pub english_name: Option<String>,
    pub position: Vec3,
    pub parent: Option<u32>,
    pub transform_level: i32,

    pub is_rotatable: bool,
    pub is_movable: bool,
    pub is_visible: bool,
    pub is_ik: bool,
    pub is_append_rotate: bool,
    pub is_append_translate: bool,
    pub is_append_local: bool,
    pub deform_after_physics: bool,

    pub tail: BoneTail,
    pub append: Option<BoneAppend>,
    pub fixed_axis: Option<Vec3>,
    pub local_axis: Option<LocalAxis>,
    pub external_parent_key: Option<i32>,
    pub ik: Option<IkConfig>,
}

impl Bone {
    pub fn new(name: String) -> Self {
        Self {
            name,
            english_name: None,
            position: Vec3::ZERO,
            parent: None,
            transform_level: 0,
            is_rotatable: true,
            is_movable: false,
            is_visible: true,
            is_ik: false,
            is_append_rotate: false,
            is_append_translate: false,
            is_append_local: false,
            deform_after_physics: false,
            tail: BoneTail::Offset(Vec3::ZERO),
            append: None,
            fixed_axis: None,
            local_axis: None,
            external_parent_key: None,
            ik: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupMorphOffset {
    pub morph: Option<u32>,
    pub rate: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VertexMorphOffset {
    pub vertex: u32,
    pub offset: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoneMorphOffset {
    pub bone: Option<u32>,
    pub translation: Vec3,
    pub rotation: Quat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UvMorphOffset {
    pub vertex: u32,
    pub offset: Vec4,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialMorphOffset {
    pub material: Option<u32>,
    pub operation: u8,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_strength: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_scale: f32,
    pub texture_tint: Vec4,
    pub environment_tint: Vec4,
    pub toon_tint: Vec4,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImpulseMorphOffset {
    pub rigid_body: Option<u32>,
    pub local: bool,
    pub velocity: Vec3,
    pub torque: Vec3,
}

/// Morph 偏移：类型字节决定恰好填充哪一种形态
#[derive(Clone, Debug, PartialEq)]
pub enum MorphOffsets {
    Group(Vec<GroupMorphOffset>),
    Vertex(Vec<VertexMorphOffset>),
    Bone(Vec<BoneMorphOffset>),
    /// `channel` 0 为主 UV，1–4 为附加 UV
    Uv {
        channel: u8,
        offsets: Vec<UvMorphOffset>,
    },
    Material(Vec<MaterialMorphOffset>),
    Flip(Vec<GroupMorphOffset>),
    Impulse(Vec<ImpulseMorphOffset>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Morph {
    pub name: String,
    pub english_name: Option<String>,
    pub panel: u8,
    pub offsets: MorphOffsets,
}

/// 显示面板项
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayItem {
    Bone(Option<u32>),
    Morph(Option<u32>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisplayPanel {
    pub name: String,
    pub english_name: Option<String>,
    pub special: bool,
    pub items: Vec<DisplayItem>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RigidShape {
    Sphere,
    Box,
    Capsule,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RigidMode {
    Static,
    Dynamic,
    DynamicWithBone,
}

/// 刚体（仅作为数据保留，不做模拟）
#[derive(Clone, Debug, PartialEq)]
pub struct RigidBody {
    pub name: String,
    pub english_name: Option<String>,
    pub bone: Option<u32>,
    pub group: u8,
    pub collision_mask: u16,
    pub shape: RigidShape,
    pub size: Vec3,
    pub position: Vec3,
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: RigidMode,
}

/// 关节（仅作为数据保留，不做模拟）
#[derive(Clone, Debug, PartialEq)]
pub struct Joint {
    pub name: String,
    pub english_name: Option<String>,
    pub kind: u8,
    pub rigid_a: Option<u32>,
    pub rigid_b: Option<u32>,
    pub position: Vec3,
    pub rotation: Vec3,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub linear_spring: Vec3,
    pub angular_spring: Vec3,
}

/// 模型文档：解析器输出的不可变内存模型
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelDocument {
    pub name: String,
    pub english_name: Option<String>,
    pub comment: String,
    pub english_comment: Option<String>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub textures: Vec<String>,
    pub toon_textures: Vec<String>,
    pub materials: Vec<Material>,
    pub bones: Vec<Bone>,
    pub morphs: Vec<Morph>,
    pub display_panels: Vec<DisplayPanel>,
    pub rigid_bodies: Vec<RigidBody>,
    pub joints: Vec<Joint>,
}

impl ModelDocument {
    /// 加载时校验：所有非空索引必须落在目标数组内
    pub fn validate(&self) -> Result<(), String> {
        let bone_len = self.bones.len();
        let check_bone = |what: &str, idx: Option<u32>| -> Result<(), String> {
            match idx {
                Some(i) if i as usize >= bone_len => {
                    Err(format!("{what}: bone index {i} out of range ({bone_len} bones)"))
                }
                _ => Ok(()),
            }
        };

        for (i, v) in self.vertices.iter().enumerate() {
            let bones: &[Option<u32>] = match &v.weight {
                VertexWeight::Bdef1 { bone } => std::slice::from_ref(bone),
                VertexWeight::Bdef2 { bones, .. } | VertexWeight::Sdef { bones, .. } => bones,
                VertexWeight::Bdef4 { bones, .. } | VertexWeight::Qdef { bones, .. } => bones,
            };
            for b in bones {
                check_bone(&format!("vertex {i}"), *b)?;
            }
        }

        for (i, &idx) in self.indices.iter().enumerate() {
            if idx as usize >= self.vertices.len() {
                return Err(format!(
                    "face index {i}: vertex {idx} out of range ({} vertices)",
                    self.vertices.len()
                ));
            }
        }

        for (i, m) in self.materials.iter().enumerate() {
            for tex in [m.texture, m.environment] {
                if let Some(t) = tex {
                    if t as usize >= self.textures.len() {
                        return Err(format!(
                            "material {i}: texture index {t} out of range ({} textures)",
                            self.textures.len()
                        ));
                    }
                }
            }
            if let Toon::Texture(Some(t)) = m.toon {
                if t as usize >= self.textures.len() {
                    return Err(format!("material {i}: toon texture index {t} out of range"));
                }
            }
        }

        for (i, b) in self.bones.iter().enumerate() {
            check_bone(&format!("bone {i} parent"), b.parent)?;
            if let BoneTail::Bone(t) = b.tail {
                check_bone(&format!("bone {i} tail"), t)?;
            }
            if let Some(ref a) = b.append {
                check_bone(&format!("bone {i} append"), a.parent)?;
            }
            if let Some(ref ik) = b.ik {
                check_bone(&format!("bone {i} ik target"), ik.target)?;
                for link in &ik.links {
                    check_bone(&format!("bone {i} ik link"), link.bone)?;
                }
            }
        }

        for (i, m) in self.morphs.iter().enumerate() {
            match &m.offsets {
                MorphOffsets::Group(offsets) | MorphOffsets::Flip(offsets) => {
                    for o in offsets {
                        if let Some(t) = o.morph {
                            if t as usize >= self.morphs.len() {
                                return Err(format!("morph {i}: group target {t} out of range"));
                            }
                        }
                    }
                }
                MorphOffsets::Vertex(offsets) => {
                    for o in offsets {
                        if o.vertex as usize >= self.vertices.len() {
                            return Err(format!("morph {i}: vertex {} out of range", o.vertex));
                        }
                    }
                }
                MorphOffsets::Uv { offsets, .. } => {
                    for o in offsets {
                        if o.vertex as usize >= self.vertices.len() {
                            return Err(format!("morph {i}: vertex {} out of range", o.vertex));
                        }
                    }
                }
                MorphOffsets::Bone(offsets) => {
                    for o in offsets {
                        check_bone(&format!("morph {i}"), o.bone)?;
                    }
                }
                MorphOffsets::Material(offsets) => {
                    for o in offsets {
                        if let Some(t) = o.material {
                            if t as usize >= self.materials.len() {
                                return Err(format!("morph {i}: material {t} out of range"));
                            }
                        }
                    }
                }
                MorphOffsets::Impulse(offsets) => {
                    for o in offsets {
                        if let Some(t) = o.rigid_body {
                            if t as usize >= self.rigid_bodies.len() {
                                return Err(format!("morph {i}: rigid body {t} out of range"));
                            }
                        }
                    }
                }
            }
        }

        for (i, rb) in self.rigid_bodies.iter().enumerate() {
            check_bone(&format!("rigid body {i}"), rb.bone)?;
        }

        for (i, j) in self.joints.iter().enumerate() {
            for r in [j.rigid_a, j.rigid_b] {
                if let Some(t) = r {
                    if t as usize >= self.rigid_bodies.len() {
                        return Err(format!("joint {i}: rigid body {t} out of range"));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_catches_bad_bone_ref() {
        let mut doc = ModelDocument::default();
        doc.bones.push(Bone::new("root".to_string()));
        doc.vertices.push(Vertex {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            uv: Vec2::ZERO,
            extra_uvs: vec![],
            weight: VertexWeight::Bdef1 { bone: Some(5) },
            edge_scale: 1.0,
        });
        assert!(doc.validate().is_err());

        doc.vertices[0].weight = VertexWeight::Bdef1 { bone: Some(0) };
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_validate_none_is_always_ok() {
        let mut doc = ModelDocument::default();
        doc.bones.push(Bone::new("root".to_string()));
        doc.bones[0].parent = None;
        assert!(doc.validate().is_ok());
    }
}
