//! PMD 模型解析器
//!
//! 固定布局二进制格式。章节严格按序：头部 → 顶点 → 面索引 →
//! 材质 → 骨骼 → IK → Morph → 显示组 → 可选英文名块（单字节标志
//! 控制）→ 卡通贴图槽 → 刚体 → 关节。骨骼索引的 0xFFFF 哨兵在
//! 读取处立即解码为 `Option`。

use std::fs;
use std::path::Path;

use crate::parser::{literal, repeat, run_document, Cursor, PResult, TextCodec};
use crate::{MmdError, Result};

use super::document::{
    Bone, BoneTail, DisplayItem, DisplayPanel, IkConfig, IkLink, Joint, Material, ModelDocument,
    Morph, MorphOffsets, RigidBody, RigidMode, RigidShape, Toon, Vertex, VertexMorphOffset,
    VertexWeight,
};

const MAGIC: &[u8] = b"Pmd";
const VERSION: f32 = 1.0;
const CODEC: TextCodec = TextCodec::ShiftJis;

/// 从文件加载 PMD
pub fn load<P: AsRef<Path>>(path: P) -> Result<ModelDocument> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// 解析 PMD 字节缓冲
pub fn parse(bytes: &[u8]) -> Result<ModelDocument> {
    let doc = run_document(bytes, document).map_err(MmdError::PmdParse)?;
    doc.validate().map_err(MmdError::Validate)?;
    log::info!(
        "PMD 解析完成: {} ({} 顶点, {} 骨骼, {} Morph)",
        doc.name,
        doc.vertices.len(),
        doc.bones.len(),
        doc.morphs.len()
    );
    Ok(doc)
}

/// 0xFFFF 哨兵 → None
fn bone_ref(idx: u16) -> Option<u32> {
    if idx == 0xFFFF {
        None
    } else {
        Some(idx as u32)
    }
}

fn document(cur: Cursor) -> PResult<ModelDocument> {
    let ((), cur) = literal(MAGIC)(cur)?;
    let (version, cur) = cur.read_f32()?;
    if version != VERSION {
        return cur.fail(format!("unsupported PMD version {version}"));
    }
    let (name, cur) = cur.read_text(20, CODEC)?;
    let (comment, cur) = cur.read_text(256, CODEC)?;

    let (vertex_count, cur) = cur.read_u32()?;
    let (vertices, cur) = repeat(vertex, vertex_count as usize)(cur)?;

    let (index_count, cur) = cur.read_u32()?;
    let (indices, cur) = repeat(
        |c| {
            let (i, rest) = c.read_u16()?;
            Ok((i as u32, rest))
        },
        index_count as usize,
    )(cur)?;

    let (material_count, cur) = cur.read_u32()?;
    let mut materials = Vec::with_capacity(material_count.min(1 << 16) as usize);
    let mut textures = Vec::new();
    let mut cur = cur;
    for _ in 0..material_count {
        let (mat, rest) = material(cur, &mut textures)?;
        materials.push(mat);
        cur = rest;
    }

    let (bone_count, cur) = cur.read_u16()?;
    let (mut bones, cur) = repeat(bone, bone_count as usize)(cur)?;

    let (ik_count, cur) = cur.read_u16()?;
    let (iks, cur) = repeat(ik_entry, ik_count as usize)(cur)?;
    // IK 条目回填到对应骨骼
    let mut cur2 = cur;
    for (ik_bone, config) in iks {
        match bones.get_mut(ik_bone as usize) {
            Some(b) => {
                b.is_ik = true;
                b.ik = Some(config);
            }
            None => return cur2.fail(format!("IK entry references bone {ik_bone} out of range")),
        }
    }

    let (morph_count, cur) = cur2.read_u16()?;
    let (mut morphs, cur) = repeat(morph, morph_count as usize)(cur)?;
    cur2 = cur;

    // Morph 显示列表（表情枠）
    let (morph_disp_count, cur) = cur2.read_u8()?;
    let (morph_disp, cur) = repeat(
        |c| {
            let (i, rest) = c.read_u16()?;
            Ok((DisplayItem::Morph(Some(i as u32)), rest))
        },
        morph_disp_count as usize,
    )(cur)?;

    // 骨骼组名（50 字节定长）
    let (group_count, cur) = cur.read_u8()?;
    let (mut group_names, cur) = repeat(|c| c.read_text(50, CODEC), group_count as usize)(cur)?;

    // 骨骼显示条目：u16 骨骼 + u8 组号
    let (bone_disp_count, cur) = cur.read_u32()?;
    let (bone_disp, cur) = repeat(
        |c| {
            let (b, rest) = c.read_u16()?;
            let (g, rest) = rest.read_u8()?;
            Ok(((b, g), rest))
        },
        bone_disp_count as usize,
    )(cur)?;

    // 可选英文名块：标志字节 == 1 才存在
    let (english_flag, cur) = cur.read_u8()?;
    let mut english_name = None;
    let mut english_comment = None;
    let mut group_english = Vec::new();
    cur2 = cur;
    if english_flag == 1 {
        let (en_name, cur) = cur2.read_text(20, CODEC)?;
        let (en_comment, cur) = cur.read_text(256, CODEC)?;
        let (bone_en, cur) = repeat(|c| c.read_text(20, CODEC), bones.len())(cur)?;
        // Morph 0 约定为 base，不在英文名表内
        let (morph_en, cur) =
            repeat(|c| c.read_text(20, CODEC), morphs.len().saturating_sub(1))(cur)?;
        let (group_en, cur) = repeat(|c| c.read_text(50, CODEC), group_names.len())(cur)?;
        english_name = Some(en_name);
        english_comment = Some(en_comment);
        for (b, en) in bones.iter_mut().zip(bone_en) {
            b.english_name = Some(en);
        }
        for (m, en) in morphs.iter_mut().skip(1).zip(morph_en) {
            m.english_name = Some(en);
        }
        group_english = group_en;
        cur2 = cur;
    }

    // 10 个固定卡通贴图槽位
    let (toon_textures, cur) = repeat(|c| c.read_text(100, CODEC), 10)(cur2)?;

    let (rigid_count, cur) = cur.read_u32()?;
    let (rigid_bodies, cur) = repeat(rigid_body, rigid_count as usize)(cur)?;

    let (joint_count, cur) = cur.read_u32()?;
    let (joints, cur) = repeat(joint, joint_count as usize)(cur)?;

    // 显示面板：表情枠 + 骨骼组
    let mut display_panels = Vec::new();
    if !morph_disp.is_empty() {
        display_panels.push(DisplayPanel {
            name: "表情".to_string(),
            english_name: None,
            special: true,
            items: morph_disp,
        });
    }
    for (gi, gname) in group_names.drain(..).enumerate() {
        let items = bone_disp
            .iter()
            .filter(|(_, g)| *g as usize == gi + 1)
            .map(|(b, _)| DisplayItem::Bone(Some(*b as u32)))
            .collect();
        display_panels.push(DisplayPanel {
            name: gname,
            english_name: group_english.get(gi).cloned(),
            special: false,
            items,
        });
    }

    Ok((
        ModelDocument {
            name,
            english_name,
            comment,
            english_comment,
            vertices,
            indices,
            textures,
            toon_textures,
            materials,
            bones,
            morphs,
            display_panels,
            rigid_bodies,
            joints,
        },
        cur,
    ))
}

fn vertex(cur: Cursor) -> PResult<Vertex> {
    let (position, cur) = cur.read_vec3()?;
    let (normal, cur) = cur.read_vec3()?;
    let (uv, cur) = cur.read_vec2()?;
    let (bone0, cur) = cur.read_u16()?;
    let (bone1, cur) = cur.read_u16()?;
    let (weight, cur) = cur.read_u8()?;
    let (edge_flag, cur) = cur.read_u8()?;
    Ok((
        Vertex {
            position,
            normal,
            uv,
            extra_uvs: Vec::new(),
            weight: VertexWeight::Bdef2 {
                bones: [bone_ref(bone0), bone_ref(bone1)],
                weight: weight as f32 / 100.0,
            },
            // edge_flag == 1 表示该顶点不描边
            edge_scale: if edge_flag == 1 { 0.0 } else { 1.0 },
        },
        cur,
    ))
}

fn material<'a>(cur: Cursor<'a>, textures: &mut Vec<String>) -> PResult<'a, Material> {
    let (diffuse_rgb, cur) = cur.read_vec3()?;
    let (alpha, cur) = cur.read_f32()?;
    let (specular_strength, cur) = cur.read_f32()?;
    let (specular, cur) = cur.read_vec3()?;
    let (ambient, cur) = cur.read_vec3()?;
    let (toon_id, cur) = cur.read_u8()?;
    let (edge_flag, cur) = cur.read_u8()?;
    let (index_count, cur) = cur.read_u32()?;
    let (texture_file, cur) = cur.read_text(20, CODEC)?;

    let texture = if texture_file.is_empty() {
        None
    } else {
        textures.push(texture_file);
        Some(textures.len() as u32 - 1)
    };

    Ok((
        Material {
            name: String::new(),
            english_name: None,
            diffuse: diffuse_rgb.extend(alpha),
            specular,
            specular_strength,
            ambient,
            draw_flags: edge_flag,
            edge_color: glam::Vec4::new(0.0, 0.0, 0.0, 1.0),
            edge_scale: 1.0,
            texture,
            environment: None,
            environment_mode: 0,
            toon: if toon_id == 0xFF {
                Toon::Texture(None)
            } else {
                Toon::Internal(toon_id)
            },
            memo: String::new(),
            index_count,
        },
        cur,
    ))
}

fn bone(cur: Cursor) -> PResult<Bone> {
    let (name, cur) = cur.read_text(20, CODEC)?;
    let (parent, cur) = cur.read_u16()?;
    let (tail, cur) = cur.read_u16()?;
    let (kind, cur) = cur.read_u8()?;
    let (_ik_parent, cur) = cur.read_u16()?;
    let (position, cur) = cur.read_vec3()?;

    let mut b = Bone::new(name);
    b.position = position;
    b.parent = bone_ref(parent);
    b.tail = BoneTail::Bone(bone_ref(tail));
    // PMD 骨骼类型：1 = 可移动，2 = IK，9 = 不可见连接
    b.is_movable = kind == 1;
    b.is_ik = kind == 2;
    b.is_visible = kind != 9;
    Ok((b, cur))
}

/// IK 条目：(IK 骨骼索引, 配置)。链长由前置 u8 决定
fn ik_entry(cur: Cursor) -> PResult<(u16, IkConfig)> {
    let (ik_bone, cur) = cur.read_u16()?;
    let (target, cur) = cur.read_u16()?;
    let (chain_len, cur) = cur.read_u8()?;
    let (iterations, cur) = cur.read_u16()?;
    let (limit, cur) = cur.read_f32()?;
    let (links, cur) = repeat(
        |c| {
            let (b, rest) = c.read_u16()?;
            Ok((
                IkLink {
                    bone: bone_ref(b),
                    limits: None,
                },
                rest,
            ))
        },
        chain_len as usize,
    )(cur)?;
    Ok((
        (
            ik_bone,
            IkConfig {
                target: bone_ref(target),
                iterations: iterations as u32,
                limit_angle: limit * std::f32::consts::PI,
                links,
            },
        ),
        cur,
    ))
}

fn morph(cur: Cursor) -> PResult<Morph> {
    let (name, cur) = cur.read_text(20, CODEC)?;
    let (offset_count, cur) = cur.read_u32()?;
    let (panel, cur) = cur.read_u8()?;
    let (offsets, cur) = repeat(
        |c| {
            let (vertex, rest) = c.read_u32()?;
            let (offset, rest) = rest.read_vec3()?;
            Ok((VertexMorphOffset { vertex, offset }, rest))
        },
        offset_count as usize,
    )(cur)?;
    Ok((
        Morph {
            name,
            english_name: None,
            panel,
            offsets: MorphOffsets::Vertex(offsets),
        },
        cur,
    ))
}

fn rigid_body(cur: Cursor) -> PResult<RigidBody> {
    let (name, cur) = cur.read_text(20, CODEC)?;
    let (bone, cur) = cur.read_u16()?;
    let (group, cur) = cur.read_u8()?;
    let (collision_mask, cur) = cur.read_u16()?;
    let (shape, cur) = cur.read_u8()?;
    let (size, cur) = cur.read_vec3()?;
    let (position, cur) = cur.read_vec3()?;
    let (rotation, cur) = cur.read_vec3()?;
    let (mass, cur) = cur.read_f32()?;
    let (linear_damping, cur) = cur.read_f32()?;
    let (angular_damping, cur) = cur.read_f32()?;
    let (restitution, cur) = cur.read_f32()?;
    let (friction, cur) = cur.read_f32()?;
    let (mode, cur) = cur.read_u8()?;

    let shape = match shape {
        0 => RigidShape::Sphere,
        1 => RigidShape::Box,
        2 => RigidShape::Capsule,
        other => return cur.fail(format!("unknown rigid body shape {other}")),
    };
    let mode = match mode {
        0 => RigidMode::Static,
        1 => RigidMode::Dynamic,
        2 => RigidMode::DynamicWithBone,
        other => return cur.fail(format!("unknown rigid body mode {other}")),
    };

    Ok((
        RigidBody {
            name,
            english_name: None,
            bone: bone_ref(bone),
            group,
            collision_mask,
            shape,
            size,
            position,
            rotation,
            mass,
            linear_damping,
            angular_damping,
            restitution,
            friction,
            mode,
        },
        cur,
    ))
}

fn joint(cur: Cursor) -> PResult<Joint> {
    let (name, cur) = cur.read_text(20, CODEC)?;
    let (rigid_a, cur) = cur.read_u32()?;
    let (rigid_b, cur) = cur.read_u32()?;
    let (position, cur) = cur.read_vec3()?;
    let (rotation, cur) = cur.read_vec3()?;
    let (linear_lower, cur) = cur.read_vec3()?;
    let (linear_upper, cur) = cur.read_vec3()?;
    let (angular_lower, cur) = cur.read_vec3()?;
    let (angular_upper, cur) = cur.read_vec3()?;
    let (linear_spring, cur) = cur.read_vec3()?;
    let (angular_spring, cur) = cur.read_vec3()?;

    let rigid = |i: u32| if i == u32::MAX { None } else { Some(i) };
    Ok((
        Joint {
            name,
            english_name: None,
            kind: 0,
            rigid_a: rigid(rigid_a),
            rigid_b: rigid(rigid_b),
            position,
            rotation,
            linear_lower,
            linear_upper,
            angular_lower,
            angular_upper,
            linear_spring,
            angular_spring,
        },
        cur,
    ))
}
