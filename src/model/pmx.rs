//! PMX 模型解析器
//!
//! PMX 是自描述格式：头部 8 个标志字节选定文本编码、附加 UV 通道数
//! 和四类索引的字节宽度。因此采用两段式解析——先读头部，再由头部
//! 构造 [`PmxContext`]，它暴露按本文档特化的索引子解析器
//! （宽度与哨兵值逐文档选定，而不是逐类型写死）。

use std::fs;
use std::path::Path;

use crate::parser::{literal, run_document, Cursor, PResult, TextCodec};
use crate::{MmdError, Result};

use super::document::{
    Bone, BoneAppend, BoneMorphOffset, BoneTail, DisplayItem, DisplayPanel, GroupMorphOffset,
    IkConfig, IkLink, ImpulseMorphOffset, Joint, LocalAxis, Material, MaterialMorphOffset,
    ModelDocument, Morph, MorphOffsets, RigidBody, RigidMode, RigidShape, Toon, UvMorphOffset,
    Vertex, VertexMorphOffset, VertexWeight,
};

const MAGIC: &[u8] = b"PMX ";

// 骨骼标志位
const FLAG_TAIL_IS_BONE: u16 = 0x0001;
const FLAG_ROTATABLE: u16 = 0x0002;
const FLAG_MOVABLE: u16 = 0x0004;
const FLAG_VISIBLE: u16 = 0x0008;
const FLAG_IK: u16 = 0x0020;
const FLAG_APPEND_LOCAL: u16 = 0x0080;
const FLAG_APPEND_ROTATE: u16 = 0x0100;
const FLAG_APPEND_TRANSLATE: u16 = 0x0200;
const FLAG_FIXED_AXIS: u16 = 0x0400;
const FLAG_LOCAL_AXIS: u16 = 0x0800;
const FLAG_AFTER_PHYSICS: u16 = 0x1000;
const FLAG_EXTERNAL_PARENT: u16 = 0x2000;

/// 从文件加载 PMX
pub fn load<P: AsRef<Path>>(path: P) -> Result<ModelDocument> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// 解析 PMX 字节缓冲
pub fn parse(bytes: &[u8]) -> Result<ModelDocument> {
    let doc = run_document(bytes, |cur| {
        let (ctx, cur) = PmxContext::from_header(cur)?;
        ctx.document(cur)
    })
    .map_err(MmdError::PmxParse)?;
    doc.validate().map_err(MmdError::Validate)?;
    log::info!(
        "PMX 解析完成: {} ({} 顶点, {} 骨骼, {} Morph)",
        doc.name,
        doc.vertices.len(),
        doc.bones.len(),
        doc.morphs.len()
    );
    Ok(doc)
}

/// 头部解出的文档级解析上下文
#[derive(Clone, Copy, Debug)]
struct PmxContext {
    version: f32,
    codec: TextCodec,
    extra_uv: u8,
    vertex_width: u8,
    texture_width: u8,
    material_width: u8,
    bone_width: u8,
    morph_width: u8,
    rigid_width: u8,
}

impl PmxContext {
    fn from_header(cur: Cursor) -> PResult<Self> {
        let ((), cur) = literal(MAGIC)(cur)?;
        let (version, cur) = cur.read_f32()?;
        if version != 2.0 && version != 2.1 {
            return cur.fail(format!("unsupported PMX version {version}"));
        }
        let (global_count, cur) = cur.read_u8()?;
        if global_count != 8 {
            return cur.fail(format!("expected 8 header flags, found {global_count}"));
        }
        let (flags, cur) = cur.read_bytes(8)?;

        let codec = match flags[0] {
            0 => TextCodec::Utf16Le,
            1 => TextCodec::Utf8,
            other => return cur.fail(format!("unknown text encoding flag {other}")),
        };
        let extra_uv = flags[1];
        if extra_uv > 4 {
            return cur.fail(format!("extra UV count {extra_uv} out of range"));
        }
        let width = |b: u8| -> std::result::Result<u8, String> {
            match b {
                1 | 2 | 4 => Ok(b),
                other => Err(format!("invalid index width {other}")),
            }
        };
        let mut widths = [0u8; 6];
        for (i, w) in widths.iter_mut().enumerate() {
            *w = match width(flags[2 + i]) {
                Ok(w) => w,
                Err(msg) => return cur.fail(msg),
            };
        }

        Ok((
            Self {
                version,
                codec,
                extra_uv,
                vertex_width: widths[0],
                texture_width: widths[1],
                material_width: widths[2],
                bone_width: widths[3],
                morph_width: widths[4],
                rigid_width: widths[5],
            },
            cur,
        ))
    }

    fn text<'a>(&self, cur: Cursor<'a>) -> PResult<'a, String> {
        cur.read_var_text(self.codec)
    }

    /// 顶点索引：无符号，无哨兵
    fn vertex_index<'a>(&self, cur: Cursor<'a>) -> PResult<'a, u32> {
        match self.vertex_width {
            1 => {
                let (v, rest) = cur.read_u8()?;
                Ok((v as u32, rest))
            }
            2 => {
                let (v, rest) = cur.read_u16()?;
                Ok((v as u32, rest))
            }
            _ => {
                let (v, rest) = cur.read_i32()?;
                Ok((v as u32, rest))
            }
        }
    }

    /// 可空索引：哨兵值（0xFF / 0xFFFF / -1，按宽度）解码为 None
    fn nullable_index<'a>(&self, cur: Cursor<'a>, width: u8) -> PResult<'a, Option<u32>> {
        match width {
            1 => {
                let (v, rest) = cur.read_u8()?;
                Ok((if v == 0xFF { None } else { Some(v as u32) }, rest))
            }
            2 => {
                let (v, rest) = cur.read_u16()?;
                Ok((if v == 0xFFFF { None } else { Some(v as u32) }, rest))
            }
            _ => {
                let (v, rest) = cur.read_i32()?;
                Ok((if v == -1 { None } else { Some(v as u32) }, rest))
            }
        }
    }

    fn texture_index<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Option<u32>> {
        self.nullable_index(cur, self.texture_width)
    }

    fn material_index<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Option<u32>> {
        self.nullable_index(cur, self.material_width)
    }

    fn bone_index<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Option<u32>> {
        self.nullable_index(cur, self.bone_width)
    }

    fn morph_index<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Option<u32>> {
        self.nullable_index(cur, self.morph_width)
    }

    fn rigid_index<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Option<u32>> {
        self.nullable_index(cur, self.rigid_width)
    }

    fn counted<'a, T>(
        &self,
        cur: Cursor<'a>,
        mut item: impl FnMut(Cursor<'a>) -> PResult<'a, T>,
    ) -> PResult<'a, Vec<T>> {
        let (count, mut cur) = cur.read_i32()?;
        if count < 0 {
            return cur.fail(format!("negative element count {count}"));
        }
        let mut out = Vec::with_capacity((count as usize).min(1 << 16));
        for _ in 0..count {
            let (v, rest) = item(cur)?;
            out.push(v);
            cur = rest;
        }
        Ok((out, cur))
    }

    fn document<'a>(&self, cur: Cursor<'a>) -> PResult<'a, ModelDocument> {
        let (name, cur) = self.text(cur)?;
        let (english_name, cur) = self.text(cur)?;
        let (comment, cur) = self.text(cur)?;
        let (english_comment, cur) = self.text(cur)?;

        let (vertices, cur) = self.counted(cur, |c| self.vertex(c))?;
        let (indices, cur) = self.counted(cur, |c| self.vertex_index(c))?;
        let (textures, cur) = self.counted(cur, |c| self.text(c))?;
        let (materials, cur) = self.counted(cur, |c| self.material(c))?;
        let (bones, cur) = self.counted(cur, |c| self.bone(c))?;
        let (morphs, cur) = self.counted(cur, |c| self.morph(c))?;
        let (display_panels, cur) = self.counted(cur, |c| self.display_panel(c))?;
        let (rigid_bodies, cur) = self.counted(cur, |c| self.rigid_body(c))?;
        let (joints, cur) = self.counted(cur, |c| self.joint(c))?;

        // 2.1 文件可能带软体段；非空时按不支持的段报错
        let mut cur = cur;
        if self.version > 2.0 && !cur.is_empty() {
            let (soft_body_count, rest) = cur.read_i32()?;
            if soft_body_count != 0 {
                return rest.fail("soft body section is not supported");
            }
            cur = rest;
        }

        Ok((
            ModelDocument {
                name,
                english_name: Some(english_name),
                comment,
                english_comment: Some(english_comment),
                vertices,
                indices,
                textures,
                toon_textures: Vec::new(),
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

    fn vertex<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Vertex> {
        let (position, cur) = cur.read_vec3()?;
        let (normal, cur) = cur.read_vec3()?;
        let (uv, cur) = cur.read_vec2()?;
        let mut extra_uvs = Vec::with_capacity(self.extra_uv as usize);
        let mut cur = cur;
        for _ in 0..self.extra_uv {
            let (v, rest) = cur.read_vec4()?;
            extra_uvs.push(v);
            cur = rest;
        }
        let (weight, cur) = self.weight_deform(cur)?;
        let (edge_scale, cur) = cur.read_f32()?;
        Ok((
            Vertex {
                position,
                normal,
                uv,
                extra_uvs,
                weight,
                edge_scale,
            },
            cur,
        ))
    }

    /// 蒙皮变形：首字节选择 BDEF1/BDEF2/BDEF4/SDEF/QDEF
    fn weight_deform<'a>(&self, cur: Cursor<'a>) -> PResult<'a, VertexWeight> {
        let (kind, cur) = cur.read_u8()?;
        match kind {
            0 => {
                let (bone, cur) = self.bone_index(cur)?;
                Ok((VertexWeight::Bdef1 { bone }, cur))
            }
            1 => {
                let (b0, cur) = self.bone_index(cur)?;
                let (b1, cur) = self.bone_index(cur)?;
                let (weight, cur) = cur.read_f32()?;
                Ok((
                    VertexWeight::Bdef2 {
                        bones: [b0, b1],
                        weight,
                    },
                    cur,
                ))
            }
            2 | 4 => {
                let (b0, cur) = self.bone_index(cur)?;
                let (b1, cur) = self.bone_index(cur)?;
                let (b2, cur) = self.bone_index(cur)?;
                let (b3, cur) = self.bone_index(cur)?;
                let (w0, cur) = cur.read_f32()?;
                let (w1, cur) = cur.read_f32()?;
                let (w2, cur) = cur.read_f32()?;
                let (w3, cur) = cur.read_f32()?;
                let bones = [b0, b1, b2, b3];
                let weights = [w0, w1, w2, w3];
                if kind == 2 {
                    Ok((VertexWeight::Bdef4 { bones, weights }, cur))
                } else {
                    Ok((VertexWeight::Qdef { bones, weights }, cur))
                }
            }
            3 => {
                let (b0, cur) = self.bone_index(cur)?;
                let (b1, cur) = self.bone_index(cur)?;
                let (weight, cur) = cur.read_f32()?;
                let (c, cur) = cur.read_vec3()?;
                let (r0, cur) = cur.read_vec3()?;
                let (r1, cur) = cur.read_vec3()?;
                Ok((
                    VertexWeight::Sdef {
                        bones: [b0, b1],
                        weight,
                        c,
                        r0,
                        r1,
                    },
                    cur,
                ))
            }
            other => cur.fail(format!("unknown weight deform type {other}")),
        }
    }

    fn material<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Material> {
        let (name, cur) = self.text(cur)?;
        let (english_name, cur) = self.text(cur)?;
        let (diffuse, cur) = cur.read_vec4()?;
        let (specular, cur) = cur.read_vec3()?;
        let (specular_strength, cur) = cur.read_f32()?;
        let (ambient, cur) = cur.read_vec3()?;
        let (draw_flags, cur) = cur.read_u8()?;
        let (edge_color, cur) = cur.read_vec4()?;
        let (edge_scale, cur) = cur.read_f32()?;
        let (texture, cur) = self.texture_index(cur)?;
        let (environment, cur) = self.texture_index(cur)?;
        let (environment_mode, cur) = cur.read_u8()?;
        if environment_mode > 3 {
            return cur.fail(format!("unknown sphere mode {environment_mode}"));
        }
        let (toon_mode, cur) = cur.read_u8()?;
        let (toon, cur) = match toon_mode {
            0 => {
                let (idx, cur) = self.texture_index(cur)?;
                (Toon::Texture(idx), cur)
            }
            1 => {
                let (slot, cur) = cur.read_u8()?;
                (Toon::Internal(slot), cur)
            }
            other => return cur.fail(format!("unknown toon mode {other}")),
        };
        let (memo, cur) = self.text(cur)?;
        let (index_count, cur) = cur.read_i32()?;
        Ok((
            Material {
                name,
                english_name: Some(english_name),
                diffuse,
                specular,
                specular_strength,
                ambient,
                draw_flags,
                edge_color,
                edge_scale,
                texture,
                environment,
                environment_mode,
                toon,
                memo,
                index_count: index_count as u32,
            },
            cur,
        ))
    }

    /// 骨骼：16 位标志字依次控制六个可选尾部子结构
    fn bone<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Bone> {
        let (name, cur) = self.text(cur)?;
        let (english_name, cur) = self.text(cur)?;
        let (position, cur) = cur.read_vec3()?;
        let (parent, cur) = self.bone_index(cur)?;
        let (transform_level, cur) = cur.read_i32()?;
        let (flags, cur) = cur.read_u16()?;

        let mut b = Bone::new(name);
        b.english_name = Some(english_name);
        b.position = position;
        b.parent = parent;
        b.transform_level = transform_level;
        b.is_rotatable = flags & FLAG_ROTATABLE != 0;
        b.is_movable = flags & FLAG_MOVABLE != 0;
        b.is_visible = flags & FLAG_VISIBLE != 0;
        b.is_ik = flags & FLAG_IK != 0;
        b.is_append_local = flags & FLAG_APPEND_LOCAL != 0;
        b.is_append_rotate = flags & FLAG_APPEND_ROTATE != 0;
        b.is_append_translate = flags & FLAG_APPEND_TRANSLATE != 0;
        b.deform_after_physics = flags & FLAG_AFTER_PHYSICS != 0;

        let mut cur = cur;
        if flags & FLAG_TAIL_IS_BONE != 0 {
            let (tail, rest) = self.bone_index(cur)?;
            b.tail = BoneTail::Bone(tail);
            cur = rest;
        } else {
            let (offset, rest) = cur.read_vec3()?;
            b.tail = BoneTail::Offset(offset);
            cur = rest;
        }
        if flags & (FLAG_APPEND_ROTATE | FLAG_APPEND_TRANSLATE) != 0 {
            let (parent, rest) = self.bone_index(cur)?;
            let (rate, rest) = rest.read_f32()?;
            b.append = Some(BoneAppend { parent, rate });
            cur = rest;
        }
        if flags & FLAG_FIXED_AXIS != 0 {
            let (axis, rest) = cur.read_vec3()?;
            b.fixed_axis = Some(axis);
            cur = rest;
        }
        if flags & FLAG_LOCAL_AXIS != 0 {
            let (x, rest) = cur.read_vec3()?;
            let (z, rest) = rest.read_vec3()?;
            b.local_axis = Some(LocalAxis { x, z });
            cur = rest;
        }
        if flags & FLAG_EXTERNAL_PARENT != 0 {
            let (key, rest) = cur.read_i32()?;
            b.external_parent_key = Some(key);
            cur = rest;
        }
        if flags & FLAG_IK != 0 {
            let (target, rest) = self.bone_index(cur)?;
            let (iterations, rest) = rest.read_i32()?;
            let (limit_angle, rest) = rest.read_f32()?;
            let (links, rest) = self.counted(rest, |c| self.ik_link(c))?;
            b.ik = Some(IkConfig {
                target,
                iterations: iterations as u32,
                limit_angle,
                links,
            });
            cur = rest;
        }
        Ok((b, cur))
    }

    /// IK 链接：单字节布尔控制可选角度限制
    fn ik_link<'a>(&self, cur: Cursor<'a>) -> PResult<'a, IkLink> {
        let (bone, cur) = self.bone_index(cur)?;
        let (has_limits, cur) = cur.read_u8()?;
        if has_limits == 1 {
            let (lower, cur) = cur.read_vec3()?;
            let (upper, cur) = cur.read_vec3()?;
            Ok((
                IkLink {
                    bone,
                    limits: Some((lower, upper)),
                },
                cur,
            ))
        } else {
            Ok((IkLink { bone, limits: None }, cur))
        }
    }

    /// Morph：类型字节决定偏移数组的形态，其余形态不存在
    fn morph<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Morph> {
        let (name, cur) = self.text(cur)?;
        let (english_name, cur) = self.text(cur)?;
        let (panel, cur) = cur.read_u8()?;
        let (kind, cur) = cur.read_u8()?;
        let (offsets, cur) = match kind {
            0 | 9 => {
                let (offsets, cur) = self.counted(cur, |c| {
                    let (morph, rest) = self.morph_index(c)?;
                    let (rate, rest) = rest.read_f32()?;
                    Ok((GroupMorphOffset { morph, rate }, rest))
                })?;
                if kind == 0 {
                    (MorphOffsets::Group(offsets), cur)
                } else {
                    (MorphOffsets::Flip(offsets), cur)
                }
            }
            1 => {
                let (offsets, cur) = self.counted(cur, |c| {
                    let (vertex, rest) = self.vertex_index(c)?;
                    let (offset, rest) = rest.read_vec3()?;
                    Ok((VertexMorphOffset { vertex, offset }, rest))
                })?;
                (MorphOffsets::Vertex(offsets), cur)
            }
            2 => {
                let (offsets, cur) = self.counted(cur, |c| {
                    let (bone, rest) = self.bone_index(c)?;
                    let (translation, rest) = rest.read_vec3()?;
                    let (rotation, rest) = rest.read_quat()?;
                    Ok((
                        BoneMorphOffset {
                            bone,
                            translation,
                            rotation,
                        },
                        rest,
                    ))
                })?;
                (MorphOffsets::Bone(offsets), cur)
            }
            3..=7 => {
                let (offsets, cur) = self.counted(cur, |c| {
                    let (vertex, rest) = self.vertex_index(c)?;
                    let (offset, rest) = rest.read_vec4()?;
                    Ok((UvMorphOffset { vertex, offset }, rest))
                })?;
                (
                    MorphOffsets::Uv {
                        channel: kind - 3,
                        offsets,
                    },
                    cur,
                )
            }
            8 => {
                let (offsets, cur) = self.counted(cur, |c| self.material_morph_offset(c))?;
                (MorphOffsets::Material(offsets), cur)
            }
            10 => {
                let (offsets, cur) = self.counted(cur, |c| {
                    let (rigid_body, rest) = self.rigid_index(c)?;
                    let (local, rest) = rest.read_u8()?;
                    let (velocity, rest) = rest.read_vec3()?;
                    let (torque, rest) = rest.read_vec3()?;
                    Ok((
                        ImpulseMorphOffset {
                            rigid_body,
                            local: local != 0,
                            velocity,
                            torque,
                        },
                        rest,
                    ))
                })?;
                (MorphOffsets::Impulse(offsets), cur)
            }
            other => return cur.fail(format!("unknown morph type {other}")),
        };
        Ok((
            Morph {
                name,
                english_name: Some(english_name),
                panel,
                offsets,
            },
            cur,
        ))
    }

    fn material_morph_offset<'a>(&self, cur: Cursor<'a>) -> PResult<'a, MaterialMorphOffset> {
        let (material, cur) = self.material_index(cur)?;
        let (operation, cur) = cur.read_u8()?;
        let (diffuse, cur) = cur.read_vec4()?;
        let (specular, cur) = cur.read_vec3()?;
        let (specular_strength, cur) = cur.read_f32()?;
        let (ambient, cur) = cur.read_vec3()?;
        let (edge_color, cur) = cur.read_vec4()?;
        let (edge_scale, cur) = cur.read_f32()?;
        let (texture_tint, cur) = cur.read_vec4()?;
        let (environment_tint, cur) = cur.read_vec4()?;
        let (toon_tint, cur) = cur.read_vec4()?;
        Ok((
            MaterialMorphOffset {
                material,
                operation,
                diffuse,
                specular,
                specular_strength,
                ambient,
                edge_color,
                edge_scale,
                texture_tint,
                environment_tint,
                toon_tint,
            },
            cur,
        ))
    }

    fn display_panel<'a>(&self, cur: Cursor<'a>) -> PResult<'a, DisplayPanel> {
        let (name, cur) = self.text(cur)?;
        let (english_name, cur) = self.text(cur)?;
        let (special, cur) = cur.read_u8()?;
        let (items, cur) = self.counted(cur, |c| {
            let (target, rest) = c.read_u8()?;
            match target {
                0 => {
                    let (bone, rest) = self.bone_index(rest)?;
                    Ok((DisplayItem::Bone(bone), rest))
                }
                1 => {
                    let (morph, rest) = self.morph_index(rest)?;
                    Ok((DisplayItem::Morph(morph), rest))
                }
                other => rest.fail(format!("unknown display item target {other}")),
            }
        })?;
        Ok((
            DisplayPanel {
                name,
                english_name: Some(english_name),
                special: special != 0,
                items,
            },
            cur,
        ))
    }

    fn rigid_body<'a>(&self, cur: Cursor<'a>) -> PResult<'a, RigidBody> {
        let (name, cur) = self.text(cur)?;
        let (english_name, cur) = self.text(cur)?;
        let (bone, cur) = self.bone_index(cur)?;
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
                english_name: Some(english_name),
                bone,
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

    fn joint<'a>(&self, cur: Cursor<'a>) -> PResult<'a, Joint> {
        let (name, cur) = self.text(cur)?;
        let (english_name, cur) = self.text(cur)?;
        let (kind, cur) = cur.read_u8()?;
        let (rigid_a, cur) = self.rigid_index(cur)?;
        let (rigid_b, cur) = self.rigid_index(cur)?;
        let (position, cur) = cur.read_vec3()?;
        let (rotation, cur) = cur.read_vec3()?;
        let (linear_lower, cur) = cur.read_vec3()?;
        let (linear_upper, cur) = cur.read_vec3()?;
        let (angular_lower, cur) = cur.read_vec3()?;
        let (angular_upper, cur) = cur.read_vec3()?;
        let (linear_spring, cur) = cur.read_vec3()?;
        let (angular_spring, cur) = cur.read_vec3()?;
        Ok((
            Joint {
                name,
                english_name: Some(english_name),
                kind,
                rigid_a,
                rigid_b,
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
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Builder {
        buf: Vec<u8>,
        index_width: u8,
    }

    impl Builder {
        fn new(index_width: u8) -> Self {
            let mut buf = Vec::new();
            buf.extend_from_slice(b"PMX ");
            buf.extend_from_slice(&2.0f32.to_le_bytes());
            buf.push(8);
            // UTF-8 编码，0 附加 UV，全部索引同宽
            buf.extend_from_slice(&[
                1,
                0,
                index_width,
                index_width,
                index_width,
                index_width,
                index_width,
                index_width,
            ]);
            Self { buf, index_width }
        }

        fn text(&mut self, s: &str) -> &mut Self {
            self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            self.buf.extend_from_slice(s.as_bytes());
            self
        }

        fn count(&mut self, n: i32) -> &mut Self {
            self.buf.extend_from_slice(&n.to_le_bytes());
            self
        }

        fn f32s(&mut self, values: &[f32]) -> &mut Self {
            for v in values {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            self
        }

        fn index(&mut self, value: i64) -> &mut Self {
            match self.index_width {
                1 => self.buf.push(value as u8),
                2 => self.buf.extend_from_slice(&(value as u16).to_le_bytes()),
                _ => self.buf.extend_from_slice(&(value as i32).to_le_bytes()),
            }
            self
        }
    }

    /// 一个顶点（BDEF1 指向哨兵）+ 一根骨骼的文档
    fn synthetic_doc(width: u8) -> Vec<u8> {
        let sentinel: i64 = match width {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => -1,
        };
        let mut b = Builder::new(width);
        b.text("model").text("model-en").text("comment").text("");
        // 顶点
        b.count(1);
        b.f32s(&[0.0, 1.0, 0.0]) // position
            .f32s(&[0.0, 1.0, 0.0]) // normal
            .f32s(&[0.5, 0.5]); // uv
        b.buf.push(0); // BDEF1
        b.index(sentinel);
        b.f32s(&[1.0]); // edge scale
        b.count(0); // surfaces
        b.count(0); // textures
        b.count(0); // materials
        // 骨骼
        b.count(1);
        b.text("センター");
        b.text("center");
        b.f32s(&[0.0, 0.0, 0.0]);
        b.index(sentinel); // 无父
        b.count(0); // transform level
        b.buf.extend_from_slice(&0u16.to_le_bytes()); // flags: 尾部为偏移
        b.f32s(&[0.0, 1.0, 0.0]); // tail offset
        b.count(0); // morphs
        b.count(0); // display panels
        b.count(0); // rigid bodies
        b.count(0); // joints
        b.buf.clone()
    }

    #[test]
    fn test_index_width_dispatch_identical_documents() {
        let d1 = parse(&synthetic_doc(1)).unwrap();
        let d2 = parse(&synthetic_doc(2)).unwrap();
        let d4 = parse(&synthetic_doc(4)).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d2, d4);
        assert_eq!(d1.bones[0].name, "センター");
    }

    #[test]
    fn test_sentinel_decodes_to_none_for_every_width() {
        for width in [1u8, 2, 4] {
            let doc = parse(&synthetic_doc(width)).unwrap();
            assert_eq!(doc.vertices[0].weight, VertexWeight::Bdef1 { bone: None });
            assert_eq!(doc.bones[0].parent, None);
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = synthetic_doc(2);
        buf[0] = b'X';
        match parse(&buf) {
            Err(MmdError::PmxParse(e)) => assert_eq!(e.offset, 0),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_encoding_flag_rejected() {
        let mut buf = synthetic_doc(2);
        buf[9] = 7; // 编码标志
        assert!(parse(&buf).is_err());
    }

    #[test]
    fn test_truncated_vertex_reports_offset() {
        let buf = synthetic_doc(2);
        let cut = &buf[..40];
        match parse(cut) {
            Err(MmdError::PmxParse(e)) => assert!(e.offset <= 40),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_bone_flag_gated_ik_block() {
        let mut b = Builder::new(2);
        b.text("m").text("").text("").text("");
        b.count(0); // vertices
        b.count(0); // surfaces
        b.count(0); // textures
        b.count(0); // materials
        b.count(2);
        // 目标骨骼
        b.text("足");
        b.text("leg");
        b.f32s(&[0.0, 0.0, 0.0]);
        b.index(0xFFFF);
        b.count(0);
        b.buf
            .extend_from_slice(&(FLAG_TAIL_IS_BONE | FLAG_ROTATABLE).to_le_bytes());
        b.index(0xFFFF); // tail bone
        // IK 骨骼：一个带限制的链接
        b.text("足ＩＫ");
        b.text("leg-ik");
        b.f32s(&[0.0, 0.0, 0.0]);
        b.index(0xFFFF);
        b.count(0);
        b.buf
            .extend_from_slice(&(FLAG_TAIL_IS_BONE | FLAG_IK).to_le_bytes());
        b.index(0xFFFF); // tail
        b.index(0); // IK target = bone 0
        b.count(40); // iterations
        b.f32s(&[1.0]); // limit angle
        b.count(1); // link count
        b.index(0);
        b.buf.push(1); // 有角度限制
        b.f32s(&[-1.0, 0.0, 0.0]);
        b.f32s(&[1.0, 0.0, 0.0]);
        b.count(0); // morphs
        b.count(0); // display panels
        b.count(0); // rigid bodies
        b.count(0); // joints

        let doc = parse(&b.buf).unwrap();
        let ik = doc.bones[1].ik.as_ref().unwrap();
        assert_eq!(ik.target, Some(0));
        assert_eq!(ik.iterations, 40);
        assert_eq!(ik.links.len(), 1);
        assert!(ik.links[0].limits.is_some());
        assert!(doc.bones[0].ik.is_none());
    }

    #[test]
    fn test_vertex_morph_round() {
        let mut b = Builder::new(1);
        b.text("m").text("").text("").text("");
        b.count(1);
        b.f32s(&[0.0; 3]).f32s(&[0.0, 1.0, 0.0]).f32s(&[0.0, 0.0]);
        b.buf.push(0);
        b.index(0xFF);
        b.f32s(&[1.0]);
        b.count(0); // surfaces
        b.count(0); // textures
        b.count(0); // materials
        b.count(0); // bones
        b.count(1); // morphs
        b.text("笑い");
        b.text("smile");
        b.buf.push(2); // panel
        b.buf.push(1); // vertex morph
        b.count(1);
        b.index(0); // 顶点索引（无哨兵）
        b.f32s(&[0.0, 0.1, 0.0]);
        b.count(0); // display panels
        b.count(0); // rigid bodies
        b.count(0); // joints

        let doc = parse(&b.buf).unwrap();
        match &doc.morphs[0].offsets {
            MorphOffsets::Vertex(offsets) => {
                assert_eq!(offsets.len(), 1);
                assert_eq!(offsets[0].vertex, 0);
            }
            other => panic!("unexpected offsets: {other:?}"),
        }
    }
}
