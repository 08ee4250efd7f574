//! 每帧资源/命令生成
//!
//! 把场景的当前姿势变成一帧命令：蒙皮顶点流上传、相机矩阵常量、
//! 逐子网格（材质覆盖的索引区间）的绘制提交。

use glam::Mat4;

use crate::model::ModelDocument;
use crate::scene::{NodeHandle, Scene};

use super::command::{RenderCommand, RenderFrame, ShaderValue};
use super::resource::{
    IndexBufferDesc, IndexFormat, ResourceDesc, ResourceId, ResourceRegistry, ShaderDesc,
    ShaderStage, ShaderStageDesc, VertexBufferDesc,
};

/// 顶点布局：position(3) + normal(3) + uv(2)，共 8 个 f32
const VERTEX_STRIDE: u32 = 8 * 4;

/// 一个模型的常驻渲染资源
#[derive(Clone, Copy, Debug)]
pub struct ModelRenderResources {
    pub shader: ResourceId,
    pub vertex_buffer: ResourceId,
    pub index_buffer: ResourceId,
}

/// 帧参数（清屏色与相机矩阵）
#[derive(Clone, Copy, Debug)]
pub struct FrameParams {
    pub clear_color: [f32; 4],
    pub world: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            world: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// 在注册表里描述模型的着色器与缓冲（只描述，不接触设备）
pub fn register_model_resources(
    registry: &mut ResourceRegistry,
    document: &ModelDocument,
) -> ModelRenderResources {
    let shader = registry.register(ResourceDesc::Shader(ShaderDesc {
        label: format!("{}/shader", document.name),
        stages: vec![
            ShaderStageDesc {
                stage: ShaderStage::Vertex,
                entry_point: "vs_main".to_string(),
                variables: vec![
                    "world".to_string(),
                    "view".to_string(),
                    "projection".to_string(),
                ],
            },
            ShaderStageDesc {
                stage: ShaderStage::Pixel,
                entry_point: "ps_main".to_string(),
                variables: vec!["diffuse".to_string()],
            },
        ],
    }));
    let vertex_buffer = registry.register(ResourceDesc::VertexBuffer(VertexBufferDesc {
        label: format!("{}/vertices", document.name),
        stride: VERTEX_STRIDE,
        capacity: document.vertices.len() as u32 * VERTEX_STRIDE,
    }));
    let index_buffer = registry.register(ResourceDesc::IndexBuffer(IndexBufferDesc {
        label: format!("{}/indices", document.name),
        format: IndexFormat::U32,
        indices: document.indices.clone(),
    }));
    ModelRenderResources {
        shader,
        vertex_buffer,
        index_buffer,
    }
}

/// 从场景当前姿势生成一帧命令列表
pub fn build_frame(
    scene: &Scene,
    model: NodeHandle,
    resources: &ModelRenderResources,
    params: &FrameParams,
) -> Option<RenderFrame> {
    let document = scene.model_document(model)?;
    let skinned = scene.skinned_vertices(model)?;

    let mut stream = Vec::with_capacity(document.vertices.len() * 8);
    for (i, vertex) in document.vertices.iter().enumerate() {
        let p = skinned.positions[i];
        let n = skinned.normals[i];
        stream.extend_from_slice(&[p.x, p.y, p.z, n.x, n.y, n.z, vertex.uv.x, vertex.uv.y]);
    }
    let data: Vec<u8> = bytemuck::cast_slice(&stream).to_vec();

    let mut commands = vec![
        RenderCommand::Clear {
            color: params.clear_color,
        },
        RenderCommand::SetShader {
            shader: resources.shader,
        },
        RenderCommand::SetShaderVariable {
            name: "world".to_string(),
            value: ShaderValue::Mat4(params.world),
        },
        RenderCommand::SetShaderVariable {
            name: "view".to_string(),
            value: ShaderValue::Mat4(params.view),
        },
        RenderCommand::SetShaderVariable {
            name: "projection".to_string(),
            value: ShaderValue::Mat4(params.projection),
        },
        RenderCommand::UpdateVertexBuffer {
            buffer: resources.vertex_buffer,
            data,
        },
        RenderCommand::SetVertexBuffer {
            buffer: resources.vertex_buffer,
        },
        RenderCommand::SetIndexBuffer {
            buffer: resources.index_buffer,
        },
    ];

    // 每个材质覆盖一段连续索引区间
    let mut start = 0u32;
    for material in &document.materials {
        commands.push(RenderCommand::DrawSubmesh {
            start,
            count: material.index_count,
        });
        start += material.index_count;
    }
    // 无材质的模型整体画一次
    if document.materials.is_empty() && !document.indices.is_empty() {
        commands.push(RenderCommand::DrawSubmesh {
            start: 0,
            count: document.indices.len() as u32,
        });
    }

    Some(RenderFrame {
        resources: vec![
            resources.shader,
            resources.vertex_buffer,
            resources.index_buffer,
        ],
        commands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bone, Material, Toon, Vertex, VertexWeight};
    use crate::render::{CountingBackend, Renderer};
    use crate::scene::ImportOptions;
    use glam::{Vec2, Vec3, Vec4};

    fn triangle_model() -> ModelDocument {
        let mut doc = ModelDocument::default();
        doc.name = "tri".to_string();
        doc.bones.push(Bone::new("root".to_string()));
        for i in 0..3 {
            doc.vertices.push(Vertex {
                position: Vec3::new(i as f32, 0.0, 0.0),
                normal: Vec3::Y,
                uv: Vec2::ZERO,
                extra_uvs: vec![],
                weight: VertexWeight::Bdef1 { bone: Some(0) },
                edge_scale: 1.0,
            });
        }
        doc.indices = vec![0, 1, 2];
        doc.materials.push(Material {
            name: "m".to_string(),
            english_name: None,
            diffuse: Vec4::ONE,
            specular: Vec3::ZERO,
            specular_strength: 5.0,
            ambient: Vec3::ZERO,
            draw_flags: 0,
            edge_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            edge_scale: 1.0,
            texture: None,
            environment: None,
            environment_mode: 0,
            toon: Toon::Texture(None),
            memo: String::new(),
            index_count: 3,
        });
        doc
    }

    #[test]
    fn test_scene_to_presented_frame() {
        let mut scene = Scene::new();
        let handle = scene.add_model(
            triangle_model(),
            ImportOptions {
                scale: 1.0,
                flip_z: false,
            },
        );
        scene.tick(0.0);

        let mut renderer = Renderer::new(CountingBackend::new());
        let resources = register_model_resources(renderer.registry_mut(), {
            scene.model_document(handle).unwrap()
        });
        let frame = build_frame(&scene, handle, &resources, &FrameParams::default()).unwrap();
        renderer.render(&frame).unwrap();

        let backend = renderer.backend();
        assert_eq!(backend.shaders_created, 1);
        assert_eq!(backend.vertex_buffers_created, 1);
        assert_eq!(backend.index_buffers_created, 1);
        assert_eq!(backend.buffer_updates, 1);
        assert_eq!(backend.indexed_draws, 1);
        assert_eq!(backend.presents, 1);
        // 常量按名称绑定到了各自阶段
        assert_eq!(backend.constants.len(), 3);
    }

    #[test]
    fn test_vertex_stream_layout() {
        let mut scene = Scene::new();
        let handle = scene.add_model(
            triangle_model(),
            ImportOptions {
                scale: 1.0,
                flip_z: false,
            },
        );
        scene.tick(0.0);
        let mut registry = ResourceRegistry::new();
        let resources =
            register_model_resources(&mut registry, scene.model_document(handle).unwrap());
        let frame = build_frame(&scene, handle, &resources, &FrameParams::default()).unwrap();
        let update = frame
            .commands
            .iter()
            .find_map(|c| match c {
                RenderCommand::UpdateVertexBuffer { data, .. } => Some(data),
                _ => None,
            })
            .unwrap();
        assert_eq!(update.len(), 3 * VERTEX_STRIDE as usize);
        // 第二个顶点的 x = 1.0
        let floats: &[f32] = bytemuck::cast_slice(update);
        assert_eq!(floats[8], 1.0);
    }
}
