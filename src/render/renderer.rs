//! 帧执行循环
//!
//! 每帧：(1) 逐个 ensure 资源；(2) 按序重放命令到立即上下文——
//! 清屏、绑定着色器与常量、绑定缓冲、逐子网格提交绘制；
//! (3) present。任何命令失败都放弃本帧剩余命令并跳过 present；
//! 注册表是附加且幂等的，下一帧不受影响。

use super::backend::RenderBackend;
use super::command::{RenderCommand, RenderFrame, ShaderValue};
use super::resource::{BackendHandle, ResourceDesc, ResourceId, ResourceRegistry, ShaderStage};
use super::{RenderError, RenderResult};

/// 渲染器：持有后端与自己的资源注册表
pub struct Renderer<B: RenderBackend> {
    backend: B,
    registry: ResourceRegistry,
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            registry: ResourceRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 消费一帧。失败即放弃整帧，不重试
    pub fn render(&mut self, frame: &RenderFrame) -> RenderResult<()> {
        for &id in &frame.resources {
            self.ensure(id)?;
        }

        let mut bound_shader: Option<ResourceId> = None;
        let mut index_buffer_bound = false;
        // 待冲刷的常量（阶段在 set 时解析，上传推迟到下一次绘制前）
        let mut dirty: Vec<(ShaderStage, String, ShaderValue)> = Vec::new();

        for command in &frame.commands {
            match command {
                RenderCommand::Clear { color } => {
                    self.backend.clear(*color)?;
                }
                RenderCommand::SetShader { shader } => {
                    let handle = self.handle_of(*shader)?;
                    self.backend.bind_shader(handle)?;
                    bound_shader = Some(*shader);
                    dirty.clear();
                }
                RenderCommand::SetVertexBuffer { buffer } => {
                    let handle = self.handle_of(*buffer)?;
                    self.backend.bind_vertex_buffer(handle)?;
                }
                RenderCommand::SetIndexBuffer { buffer } => {
                    let handle = self.handle_of(*buffer)?;
                    self.backend.bind_index_buffer(handle)?;
                    index_buffer_bound = true;
                }
                RenderCommand::UpdateVertexBuffer { buffer, data } => {
                    let handle = self.handle_of(*buffer)?;
                    self.backend.update_vertex_buffer(handle, data)?;
                }
                RenderCommand::SetShaderVariable { name, value } => {
                    let shader = bound_shader.ok_or(RenderError::NothingBound("shader"))?;
                    let stage = self.resolve_stage(shader, name)?;
                    dirty.push((stage, name.clone(), value.clone()));
                }
                RenderCommand::DrawSubmesh { start, count } => {
                    let shader = bound_shader.ok_or(RenderError::NothingBound("shader"))?;
                    let shader_handle = self.handle_of(shader)?;
                    for (stage, name, value) in dirty.drain(..) {
                        self.backend
                            .upload_constant(shader_handle, stage, &name, &value)?;
                    }
                    if index_buffer_bound {
                        self.backend.draw_indexed(*start, *count)?;
                    } else {
                        self.backend.draw(*start, *count)?;
                    }
                }
            }
        }

        self.backend.present()
    }

    /// 已描述 → 已实现；已实现则为幂等空操作
    fn ensure(&mut self, id: ResourceId) -> RenderResult<BackendHandle> {
        if let Some(handle) = self.registry.backend_handle(id) {
            return Ok(handle);
        }
        let desc = self
            .registry
            .desc(id)
            .ok_or(RenderError::UnresolvedResource(id))?;
        let handle = match desc {
            ResourceDesc::Shader(d) => self.backend.create_shader(d)?,
            ResourceDesc::VertexBuffer(d) => self.backend.create_vertex_buffer(d)?,
            ResourceDesc::IndexBuffer(d) => self.backend.create_index_buffer(d)?,
        };
        self.registry.mark_realized(id, handle);
        Ok(handle)
    }

    fn handle_of(&self, id: ResourceId) -> RenderResult<BackendHandle> {
        self.registry
            .backend_handle(id)
            .ok_or(RenderError::UnresolvedResource(id))
    }

    /// 变量名 → 阶段：在已绑定着色器的各阶段按
    /// Vertex → Geometry → Pixel 顺序查找，先到先得。
    /// 调用方按符号名寻址（"world" / "view" / "projection"），
    /// 这个线性查找就是绑定契约。
    fn resolve_stage(&self, shader: ResourceId, name: &str) -> RenderResult<ShaderStage> {
        let Some(ResourceDesc::Shader(desc)) = self.registry.desc(shader) else {
            return Err(RenderError::UnresolvedResource(shader));
        };
        for stage in [ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Pixel] {
            for stage_desc in desc.stages.iter().filter(|s| s.stage == stage) {
                if stage_desc.variables.iter().any(|v| v == name) {
                    return Ok(stage);
                }
            }
        }
        Err(RenderError::UnknownVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::CountingBackend;
    use crate::render::resource::{ShaderDesc, ShaderStageDesc, VertexBufferDesc};
    use glam::Mat4;

    fn shader_desc() -> ResourceDesc {
        ResourceDesc::Shader(ShaderDesc {
            label: "basic".to_string(),
            stages: vec![
                ShaderStageDesc {
                    stage: ShaderStage::Vertex,
                    entry_point: "vs_main".to_string(),
                    variables: vec!["world".to_string(), "view".to_string()],
                },
                ShaderStageDesc {
                    stage: ShaderStage::Pixel,
                    entry_point: "ps_main".to_string(),
                    variables: vec!["world".to_string(), "tint".to_string()],
                },
            ],
        })
    }

    fn vb_desc() -> ResourceDesc {
        ResourceDesc::VertexBuffer(VertexBufferDesc {
            label: "vb".to_string(),
            stride: 32,
            capacity: 1024,
        })
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut renderer = Renderer::new(CountingBackend::new());
        let shader = renderer.registry_mut().register(shader_desc());
        let vb = renderer.registry_mut().register(vb_desc());
        let frame = RenderFrame {
            resources: vec![shader, vb],
            commands: vec![],
        };
        renderer.render(&frame).unwrap();
        renderer.render(&frame).unwrap();
        // 两帧只创建一次
        assert_eq!(renderer.backend().shaders_created, 1);
        assert_eq!(renderer.backend().vertex_buffers_created, 1);
        assert_eq!(renderer.backend().presents, 2);
    }

    #[test]
    fn test_unresolved_resource_aborts_frame() {
        let mut renderer = Renderer::new(CountingBackend::new());
        let frame = RenderFrame {
            resources: vec![ResourceId(99)],
            commands: vec![RenderCommand::Clear {
                color: [0.0; 4],
            }],
        };
        let err = renderer.render(&frame).unwrap_err();
        assert!(matches!(err, RenderError::UnresolvedResource(_)));
        // 失败帧不执行命令也不 present
        assert_eq!(renderer.backend().clears, 0);
        assert_eq!(renderer.backend().presents, 0);
    }

    #[test]
    fn test_failure_skips_remaining_commands_and_present() {
        let mut renderer = Renderer::new(CountingBackend::new());
        let shader = renderer.registry_mut().register(shader_desc());
        let frame = RenderFrame {
            resources: vec![shader],
            commands: vec![
                RenderCommand::Clear { color: [0.0; 4] },
                RenderCommand::SetShader { shader },
                RenderCommand::SetShaderVariable {
                    name: "no_such_variable".to_string(),
                    value: ShaderValue::Float(1.0),
                },
                RenderCommand::DrawSubmesh { start: 0, count: 3 },
            ],
        };
        let err = renderer.render(&frame).unwrap_err();
        assert!(matches!(err, RenderError::UnknownVariable(_)));
        // 失败前的命令已执行，之后的没有
        assert_eq!(renderer.backend().clears, 1);
        assert_eq!(renderer.backend().draws, 0);
        assert_eq!(renderer.backend().presents, 0);

        // 注册表未受影响，下一帧从干净状态开始
        let ok_frame = RenderFrame {
            resources: vec![shader],
            commands: vec![RenderCommand::Clear { color: [0.0; 4] }],
        };
        renderer.render(&ok_frame).unwrap();
        assert_eq!(renderer.backend().presents, 1);
    }

    #[test]
    fn test_variable_lookup_first_match_wins() {
        let mut renderer = Renderer::new(CountingBackend::new());
        let shader = renderer.registry_mut().register(shader_desc());
        let frame = RenderFrame {
            resources: vec![shader],
            commands: vec![
                RenderCommand::SetShader { shader },
                RenderCommand::SetShaderVariable {
                    name: "world".to_string(),
                    value: ShaderValue::Mat4(Mat4::IDENTITY),
                },
                RenderCommand::SetShaderVariable {
                    name: "tint".to_string(),
                    value: ShaderValue::Float(0.5),
                },
                RenderCommand::DrawSubmesh { start: 0, count: 3 },
            ],
        };
        renderer.render(&frame).unwrap();
        let constants = &renderer.backend().constants;
        // "world" 两个阶段都有，取 Vertex；"tint" 只在 Pixel
        assert_eq!(
            constants,
            &vec![
                (ShaderStage::Vertex, "world".to_string()),
                (ShaderStage::Pixel, "tint".to_string()),
            ]
        );
        // 脏常量在绘制前冲刷
        assert_eq!(renderer.backend().draws, 1);
    }

    #[test]
    fn test_draw_uses_index_buffer_when_bound() {
        let mut renderer = Renderer::new(CountingBackend::new());
        let shader = renderer.registry_mut().register(shader_desc());
        let ib = renderer
            .registry_mut()
            .register(ResourceDesc::IndexBuffer(crate::render::IndexBufferDesc {
                label: "ib".to_string(),
                format: crate::render::IndexFormat::U32,
                indices: vec![0, 1, 2],
            }));
        let frame = RenderFrame {
            resources: vec![shader, ib],
            commands: vec![
                RenderCommand::SetShader { shader },
                RenderCommand::SetIndexBuffer { buffer: ib },
                RenderCommand::DrawSubmesh { start: 0, count: 3 },
            ],
        };
        renderer.render(&frame).unwrap();
        assert_eq!(renderer.backend().indexed_draws, 1);
        assert_eq!(renderer.backend().draws, 0);
    }
}
