//! 渲染命令
//!
//! 命令是瞬态的：每帧重建，提交后不再修改。一帧 = 资源列表 +
//! 有序命令列表。

use glam::{Mat4, Vec4};

use super::resource::ResourceId;

/// 着色器常量值
#[derive(Clone, Debug, PartialEq)]
pub enum ShaderValue {
    Float(f32),
    Vec4(Vec4),
    Mat4(Mat4),
}

/// 单条管线操作
#[derive(Clone, Debug, PartialEq)]
pub enum RenderCommand {
    Clear {
        color: [f32; 4],
    },
    SetShader {
        shader: ResourceId,
    },
    SetVertexBuffer {
        buffer: ResourceId,
    },
    SetIndexBuffer {
        buffer: ResourceId,
    },
    /// 覆写顶点缓冲内容（蒙皮后的顶点流每帧上传）
    UpdateVertexBuffer {
        buffer: ResourceId,
        data: Vec<u8>,
    },
    /// 按名称绑定常量：在当前绑定的各阶段中查找，
    /// Vertex → Geometry → Pixel 先到先得
    SetShaderVariable {
        name: String,
        value: ShaderValue,
    },
    /// 绘制一个子网格；有索引缓冲则按索引绘制
    DrawSubmesh {
        start: u32,
        count: u32,
    },
}

/// 一帧：资源引用 + 命令序列，提交后不可变
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderFrame {
    pub resources: Vec<ResourceId>,
    pub commands: Vec<RenderCommand>,
}

impl RenderFrame {
    pub fn new() -> Self {
        Self::default()
    }
}
