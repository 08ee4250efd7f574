//! 渲染命令/资源抽象层
//!
//! 场景描述与 GPU 后端解耦：资源先在 CPU 侧描述、登记进注册表，
//! 首次使用时才对设备惰性实现（ensure）；每帧重建一份不可变的
//! 命令列表，由渲染器在单线程上按序重放到后端。具体 GPU 设备、
//! 交换链、着色器编译器都是固定接口后面的外部协作者。

mod backend;
mod command;
mod frame;
mod renderer;
mod resource;

pub use backend::{CountingBackend, RenderBackend};
pub use command::{RenderCommand, RenderFrame, ShaderValue};
pub use frame::{build_frame, register_model_resources, FrameParams, ModelRenderResources};
pub use renderer::Renderer;
pub use resource::{
    BackendHandle, IndexBufferDesc, IndexFormat, ResourceDesc, ResourceId, ResourceRegistry,
    ShaderDesc, ShaderStage, ShaderStageDesc, VertexBufferDesc,
};

use thiserror::Error;

/// 渲染错误：当前帧致命，放弃剩余命令并跳过 present；
/// 注册表不受影响，下一帧从干净状态开始
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unresolved resource id {0:?}")]
    UnresolvedResource(ResourceId),

    #[error("shader variable {0:?} not found in bound shader stages")]
    UnknownVariable(String),

    #[error("command requires a bound {0}")]
    NothingBound(&'static str),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;
