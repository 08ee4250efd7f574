//! 渲染后端契约
//!
//! GPU 设备在这个固定接口后面。渲染器只跟后端句柄打交道；
//! 设备、交换链、着色器编译器的细节都在接口另一侧。

use super::command::ShaderValue;
use super::resource::{
    BackendHandle, IndexBufferDesc, ShaderDesc, ShaderStage, VertexBufferDesc,
};
use super::RenderResult;

/// GPU 后端接口
pub trait RenderBackend {
    fn create_shader(&mut self, desc: &ShaderDesc) -> RenderResult<BackendHandle>;
    fn create_vertex_buffer(&mut self, desc: &VertexBufferDesc) -> RenderResult<BackendHandle>;
    fn create_index_buffer(&mut self, desc: &IndexBufferDesc) -> RenderResult<BackendHandle>;

    fn update_vertex_buffer(&mut self, handle: BackendHandle, data: &[u8]) -> RenderResult<()>;

    fn clear(&mut self, color: [f32; 4]) -> RenderResult<()>;
    fn bind_shader(&mut self, handle: BackendHandle) -> RenderResult<()>;
    fn bind_vertex_buffer(&mut self, handle: BackendHandle) -> RenderResult<()>;
    fn bind_index_buffer(&mut self, handle: BackendHandle) -> RenderResult<()>;

    /// 在绘制前上传一个脏常量到指定阶段
    fn upload_constant(
        &mut self,
        shader: BackendHandle,
        stage: ShaderStage,
        name: &str,
        value: &ShaderValue,
    ) -> RenderResult<()>;

    fn draw(&mut self, start: u32, count: u32) -> RenderResult<()>;
    fn draw_indexed(&mut self, start: u32, count: u32) -> RenderResult<()>;

    fn present(&mut self) -> RenderResult<()>;
}

/// 计数桩后端：记录每类调用次数，测试用
#[derive(Default)]
pub struct CountingBackend {
    next_handle: u64,
    pub shaders_created: u32,
    pub vertex_buffers_created: u32,
    pub index_buffers_created: u32,
    pub buffer_updates: u32,
    pub clears: u32,
    pub draws: u32,
    pub indexed_draws: u32,
    pub presents: u32,
    /// (阶段, 变量名) 上传记录
    pub constants: Vec<(ShaderStage, String)>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> BackendHandle {
        self.next_handle += 1;
        BackendHandle(self.next_handle)
    }
}

impl RenderBackend for CountingBackend {
    fn create_shader(&mut self, _desc: &ShaderDesc) -> RenderResult<BackendHandle> {
        self.shaders_created += 1;
        Ok(self.alloc())
    }

    fn create_vertex_buffer(&mut self, _desc: &VertexBufferDesc) -> RenderResult<BackendHandle> {
        self.vertex_buffers_created += 1;
        Ok(self.alloc())
    }

    fn create_index_buffer(&mut self, _desc: &IndexBufferDesc) -> RenderResult<BackendHandle> {
        self.index_buffers_created += 1;
        Ok(self.alloc())
    }

    fn update_vertex_buffer(&mut self, _handle: BackendHandle, _data: &[u8]) -> RenderResult<()> {
        self.buffer_updates += 1;
        Ok(())
    }

    fn clear(&mut self, _color: [f32; 4]) -> RenderResult<()> {
        self.clears += 1;
        Ok(())
    }

    fn bind_shader(&mut self, _handle: BackendHandle) -> RenderResult<()> {
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, _handle: BackendHandle) -> RenderResult<()> {
        Ok(())
    }

    fn bind_index_buffer(&mut self, _handle: BackendHandle) -> RenderResult<()> {
        Ok(())
    }

    fn upload_constant(
        &mut self,
        _shader: BackendHandle,
        stage: ShaderStage,
        name: &str,
        _value: &ShaderValue,
    ) -> RenderResult<()> {
        self.constants.push((stage, name.to_string()));
        Ok(())
    }

    fn draw(&mut self, _start: u32, _count: u32) -> RenderResult<()> {
        self.draws += 1;
        Ok(())
    }

    fn draw_indexed(&mut self, _start: u32, _count: u32) -> RenderResult<()> {
        self.indexed_draws += 1;
        Ok(())
    }

    fn present(&mut self) -> RenderResult<()> {
        self.presents += 1;
        Ok(())
    }
}
