//! 渲染资源注册表
//!
//! 每个 GPU 绑定对象携带注册表内单调递增的标识符。状态机：
//! 未登记 → 已描述（CPU 侧）→ 已实现（GPU 侧）。ensure 只发生
//! 一次，重复 ensure 是幂等空操作。注册表是显式构造、显式持有的
//! 实例——没有环境全局状态，多个渲染器可以各自独立。

use std::collections::HashMap;

/// 资源标识符（注册表内唯一）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

/// 后端侧句柄（由具体设备分配）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub u64);

/// 着色器阶段；常量变量按 Vertex → Geometry → Pixel 的顺序查找
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Pixel,
}

/// 单个着色器阶段的描述（入口与反射出的常量缓冲变量名）
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderStageDesc {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub variables: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderDesc {
    pub label: String,
    pub stages: Vec<ShaderStageDesc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VertexBufferDesc {
    pub label: String,
    /// 单顶点字节数
    pub stride: u32,
    /// 容量（字节）
    pub capacity: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexBufferDesc {
    pub label: String,
    pub format: IndexFormat,
    pub indices: Vec<u32>,
}

/// 资源描述（格式无关的 CPU 侧定义）
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceDesc {
    Shader(ShaderDesc),
    VertexBuffer(VertexBufferDesc),
    IndexBuffer(IndexBufferDesc),
}

struct Entry {
    desc: ResourceDesc,
    realized: Option<BackendHandle>,
}

/// 资源注册表
#[derive(Default)]
pub struct ResourceRegistry {
    next_id: u64,
    entries: HashMap<u64, Entry>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记描述，进入「已描述」状态
    pub fn register(&mut self, desc: ResourceDesc) -> ResourceId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                desc,
                realized: None,
            },
        );
        ResourceId(id)
    }

    pub fn desc(&self, id: ResourceId) -> Option<&ResourceDesc> {
        self.entries.get(&id.0).map(|e| &e.desc)
    }

    pub fn is_realized(&self, id: ResourceId) -> bool {
        self.entries
            .get(&id.0)
            .map(|e| e.realized.is_some())
            .unwrap_or(false)
    }

    pub fn backend_handle(&self, id: ResourceId) -> Option<BackendHandle> {
        self.entries.get(&id.0).and_then(|e| e.realized)
    }

    /// 记录已实现的后端句柄
    pub(crate) fn mark_realized(&mut self, id: ResourceId, handle: BackendHandle) {
        if let Some(entry) = self.entries.get_mut(&id.0) {
            entry.realized = Some(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
