//! 场景：模型实例、动作回放与世界变换传播

use std::collections::HashMap;
use std::path::Path;

use glam::{Mat4, Quat, Vec3};

use crate::animation::{load_motion, MotionDocument, PoseDocument};
use crate::model::{ModelDocument, MorphOffsets};
use crate::skinning::{compute_skinning, SkinningInput, SkinningOutput};
use crate::{MmdError, Result};

use super::node::SceneNode;

/// 场景节点句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) usize);

/// 动作句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MotionHandle(pub(crate) usize);

/// 导入选项：镜像与单位缩放属于场景接入层，不属于解析器
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImportOptions {
    pub scale: f32,
    /// MMD 是左手系；翻转 Z 轴换到右手系
    pub flip_z: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            flip_z: true,
        }
    }
}

impl ImportOptions {
    fn point(&self, v: Vec3) -> Vec3 {
        let v = v * self.scale;
        if self.flip_z {
            Vec3::new(v.x, v.y, -v.z)
        } else {
            v
        }
    }

    fn direction(&self, v: Vec3) -> Vec3 {
        if self.flip_z {
            Vec3::new(v.x, v.y, -v.z)
        } else {
            v
        }
    }

    fn rotation(&self, q: Quat) -> Quat {
        if self.flip_z {
            Quat::from_xyzw(q.x, q.y, -q.z, -q.w).normalize()
        } else {
            q
        }
    }
}

/// 结构变化事件（供依赖视图消费的差量）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SceneEvent {
    NodeAdded {
        parent: Option<NodeHandle>,
        node: NodeHandle,
    },
    NodeRemoved {
        node: NodeHandle,
    },
    Cleared,
}

/// 单根骨骼的世界姿势
#[derive(Clone, Debug)]
pub struct BonePose {
    pub name: String,
    pub world: Mat4,
}

/// 一次 tick 的求值结果
#[derive(Clone, Debug, Default)]
pub struct Pose {
    pub bones: Vec<BonePose>,
}

/// 场景中的一个模型实例
struct ModelInstance {
    document: ModelDocument,
    root: usize,
    /// 骨骼索引 → 节点索引
    bone_nodes: Vec<usize>,
    /// 导入变换后的绑定姿势顶点流
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    inverse_bind: Vec<Mat4>,
    /// 当前 Morph 权重（按文档 Morph 顺序）
    morph_weights: Vec<f32>,
}

/// 场景
#[derive(Default)]
pub struct Scene {
    nodes: Vec<Option<SceneNode>>,
    models: Vec<ModelInstance>,
    motions: Vec<MotionDocument>,
    active_motion: Option<usize>,
    events: Vec<SceneEvent>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            models: Vec::new(),
            motions: Vec::new(),
            active_motion: None,
            events: Vec::new(),
        }
    }

    fn alloc_node(&mut self, node: SceneNode) -> usize {
        self.nodes.push(Some(node));
        self.nodes.len() - 1
    }

    /// 添加模型：为模型根和每根骨骼建立节点子树
    pub fn add_model(&mut self, document: ModelDocument, options: ImportOptions) -> NodeHandle {
        let root = self.alloc_node(SceneNode::new(document.name.clone(), Vec3::ZERO));
        self.events.push(SceneEvent::NodeAdded {
            parent: None,
            node: NodeHandle(root),
        });

        // 骨骼位置先做导入变换
        let bone_positions: Vec<Vec3> = document
            .bones
            .iter()
            .map(|b| options.point(b.position))
            .collect();

        let mut bone_nodes = Vec::with_capacity(document.bones.len());
        for (i, bone) in document.bones.iter().enumerate() {
            let offset = match bone.parent {
                Some(p) => bone_positions[i] - bone_positions[p as usize],
                None => bone_positions[i],
            };
            let idx = self.alloc_node(SceneNode::new(bone.name.clone(), offset));
            bone_nodes.push(idx);
        }
        // 父子连接；无父骨骼挂到模型根
        for (i, bone) in document.bones.iter().enumerate() {
            let parent_idx = match bone.parent {
                Some(p) => bone_nodes[p as usize],
                None => root,
            };
            let node_idx = bone_nodes[i];
            self.nodes[node_idx].as_mut().unwrap().parent = Some(parent_idx);
            self.nodes[parent_idx].as_mut().unwrap().children.push(node_idx);
            self.events.push(SceneEvent::NodeAdded {
                parent: Some(NodeHandle(parent_idx)),
                node: NodeHandle(node_idx),
            });
        }

        let positions: Vec<Vec3> = document
            .vertices
            .iter()
            .map(|v| options.point(v.position))
            .collect();
        let normals: Vec<Vec3> = document
            .vertices
            .iter()
            .map(|v| options.direction(v.normal))
            .collect();
        let inverse_bind: Vec<Mat4> = bone_positions
            .iter()
            .map(|&p| Mat4::from_translation(p).inverse())
            .collect();
        let morph_weights = vec![0.0; document.morphs.len()];

        log::info!(
            "场景添加模型: {} ({} 骨骼节点)",
            document.name,
            bone_nodes.len()
        );

        self.models.push(ModelInstance {
            document,
            root,
            bone_nodes,
            positions,
            normals,
            inverse_bind,
            morph_weights,
        });
        NodeHandle(root)
    }

    /// 移除模型及其节点子树
    pub fn remove_model(&mut self, handle: NodeHandle) {
        let Some(pos) = self.models.iter().position(|m| m.root == handle.0) else {
            return;
        };
        let model = self.models.remove(pos);
        let mut stack = vec![model.root];
        while let Some(idx) = stack.pop() {
            if let Some(node) = self.nodes[idx].take() {
                stack.extend(node.children);
                self.events.push(SceneEvent::NodeRemoved {
                    node: NodeHandle(idx),
                });
            }
        }
    }

    /// 清空场景
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.models.clear();
        self.motions.clear();
        self.active_motion = None;
        self.events.push(SceneEvent::Cleared);
    }

    /// 取走累积的结构变化事件
    pub fn take_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    /// 按扩展名加载动作文件并登记
    pub fn load_motion<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: ImportOptions,
    ) -> Result<MotionHandle> {
        let motion = load_motion(path)?;
        Ok(self.add_motion(motion, options))
    }

    /// 登记已解析的动作；导入变换在此应用
    pub fn add_motion(&mut self, motion: MotionDocument, options: ImportOptions) -> MotionHandle {
        let converted = convert_motion(motion, options);
        self.motions.push(converted);
        MotionHandle(self.motions.len() - 1)
    }

    /// 设置活动动作
    pub fn set_active_motion(&mut self, handle: MotionHandle) -> Result<()> {
        if handle.0 >= self.motions.len() {
            return Err(MmdError::Scene(format!("unknown motion handle {}", handle.0)));
        }
        self.active_motion = Some(handle.0);
        Ok(())
    }

    pub fn motion(&self, handle: MotionHandle) -> Option<&MotionDocument> {
        self.motions.get(handle.0)
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&SceneNode> {
        self.nodes.get(handle.0).and_then(|n| n.as_ref())
    }

    pub fn set_selected(&mut self, handle: NodeHandle, selected: bool) {
        if let Some(Some(node)) = self.nodes.get_mut(handle.0) {
            node.selected = selected;
        }
    }

    /// 按名称匹配应用一次姿势（VPD）
    pub fn apply_pose(&mut self, pose: &PoseDocument, options: ImportOptions) -> Pose {
        let mut by_name: HashMap<&str, (Vec3, Quat)> = HashMap::new();
        for bone in &pose.bones {
            by_name.insert(
                bone.name.as_str(),
                (options.point(bone.translation), options.rotation(bone.rotation)),
            );
        }
        for model in &self.models {
            for &ni in &model.bone_nodes {
                let node = self.nodes[ni].as_mut().unwrap();
                node.reset_animation();
                if let Some(&(t, r)) = by_name.get(node.name.as_str()) {
                    node.animation_translate = t;
                    node.animation_rotate = r;
                }
            }
        }
        for model in &mut self.models {
            let ModelInstance {
                document,
                morph_weights,
                ..
            } = model;
            for (i, morph) in document.morphs.iter().enumerate() {
                if let Some(m) = pose.morphs.iter().find(|m| m.name == morph.name) {
                    morph_weights[i] = m.weight;
                }
            }
        }
        self.propagate_world_transforms();
        self.capture_pose()
    }

    /// 动画 tick：直接采样「自开始以来的经过时间」，与渲染速率无关
    pub fn tick(&mut self, elapsed_seconds: f32) -> Pose {
        if let Some(mi) = self.active_motion {
            let motion = &self.motions[mi];
            let frame = motion.frame_at(elapsed_seconds);
            for model in &mut self.models {
                for (bi, &ni) in model.bone_nodes.iter().enumerate() {
                    let node = self.nodes[ni].as_mut().unwrap();
                    node.reset_animation();
                    let name = &model.document.bones[bi].name;
                    if let Some(track) = motion.bone_tracks.get(name) {
                        let (t, r) = track.sample(frame);
                        node.animation_translate = t;
                        node.animation_rotate = r;
                    }
                }
                for (i, morph) in model.document.morphs.iter().enumerate() {
                    if let Some(track) = motion.morph_tracks.get(&morph.name) {
                        model.morph_weights[i] = track.sample(frame);
                    }
                }
            }
        }
        self.apply_bone_morphs();
        self.propagate_world_transforms();
        self.capture_pose()
    }

    /// 骨骼 Morph 与组 Morph 合入骨骼关键帧变换
    fn apply_bone_morphs(&mut self) {
        for model in &mut self.models {
            let weights = effective_morph_weights(&model.document, &model.morph_weights);
            for (i, morph) in model.document.morphs.iter().enumerate() {
                let w = weights[i];
                if w == 0.0 {
                    continue;
                }
                if let MorphOffsets::Bone(offsets) = &morph.offsets {
                    for o in offsets {
                        let Some(b) = o.bone else { continue };
                        let ni = model.bone_nodes[b as usize];
                        let node = self.nodes[ni].as_mut().unwrap();
                        node.animation_translate += o.translation * w;
                        node.animation_rotate =
                            (node.animation_rotate * Quat::IDENTITY.slerp(o.rotation, w)).normalize();
                    }
                }
            }
        }
    }

    /// 深度优先前序传播世界变换；每次姿势应用都整树重算
    fn propagate_world_transforms(&mut self) {
        let roots: Vec<usize> = self.models.iter().map(|m| m.root).collect();
        for root in roots {
            let mut stack = vec![(root, Mat4::IDENTITY)];
            while let Some((idx, parent_world)) = stack.pop() {
                let Some(node) = self.nodes[idx].as_mut() else {
                    continue;
                };
                let world = parent_world * node.local_transform();
                node.world_transform = world;
                for &child in &node.children {
                    stack.push((child, world));
                }
            }
        }
    }

    fn capture_pose(&self) -> Pose {
        let mut bones = Vec::new();
        for model in &self.models {
            for &ni in &model.bone_nodes {
                let node = self.nodes[ni].as_ref().unwrap();
                bones.push(BonePose {
                    name: node.name.clone(),
                    world: node.world_transform,
                });
            }
        }
        Pose { bones }
    }

    /// 当前姿势下的蒙皮顶点流（Morph 偏移 + 线性混合蒙皮）
    pub fn skinned_vertices(&self, handle: NodeHandle) -> Option<SkinningOutput> {
        let model = self.models.iter().find(|m| m.root == handle.0)?;

        // 顶点 Morph
        let mut positions = model.positions.clone();
        let weights = effective_morph_weights(&model.document, &model.morph_weights);
        for (i, morph) in model.document.morphs.iter().enumerate() {
            let w = weights[i];
            if w == 0.0 {
                continue;
            }
            if let MorphOffsets::Vertex(offsets) = &morph.offsets {
                for o in offsets {
                    positions[o.vertex as usize] += o.offset * w;
                }
            }
        }

        let bone_matrices: Vec<Mat4> = model
            .bone_nodes
            .iter()
            .zip(&model.inverse_bind)
            .map(|(&ni, &inv)| self.nodes[ni].as_ref().unwrap().world_transform * inv)
            .collect();
        let vertex_weights: Vec<_> = model
            .document
            .vertices
            .iter()
            .map(|v| v.weight.clone())
            .collect();

        Some(compute_skinning(&SkinningInput {
            positions: &positions,
            normals: &model.normals,
            weights: &vertex_weights,
            bone_matrices: &bone_matrices,
        }))
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub(crate) fn model_document(&self, handle: NodeHandle) -> Option<&ModelDocument> {
        self.models
            .iter()
            .find(|m| m.root == handle.0)
            .map(|m| &m.document)
    }
}

/// 组 Morph 的权重展开到目标 Morph（单层）
fn effective_morph_weights(document: &ModelDocument, raw: &[f32]) -> Vec<f32> {
    let mut effective = raw.to_vec();
    for (i, morph) in document.morphs.iter().enumerate() {
        if let MorphOffsets::Group(offsets) = &morph.offsets {
            for o in offsets {
                if let Some(t) = o.morph {
                    effective[t as usize] += raw[i] * o.rate;
                }
            }
        }
    }
    effective
}

/// 动作数据的导入变换（Z 翻转与缩放），与模型侧一致
fn convert_motion(mut motion: MotionDocument, options: ImportOptions) -> MotionDocument {
    if !options.flip_z && options.scale == 1.0 {
        return motion;
    }
    for track in motion.bone_tracks.values_mut() {
        for kf in track.keyframes.values_mut() {
            kf.translation = options.point(kf.translation);
            kf.rotation = options.rotation(kf.rotation);
        }
    }
    for kf in motion.camera_track.keyframes.values_mut() {
        kf.look_at = options.point(kf.look_at);
    }
    motion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::BoneKeyframe;
    use crate::model::{Bone, Vertex, VertexWeight};
    use glam::Vec2;

    fn two_bone_model() -> ModelDocument {
        let mut doc = ModelDocument::default();
        doc.name = "test".to_string();
        let mut root = Bone::new("センター".to_string());
        root.position = Vec3::new(0.0, 1.0, 0.0);
        let mut arm = Bone::new("右腕".to_string());
        arm.position = Vec3::new(0.0, 2.0, 0.0);
        arm.parent = Some(0);
        doc.bones.push(root);
        doc.bones.push(arm);
        doc.vertices.push(Vertex {
            position: Vec3::new(0.0, 2.0, 0.0),
            normal: Vec3::Y,
            uv: Vec2::ZERO,
            extra_uvs: vec![],
            weight: VertexWeight::Bdef1 { bone: Some(1) },
            edge_scale: 1.0,
        });
        doc
    }

    fn no_convert() -> ImportOptions {
        ImportOptions {
            scale: 1.0,
            flip_z: false,
        }
    }

    #[test]
    fn test_add_model_builds_tree_and_events() {
        let mut scene = Scene::new();
        let handle = scene.add_model(two_bone_model(), no_convert());
        let events = scene.take_events();
        // 模型根 + 两根骨骼
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SceneEvent::NodeAdded { parent: None, .. }));
        let root = scene.node(handle).unwrap();
        assert_eq!(root.children.len(), 1);
        assert!(scene.take_events().is_empty());
    }

    #[test]
    fn test_world_transform_propagation() {
        let mut scene = Scene::new();
        scene.add_model(two_bone_model(), no_convert());
        let pose = scene.tick(0.0);
        // 绑定姿势：手臂世界位置 = 骨骼初始位置
        let arm = pose.bones.iter().find(|b| b.name == "右腕").unwrap();
        let p = arm.world.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_tick_applies_motion_by_name() {
        let mut scene = Scene::new();
        scene.add_model(two_bone_model(), no_convert());
        let mut motion = MotionDocument::new("m".to_string(), 30.0);
        motion.insert_bone_keyframe(
            "センター",
            BoneKeyframe::new(0, Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY),
        );
        let handle = scene.add_motion(motion, no_convert());
        scene.set_active_motion(handle).unwrap();
        let pose = scene.tick(0.0);
        // 根骨骼平移沿层级传到手臂
        let arm = pose.bones.iter().find(|b| b.name == "右腕").unwrap();
        let p = arm.world.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(5.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_tick_is_rate_independent() {
        let mut scene = Scene::new();
        scene.add_model(two_bone_model(), no_convert());
        let mut motion = MotionDocument::new("m".to_string(), 30.0);
        motion.insert_bone_keyframe("センター", BoneKeyframe::new(0, Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe(
            "センター",
            BoneKeyframe::new(30, Vec3::new(6.0, 0.0, 0.0), Quat::IDENTITY),
        );
        let handle = scene.add_motion(motion, no_convert());
        scene.set_active_motion(handle).unwrap();

        // 跳帧不影响正确性：直接采样经过时间
        let p1 = scene.tick(0.5);
        let mut scene2 = Scene::new();
        scene2.add_model(two_bone_model(), no_convert());
        let m2 = {
            let mut motion = MotionDocument::new("m".to_string(), 30.0);
            motion.insert_bone_keyframe("センター", BoneKeyframe::new(0, Vec3::ZERO, Quat::IDENTITY));
            motion.insert_bone_keyframe(
                "センター",
                BoneKeyframe::new(30, Vec3::new(6.0, 0.0, 0.0), Quat::IDENTITY),
            );
            scene2.add_motion(motion, no_convert())
        };
        scene2.set_active_motion(m2).unwrap();
        for t in [0.1, 0.2, 0.3, 0.4, 0.5] {
            scene2.tick(t);
        }
        let p2 = scene2.tick(0.5);
        let a = p1.bones[0].world.transform_point3(Vec3::ZERO);
        let b = p2.bones[0].world.transform_point3(Vec3::ZERO);
        assert!((a - b).length() < 1e-6);
    }

    #[test]
    fn test_skinned_vertices_follow_bone() {
        let mut scene = Scene::new();
        let handle = scene.add_model(two_bone_model(), no_convert());
        let mut motion = MotionDocument::new("m".to_string(), 30.0);
        motion.insert_bone_keyframe(
            "右腕",
            BoneKeyframe::new(0, Vec3::new(0.0, 0.0, 3.0), Quat::IDENTITY),
        );
        let mh = scene.add_motion(motion, no_convert());
        scene.set_active_motion(mh).unwrap();
        scene.tick(0.0);
        let out = scene.skinned_vertices(handle).unwrap();
        // 顶点绑定在手臂骨骼上，跟随其平移
        assert!((out.positions[0] - Vec3::new(0.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn test_apply_pose_by_name() {
        let mut scene = Scene::new();
        scene.add_model(two_bone_model(), no_convert());
        let pose_doc = PoseDocument {
            model_name: "test".to_string(),
            bones: vec![crate::animation::PoseBone {
                name: "右腕".to_string(),
                translation: Vec3::new(0.0, 0.0, 1.0),
                rotation: Quat::IDENTITY,
            }],
            morphs: vec![],
        };
        let pose = scene.apply_pose(&pose_doc, no_convert());
        let arm = pose.bones.iter().find(|b| b.name == "右腕").unwrap();
        let p = arm.world.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, 2.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_remove_model_emits_events() {
        let mut scene = Scene::new();
        let handle = scene.add_model(two_bone_model(), no_convert());
        scene.take_events();
        scene.remove_model(handle);
        let events = scene.take_events();
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| matches!(e, SceneEvent::NodeRemoved { .. })));
        assert!(scene.node(handle).is_none());
        assert_eq!(scene.model_count(), 0);
    }

    #[test]
    fn test_unknown_motion_handle_rejected() {
        let mut scene = Scene::new();
        assert!(scene.set_active_motion(MotionHandle(3)).is_err());
    }
}
