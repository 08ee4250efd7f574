//! 动作文档与曲线求值
//!
//! 所有格式（VMD / VPD / BVH）最终都落到同一套按名称分轨的
//! 关键帧曲线上。轨道在插入时按帧号排序（`BTreeMap`），同帧后写
//! 覆盖先写。求值契约统一：首帧前取首值，末帧后取末值，其间
//! 平移线性插值、旋转球面插值。

use std::collections::{BTreeMap, HashMap};

use glam::{Quat, Vec3};

use super::keyframe::{BoneKeyframe, CameraKeyframe, IkKeyframe, MorphKeyframe};

fn coefficient(prev: u32, next: u32, frame: f32) -> f32 {
    if next <= prev {
        return 0.0;
    }
    ((frame - prev as f32) / ((next - prev) as f32)).clamp(0.0, 1.0)
}

/// 骨骼动画轨道
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoneTrack {
    pub keyframes: BTreeMap<u32, BoneKeyframe>,
}

impl BoneTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入关键帧；同帧覆盖旧值
    pub fn insert(&mut self, keyframe: BoneKeyframe) -> Option<BoneKeyframe> {
        self.keyframes.insert(keyframe.frame, keyframe)
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn max_frame(&self) -> u32 {
        self.keyframes.keys().next_back().copied().unwrap_or(0)
    }

    /// 按小数帧号采样
    pub fn sample(&self, frame: f32) -> (Vec3, Quat) {
        let Some((&first_frame, first)) = self.keyframes.iter().next() else {
            return (Vec3::ZERO, Quat::IDENTITY);
        };
        if frame <= first_frame as f32 {
            return (first.translation, first.rotation);
        }
        let (&last_frame, last) = self.keyframes.iter().next_back().unwrap();
        if frame >= last_frame as f32 {
            return (last.translation, last.rotation);
        }

        let fi = frame.floor() as u32;
        let (&pk, prev) = self.keyframes.range(..=fi).next_back().unwrap();
        let (&nk, next) = self.keyframes.range(fi + 1..).next().unwrap();
        let t = coefficient(pk, nk, frame);
        (
            prev.translation.lerp(next.translation, t),
            prev.rotation.slerp(next.rotation, t),
        )
    }
}

/// Morph 权重轨道
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MorphTrack {
    pub keyframes: BTreeMap<u32, MorphKeyframe>,
}

impl MorphTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keyframe: MorphKeyframe) -> Option<MorphKeyframe> {
        self.keyframes.insert(keyframe.frame, keyframe)
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn max_frame(&self) -> u32 {
        self.keyframes.keys().next_back().copied().unwrap_or(0)
    }

    pub fn sample(&self, frame: f32) -> f32 {
        let Some((&first_frame, first)) = self.keyframes.iter().next() else {
            return 0.0;
        };
        if frame <= first_frame as f32 {
            return first.weight;
        }
        let (&last_frame, last) = self.keyframes.iter().next_back().unwrap();
        if frame >= last_frame as f32 {
            return last.weight;
        }
        let fi = frame.floor() as u32;
        let (&pk, prev) = self.keyframes.range(..=fi).next_back().unwrap();
        let (&nk, next) = self.keyframes.range(fi + 1..).next().unwrap();
        let t = coefficient(pk, nk, frame);
        prev.weight + (next.weight - prev.weight) * t
    }
}

/// IK 开关轨道：取帧号之前最近一帧的状态，默认启用
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IkTrack {
    pub keyframes: BTreeMap<u32, IkKeyframe>,
}

impl IkTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keyframe: IkKeyframe) -> Option<IkKeyframe> {
        self.keyframes.insert(keyframe.frame, keyframe)
    }

    pub fn enabled_at(&self, frame: u32) -> bool {
        self.keyframes
            .range(..=frame)
            .next_back()
            .map(|(_, kf)| kf.enabled)
            .unwrap_or(true)
    }

    pub fn max_frame(&self) -> u32 {
        self.keyframes.keys().next_back().copied().unwrap_or(0)
    }
}

/// 相机采样结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSample {
    pub look_at: Vec3,
    pub angle: Vec3,
    pub distance: f32,
    pub fov: f32,
    pub perspective: bool,
}

impl Default for CameraSample {
    fn default() -> Self {
        Self {
            look_at: Vec3::ZERO,
            angle: Vec3::ZERO,
            distance: 0.0,
            fov: 30.0,
            perspective: true,
        }
    }
}

/// 相机轨道（单轨，不按名称分）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraTrack {
    pub keyframes: BTreeMap<u32, CameraKeyframe>,
}

impl CameraTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keyframe: CameraKeyframe) -> Option<CameraKeyframe> {
        self.keyframes.insert(keyframe.frame, keyframe)
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn max_frame(&self) -> u32 {
        self.keyframes.keys().next_back().copied().unwrap_or(0)
    }

    pub fn sample(&self, frame: f32) -> CameraSample {
        let from_kf = |kf: &CameraKeyframe| CameraSample {
            look_at: kf.look_at,
            angle: kf.angle,
            distance: kf.distance,
            fov: kf.fov,
            perspective: kf.perspective,
        };
        let Some((&first_frame, first)) = self.keyframes.iter().next() else {
            return CameraSample::default();
        };
        if frame <= first_frame as f32 {
            return from_kf(first);
        }
        let (&last_frame, last) = self.keyframes.iter().next_back().unwrap();
        if frame >= last_frame as f32 {
            return from_kf(last);
        }
        let fi = frame.floor() as u32;
        let (&pk, prev) = self.keyframes.range(..=fi).next_back().unwrap();
        let (&nk, next) = self.keyframes.range(fi + 1..).next().unwrap();
        let t = coefficient(pk, nk, frame);
        CameraSample {
            look_at: prev.look_at.lerp(next.look_at, t),
            angle: prev.angle.lerp(next.angle, t),
            distance: prev.distance + (next.distance - prev.distance) * t,
            fov: prev.fov + (next.fov - prev.fov) * t,
            perspective: prev.perspective,
        }
    }
}

/// 动作文档：解析器输出的按名称分轨的动画数据
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MotionDocument {
    /// 目标模型名（VMD 头部；BVH 用根节点名）
    pub name: String,
    /// 帧率：VMD 固定 30，BVH 由 `Frame Time:` 决定
    pub fps: f32,
    pub bone_tracks: HashMap<String, BoneTrack>,
    pub morph_tracks: HashMap<String, MorphTrack>,
    pub ik_tracks: HashMap<String, IkTrack>,
    pub camera_track: CameraTrack,
}

impl MotionDocument {
    pub fn new(name: String, fps: f32) -> Self {
        Self {
            name,
            fps,
            ..Default::default()
        }
    }

    pub fn insert_bone_keyframe(&mut self, name: &str, keyframe: BoneKeyframe) {
        self.bone_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe);
    }

    pub fn insert_morph_keyframe(&mut self, name: &str, keyframe: MorphKeyframe) {
        self.morph_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe);
    }

    pub fn insert_ik_keyframe(&mut self, name: &str, keyframe: IkKeyframe) {
        self.ik_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe);
    }

    /// 最大帧号
    pub fn duration(&self) -> u32 {
        let bone = self
            .bone_tracks
            .values()
            .map(BoneTrack::max_frame)
            .max()
            .unwrap_or(0);
        let morph = self
            .morph_tracks
            .values()
            .map(MorphTrack::max_frame)
            .max()
            .unwrap_or(0);
        let camera = self.camera_track.max_frame();
        bone.max(morph).max(camera)
    }

    /// 秒数 → 小数帧号
    pub fn frame_at(&self, seconds: f32) -> f32 {
        seconds * self.fps
    }

    /// 按时间采样骨骼轨道；无轨道返回恒等变换
    pub fn sample_bone(&self, name: &str, seconds: f32) -> (Vec3, Quat) {
        match self.bone_tracks.get(name) {
            Some(track) => track.sample(self.frame_at(seconds)),
            None => (Vec3::ZERO, Quat::IDENTITY),
        }
    }

    /// 按时间采样 Morph 权重
    pub fn sample_morph(&self, name: &str, seconds: f32) -> f32 {
        match self.morph_tracks.get(name) {
            Some(track) => track.sample(self.frame_at(seconds)),
            None => 0.0,
        }
    }

    pub fn bone_track_names(&self) -> impl Iterator<Item = &String> {
        self.bone_tracks.keys()
    }

    pub fn morph_track_names(&self) -> impl Iterator<Item = &String> {
        self.morph_tracks.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_two_keys() -> BoneTrack {
        let mut track = BoneTrack::new();
        track.insert(BoneKeyframe::new(10, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY));
        track.insert(BoneKeyframe::new(
            20,
            Vec3::new(3.0, 4.0, 0.0),
            Quat::from_rotation_y(1.0),
        ));
        track
    }

    #[test]
    fn test_clamp_before_first_and_after_last() {
        let track = track_two_keys();
        let (t, _) = track.sample(0.0);
        assert_eq!(t, Vec3::new(1.0, 0.0, 0.0));
        let (t, r) = track.sample(100.0);
        assert_eq!(t, Vec3::new(3.0, 4.0, 0.0));
        assert!((r.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_exact_key_has_no_interpolation_error() {
        let track = track_two_keys();
        let (t, r) = track.sample(10.0);
        assert_eq!(t, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(r, Quat::IDENTITY);
        let (t, _) = track.sample(20.0);
        assert_eq!(t, Vec3::new(3.0, 4.0, 0.0));
    }

    #[test]
    fn test_midpoint_is_arithmetic_mean() {
        let track = track_two_keys();
        let (t, r) = track.sample(15.0);
        assert!((t - Vec3::new(2.0, 2.0, 0.0)).length() < 1e-5);
        // 旋转保持单位范数
        assert!((r.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_duplicate_frame_overwrites() {
        let mut track = MorphTrack::new();
        track.insert(MorphKeyframe {
            frame: 5,
            weight: 0.2,
        });
        track.insert(MorphKeyframe {
            frame: 5,
            weight: 0.9,
        });
        assert_eq!(track.keyframes.len(), 1);
        assert!((track.sample(5.0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_unsorted_insertion_sorts_by_frame() {
        let mut track = MorphTrack::new();
        track.insert(MorphKeyframe {
            frame: 30,
            weight: 1.0,
        });
        track.insert(MorphKeyframe {
            frame: 0,
            weight: 0.0,
        });
        assert!((track.sample(15.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ik_track_state_holds() {
        let mut track = IkTrack::new();
        assert!(track.enabled_at(0));
        track.insert(IkKeyframe {
            frame: 10,
            enabled: false,
        });
        assert!(track.enabled_at(9));
        assert!(!track.enabled_at(10));
        assert!(!track.enabled_at(999));
    }

    #[test]
    fn test_time_to_frame_conversion() {
        let mut doc = MotionDocument::new(String::new(), 30.0);
        doc.insert_morph_keyframe(
            "あ",
            MorphKeyframe {
                frame: 0,
                weight: 0.0,
            },
        );
        doc.insert_morph_keyframe(
            "あ",
            MorphKeyframe {
                frame: 30,
                weight: 1.0,
            },
        );
        // 0.5 秒 = 第 15 帧
        assert!((doc.sample_morph("あ", 0.5) - 0.5).abs() < 1e-6);
    }
}
