//! 场景图与动画求值

mod node;
mod scene;

pub use node::SceneNode;
pub use scene::{
    BonePose, ImportOptions, MotionHandle, NodeHandle, Pose, Scene, SceneEvent,
};
