//! RMI (Recurrent Motion In-betweening) 라이브러리
//!
//! 시작 포즈와 타깃 포즈 사이의 중간 프레임을 적대적으로 학습된
//! 순환 인코더-디코더로 합성한다. 스켈레톤 FK, 시간-도착 위치 인코딩,
//! 노이즈 커리큘럼, LSGAN 판별기, 동결 내보내기까지 포함.

pub mod config;
pub mod data;
pub mod infer;
pub mod model;
pub mod train;

// 핵심 타입 재수출
pub use config::{resolve_device, Config};
pub use data::{BatchSource, FeatureDims, MotionBatch, PoseStats, SyntheticSource};
pub use infer::{InferenceSession, WeightFormat};
pub use model::{DatasetProfile, PositionalEncoding, RampDownSchedule, Skeleton};
pub use train::{LossAccumulator, Rollout, RolloutPhase};
