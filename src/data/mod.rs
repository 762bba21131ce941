//! 데이터 경계 모듈
//!
//! 실제 모캡 로더(파일 파싱/캐싱/워커 병렬화)는 외부 협력자다.
//! 코어는 `BatchSource`에서 배치를 꺼내 쓰기만 하며, 테스트와 스모크 런은
//! 결정적 합성 소스로 같은 경계를 통과한다.

use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::Skeleton;

/// 프레임 피처 폭. 상태/오프셋/타깃 인코더의 입력 차원이 여기서 파생된다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDims {
    pub num_joints: usize,
    pub root_v: usize,
    pub contact: usize,
}

impl FeatureDims {
    pub fn new(num_joints: usize) -> Self {
        Self {
            num_joints,
            root_v: 3,
            contact: 4,
        }
    }

    pub fn local_q(&self) -> usize {
        self.num_joints * 4
    }

    /// state 입력 = [local_q, root_v, contact]
    pub fn state_in(&self) -> usize {
        self.local_q() + self.root_v + self.contact
    }

    /// offset 입력 = [root_p 차이, local_q 차이]
    pub fn offset_in(&self) -> usize {
        self.root_v + self.local_q()
    }

    /// target 입력 = 타깃 프레임 local_q
    pub fn target_in(&self) -> usize {
        self.local_q()
    }
}

/// 손실 정규화용 데이터셋 통계
#[derive(Debug, Clone)]
pub struct PoseStats {
    /// 축별 전역 위치 표준편차 (J, 3)
    pub global_pos_std: Tensor,
}

impl PoseStats {
    pub fn ones(num_joints: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            global_pos_std: Tensor::ones((num_joints, 3), candle_core::DType::F32, device)?,
        })
    }

    /// 루트 조인트 행 (3,)
    pub fn root_std(&self) -> Result<Tensor> {
        self.global_pos_std.narrow(0, 0, 1)?.squeeze(0)
    }
}

/// 학습/추론 윈도우 한 배치. 모든 텐서의 선두 차원은 배치다.
#[derive(Debug, Clone)]
pub struct MotionBatch {
    /// (B, W, J, 4) 로컬 쿼터니언
    pub local_q: Tensor,
    /// (B, W, 3) 루트 속도
    pub root_v: Tensor,
    /// (B, W, 4) 발 접촉 플래그
    pub contact: Tensor,
    /// (B, W, 3) 루트 위치
    pub root_p: Tensor,
    /// (B, W, J, 3) 전역 조인트 위치
    pub global_pos: Tensor,
    /// (B, W, J, 4) 전역 조인트 회전
    pub global_rot: Tensor,
    /// (B, 3) 타깃 프레임 루트 위치
    pub root_p_offset: Tensor,
    /// (B, J, 4) 타깃 프레임 로컬 쿼터니언
    pub local_q_offset: Tensor,
    /// (B, J, 4) 타깃 쿼터니언 (target 인코더 입력)
    pub q_target: Tensor,
}

impl MotionBatch {
    /// 윈도우 텐서에서 타깃 프레임 조건 필드를 잘라내 배치를 구성
    pub fn from_window(
        local_q: Tensor,
        root_v: Tensor,
        contact: Tensor,
        root_p: Tensor,
        global_pos: Tensor,
        global_rot: Tensor,
        target_idx: usize,
    ) -> Result<Self> {
        let root_p_offset = root_p.narrow(1, target_idx, 1)?.squeeze(1)?;
        let local_q_offset = local_q.narrow(1, target_idx, 1)?.squeeze(1)?;
        let q_target = local_q_offset.clone();
        Ok(Self {
            local_q,
            root_v,
            contact,
            root_p,
            global_pos,
            global_rot,
            root_p_offset,
            local_q_offset,
            q_target,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.local_q.dims()[0]
    }

    pub fn window(&self) -> usize {
        self.local_q.dims()[1]
    }

    pub fn num_joints(&self) -> usize {
        self.local_q.dims()[2]
    }
}

/// 배치 공급 경계. 외부 로더는 워커 스레드에서 이 인터페이스 뒤로 공급한다.
pub trait BatchSource {
    fn dims(&self) -> FeatureDims;
    fn stats(&self) -> &PoseStats;
    /// 에폭 시작 시 호출
    fn reset(&mut self);
    fn next_batch(&mut self) -> Option<Result<MotionBatch>>;
    fn num_batches(&self) -> Option<usize> {
        None
    }
}

/// 결정적 합성 배치 소스. 모캡 로더의 자리 표시자.
///
/// 루트는 일정 속도로 이동하고 각 조인트는 작은 각속도로 드리프트하는
/// 매끄러운 윈도우를 만들어 FK로 전역 항을 채운다.
pub struct SyntheticSource {
    skeleton: Skeleton,
    window: usize,
    batch_size: usize,
    batches_per_epoch: usize,
    seed: u64,
    served: usize,
    stats: PoseStats,
    device: Device,
}

impl SyntheticSource {
    pub fn new(
        skeleton: Skeleton,
        window: usize,
        batch_size: usize,
        batches_per_epoch: usize,
        seed: u64,
    ) -> Result<Self> {
        let device = skeleton.device().clone();
        let stats = PoseStats::ones(skeleton.num_joints(), &device)?;
        Ok(Self {
            skeleton,
            window,
            batch_size,
            batches_per_epoch,
            seed,
            served: 0,
            stats,
            device,
        })
    }

    fn generate(&self, batch_index: usize) -> Result<MotionBatch> {
        let b = self.batch_size;
        let w = self.window;
        let j = self.skeleton.num_joints();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(batch_index as u64));

        let mut local_q = vec![0f32; b * w * j * 4];
        let mut root_v = vec![0f32; b * w * 3];
        let mut root_p = vec![0f32; b * w * 3];
        let mut contact = vec![0f32; b * w * 4];

        for bi in 0..b {
            let vel: [f32; 3] = [
                rng.gen_range(-0.02..0.02),
                0.0,
                rng.gen_range(-0.02..0.02),
            ];
            let p0: [f32; 3] = [rng.gen_range(-1.0..1.0), 0.9, rng.gen_range(-1.0..1.0)];
            // 조인트별 고정 회전축과 천천히 변하는 각도
            let axes: Vec<[f32; 3]> = (0..j)
                .map(|_| {
                    let v = [
                        rng.gen_range(-1.0f32..1.0),
                        rng.gen_range(-1.0f32..1.0),
                        rng.gen_range(-1.0f32..1.0),
                    ];
                    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt().max(1e-6);
                    [v[0] / n, v[1] / n, v[2] / n]
                })
                .collect();
            let theta0: Vec<f32> = (0..j).map(|_| rng.gen_range(-0.3..0.3)).collect();
            let dtheta: Vec<f32> = (0..j).map(|_| rng.gen_range(-0.01..0.01)).collect();

            for t in 0..w {
                for axis in 0..3 {
                    root_p[((bi * w) + t) * 3 + axis] = p0[axis] + vel[axis] * t as f32;
                    root_v[((bi * w) + t) * 3 + axis] = vel[axis];
                }
                for c in 0..4 {
                    contact[((bi * w) + t) * 4 + c] = if c < 2 { 1.0 } else { 0.0 };
                }
                for jo in 0..j {
                    let half = 0.5 * (theta0[jo] + dtheta[jo] * t as f32);
                    let (s, cval) = (half.sin(), half.cos());
                    let base = (((bi * w) + t) * j + jo) * 4;
                    local_q[base] = cval;
                    local_q[base + 1] = s * axes[jo][0];
                    local_q[base + 2] = s * axes[jo][1];
                    local_q[base + 3] = s * axes[jo][2];
                }
            }
        }

        let local_q = Tensor::from_vec(local_q, (b, w, j, 4), &self.device)?;
        let root_v = Tensor::from_vec(root_v, (b, w, 3), &self.device)?;
        let root_p = Tensor::from_vec(root_p, (b, w, 3), &self.device)?;
        let contact = Tensor::from_vec(contact, (b, w, 4), &self.device)?;
        let (global_pos, global_rot) = self
            .skeleton
            .forward_kinematics_with_rotation(&local_q, &root_p)?;

        MotionBatch::from_window(
            local_q,
            root_v,
            contact,
            root_p,
            global_pos,
            global_rot,
            w - 1,
        )
    }
}

impl BatchSource for SyntheticSource {
    fn dims(&self) -> FeatureDims {
        FeatureDims::new(self.skeleton.num_joints())
    }

    fn stats(&self) -> &PoseStats {
        &self.stats
    }

    fn reset(&mut self) {
        self.served = 0;
    }

    fn next_batch(&mut self) -> Option<Result<MotionBatch>> {
        if self.served >= self.batches_per_epoch {
            return None;
        }
        let batch = self.generate(self.served);
        self.served += 1;
        Some(batch)
    }

    fn num_batches(&self) -> Option<usize> {
        Some(self.batches_per_epoch)
    }
}
