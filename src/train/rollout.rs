//! 롤아웃 상태 기계
//!
//! t=0은 그라운드 트루스에서 포즈를 받는 교사 강제 프레임, 이후에는
//! 직전 스텝의 자기 예측을 먹는 자기회귀 프레임이다. 분기는 루프에
//! 흩어진 인덱스 검사 대신 명시적 상태 태그로 관리한다.
//! 누적된 예측 윈도우는 종료 후 한 번의 배치 FK 호출로 넘어간다.

use candle_core::{bail, Result, Tensor, D};

use crate::data::MotionBatch;
use crate::model::normalize_quat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutPhase {
    /// 다음 advance가 첫 프레임 (포즈 = GT 시작 프레임)
    Teacher,
    /// 다음 advance가 자기회귀 프레임 (포즈 = 직전 예측)
    Autoregressive,
    /// training_frames 스텝 완료
    Done,
}

/// 완료된 롤아웃의 스택된 예측 시퀀스
#[derive(Debug)]
pub struct RolloutOutput {
    /// (B, T, J, 4) 정규화된 로컬 쿼터니언
    pub local_q: Tensor,
    /// (B, T, 3) 루트 위치
    pub root_p: Tensor,
    /// (B, T, 4) 접촉 확률
    pub contact: Tensor,
}

pub struct Rollout {
    phase: RolloutPhase,
    step: usize,
    total_steps: usize,
    num_joints: usize,
    // 현재 포즈 (Teacher 단계에선 GT, 이후엔 자기 예측)
    root_p: Tensor,  // (B, 3)
    root_v: Tensor,  // (B, 3)
    local_q: Tensor, // (B, J*4) 평탄화
    contact: Tensor, // (B, 4)
    // 윈도우 고정 조건
    root_p_offset: Tensor,  // (B, 3)
    local_q_offset: Tensor, // (B, J*4)
    target: Tensor,         // (B, J*4)
    // 누적 예측
    pred_root: Vec<Tensor>,
    pred_q: Vec<Tensor>, // (B, J, 4)
    pred_contact: Vec<Tensor>,
}

impl Rollout {
    /// 윈도우 시작 오프셋의 GT 프레임으로 기계를 시드한다.
    pub fn begin(batch: &MotionBatch, start_idx: usize, total_steps: usize) -> Result<Self> {
        let b = batch.batch_size();
        let j = batch.num_joints();
        if start_idx + total_steps + 1 > batch.window() {
            bail!(
                "윈도우 {}가 오프셋 {} + 프레임 {}를 담지 못함",
                batch.window(),
                start_idx,
                total_steps
            );
        }

        let root_p = batch.root_p.narrow(1, start_idx, 1)?.squeeze(1)?;
        let root_v = batch.root_v.narrow(1, start_idx, 1)?.squeeze(1)?;
        let local_q = batch
            .local_q
            .narrow(1, start_idx, 1)?
            .squeeze(1)?
            .reshape((b, j * 4))?;
        let contact = batch.contact.narrow(1, start_idx, 1)?.squeeze(1)?;

        Ok(Self {
            phase: RolloutPhase::Teacher,
            step: 0,
            total_steps,
            num_joints: j,
            root_p,
            root_v,
            local_q,
            contact,
            root_p_offset: batch.root_p_offset.clone(),
            local_q_offset: batch.local_q_offset.clone().reshape((b, j * 4))?,
            target: batch.q_target.clone().reshape((b, j * 4))?,
            pred_root: Vec::with_capacity(total_steps),
            pred_q: Vec::with_capacity(total_steps),
            pred_contact: Vec::with_capacity(total_steps),
        })
    }

    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == RolloutPhase::Done
    }

    /// 타깃 프레임까지 남은 스텝 수 (위치 인코딩 키)
    pub fn time_to_arrival(&self) -> usize {
        self.total_steps - self.step
    }

    /// 현재 포즈에서 (state, offset, target) 입력 벡터를 구성
    pub fn inputs(&self) -> Result<(Tensor, Tensor, Tensor)> {
        assert_eq!(
            self.root_p_offset.dims(),
            self.root_p.dims(),
            "오프셋/루트 위치 형상 불일치"
        );
        let state = Tensor::cat(&[&self.local_q, &self.root_v, &self.contact], D::Minus1)?;
        let root_off = (&self.root_p_offset - &self.root_p)?;
        let q_off = (&self.local_q_offset - &self.local_q)?;
        let offset = Tensor::cat(&[&root_off, &q_off], D::Minus1)?;
        Ok((state, offset, self.target.clone()))
    }

    /// 디코더 잔차를 직전 포즈에 적분하고 쿼터니언을 재정규화해 프레임을 확정.
    /// `pose_delta`: (B, J*4 + 3), `contact_pred`: (B, 4)
    pub fn advance(&mut self, pose_delta: &Tensor, contact_pred: &Tensor) -> Result<()> {
        if self.phase == RolloutPhase::Done {
            bail!("완료된 롤아웃에 advance 호출됨");
        }
        let b = self.root_p.dims()[0];
        let q_dim = self.num_joints * 4;
        assert_eq!(
            pose_delta.dim(D::Minus1)?,
            q_dim + 3,
            "포즈 잔차 폭 불일치"
        );

        let q_delta = pose_delta.narrow(D::Minus1, 0, q_dim)?;
        let root_v_pred = pose_delta.narrow(D::Minus1, q_dim, 3)?;

        let local_q_pred = (&self.local_q + &q_delta)?;
        let q4 = local_q_pred.reshape((b, self.num_joints, 4))?;
        let q4 = normalize_quat(&q4)?; // 매 스텝 필수: 회전 유효성 유지
        let root_pred = (&self.root_p + &root_v_pred)?;

        self.pred_q.push(q4.clone());
        self.pred_root.push(root_pred.clone());
        self.pred_contact.push(contact_pred.clone());

        // 다음 스텝의 자기회귀 입력
        self.local_q = q4.reshape((b, q_dim))?;
        self.root_p = root_pred;
        self.root_v = root_v_pred;
        self.contact = contact_pred.clone();

        self.step += 1;
        self.phase = if self.step == self.total_steps {
            RolloutPhase::Done
        } else {
            RolloutPhase::Autoregressive
        };
        Ok(())
    }

    /// 예측 시퀀스를 시간축으로 스택해 반환. Done 상태에서만 유효.
    pub fn finish(self) -> Result<RolloutOutput> {
        if self.phase != RolloutPhase::Done {
            bail!("롤아웃이 {} / {} 스텝에서 중단됨", self.step, self.total_steps);
        }
        Ok(RolloutOutput {
            local_q: Tensor::stack(&self.pred_q, 1)?,
            root_p: Tensor::stack(&self.pred_root, 1)?,
            contact: Tensor::stack(&self.pred_contact, 1)?,
        })
    }
}
