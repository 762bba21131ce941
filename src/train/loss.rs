//! 손실 항 계산과 누산기
//!
//! 손실 분류 체계가 항 단위로 확장/테스트 가능하도록
//! (이름, 가중치, 스칼라 텐서) 목록을 제네릭하게 합산한다.

use candle_core::{bail, Result, Tensor, D};

pub struct LossTerm {
    pub name: &'static str,
    pub weight: f64,
    pub value: Tensor,
}

#[derive(Default)]
pub struct LossAccumulator {
    terms: Vec<LossTerm>,
}

impl LossAccumulator {
    pub fn new() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn push(&mut self, name: &'static str, weight: f64, value: Tensor) {
        self.terms.push(LossTerm {
            name,
            weight,
            value,
        });
    }

    pub fn terms(&self) -> &[LossTerm] {
        &self.terms
    }

    /// Σ weight·term
    pub fn total(&self) -> Result<Tensor> {
        if self.terms.is_empty() {
            bail!("손실 항이 하나도 없음");
        }
        let mut total = self.terms[0].value.affine(self.terms[0].weight, 0.0)?;
        for term in &self.terms[1..] {
            total = (&total + &term.value.affine(term.weight, 0.0)?)?;
        }
        Ok(total)
    }

    /// 항별 현재 값 리포트 (진행 바 메시지용)
    pub fn describe(&self) -> Result<String> {
        let mut parts = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            parts.push(format!("{}={:.4}", term.name, term.value.to_scalar::<f32>()?));
        }
        Ok(parts.join(" "))
    }
}

/// 전역 조인트 위치 L1. 시간축 합산 후 축별 표준편차와 시퀀스 길이로 정규화.
/// `pred`/`gt`: (B, T, J, 3), `pos_std`: (J, 3)
pub fn position_loss(pred: &Tensor, gt: &Tensor, pos_std: &Tensor) -> Result<Tensor> {
    let frames = pred.dims()[1];
    let summed = (pred - gt)?.abs()?.sum(1)?; // (B, J, 3)
    summed
        .broadcast_div(pos_std)?
        .mean_all()?
        .affine(1.0 / frames as f64, 0.0)
}

/// 루트 위치 L1. `pred`/`gt`: (B, T, 3), `root_std`: (3,)
pub fn root_loss(pred: &Tensor, gt: &Tensor, root_std: &Tensor) -> Result<Tensor> {
    let frames = pred.dims()[1];
    let summed = (pred - gt)?.abs()?.sum(1)?; // (B, 3)
    summed
        .broadcast_div(root_std)?
        .mean_all()?
        .affine(1.0 / frames as f64, 0.0)
}

/// 로컬 쿼터니언 L1. `pred`/`gt`: (B, T, J, 4)
pub fn quat_loss(pred: &Tensor, gt: &Tensor) -> Result<Tensor> {
    let frames = pred.dims()[1];
    (pred - gt)?
        .abs()?
        .sum(1)?
        .mean_all()?
        .affine(1.0 / frames as f64, 0.0)
}

/// 전역 회전 프로베니우스 노름 오차 (정규화 없음). `pred`/`gt`: (B, T, J, 4)
pub fn global_rotation_loss(pred: &Tensor, gt: &Tensor) -> Result<Tensor> {
    (pred - gt)?
        .sqr()?
        .flatten_from(2)?
        .sum(D::Minus1)?
        .sqrt()?
        .mean_all()
}

/// 발 접촉 L1. `pred`/`gt`: (B, T, 4)
pub fn contact_loss(pred: &Tensor, gt: &Tensor) -> Result<Tensor> {
    let frames = pred.dims()[1];
    (pred - gt)?
        .abs()?
        .sum(1)?
        .mean_all()?
        .affine(1.0 / frames as f64, 0.0)
}

/// LSGAN 판별기 손실: (mean(fake²) + mean((real − 1)²)) / 2
pub fn lsgan_critic_loss(real_logits: &Tensor, fake_logits: &Tensor) -> Result<Tensor> {
    let real = real_logits.affine(1.0, -1.0)?.sqr()?.mean_all()?;
    let fake = fake_logits.sqr()?.mean_all()?;
    (&real + &fake)? * 0.5
}

/// LSGAN 생성기 손실: mean((fake − 1)²)
pub fn lsgan_generator_loss(fake_logits: &Tensor) -> Result<Tensor> {
    fake_logits.affine(1.0, -1.0)?.sqr()?.mean_all()
}
