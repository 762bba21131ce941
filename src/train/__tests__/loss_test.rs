use anyhow::Result;
use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Tensor};

use crate::train::loss::{
    self, contact_loss, lsgan_critic_loss, lsgan_generator_loss, position_loss, quat_loss,
    root_loss,
};
use crate::train::LossAccumulator;

fn scalar(v: f32, device: &Device) -> Tensor {
    Tensor::new(v, device).unwrap()
}

#[test]
fn 누산기는_가중합을_계산한다() -> Result<()> {
    let device = Device::Cpu;
    let mut acc = LossAccumulator::new();
    acc.push("a", 0.5, scalar(2.0, &device));
    acc.push("b", 2.0, scalar(3.0, &device));

    // 0.5·2 + 2·3 = 7
    assert_abs_diff_eq!(acc.total()?.to_scalar::<f32>()?, 7.0, epsilon = 1e-6);
    assert_eq!(acc.terms().len(), 2);

    let report = acc.describe()?;
    assert!(report.contains("a=2.0000"), "리포트에 항별 값 포함: {report}");
    Ok(())
}

#[test]
fn 빈_누산기의_total은_에러() {
    let acc = LossAccumulator::new();
    assert!(acc.total().is_err());
}

#[test]
fn lsgan_타깃에서_손실은_0() -> Result<()> {
    let device = Device::Cpu;
    let ones = Tensor::ones((4,), DType::F32, &device)?;
    let zeros = Tensor::zeros((4,), DType::F32, &device)?;

    // 판별기 이상점: real → 1, fake → 0
    assert_abs_diff_eq!(
        lsgan_critic_loss(&ones, &zeros)?.to_scalar::<f32>()?,
        0.0,
        epsilon = 1e-6
    );
    // 생성기 이상점: fake → 1
    assert_abs_diff_eq!(
        lsgan_generator_loss(&ones)?.to_scalar::<f32>()?,
        0.0,
        epsilon = 1e-6
    );
    // 완전히 속지 못한 경우: real=0, fake=1 → (1 + 1)/2
    assert_abs_diff_eq!(
        lsgan_critic_loss(&zeros, &ones)?.to_scalar::<f32>()?,
        1.0,
        epsilon = 1e-6
    );
    Ok(())
}

#[test]
fn 동일_입력이면_재구성_손실은_전부_0() -> Result<()> {
    let device = Device::Cpu;
    let pos = Tensor::randn(0f32, 1f32, (2, 6, 3, 3), &device)?;
    let std = Tensor::ones((3, 3), DType::F32, &device)?;
    let root = Tensor::randn(0f32, 1f32, (2, 6, 3), &device)?;
    let root_std = Tensor::ones((3,), DType::F32, &device)?;
    let q = Tensor::randn(0f32, 1f32, (2, 6, 3, 4), &device)?;
    let c = Tensor::randn(0f32, 1f32, (2, 6, 4), &device)?;

    assert_abs_diff_eq!(position_loss(&pos, &pos, &std)?.to_scalar::<f32>()?, 0.0);
    assert_abs_diff_eq!(root_loss(&root, &root, &root_std)?.to_scalar::<f32>()?, 0.0);
    assert_abs_diff_eq!(quat_loss(&q, &q)?.to_scalar::<f32>()?, 0.0);
    assert_abs_diff_eq!(contact_loss(&c, &c)?.to_scalar::<f32>()?, 0.0);
    assert_abs_diff_eq!(
        loss::global_rotation_loss(&q, &q)?.to_scalar::<f32>()?,
        0.0
    );
    Ok(())
}

#[test]
fn 위치_손실은_표준편차로_정규화된다() -> Result<()> {
    let device = Device::Cpu;
    // 오차 1을 모든 성분에: 평균은 frames로 나눠 1 → std=2면 0.5
    let frames = 4;
    let pred = Tensor::ones((1, frames, 2, 3), DType::F32, &device)?;
    let gt = Tensor::zeros((1, frames, 2, 3), DType::F32, &device)?;
    let std1 = Tensor::ones((2, 3), DType::F32, &device)?;
    let std2 = std1.affine(2.0, 0.0)?;

    let base = position_loss(&pred, &gt, &std1)?.to_scalar::<f32>()?;
    let halved = position_loss(&pred, &gt, &std2)?.to_scalar::<f32>()?;
    assert_abs_diff_eq!(base, 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(halved, 0.5, epsilon = 1e-6);
    Ok(())
}
