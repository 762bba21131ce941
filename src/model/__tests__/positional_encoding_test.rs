use anyhow::Result;
use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Tensor};

use crate::model::positional_encoding::PositionalEncoding;

#[test]
fn 영벡터에_적용하면_테이블_행이_그대로_나온다() -> Result<()> {
    let device = Device::Cpu;
    let dim = 8;
    let pe = PositionalEncoding::new(dim, 40, &device)?;

    let zero = Tensor::zeros((1, dim), DType::F32, &device)?;
    let tta = 13usize;
    let row = pe.apply(&zero, tta)?.flatten_all()?.to_vec1::<f32>()?;

    for i in (0..dim).step_by(2) {
        let angle = tta as f32 / 10000f32.powf(i as f32 / dim as f32);
        assert_abs_diff_eq!(row[i], angle.sin(), epsilon = 1e-6);
        assert_abs_diff_eq!(row[i + 1], angle.cos(), epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn 같은_tta는_항상_같은_값() -> Result<()> {
    let device = Device::Cpu;
    let pe = PositionalEncoding::new(16, 30, &device)?;
    let x = Tensor::randn(0f32, 1f32, (2, 16), &device)?;

    let a = pe.apply(&x, 7)?.flatten_all()?.to_vec1::<f32>()?;
    let b = pe.apply(&x, 7)?.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(a, b, "정수 조회라 결정적이어야 함");
    Ok(())
}

#[test]
fn 최대_길이_tta까지는_조회_가능() -> Result<()> {
    let device = Device::Cpu;
    let pe = PositionalEncoding::new(16, 30, &device)?;
    let x = Tensor::zeros((1, 16), DType::F32, &device)?;
    pe.apply(&x, 30)?;
    pe.apply(&x, 0)?;
    Ok(())
}

#[test]
#[should_panic(expected = "테이블 길이")]
fn 테이블_범위_밖_tta는_즉시_실패() {
    let device = Device::Cpu;
    let pe = PositionalEncoding::new(16, 30, &device).unwrap();
    let x = Tensor::zeros((1, 16), DType::F32, &device).unwrap();
    let _ = pe.apply(&x, 31);
}
