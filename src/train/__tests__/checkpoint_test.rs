use anyhow::Result;
use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::model::InputEncoder;
use crate::train::checkpoint;

fn encoder_with_map(input_dim: usize, device: &Device) -> Result<(VarMap, InputEncoder)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let encoder = InputEncoder::new(input_dim, vb)?;
    Ok((varmap, encoder))
}

#[test]
fn 네이티브_저장_로드는_출력을_보존한다() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;
    let (varmap, encoder) = encoder_with_map(12, &device)?;

    let dir = checkpoint::save_checkpoint(tmp.path(), 7, &[("state_encoder", &varmap)], false)?;
    assert!(dir.ends_with("trained_weight_7"));
    assert!(checkpoint::native_weight_file(&dir, "state_encoder").exists());

    let x = Tensor::randn(0f32, 1f32, (3, 12), &device)?;
    let expect = encoder.forward(&x)?.flatten_all()?.to_vec1::<f32>()?;

    // 새 VarMap에 되읽어 같은 입력으로 비교
    let (mut fresh_map, fresh) = encoder_with_map(12, &device)?;
    checkpoint::load_native(&dir, "state_encoder", &mut fresh_map)?;
    let got = fresh.forward(&x)?.flatten_all()?.to_vec1::<f32>()?;
    for (a, b) in got.iter().zip(expect.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn 추론_모듈은_동결_번들도_같이_내보낸다() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;
    let (enc_map, _) = encoder_with_map(8, &device)?;
    let (critic_map, _) = encoder_with_map(8, &device)?;

    let dir = checkpoint::save_checkpoint(
        tmp.path(),
        1,
        &[
            ("state_encoder", &enc_map),
            ("short_discriminator", &critic_map),
        ],
        false,
    )?;

    assert!(checkpoint::frozen_weight_file(&dir, "state_encoder").exists());
    // 판별기는 학습 전용이라 동결 내보내기 없음
    assert!(!checkpoint::frozen_weight_file(&dir, "short_discriminator").exists());
    Ok(())
}

#[test]
fn 동결_번들_텐서는_원본과_일치() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;
    let (varmap, _) = encoder_with_map(8, &device)?;

    checkpoint::export_frozen(tmp.path(), "state_encoder", &varmap)?;
    let tensors = checkpoint::load_frozen(tmp.path(), "state_encoder", &device)?;

    let fc0 = checkpoint::required_tensor(&tensors, "state_encoder", "fc0.weight")?;
    assert_eq!(fc0.dims(), &[512, 8]);
    let data = varmap.data().lock().unwrap();
    let orig = data["fc0.weight"]
        .as_tensor()
        .flatten_all()?
        .to_vec1::<f32>()?;
    let exported = fc0.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(orig, exported);
    Ok(())
}

#[test]
fn 없는_경로와_누락_키는_즉시_실패() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;

    let mut varmap = VarMap::new();
    assert!(checkpoint::load_native(tmp.path(), "lstm", &mut varmap).is_err());
    assert!(checkpoint::load_frozen(tmp.path(), "lstm", &device).is_err());

    let tensors = std::collections::HashMap::new();
    assert!(checkpoint::required_tensor(&tensors, "lstm", "weight_ih_l0").is_err());
    Ok(())
}
