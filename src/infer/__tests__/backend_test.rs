use anyhow::Result;
use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::data::FeatureDims;
use crate::infer::backend::{self, TensorMap};
use crate::infer::WeightFormat;
use crate::model::{Decoder, InputEncoder, LstmNetwork, LSTM_INPUT_DIM};
use crate::train::checkpoint;

fn assert_close(a: &Tensor, b: &Tensor, tol: f32) -> Result<()> {
    let a = a.flatten_all()?.to_vec1::<f32>()?;
    let b = b.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = tol);
    }
    Ok(())
}

fn input_map(x: &Tensor) -> TensorMap {
    let mut m = TensorMap::new();
    m.insert("input".to_string(), x.clone());
    m
}

#[test]
fn 동결_인코더는_네이티브_순전파와_일치() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let encoder = InputEncoder::new(15, vb)?;
    checkpoint::export_frozen(tmp.path(), "state_encoder", &varmap)?;

    let runner = backend::load_frozen_encoder(tmp.path(), "state_encoder", 15, &device)?;
    let x = Tensor::randn(0f32, 1f32, (3, 15), &device)?;
    let got = backend::fetch(&runner.run(&input_map(&x))?, "latent")?;
    assert_close(&got, &encoder.forward(&x)?, 1e-4)?;
    Ok(())
}

#[test]
fn 동결_lstm은_네이티브_셀과_같은_상태를_만든다() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut native = LstmNetwork::new(LSTM_INPUT_DIM, LSTM_INPUT_DIM, vb)?;
    checkpoint::export_frozen(tmp.path(), "lstm", &varmap)?;

    let runner = backend::load_frozen_lstm(tmp.path(), &device)?;

    let b = 2;
    native.init_hidden(b)?;
    let mut h = Tensor::zeros((b, LSTM_INPUT_DIM), DType::F32, &device)?;
    let mut c = h.clone();
    for step in 0..3 {
        let x = Tensor::randn(0f32, 1f32, (b, LSTM_INPUT_DIM), &device)?;
        let expect = native.step(&x)?;

        let mut inputs = input_map(&x);
        inputs.insert("h".to_string(), h.clone());
        inputs.insert("c".to_string(), c.clone());
        let out = runner.run(&inputs)?;
        h = backend::fetch(&out, "h")?;
        c = backend::fetch(&out, "c")?;

        assert_close(&h, &expect, 1e-4).map_err(|e| e.context(format!("step {step}")))?;
    }
    Ok(())
}

#[test]
fn 동결_디코더는_네이티브와_같은_포즈와_접촉을_낸다() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let decoder = Decoder::new(LSTM_INPUT_DIM, 11, 4, vb)?;
    checkpoint::export_frozen(tmp.path(), "decoder", &varmap)?;

    let runner = backend::load_frozen_decoder(tmp.path(), 11, &device)?;
    let x = Tensor::randn(0f32, 1f32, (2, LSTM_INPUT_DIM), &device)?;
    let (pose, contact) = decoder.forward(&x)?;
    let out = runner.run(&input_map(&x))?;
    assert_close(&backend::fetch(&out, "pose")?, &pose, 1e-4)?;
    assert_close(&backend::fetch(&out, "contact")?, &contact, 1e-4)?;
    Ok(())
}

#[test]
fn 입력_폭이_다른_동결_번들은_로드에서_거부() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let _ = InputEncoder::new(15, vb)?;
    checkpoint::export_frozen(tmp.path(), "state_encoder", &varmap)?;

    let dims = FeatureDims::new(4); // state_in = 23 != 15
    assert!(
        backend::load_frozen_encoder(tmp.path(), "state_encoder", dims.state_in(), &device)
            .is_err()
    );
    Ok(())
}

#[test]
fn 러너_입출력_키_누락은_즉시_에러() -> Result<()> {
    let map = TensorMap::new();
    assert!(backend::fetch(&map, "input").is_err());
    Ok(())
}

#[test]
fn 가중치_포맷_선택자_폴백() {
    assert_eq!(WeightFormat::from_arg("native"), WeightFormat::Native);
    assert_eq!(WeightFormat::from_arg("FROZEN"), WeightFormat::Frozen);
    // 더 이상 지원하지 않는 포맷 이름은 기본값으로
    assert_eq!(WeightFormat::from_arg("ONNX"), WeightFormat::Frozen);
    assert_eq!(WeightFormat::Frozen.name(), "FROZEN");
}
