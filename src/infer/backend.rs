//! 추론 모듈 실행 백엔드
//!
//! 네이티브(candle 모듈 + safetensors 체크포인트)와 동결(학습 의존성 없는
//! 생 텐서 번들) 두 경로가 같은 `run(named inputs) -> named outputs` 계약을
//! 구현한다. 경로 선택은 로드 시 한 번이며, 호출 지점에서 문자열 분기하지
//! 않는다.

use std::collections::HashMap;
use std::path::Path;

use anyhow::bail;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::rnn::LSTMState;
use candle_nn::{lstm, ops, LSTMConfig, VarBuilder, VarMap, LSTM, RNN};

use crate::model::{Decoder, InputEncoder, LSTM_INPUT_DIM};
use crate::train::checkpoint;

pub type TensorMap = HashMap<String, Tensor>;

/// 이름 붙은 입력 → 이름 붙은 출력. 로드 시점에 한 번 선택되는 다형성 지점.
pub trait ModuleRunner {
    fn run(&self, inputs: &TensorMap) -> anyhow::Result<TensorMap>;
}

pub fn fetch(map: &TensorMap, key: &str) -> anyhow::Result<Tensor> {
    match map.get(key) {
        Some(t) => Ok(t.clone()),
        None => bail!("러너 입출력에 '{key}' 텐서가 없음"),
    }
}

fn single(key: &str, value: Tensor) -> TensorMap {
    let mut map = TensorMap::new();
    map.insert(key.to_string(), value);
    map
}

// ── 네이티브 경로 ───────────────────────────────────────────────

struct NativeEncoderRunner {
    net: InputEncoder,
    _varmap: VarMap,
}

impl ModuleRunner for NativeEncoderRunner {
    fn run(&self, inputs: &TensorMap) -> anyhow::Result<TensorMap> {
        let x = fetch(inputs, "input")?;
        Ok(single("latent", self.net.forward(&x)?))
    }
}

struct NativeLstmRunner {
    cell: LSTM,
    _varmap: VarMap,
}

impl ModuleRunner for NativeLstmRunner {
    fn run(&self, inputs: &TensorMap) -> anyhow::Result<TensorMap> {
        let x = fetch(inputs, "input")?;
        let state = LSTMState {
            h: fetch(inputs, "h")?,
            c: fetch(inputs, "c")?,
        };
        let next = self.cell.step(&x, &state)?;
        let mut out = TensorMap::new();
        out.insert("output".to_string(), next.h().clone());
        out.insert("h".to_string(), next.h().clone());
        out.insert("c".to_string(), next.c().clone());
        Ok(out)
    }
}

struct NativeDecoderRunner {
    net: Decoder,
    _varmap: VarMap,
}

impl ModuleRunner for NativeDecoderRunner {
    fn run(&self, inputs: &TensorMap) -> anyhow::Result<TensorMap> {
        let x = fetch(inputs, "input")?;
        let (pose, contact) = self.net.forward(&x)?;
        let mut out = TensorMap::new();
        out.insert("pose".to_string(), pose);
        out.insert("contact".to_string(), contact);
        Ok(out)
    }
}

pub fn load_native_encoder(
    dir: &Path,
    module: &str,
    input_dim: usize,
    device: &Device,
) -> anyhow::Result<Box<dyn ModuleRunner>> {
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let net = InputEncoder::new(input_dim, vb)?;
    checkpoint::load_native(dir, module, &mut varmap)?;
    Ok(Box::new(NativeEncoderRunner {
        net,
        _varmap: varmap,
    }))
}

pub fn load_native_lstm(dir: &Path, device: &Device) -> anyhow::Result<Box<dyn ModuleRunner>> {
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let cell = lstm(LSTM_INPUT_DIM, LSTM_INPUT_DIM, LSTMConfig::default(), vb)?;
    checkpoint::load_native(dir, "lstm", &mut varmap)?;
    Ok(Box::new(NativeLstmRunner {
        cell,
        _varmap: varmap,
    }))
}

pub fn load_native_decoder(
    dir: &Path,
    pose_dim: usize,
    contact_dim: usize,
    device: &Device,
) -> anyhow::Result<Box<dyn ModuleRunner>> {
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let net = Decoder::new(LSTM_INPUT_DIM, pose_dim, contact_dim, vb)?;
    checkpoint::load_native(dir, "decoder", &mut varmap)?;
    Ok(Box::new(NativeDecoderRunner {
        net,
        _varmap: varmap,
    }))
}

// ── 동결 경로 ───────────────────────────────────────────────────

struct FrozenLinear {
    weight: Tensor, // (out, in)
    bias: Tensor,   // (out,)
}

impl FrozenLinear {
    fn load(tensors: &TensorMap, module: &str, prefix: &str) -> anyhow::Result<Self> {
        let weight = checkpoint::required_tensor(tensors, module, &format!("{prefix}.weight"))?;
        let bias = checkpoint::required_tensor(tensors, module, &format!("{prefix}.bias"))?;
        if weight.dims().len() != 2 || bias.dims().len() != 1 {
            bail!("{module}/{prefix} 가중치 형상이 손상됨");
        }
        Ok(Self { weight, bias })
    }

    fn apply(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        x.matmul(&self.weight.t()?)?.broadcast_add(&self.bias)
    }
}

struct FrozenPrelu {
    alpha: Tensor,
}

impl FrozenPrelu {
    fn load(tensors: &TensorMap, module: &str, prefix: &str) -> anyhow::Result<Self> {
        let alpha = checkpoint::required_tensor(tensors, module, &format!("{prefix}.weight"))?;
        Ok(Self { alpha })
    }

    /// prelu(x) = relu(x) − α·relu(−x)
    fn apply(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let neg = x.neg()?.relu()?;
        x.relu()? - self.alpha.broadcast_mul(&neg)?
    }
}

struct FrozenEncoderRunner {
    fc0: FrozenLinear,
    act0: FrozenPrelu,
    fc1: FrozenLinear,
    act1: FrozenPrelu,
}

impl ModuleRunner for FrozenEncoderRunner {
    fn run(&self, inputs: &TensorMap) -> anyhow::Result<TensorMap> {
        let x = fetch(inputs, "input")?;
        let h = self.act0.apply(&self.fc0.apply(&x)?)?;
        let latent = self.act1.apply(&self.fc1.apply(&h)?)?;
        Ok(single("latent", latent))
    }
}

struct FrozenLstmRunner {
    w_ih: Tensor,
    w_hh: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
}

impl ModuleRunner for FrozenLstmRunner {
    fn run(&self, inputs: &TensorMap) -> anyhow::Result<TensorMap> {
        let x = fetch(inputs, "input")?;
        let h = fetch(inputs, "h")?;
        let c = fetch(inputs, "c")?;

        let gates = (&x.matmul(&self.w_ih.t()?)?.broadcast_add(&self.b_ih)?
            + &h.matmul(&self.w_hh.t()?)?.broadcast_add(&self.b_hh)?)?;
        let chunks = gates.chunk(4, D::Minus1)?;
        let i = ops::sigmoid(&chunks[0])?;
        let f = ops::sigmoid(&chunks[1])?;
        let g = chunks[2].tanh()?;
        let o = ops::sigmoid(&chunks[3])?;

        let c_next = ((&f * &c)? + (&i * &g)?)?;
        let h_next = (&o * &c_next.tanh()?)?;

        let mut out = TensorMap::new();
        out.insert("output".to_string(), h_next.clone());
        out.insert("h".to_string(), h_next);
        out.insert("c".to_string(), c_next);
        Ok(out)
    }
}

struct FrozenDecoderRunner {
    fc0: FrozenLinear,
    act0: FrozenPrelu,
    fc1: FrozenLinear,
    act1: FrozenPrelu,
    pose_head: FrozenLinear,
    contact_head: FrozenLinear,
}

impl ModuleRunner for FrozenDecoderRunner {
    fn run(&self, inputs: &TensorMap) -> anyhow::Result<TensorMap> {
        let x = fetch(inputs, "input")?;
        let z = self.act0.apply(&self.fc0.apply(&x)?)?;
        let z = self.act1.apply(&self.fc1.apply(&z)?)?;
        let pose = self.pose_head.apply(&z)?;
        let contact = ops::sigmoid(&self.contact_head.apply(&z)?)?;
        let mut out = TensorMap::new();
        out.insert("pose".to_string(), pose);
        out.insert("contact".to_string(), contact);
        Ok(out)
    }
}

pub fn load_frozen_encoder(
    dir: &Path,
    module: &str,
    input_dim: usize,
    device: &Device,
) -> anyhow::Result<Box<dyn ModuleRunner>> {
    let tensors = checkpoint::load_frozen(dir, module, device)?;
    let fc0 = FrozenLinear::load(&tensors, module, "fc0")?;
    if fc0.weight.dims()[1] != input_dim {
        bail!(
            "{module} 동결 번들 입력 폭 {} != 기대 {}",
            fc0.weight.dims()[1],
            input_dim
        );
    }
    Ok(Box::new(FrozenEncoderRunner {
        fc0,
        act0: FrozenPrelu::load(&tensors, module, "act0")?,
        fc1: FrozenLinear::load(&tensors, module, "fc1")?,
        act1: FrozenPrelu::load(&tensors, module, "act1")?,
    }))
}

pub fn load_frozen_lstm(dir: &Path, device: &Device) -> anyhow::Result<Box<dyn ModuleRunner>> {
    let module = "lstm";
    let tensors = checkpoint::load_frozen(dir, module, device)?;
    let w_ih = checkpoint::required_tensor(&tensors, module, "weight_ih_l0")?;
    let w_hh = checkpoint::required_tensor(&tensors, module, "weight_hh_l0")?;
    let b_ih = checkpoint::required_tensor(&tensors, module, "bias_ih_l0")?;
    let b_hh = checkpoint::required_tensor(&tensors, module, "bias_hh_l0")?;
    if w_ih.dims() != [4 * LSTM_INPUT_DIM, LSTM_INPUT_DIM] {
        bail!("lstm 동결 번들 형상이 손상됨: {:?}", w_ih.dims());
    }
    Ok(Box::new(FrozenLstmRunner {
        w_ih,
        w_hh,
        b_ih,
        b_hh,
    }))
}

pub fn load_frozen_decoder(
    dir: &Path,
    pose_dim: usize,
    device: &Device,
) -> anyhow::Result<Box<dyn ModuleRunner>> {
    let module = "decoder";
    let tensors = checkpoint::load_frozen(dir, module, device)?;
    let pose_head = FrozenLinear::load(&tensors, module, "pose")?;
    if pose_head.weight.dims()[0] != pose_dim {
        bail!(
            "decoder 동결 번들 포즈 폭 {} != 기대 {}",
            pose_head.weight.dims()[0],
            pose_dim
        );
    }
    Ok(Box::new(FrozenDecoderRunner {
        fc0: FrozenLinear::load(&tensors, module, "fc0")?,
        act0: FrozenPrelu::load(&tensors, module, "act0")?,
        fc1: FrozenLinear::load(&tensors, module, "fc1")?,
        act1: FrozenPrelu::load(&tensors, module, "act1")?,
        pose_head,
        contact_head: FrozenLinear::load(&tensors, module, "contact")?,
    }))
}
