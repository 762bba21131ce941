//! 체크포인트 번들
//!
//! 저장 주기마다 디렉터리 하나를 만들고 모듈별 safetensors 파일을 쓴다.
//! 추론 전용 5개 모듈(인코더 3종, LSTM, 디코더)은 학습 의존성 없이
//! 로드 가능한 동결 텐서 번들로도 내보낸다.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;

/// 추론 경로에 필요한 모듈들 (동결 내보내기 대상)
pub const INFERENCE_MODULES: [&str; 5] = [
    "state_encoder",
    "offset_encoder",
    "target_encoder",
    "lstm",
    "decoder",
];

/// 학습 전용 판별기들
pub const CRITIC_MODULES: [&str; 2] = ["short_discriminator", "long_discriminator"];

pub fn native_weight_file(dir: &Path, module: &str) -> PathBuf {
    dir.join(format!("{module}.safetensors"))
}

pub fn frozen_weight_file(dir: &Path, module: &str) -> PathBuf {
    dir.join(format!("{module}.frozen.safetensors"))
}

/// `dir/trained_weight_{epoch}/` 아래에 모듈별 파라미터를 저장하고,
/// 추론 모듈은 동결 번들도 같이 내보낸다.
pub fn save_checkpoint(
    dir: &Path,
    epoch: usize,
    modules: &[(&str, &VarMap)],
    save_optimizer: bool,
) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("trained_weight_{epoch}"));
    fs::create_dir_all(&path).with_context(|| format!("체크포인트 디렉터리 생성 실패: {path:?}"))?;

    for (name, varmap) in modules {
        varmap
            .save(native_weight_file(&path, name))
            .with_context(|| format!("{name} 저장 실패"))?;
        if INFERENCE_MODULES.contains(name) {
            export_frozen(&path, name, varmap)?;
        }
    }

    if save_optimizer {
        // 옵티마이저 모멘트는 직렬화 경로가 없어 재개 시 새로 누적된다
        println!("⚠️ 옵티마이저 상태 저장은 지원되지 않음 (재개 시 재초기화)");
    }
    Ok(path)
}

/// VarMap 내용을 그래프 없는 동결 텐서 번들로 내보내기
pub fn export_frozen(dir: &Path, module: &str, varmap: &VarMap) -> anyhow::Result<()> {
    let data = varmap.data().lock().unwrap();
    let tensors: HashMap<String, Tensor> = data
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().detach()))
        .collect();
    candle_core::safetensors::save(&tensors, frozen_weight_file(dir, module))
        .with_context(|| format!("{module} 동결 내보내기 실패"))?;
    Ok(())
}

/// 저장된 네이티브 가중치를 모듈별 VarMap에 되읽기
pub fn load_native(dir: &Path, module: &str, varmap: &mut VarMap) -> anyhow::Result<()> {
    let path = native_weight_file(dir, module);
    if !path.exists() {
        bail!("가중치 파일 없음: {path:?}");
    }
    varmap
        .load(&path)
        .with_context(|| format!("{module} 가중치 로드 실패"))?;
    Ok(())
}

/// 동결 번들 로드. 손상된 번들은 롤아웃 시작 전, 여기서 바로 실패한다.
pub fn load_frozen(
    dir: &Path,
    module: &str,
    device: &Device,
) -> anyhow::Result<HashMap<String, Tensor>> {
    let path = frozen_weight_file(dir, module);
    if !path.exists() {
        bail!("동결 번들 없음: {path:?}");
    }
    let tensors = candle_core::safetensors::load(&path, device)
        .with_context(|| format!("{module} 동결 번들 로드 실패"))?;
    if tensors.is_empty() {
        bail!("{module} 동결 번들이 비어 있음: {path:?}");
    }
    Ok(tensors)
}

/// 번들에서 필수 텐서를 꺼낸다. 키 누락은 즉시 치명적 오류.
pub fn required_tensor(
    tensors: &HashMap<String, Tensor>,
    module: &str,
    name: &str,
) -> anyhow::Result<Tensor> {
    match tensors.get(name) {
        Some(t) => Ok(t.clone()),
        None => bail!("{module} 번들에 '{name}' 텐서가 없음 (손상된 내보내기)"),
    }
}
