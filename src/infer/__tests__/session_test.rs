use anyhow::Result;
use approx::assert_abs_diff_eq;
use candle_core::{Device, Tensor};

use crate::config::Config;
use crate::data::{FeatureDims, SyntheticSource};
use crate::infer::{self, InferenceSession, WeightFormat};
use crate::model::DatasetProfile;
use crate::train::{checkpoint, TrainingModules};

/// 학습 모듈 한 벌을 만들어 체크포인트로 내보낸다 (학습 없이 초기 가중치 그대로)
fn export_modules(dir: &std::path::Path, dims: &FeatureDims, device: &Device) -> Result<std::path::PathBuf> {
    let modules = TrainingModules::new(dims, device)?;
    Ok(checkpoint::save_checkpoint(dir, 1, &modules.named_varmaps(), false)?)
}

#[test]
fn 네이티브와_동결_세션은_같은_스텝_출력을_낸다() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;
    let dims = FeatureDims::new(3);
    let ckpt = export_modules(tmp.path(), &dims, &device)?;

    let mut native = InferenceSession::load(&ckpt, WeightFormat::Native, &dims, 10, &device)?;
    let mut frozen = InferenceSession::load(&ckpt, WeightFormat::Frozen, &dims, 10, &device)?;

    let b = 2;
    native.reset(b)?;
    frozen.reset(b)?;

    let state = Tensor::randn(0f32, 1f32, (b, dims.state_in()), &device)?;
    let offset = Tensor::randn(0f32, 1f32, (b, dims.offset_in()), &device)?;
    let target = Tensor::randn(0f32, 1f32, (b, dims.target_in()), &device)?;

    // 은닉 상태가 누적되는 다중 스텝에서도 일치해야 한다
    for tta in (1..=3).rev() {
        let (pose_a, contact_a) = native.step(&state, &offset, &target, tta)?;
        let (pose_b, contact_b) = frozen.step(&state, &offset, &target, tta)?;
        for (x, y) in pose_a
            .flatten_all()?
            .to_vec1::<f32>()?
            .iter()
            .zip(pose_b.flatten_all()?.to_vec1::<f32>()?.iter())
        {
            assert_abs_diff_eq!(x, y, epsilon = 1e-4);
        }
        for (x, y) in contact_a
            .flatten_all()?
            .to_vec1::<f32>()?
            .iter()
            .zip(contact_b.flatten_all()?.to_vec1::<f32>()?.iter())
        {
            assert_abs_diff_eq!(x, y, epsilon = 1e-4);
        }
    }
    Ok(())
}

#[test]
fn reset_없이_step은_에러() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;
    let dims = FeatureDims::new(2);
    let ckpt = export_modules(tmp.path(), &dims, &device)?;

    let mut session = InferenceSession::load(&ckpt, WeightFormat::Frozen, &dims, 5, &device)?;
    let state = Tensor::zeros((1, dims.state_in()), candle_core::DType::F32, &device)?;
    let offset = Tensor::zeros((1, dims.offset_in()), candle_core::DType::F32, &device)?;
    let target = Tensor::zeros((1, dims.target_in()), candle_core::DType::F32, &device)?;
    assert!(session.step(&state, &offset, &target, 3).is_err());
    Ok(())
}

#[test]
fn 체크포인트가_없으면_로드에서_실패() {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir().unwrap();
    let dims = FeatureDims::new(2);
    for format in [WeightFormat::Native, WeightFormat::Frozen] {
        assert!(InferenceSession::load(tmp.path(), format, &dims, 5, &device).is_err());
    }
}

/// 추론 루프 전체: 배치 롤아웃 → 샘플 디렉터리에 시작/타깃/프레임 레코드
#[test]
fn 추론_루프는_프레임별_레코드를_쓴다() -> Result<()> {
    let device = Device::Cpu;
    let tmp = tempfile::tempdir()?;

    let profile = DatasetProfile::Dfki;
    let skeleton = profile.build_skeleton(&device)?;
    let dims = FeatureDims::new(skeleton.num_joints());
    let ckpt = export_modules(tmp.path(), &dims, &device)?;

    let mut config = Config::default();
    config.model.window = 8;
    config.model.batch_size = 2;
    config.test.window_offset = 1;
    config.test.test_frames = 4;
    config.test.inference_batch_index = 1;
    config.test.results_dir = tmp.path().join("results").to_string_lossy().to_string();

    let mut session = InferenceSession::load(
        &ckpt,
        WeightFormat::Frozen,
        &dims,
        config.test.test_frames,
        &device,
    )?;
    let mut source = SyntheticSource::new(
        skeleton.clone(),
        config.model.window,
        config.model.batch_size,
        2,
        3,
    )?;

    let root = infer::run_inference(&config, profile, &mut source, &mut session)?;

    for batch_dir in ["0", "1"] {
        let dir = root.join("pose_json").join(batch_dir);
        assert!(dir.join("start.json").exists());
        assert!(dir.join("target.json").exists());
        for t in 0..config.test.test_frames {
            assert!(dir.join(format!("{t:05}.json")).exists(), "프레임 {t} 레코드 누락");
        }
        assert!(!dir.join(format!("{:05}.json", config.test.test_frames)).exists());
    }
    Ok(())
}
