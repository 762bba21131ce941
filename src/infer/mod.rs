//! # 추론 모듈 - 판별기/노이즈 없는 자기회귀 롤아웃
//!
//! 학습된 (또는 동결 내보낸) 네트워크를 배치 단위로 굴려 프레임별 포즈
//! 레코드를 쓴다. 가중치 포맷은 로드 시 한 번 선택된다.

pub mod backend;
pub mod output;

#[cfg(test)]
mod __tests__;

pub use backend::{ModuleRunner, TensorMap};
pub use output::{write_pose_record, PoseRecord};

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::{DType, Device, Tensor};

use crate::config::Config;
use crate::data::{BatchSource, FeatureDims};
use crate::model::{DatasetProfile, PositionalEncoding, LATENT_DIM, LSTM_INPUT_DIM};
use crate::train::Rollout;

/// 저장 가중치 포맷 선택자. 잘못된 값은 경고 후 기본값(Frozen)으로 폴백.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Native,
    Frozen,
}

impl WeightFormat {
    pub fn from_arg(arg: &str) -> Self {
        match arg.to_ascii_uppercase().as_str() {
            "NATIVE" => Self::Native,
            "FROZEN" => Self::Frozen,
            other => {
                println!("⚠️ 지원하지 않는 가중치 포맷 '{}', 기본값 FROZEN 사용", other);
                Self::Frozen
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Native => "NATIVE",
            Self::Frozen => "FROZEN",
        }
    }
}

/// 추론 세션: 러너 5개 + 위치 인코딩 + LSTM 은닉 상태.
/// 로드 실패(손상 번들 포함)는 롤아웃 시작 전에 여기서 끝난다.
pub struct InferenceSession {
    state_encoder: Box<dyn ModuleRunner>,
    offset_encoder: Box<dyn ModuleRunner>,
    target_encoder: Box<dyn ModuleRunner>,
    lstm: Box<dyn ModuleRunner>,
    decoder: Box<dyn ModuleRunner>,
    pe: PositionalEncoding,
    device: Device,
    h: Option<Tensor>,
    c: Option<Tensor>,
}

impl InferenceSession {
    pub fn load(
        dir: &Path,
        format: WeightFormat,
        dims: &FeatureDims,
        max_tta: usize,
        device: &Device,
    ) -> anyhow::Result<Self> {
        let pose_dim = dims.target_in() + dims.root_v;
        let (state_encoder, offset_encoder, target_encoder, lstm, decoder) = match format {
            WeightFormat::Native => (
                backend::load_native_encoder(dir, "state_encoder", dims.state_in(), device)?,
                backend::load_native_encoder(dir, "offset_encoder", dims.offset_in(), device)?,
                backend::load_native_encoder(dir, "target_encoder", dims.target_in(), device)?,
                backend::load_native_lstm(dir, device)?,
                backend::load_native_decoder(dir, pose_dim, dims.contact, device)?,
            ),
            WeightFormat::Frozen => (
                backend::load_frozen_encoder(dir, "state_encoder", dims.state_in(), device)?,
                backend::load_frozen_encoder(dir, "offset_encoder", dims.offset_in(), device)?,
                backend::load_frozen_encoder(dir, "target_encoder", dims.target_in(), device)?,
                backend::load_frozen_lstm(dir, device)?,
                backend::load_frozen_decoder(dir, pose_dim, device)?,
            ),
        };
        let pe = PositionalEncoding::new(LATENT_DIM, max_tta, device)?;
        println!("✅ 모델 로드 완료 ({} 포맷)", format.name());
        Ok(Self {
            state_encoder,
            offset_encoder,
            target_encoder,
            lstm,
            decoder,
            pe,
            device: device.clone(),
            h: None,
            c: None,
        })
    }

    /// 윈도우 시작 전 은닉/셀 상태 0 초기화 (필수)
    pub fn reset(&mut self, batch_size: usize) -> anyhow::Result<()> {
        let zeros = Tensor::zeros((batch_size, LSTM_INPUT_DIM), DType::F32, &self.device)?;
        self.h = Some(zeros.clone());
        self.c = Some(zeros);
        Ok(())
    }

    fn encode(
        &self,
        runner: &dyn ModuleRunner,
        input: &Tensor,
        tta: usize,
    ) -> anyhow::Result<Tensor> {
        let out = runner.run(&{
            let mut m = TensorMap::new();
            m.insert("input".to_string(), input.clone());
            m
        })?;
        Ok(self.pe.apply(&backend::fetch(&out, "latent")?, tta)?)
    }

    /// 한 타임스텝: 인코딩 → 위치 인코딩 → LSTM → 디코드.
    /// 반환: (포즈 잔차, 접촉 확률)
    pub fn step(
        &mut self,
        state_in: &Tensor,
        offset_in: &Tensor,
        target_in: &Tensor,
        tta: usize,
    ) -> anyhow::Result<(Tensor, Tensor)> {
        let (h, c) = match (&self.h, &self.c) {
            (Some(h), Some(c)) => (h.clone(), c.clone()),
            _ => anyhow::bail!("reset 없이 추론 step 호출됨"),
        };

        let h_state = self.encode(self.state_encoder.as_ref(), state_in, tta)?;
        let h_offset = self.encode(self.offset_encoder.as_ref(), offset_in, tta)?;
        let h_target = self.encode(self.target_encoder.as_ref(), target_in, tta)?;
        let h_in = Tensor::cat(&[&h_state, &h_offset, &h_target], 1)?;

        let mut lstm_in = TensorMap::new();
        lstm_in.insert("input".to_string(), h_in);
        lstm_in.insert("h".to_string(), h);
        lstm_in.insert("c".to_string(), c);
        let lstm_out = self.lstm.run(&lstm_in)?;
        self.h = Some(backend::fetch(&lstm_out, "h")?);
        self.c = Some(backend::fetch(&lstm_out, "c")?);

        let mut dec_in = TensorMap::new();
        dec_in.insert("input".to_string(), backend::fetch(&lstm_out, "output")?);
        let dec_out = self.decoder.run(&dec_in)?;
        Ok((
            backend::fetch(&dec_out, "pose")?,
            backend::fetch(&dec_out, "contact")?,
        ))
    }
}

/// 추론 루프. 배치마다 롤아웃을 굴리고 선택 샘플의 레코드를 쓴다.
/// 결과 루트 디렉터리를 반환.
pub fn run_inference(
    config: &Config,
    profile: DatasetProfile,
    source: &mut dyn BatchSource,
    session: &mut InferenceSession,
) -> anyhow::Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let result_root = Path::new(&config.test.results_dir).join(stamp);
    let pose_root = result_root.join("pose_json");
    fs::create_dir_all(&pose_root).context("결과 디렉터리 생성 실패")?;

    let joint_names = profile.joint_names();
    let frames = config.test.test_frames;
    let start = config.test.window_offset;
    let sample = config.test.inference_batch_index;

    source.reset();
    let mut i_batch = 0usize;
    while let Some(batch) = source.next_batch() {
        let batch = batch?;
        // 마지막 덜 찬 배치에서 종료
        if batch.batch_size() != config.model.batch_size {
            break;
        }
        assert!(sample < batch.batch_size(), "inference_batch_index 범위 초과");

        session.reset(batch.batch_size())?;
        let mut rollout = Rollout::begin(&batch, start, frames)?;
        while !rollout.is_done() {
            let (state_in, offset_in, target_in) = rollout.inputs()?;
            let tta = rollout.time_to_arrival();
            let (pose_delta, contact) = session.step(&state_in, &offset_in, &target_in, tta)?;
            rollout.advance(&pose_delta, &contact)?;
        }
        let pred = rollout.finish()?;

        let sample_dir = pose_root.join(format!("{i_batch}"));
        fs::create_dir_all(&sample_dir)?;

        // 시작/타깃 레코드는 샘플당 1회
        let start_q = batch.local_q.narrow(0, sample, 1)?.squeeze(0)?.narrow(0, start, 1)?.squeeze(0)?;
        let start_root = batch.root_p.narrow(0, sample, 1)?.squeeze(0)?.narrow(0, start, 1)?.squeeze(0)?;
        write_pose_record(
            &sample_dir.join("start.json"),
            &PoseRecord::from_tensors(&joint_names, &start_q, &start_root)?,
        )?;
        let target_idx = batch.window() - 1;
        let target_q = batch.local_q.narrow(0, sample, 1)?.squeeze(0)?.narrow(0, target_idx, 1)?.squeeze(0)?;
        let target_root = batch.root_p.narrow(0, sample, 1)?.squeeze(0)?.narrow(0, target_idx, 1)?.squeeze(0)?;
        write_pose_record(
            &sample_dir.join("target.json"),
            &PoseRecord::from_tensors(&joint_names, &target_q, &target_root)?,
        )?;

        for t in 0..frames {
            let q = pred.local_q.narrow(0, sample, 1)?.squeeze(0)?.narrow(0, t, 1)?.squeeze(0)?;
            let root = pred.root_p.narrow(0, sample, 1)?.squeeze(0)?.narrow(0, t, 1)?.squeeze(0)?;
            write_pose_record(
                &sample_dir.join(format!("{t:05}.json")),
                &PoseRecord::from_tensors(&joint_names, &q, &root)?,
            )?;
        }
        i_batch += 1;
    }
    println!("🎯 추론 완료: {} 배치, 결과 {:?}", i_batch, result_root);
    Ok(result_root)
}
