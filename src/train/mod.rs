//! # 학습 모듈 - 적대적 교사강제/자기회귀 학습 루프

pub mod checkpoint;
pub mod loss;
pub mod rollout;

#[cfg(test)]
mod __tests__;

pub use loss::{LossAccumulator, LossTerm};
pub use rollout::{Rollout, RolloutOutput, RolloutPhase};

use std::path::Path;

use anyhow::Context;
use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::data::{BatchSource, FeatureDims, MotionBatch, PoseStats};
use crate::model::{
    Decoder, Discriminator, InputEncoder, LstmNetwork, NoiseSchedule, PositionalEncoding,
    RampDownSchedule, Skeleton, LATENT_DIM, LSTM_INPUT_DIM,
};

/// 판별기 시간 수용 영역 (short / long)
pub const SHORT_CRITIC_LENGTH: usize = 2;
pub const LONG_CRITIC_LENGTH: usize = 5;

/// 모듈별 VarMap과 네트워크 묶음. 파라미터 집합이 모듈 단위로 분리되어
/// 체크포인트 파일과 그래디언트 클리핑 경계가 자연스럽게 맞는다.
pub struct TrainingModules {
    pub state_map: VarMap,
    pub state_encoder: InputEncoder,
    pub offset_map: VarMap,
    pub offset_encoder: InputEncoder,
    pub target_map: VarMap,
    pub target_encoder: InputEncoder,
    pub lstm_map: VarMap,
    pub lstm: LstmNetwork,
    pub decoder_map: VarMap,
    pub decoder: Decoder,
    pub short_map: VarMap,
    pub short_discriminator: Discriminator,
    pub long_map: VarMap,
    pub long_discriminator: Discriminator,
}

fn module_vb(varmap: &VarMap, device: &Device) -> VarBuilder<'static> {
    VarBuilder::from_varmap(varmap, DType::F32, device)
}

impl TrainingModules {
    pub fn new(dims: &FeatureDims, device: &Device) -> Result<Self> {
        let state_map = VarMap::new();
        let state_encoder = InputEncoder::new(dims.state_in(), module_vb(&state_map, device))?;
        let offset_map = VarMap::new();
        let offset_encoder = InputEncoder::new(dims.offset_in(), module_vb(&offset_map, device))?;
        let target_map = VarMap::new();
        let target_encoder = InputEncoder::new(dims.target_in(), module_vb(&target_map, device))?;

        let lstm_map = VarMap::new();
        let lstm = LstmNetwork::new(LSTM_INPUT_DIM, LSTM_INPUT_DIM, module_vb(&lstm_map, device))?;

        let decoder_map = VarMap::new();
        let decoder = Decoder::new(
            LSTM_INPUT_DIM,
            dims.target_in() + dims.root_v,
            dims.contact,
            module_vb(&decoder_map, device),
        )?;

        let critic_in = dims.num_joints * 3 * 2;
        let short_map = VarMap::new();
        let short_discriminator =
            Discriminator::new(critic_in, SHORT_CRITIC_LENGTH, module_vb(&short_map, device))?;
        let long_map = VarMap::new();
        let long_discriminator =
            Discriminator::new(critic_in, LONG_CRITIC_LENGTH, module_vb(&long_map, device))?;

        Ok(Self {
            state_map,
            state_encoder,
            offset_map,
            offset_encoder,
            target_map,
            target_encoder,
            lstm_map,
            lstm,
            decoder_map,
            decoder,
            short_map,
            short_discriminator,
            long_map,
            long_discriminator,
        })
    }

    pub fn named_varmaps(&self) -> Vec<(&'static str, &VarMap)> {
        vec![
            ("state_encoder", &self.state_map),
            ("offset_encoder", &self.offset_map),
            ("target_encoder", &self.target_map),
            ("lstm", &self.lstm_map),
            ("decoder", &self.decoder_map),
            ("short_discriminator", &self.short_map),
            ("long_discriminator", &self.long_map),
        ]
    }

    pub fn generator_vars(&self) -> Vec<Var> {
        let mut vars = self.state_map.all_vars();
        vars.extend(self.offset_map.all_vars());
        vars.extend(self.target_map.all_vars());
        vars.extend(self.lstm_map.all_vars());
        vars.extend(self.decoder_map.all_vars());
        vars
    }

    pub fn critic_vars(&self) -> Vec<Var> {
        let mut vars = self.short_map.all_vars();
        vars.extend(self.long_map.all_vars());
        vars
    }
}

/// 한 모듈의 파라미터 그래디언트 전체 노름을 상한으로 자른다.
/// 잘리기 전 노름을 반환.
pub fn clip_grad_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let mut total_sq = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            total_sq += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = total_sq.sqrt();
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            let scaled = match grads.get(var) {
                Some(grad) => Some((grad * scale)?),
                None => None,
            };
            if let Some(scaled) = scaled {
                grads.insert(var, scaled);
            }
        }
    }
    Ok(norm)
}

/// 전역 위치 시퀀스 (B, T+1, J, 3) → 판별기 입력 (B, J·3·2, T+1).
/// 채널은 위치와 유한차분 속도(마지막 스텝 0 패딩)의 스택.
pub fn critic_features(positions: &Tensor) -> Result<Tensor> {
    let (b, t1, j, three) = positions.dims4()?;
    assert_eq!(three, 3, "위치 채널 수 불일치");
    let flat = positions.reshape((b, t1, j * 3))?.transpose(1, 2)?; // (B, C, T+1)
    let vel = (&flat.narrow(2, 1, t1 - 1)? - &flat.narrow(2, 0, t1 - 1)?)?;
    let pad = Tensor::zeros((b, j * 3, 1), flat.dtype(), flat.device())?;
    let vel = Tensor::cat(&[&vel, &pad], 2)?;
    Tensor::cat(&[&flat, &vel], 1)
}

struct BatchMetrics {
    total: f32,
    detail: String,
}

/// 학습 엔트리. 배치 실패는 곧장 치명적이다 (재시도/건너뛰기 없음).
pub fn train(
    config: &Config,
    skeleton: &Skeleton,
    source: &mut dyn BatchSource,
    device: &Device,
) -> anyhow::Result<()> {
    let dims = source.dims();
    assert_eq!(
        dims.num_joints,
        skeleton.num_joints(),
        "데이터 조인트 수와 스켈레톤 불일치"
    );

    let mut modules = TrainingModules::new(&dims, device)?;
    let pe = PositionalEncoding::new(LATENT_DIM, config.model.training_frames, device)?;
    let schedule = RampDownSchedule::default();

    let optim_params = ParamsAdamW {
        lr: config.model.learning_rate,
        beta1: config.model.optim_beta1,
        beta2: config.model.optim_beta2,
        eps: 1e-8,
        weight_decay: 0.0,
    };
    let mut generator_opt = AdamW::new(modules.generator_vars(), optim_params.clone())?;
    let mut critic_opt = AdamW::new(modules.critic_vars(), optim_params)?;

    let weights_dir = Path::new(&config.log.model_weights_dir).join(&config.data.exp_name);

    let epoch_bar = ProgressBar::new(config.model.epochs as u64);
    epoch_bar.set_style(
        ProgressStyle::with_template("에폭 {pos}/{len} {bar:30.cyan/blue} {msg}").unwrap(),
    );

    for epoch in 0..config.model.epochs {
        source.reset();
        let batch_bar = match source.num_batches() {
            Some(n) => ProgressBar::new(n as u64),
            None => ProgressBar::new_spinner(),
        };

        while let Some(batch) = source.next_batch() {
            let batch = batch.context("배치 수신 실패")?;
            // 마지막 덜 찬 배치는 조용히 건너뜀 (패딩하지 않음)
            if batch.batch_size() != config.model.batch_size {
                batch_bar.inc(1);
                continue;
            }
            let metrics = train_batch(
                config,
                skeleton,
                source.stats(),
                &mut modules,
                &mut generator_opt,
                &mut critic_opt,
                &pe,
                &schedule,
                &batch,
                device,
            )?;
            batch_bar.set_message(format!("LOSS {:.3} | {}", metrics.total, metrics.detail));
            batch_bar.inc(1);
        }
        batch_bar.finish_and_clear();
        epoch_bar.inc(1);

        if (epoch + 1) % config.log.weight_save_interval == 0 {
            let path = checkpoint::save_checkpoint(
                &weights_dir,
                epoch + 1,
                &modules.named_varmaps(),
                config.model.save_optimizer,
            )?;
            epoch_bar.set_message(format!("💾 체크포인트 저장: {path:?}"));
        }
    }
    epoch_bar.finish_with_message("학습 완료");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn train_batch(
    config: &Config,
    skeleton: &Skeleton,
    stats: &PoseStats,
    modules: &mut TrainingModules,
    generator_opt: &mut AdamW,
    critic_opt: &mut AdamW,
    pe: &PositionalEncoding,
    schedule: &dyn NoiseSchedule,
    batch: &MotionBatch,
    device: &Device,
) -> anyhow::Result<BatchMetrics> {
    let b = batch.batch_size();
    let start = config.model.window_offset;
    let frames = config.model.training_frames;

    // 윈도우마다 은닉 상태 리셋 필수, 타깃 노이즈는 윈도우당 1회 샘플링
    modules.lstm.init_hidden(b)?;
    let noise = Tensor::randn(
        0f32,
        config.model.target_noise as f32,
        (b, LATENT_DIM * 2),
        device,
    )?;

    let mut rollout = Rollout::begin(batch, start, frames)?;
    for t in 0..frames {
        let (state_in, offset_in, target_in) = rollout.inputs()?;
        let tta = rollout.time_to_arrival();

        let h_state = pe.apply(&modules.state_encoder.forward(&state_in)?, tta)?;
        let h_offset = pe.apply(&modules.offset_encoder.forward(&offset_in)?, tta)?;
        let h_target = pe.apply(&modules.target_encoder.forward(&target_in)?, tta)?;

        let offset_target = Tensor::cat(&[&h_offset, &h_target], 1)?;
        let multiplier = schedule.multiplier(t, frames);
        let offset_target = if multiplier > 0.0 {
            (&offset_target + &noise.affine(multiplier as f64, 0.0)?)?
        } else {
            offset_target
        };

        let h_in = Tensor::cat(&[&h_state, &offset_target], 1)?;
        let h_out = modules.lstm.step(&h_in)?;
        let (pose_delta, contact_pred) = modules.decoder.forward(&h_out)?;
        rollout.advance(&pose_delta, &contact_pred)?;
    }
    let pred = rollout.finish()?;
    // FK는 타임스텝별이 아니라 스택된 윈도우에 한 번
    let (pred_pos, pred_rot) =
        skeleton.forward_kinematics_with_rotation(&pred.local_q, &pred.root_p)?;

    // 손실 비교 대상: 각 스텝의 "다음" GT 프레임
    let gt_pos = batch.global_pos.narrow(1, start + 1, frames)?;
    let gt_rot = batch.global_rot.narrow(1, start + 1, frames)?;
    let gt_root = batch.root_p.narrow(1, start + 1, frames)?;
    let gt_q = batch.local_q.narrow(1, start + 1, frames)?;
    let gt_contact = batch.contact.narrow(1, start + 1, frames)?;

    // 판별기 입력: 사전 문맥 1프레임 + 시퀀스
    let seed_frame = batch.global_pos.narrow(1, start, 1)?;
    let fake_feat = critic_features(&Tensor::cat(&[&seed_frame, &pred_pos], 1)?)?;
    let real_feat = critic_features(&batch.global_pos.narrow(1, start, frames + 1)?)?;

    // ── 판별기 스텝 (생성기 출력은 detach) ──
    let fake_detached = fake_feat.detach();
    let short_d = loss::lsgan_critic_loss(
        &modules.short_discriminator.mean_logits(&real_feat)?,
        &modules.short_discriminator.mean_logits(&fake_detached)?,
    )?;
    let long_d = loss::lsgan_critic_loss(
        &modules.long_discriminator.mean_logits(&real_feat)?,
        &modules.long_discriminator.mean_logits(&fake_detached)?,
    )?;
    let d_loss = (&short_d + &long_d)?.affine(config.model.loss_discriminator_weight, 0.0)?;
    let mut d_grads = d_loss.backward()?;
    let clip = &config.model.grad_clip;
    clip_grad_norm(
        &modules.short_map.all_vars(),
        &mut d_grads,
        clip.short_discriminator,
    )?;
    clip_grad_norm(
        &modules.long_map.all_vars(),
        &mut d_grads,
        clip.long_discriminator,
    )?;
    critic_opt.step(&d_grads)?;

    // ── 생성기 스텝 (판별기 순전파 재계산, detach 없음) ──
    let mut acc = LossAccumulator::new();
    acc.push(
        "pos",
        config.model.loss_pos_weight,
        loss::position_loss(&pred_pos, &gt_pos, &stats.global_pos_std)?,
    );
    acc.push(
        "quat",
        config.model.loss_quat_weight,
        loss::quat_loss(&pred.local_q, &gt_q)?,
    );
    acc.push(
        "global_quat",
        config.model.loss_global_quat_weight,
        loss::global_rotation_loss(&pred_rot, &gt_rot)?,
    );
    acc.push(
        "root",
        config.model.loss_root_weight,
        loss::root_loss(&pred.root_p, &gt_root, &stats.root_std()?)?,
    );
    acc.push(
        "contact",
        config.model.loss_contact_weight,
        loss::contact_loss(&pred.contact, &gt_contact)?,
    );
    let short_g =
        loss::lsgan_generator_loss(&modules.short_discriminator.mean_logits(&fake_feat)?)?;
    let long_g = loss::lsgan_generator_loss(&modules.long_discriminator.mean_logits(&fake_feat)?)?;
    acc.push(
        "adv",
        config.model.loss_generator_weight,
        (&short_g + &long_g)?,
    );

    let total = acc.total()?;
    let mut g_grads = total.backward()?;
    clip_grad_norm(&modules.state_map.all_vars(), &mut g_grads, clip.state_encoder)?;
    clip_grad_norm(&modules.offset_map.all_vars(), &mut g_grads, clip.offset_encoder)?;
    clip_grad_norm(&modules.target_map.all_vars(), &mut g_grads, clip.target_encoder)?;
    clip_grad_norm(&modules.lstm_map.all_vars(), &mut g_grads, clip.lstm)?;
    clip_grad_norm(&modules.decoder_map.all_vars(), &mut g_grads, clip.decoder)?;
    generator_opt.step(&g_grads)?;

    Ok(BatchMetrics {
        total: total.to_scalar::<f32>()?,
        detail: acc.describe()?,
    })
}
