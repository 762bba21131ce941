//! 학습 바이너리
//!
//! 실제 모캡 로더(외부 협력자)가 붙기 전까지는 합성 배치 소스로
//! 같은 `BatchSource` 경계를 통해 전체 루프를 돌린다.

use anyhow::Result;
use clap::Parser;

use rmi::config::{resolve_device, Config};
use rmi::data::SyntheticSource;
use rmi::model::DatasetProfile;
use rmi::train;

#[derive(Parser)]
#[command(about = "적대적 순환 인비트위닝 학습")]
struct Args {
    /// 에폭 수 재정의
    #[arg(long)]
    epochs: Option<usize>,
    /// 에폭당 배치 수 (합성 소스)
    #[arg(long, default_value_t = 8)]
    batches: usize,
    /// 합성 소스 시드
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::default();
    if let Some(epochs) = args.epochs {
        config.model.epochs = epochs;
    }

    let device = resolve_device(&config.device.selector);
    let profile = DatasetProfile::from_arg(&config.data.dataset);
    let skeleton = profile.build_skeleton(&device)?;
    println!(
        "🚀 학습 시작: 데이터셋 {}, 조인트 {}개, 윈도우 {}, 프레임 {}",
        profile.name(),
        skeleton.num_joints(),
        config.model.window,
        config.model.training_frames
    );

    let mut source = SyntheticSource::new(
        skeleton.clone(),
        config.model.window,
        config.model.batch_size,
        args.batches,
        args.seed,
    )?;
    train::train(&config, &skeleton, &mut source, &device)?;
    println!("✅ 학습 종료");
    Ok(())
}
