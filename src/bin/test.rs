//! 추론 바이너리
//!
//! 데이터셋/가중치 포맷 선택자는 잘못된 값이어도 실패하지 않고
//! 경고 후 기본값(DFKI / FROZEN)으로 폴백한다.

use std::path::Path;

use anyhow::Result;
use clap::Parser;

use rmi::config::{resolve_device, Config};
use rmi::data::{BatchSource, SyntheticSource};
use rmi::infer::{self, InferenceSession, WeightFormat};
use rmi::model::DatasetProfile;

#[derive(Parser)]
#[command(about = "학습된 인비트위닝 모델 추론")]
struct Args {
    /// 데이터셋 선택 (DFKI 또는 LAFAN)
    #[arg(short = 'D', long = "dataset", default_value = "DFKI")]
    dataset: String,
    /// 가중치 포맷 (NATIVE 또는 FROZEN)
    #[arg(short = 'F', long = "filetype", default_value = "FROZEN")]
    filetype: String,
    /// 저장 가중치 경로 재정의
    #[arg(long)]
    weights: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let profile = DatasetProfile::from_arg(&args.dataset);
    let format = WeightFormat::from_arg(&args.filetype);
    println!("데이터셋 {} / 포맷 {} 사용", profile.name(), format.name());

    let mut config = Config::default();
    if let Some(weights) = args.weights {
        config.test.saved_weight_path = weights;
    }
    let device = resolve_device("cpu"); // 추론은 CPU 고정
    let skeleton = profile.build_skeleton(&device)?;

    let mut source = SyntheticSource::new(
        skeleton.clone(),
        config.model.window,
        config.model.batch_size,
        4,
        7,
    )?;
    let dims = source.dims();

    let mut session = InferenceSession::load(
        Path::new(&config.test.saved_weight_path),
        format,
        &dims,
        config.test.test_frames,
        &device,
    )?;

    let result_root = infer::run_inference(&config, profile, &mut source, &mut session)?;
    println!("✅ 포즈 레코드: {:?}", result_root.join("pose_json"));
    Ok(())
}
