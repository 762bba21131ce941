//! 실행 설정
//!
//! 전역 가변 상태 대신 명시적 설정 구조체를 생성자마다 넘긴다.
//! 파일 파싱 자체는 외부 협력자 몫이고 여기서는 구조와 기본값만 정의한다.

use candle_core::Device;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub data: DataConfig,
    pub model: ModelConfig,
    pub log: LogConfig,
    pub test: TestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            data: DataConfig::default(),
            model: ModelConfig::default(),
            log: LogConfig::default(),
            test: TestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// "cpu" 또는 "cuda:N"
    pub selector: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            selector: "cpu".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub exp_name: String,
    pub data_dir: String,
    pub processed_data_dir: String,
    pub dataset: String,
    pub data_loader_workers: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            exp_name: "DFKI".to_string(),
            data_dir: "data/mocap".to_string(),
            processed_data_dir: "data/processed".to_string(),
            dataset: "DFKI".to_string(),
            data_loader_workers: 4,
        }
    }
}

/// 모듈별 그래디언트 노름 상한. 원본은 모든 모듈에 1.0을 공유했는데,
/// 의도적 하이퍼파라미터인지 불명확해 모듈별로 설정 가능하게 둔다.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GradClipConfig {
    pub state_encoder: f64,
    pub offset_encoder: f64,
    pub target_encoder: f64,
    pub lstm: f64,
    pub decoder: f64,
    pub short_discriminator: f64,
    pub long_discriminator: f64,
}

impl Default for GradClipConfig {
    fn default() -> Self {
        Self {
            state_encoder: 1.0,
            offset_encoder: 1.0,
            target_encoder: 1.0,
            lstm: 1.0,
            decoder: 1.0,
            short_discriminator: 1.0,
            long_discriminator: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// 한 윈도우의 전체 프레임 수
    pub window: usize,
    /// 윈도우 안에서 롤아웃이 시작하는 오프셋
    pub window_offset: usize,
    /// 예측 구간 길이
    pub training_frames: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub optim_beta1: f64,
    pub optim_beta2: f64,
    /// 윈도우당 1회 샘플링되는 타깃 노이즈 표준편차
    pub target_noise: f64,
    pub loss_pos_weight: f64,
    pub loss_quat_weight: f64,
    pub loss_global_quat_weight: f64,
    pub loss_root_weight: f64,
    pub loss_contact_weight: f64,
    pub loss_generator_weight: f64,
    pub loss_discriminator_weight: f64,
    pub grad_clip: GradClipConfig,
    pub save_optimizer: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            window: 50,
            window_offset: 10,
            training_frames: 30,
            batch_size: 32,
            epochs: 200,
            learning_rate: 1e-3,
            optim_beta1: 0.5,
            optim_beta2: 0.9,
            target_noise: 0.5,
            loss_pos_weight: 1.0,
            loss_quat_weight: 1.0,
            loss_global_quat_weight: 0.5,
            loss_root_weight: 1.0,
            loss_contact_weight: 0.1,
            loss_generator_weight: 0.1,
            loss_discriminator_weight: 1.0,
            grad_clip: GradClipConfig::default(),
            save_optimizer: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// K 에폭마다 체크포인트 저장
    pub weight_save_interval: usize,
    pub model_weights_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            weight_save_interval: 50,
            model_weights_dir: "model_weights".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub test_frames: usize,
    pub window_offset: usize,
    pub inference_batch_index: usize,
    pub saved_weight_path: String,
    pub results_dir: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            test_frames: 30,
            window_offset: 9,
            inference_batch_index: 0,
            saved_weight_path: "model_weights/DFKI/trained_weight_200".to_string(),
            results_dir: "results".to_string(),
        }
    }
}

/// 디바이스 선택자 해석. CUDA를 쓸 수 없으면 경고 후 CPU로 폴백.
pub fn resolve_device(selector: &str) -> Device {
    if selector == "cpu" {
        return Device::Cpu;
    }
    if let Some(rest) = selector.strip_prefix("cuda:") {
        if let Ok(ordinal) = rest.parse::<usize>() {
            match Device::new_cuda(ordinal) {
                Ok(device) => return device,
                Err(e) => {
                    println!("⚠️ CUDA {} 사용 불가 ({e}), CPU로 폴백", ordinal);
                    return Device::Cpu;
                }
            }
        }
    }
    println!("⚠️ 알 수 없는 디바이스 선택자 '{}', CPU 사용", selector);
    Device::Cpu
}
