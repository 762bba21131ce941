//! # 모델 모듈 - 스켈레톤 FK와 네트워크 구성요소

pub mod network;
pub mod noise_injector;
pub mod positional_encoding;
pub mod skeleton;

// 테스트 모듈
#[cfg(test)]
mod __tests__;

// 재수출
pub use network::{Decoder, Discriminator, InputEncoder, LstmNetwork, LATENT_DIM, LSTM_INPUT_DIM};
pub use noise_injector::{NoiseSchedule, RampDownSchedule};
pub use positional_encoding::PositionalEncoding;
pub use skeleton::{normalize_quat, quat_mul, quat_rotate_vec, DatasetProfile, Skeleton};
