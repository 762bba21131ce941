//! 인비트위닝 네트워크 구성요소
//!
//! 입력 인코더 3종(state/offset/target), 단층 LSTM 코어, 잔차 디코더,
//! 그리고 학습 전용 시간축 컨볼루션 판별기 2종(short/long).

use candle_core::{bail, Result, Tensor, D};
use candle_nn::rnn::LSTMState;
use candle_nn::{
    conv1d, linear, lstm, ops, prelu, Conv1d, Conv1dConfig, Linear, LSTMConfig, Module, PReLU,
    VarBuilder, LSTM, RNN,
};

/// 인코더 출력 / 위치 인코딩 폭
pub const LATENT_DIM: usize = 256;
/// 인코더 은닉층 폭
pub const ENCODER_HIDDEN: usize = 512;
/// LSTM 입력 = state/offset/target 잠재벡터 접합
pub const LSTM_INPUT_DIM: usize = LATENT_DIM * 3;

/// 프레임 단위 피드포워드 인코더. 호출 간 상태 없음.
/// 세 인스턴스(state/offset/target)는 입력 폭만 다르다.
#[derive(Debug)]
pub struct InputEncoder {
    fc0: Linear,
    act0: PReLU,
    fc1: Linear,
    act1: PReLU,
    input_dim: usize,
}

impl InputEncoder {
    pub fn new(input_dim: usize, vb: VarBuilder) -> Result<Self> {
        let fc0 = linear(input_dim, ENCODER_HIDDEN, vb.pp("fc0"))?;
        let act0 = prelu(None, vb.pp("act0"))?;
        let fc1 = linear(ENCODER_HIDDEN, LATENT_DIM, vb.pp("fc1"))?;
        let act1 = prelu(None, vb.pp("act1"))?;
        Ok(Self {
            fc0,
            act0,
            fc1,
            act1,
            input_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn out_dim(&self) -> usize {
        LATENT_DIM
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        assert_eq!(
            x.dim(D::Minus1)?,
            self.input_dim,
            "인코더 입력 폭 불일치"
        );
        let h = self.act0.forward(&self.fc0.forward(x)?)?;
        self.act1.forward(&self.fc1.forward(&h)?)
    }
}

/// 단층 단방향 LSTM 코어. 은닉 상태는 윈도우 하나가 독점 소유하며,
/// 매 윈도우 시작 시 `init_hidden` 호출이 필수다 (누락 시 상태 누수).
#[derive(Debug)]
pub struct LstmNetwork {
    cell: LSTM,
    hidden_dim: usize,
    state: Option<LSTMState>,
}

impl LstmNetwork {
    pub fn new(input_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let cell = lstm(input_dim, hidden_dim, LSTMConfig::default(), vb)?;
        Ok(Self {
            cell,
            hidden_dim,
            state: None,
        })
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// 은닉/셀 상태를 (batch, hidden) 0으로 리셋
    pub fn init_hidden(&mut self, batch_size: usize) -> Result<()> {
        self.state = Some(self.cell.zero_state(batch_size)?);
        Ok(())
    }

    /// 한 타임스텝 전진. `x`: (batch, input_dim), 반환: 새 은닉벡터
    pub fn step(&mut self, x: &Tensor) -> Result<Tensor> {
        let state = match &self.state {
            Some(s) => s,
            None => bail!("init_hidden 없이 LSTM step 호출됨"),
        };
        let next = self.cell.step(x, state)?;
        let h = next.h().clone();
        self.state = Some(next);
        Ok(h)
    }

    pub fn state(&self) -> Option<&LSTMState> {
        self.state.as_ref()
    }
}

/// 잔차 디코더. 포즈 블록(쿼터니언 속도 + 루트 속도)은 무경계(identity),
/// 접촉 블록은 시그모이드. 절대 포즈는 절대 직접 예측하지 않는다.
#[derive(Debug)]
pub struct Decoder {
    fc0: Linear,
    act0: PReLU,
    fc1: Linear,
    act1: PReLU,
    pose_head: Linear,
    contact_head: Linear,
    pose_dim: usize,
    contact_dim: usize,
}

impl Decoder {
    pub fn new(input_dim: usize, pose_dim: usize, contact_dim: usize, vb: VarBuilder) -> Result<Self> {
        let fc0 = linear(input_dim, ENCODER_HIDDEN, vb.pp("fc0"))?;
        let act0 = prelu(None, vb.pp("act0"))?;
        let fc1 = linear(ENCODER_HIDDEN, LATENT_DIM, vb.pp("fc1"))?;
        let act1 = prelu(None, vb.pp("act1"))?;
        let pose_head = linear(LATENT_DIM, pose_dim, vb.pp("pose"))?;
        let contact_head = linear(LATENT_DIM, contact_dim, vb.pp("contact"))?;
        Ok(Self {
            fc0,
            act0,
            fc1,
            act1,
            pose_head,
            contact_head,
            pose_dim,
            contact_dim,
        })
    }

    pub fn pose_dim(&self) -> usize {
        self.pose_dim
    }

    pub fn contact_dim(&self) -> usize {
        self.contact_dim
    }

    /// 반환: (포즈 잔차 (B, pose_dim), 접촉 확률 (B, contact_dim))
    pub fn forward(&self, h: &Tensor) -> Result<(Tensor, Tensor)> {
        let z = self.act0.forward(&self.fc0.forward(h)?)?;
        let z = self.act1.forward(&self.fc1.forward(&z)?)?;
        let pose = self.pose_head.forward(&z)?;
        let contact = ops::sigmoid(&self.contact_head.forward(&z)?)?;
        Ok((pose, contact))
    }
}

/// 시간축 컨볼루션 판별기. short/long은 수용 영역 길이만 다르다.
/// 입력: (batch, 채널 = 조인트×3×2, 프레임 수), 채널은 위치+속도 스택.
/// 출력: 윈도우 위치마다 리얼니스 로짓 (batch, 1, L - length + 1).
#[derive(Debug)]
pub struct Discriminator {
    conv0: Conv1d,
    conv1: Conv1d,
    conv2: Conv1d,
    length: usize,
}

impl Discriminator {
    pub fn new(input_dim: usize, length: usize, vb: VarBuilder) -> Result<Self> {
        let conv0 = conv1d(input_dim, 512, length, Conv1dConfig::default(), vb.pp("conv0"))?;
        let conv1 = conv1d(512, 256, 1, Conv1dConfig::default(), vb.pp("conv1"))?;
        let conv2 = conv1d(256, 1, 1, Conv1dConfig::default(), vb.pp("conv2"))?;
        Ok(Self {
            conv0,
            conv1,
            conv2,
            length,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.conv0.forward(x)?.relu()?;
        let h = self.conv1.forward(&h)?.relu()?;
        self.conv2.forward(&h)
    }

    /// 윈도우 위치 평균 로짓, (batch,)
    pub fn mean_logits(&self, x: &Tensor) -> Result<Tensor> {
        self.forward(x)?.squeeze(1)?.mean(D::Minus1)
    }
}
