//! 타깃 노이즈 스케줄링
//!
//! 노이즈 벡터 자체는 윈도우당 한 번 샘플링되고, 여기서는 타임스텝별
//! 스칼라 배율만 결정한다. (t, length)의 순수 함수이며 [0, 1] 범위.

/// 교체 가능한 커리큘럼 곡선. t=0에서 최댓값, t→length에서 0으로 감쇠해야 한다.
pub trait NoiseSchedule {
    fn multiplier(&self, t: usize, length: usize) -> f32;
}

/// 기본 곡선: tta = length - t 기준으로
/// tta > plateau 구간은 1, fade < tta <= plateau 구간은 선형 감쇠, 이하 0.
#[derive(Debug, Clone, Copy)]
pub struct RampDownSchedule {
    pub plateau: usize,
    pub fade: usize,
}

impl RampDownSchedule {
    pub fn new(plateau: usize, fade: usize) -> Self {
        assert!(plateau > fade, "plateau는 fade보다 커야 함");
        Self { plateau, fade }
    }
}

impl Default for RampDownSchedule {
    fn default() -> Self {
        Self::new(30, 5)
    }
}

impl NoiseSchedule for RampDownSchedule {
    fn multiplier(&self, t: usize, length: usize) -> f32 {
        let tta = length.saturating_sub(t);
        if tta > self.plateau {
            1.0
        } else if tta > self.fade {
            (tta - self.fade) as f32 / (self.plateau - self.fade) as f32
        } else {
            0.0
        }
    }
}
