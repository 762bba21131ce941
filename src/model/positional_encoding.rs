//! 도착까지 남은 프레임 수(tta)를 잠재벡터에 주입하는 위치 인코딩
//!
//! 사인/코사인 테이블을 최대 윈도우 길이까지 한 번만 만들어 두고
//! 정수 인덱스 조회로만 쓴다. 호출마다 재계산하지 않는다.

use candle_core::{Device, Result, Tensor};

#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    table: Tensor, // (max_len + 1, dimension)
    dimension: usize,
    max_len: usize,
}

impl PositionalEncoding {
    pub fn new(dimension: usize, max_len: usize, device: &Device) -> Result<Self> {
        let rows = max_len + 1;
        let mut data = vec![0f32; rows * dimension];
        for pos in 0..rows {
            for i in (0..dimension).step_by(2) {
                let angle = pos as f32 / 10000f32.powf(i as f32 / dimension as f32);
                data[pos * dimension + i] = angle.sin();
                if i + 1 < dimension {
                    data[pos * dimension + i + 1] = angle.cos();
                }
            }
        }
        let table = Tensor::from_vec(data, (rows, dimension), device)?;
        Ok(Self {
            table,
            dimension,
            max_len,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// `x` (batch, dimension)에 tta 행을 더해서 반환
    pub fn apply(&self, x: &Tensor, tta: usize) -> Result<Tensor> {
        assert!(tta <= self.max_len, "tta {}가 테이블 길이 {}를 벗어남", tta, self.max_len);
        let row = self.table.narrow(0, tta, 1)?.squeeze(0)?;
        x.broadcast_add(&row)
    }
}
