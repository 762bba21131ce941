//! 프레임별 포즈 레코드 출력
//!
//! 샘플 디렉터리 아래에 프레임마다 JSON 파일 하나씩. 시작/타깃 프레임
//! 레코드는 샘플당 한 번만 쓴다.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use candle_core::Tensor;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PoseRecord {
    pub joint_names: Vec<String>,
    /// 조인트별 (w, x, y, z)
    pub local_q: Vec<[f32; 4]>,
    pub root_pos: [f32; 3],
}

impl PoseRecord {
    /// `local_q`: (J, 4), `root_pos`: (3,)
    pub fn from_tensors(
        joint_names: &[&str],
        local_q: &Tensor,
        root_pos: &Tensor,
    ) -> anyhow::Result<Self> {
        let rows = local_q.to_vec2::<f32>()?;
        assert_eq!(rows.len(), joint_names.len(), "조인트 이름 수 불일치");
        let local_q = rows
            .into_iter()
            .map(|r| [r[0], r[1], r[2], r[3]])
            .collect();
        let root = root_pos.to_vec1::<f32>()?;
        Ok(Self {
            joint_names: joint_names.iter().map(|s| s.to_string()).collect(),
            local_q,
            root_pos: [root[0], root[1], root[2]],
        })
    }
}

pub fn write_pose_record(path: &Path, record: &PoseRecord) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("레코드 파일 생성 실패: {path:?}"))?;
    serde_json::to_writer(BufWriter::new(file), record)
        .with_context(|| format!("레코드 직렬화 실패: {path:?}"))?;
    Ok(())
}
