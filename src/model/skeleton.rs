//! 스켈레톤 계층 구조와 순운동학(FK) 엔진
//!
//! 조인트별 로컬 쿼터니언과 루트 위치로부터 전역 위치/회전을 계산한다.
//! 계층은 부모가 항상 자식보다 앞에 오는 위상 순서로 고정되어 있고,
//! 생성 이후에는 1회성 프루닝(`remove_joints`) 외에는 불변이다.

use candle_core::{bail, DType, Device, Result, Tensor, D};

/// 쿼터니언 성분 순서는 (w, x, y, z)
pub fn quat_mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let aw = a.narrow(D::Minus1, 0, 1)?;
    let ax = a.narrow(D::Minus1, 1, 1)?;
    let ay = a.narrow(D::Minus1, 2, 1)?;
    let az = a.narrow(D::Minus1, 3, 1)?;
    let bw = b.narrow(D::Minus1, 0, 1)?;
    let bx = b.narrow(D::Minus1, 1, 1)?;
    let by = b.narrow(D::Minus1, 2, 1)?;
    let bz = b.narrow(D::Minus1, 3, 1)?;

    let w = ((((&aw * &bw)? - (&ax * &bx)?)? - (&ay * &by)?)? - (&az * &bz)?)?;
    let x = ((((&aw * &bx)? + (&ax * &bw)?)? + (&ay * &bz)?)? - (&az * &by)?)?;
    let y = ((((&aw * &by)? - (&ax * &bz)?)? + (&ay * &bw)?)? + (&az * &bx)?)?;
    let z = ((((&aw * &bz)? + (&ax * &by)?)? - (&ay * &bx)?)? + (&az * &bw)?)?;

    Tensor::cat(&[w, x, y, z], D::Minus1)
}

fn cross3(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let a1 = a.narrow(D::Minus1, 0, 1)?;
    let a2 = a.narrow(D::Minus1, 1, 1)?;
    let a3 = a.narrow(D::Minus1, 2, 1)?;
    let b1 = b.narrow(D::Minus1, 0, 1)?;
    let b2 = b.narrow(D::Minus1, 1, 1)?;
    let b3 = b.narrow(D::Minus1, 2, 1)?;

    let c1 = ((&a2 * &b3)? - (&a3 * &b2)?)?;
    let c2 = ((&a3 * &b1)? - (&a1 * &b3)?)?;
    let c3 = ((&a1 * &b2)? - (&a2 * &b1)?)?;
    Tensor::cat(&[c1, c2, c3], D::Minus1)
}

/// v' = v + 2w·(u×v) + 2·u×(u×v), u = q의 벡터부
pub fn quat_rotate_vec(q: &Tensor, v: &Tensor) -> Result<Tensor> {
    let w = q.narrow(D::Minus1, 0, 1)?;
    let u = q.narrow(D::Minus1, 1, 3)?;
    let uv = cross3(&u, v)?;
    let uuv = cross3(&u, &uv)?;
    let wuv = uv.broadcast_mul(&w)?;
    let delta = ((&wuv + &uuv)? * 2.0)?;
    v + &delta
}

/// 마지막 축 기준 L2 정규화. 디코더 출력 쿼터니언에 매 스텝 필수.
pub fn normalize_quat(q: &Tensor) -> Result<Tensor> {
    let norm = q.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
    q.broadcast_div(&norm)
}

/// 고정 토폴로지 스켈레톤. 부모 인덱스는 항상 자신보다 작다.
#[derive(Debug, Clone)]
pub struct Skeleton {
    offsets: Vec<[f32; 3]>,
    parents: Vec<Option<usize>>,
    device: Device,
}

impl Skeleton {
    pub fn new(offsets: Vec<[f32; 3]>, parents: Vec<Option<usize>>, device: &Device) -> Result<Self> {
        if offsets.len() != parents.len() {
            bail!("오프셋 {}개 / 부모 {}개 불일치", offsets.len(), parents.len());
        }
        if parents.is_empty() {
            bail!("빈 스켈레톤은 만들 수 없음");
        }
        for (j, parent) in parents.iter().enumerate() {
            match parent {
                None if j != 0 => bail!("루트가 아닌 조인트 {}에 부모가 없음", j),
                Some(p) if *p >= j => bail!("조인트 {}의 부모 {}가 위상 순서를 깸", j, p),
                _ => {}
            }
        }
        if parents[0].is_some() {
            bail!("루트 조인트는 부모를 가질 수 없음");
        }
        Ok(Self {
            offsets,
            parents,
            device: device.clone(),
        })
    }

    pub fn num_joints(&self) -> usize {
        self.parents.len()
    }

    pub fn parents(&self) -> &[Option<usize>] {
        &self.parents
    }

    pub fn offsets(&self) -> &[[f32; 3]] {
        &self.offsets
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// 조인트 제거. 정책: 제거 대상의 모든 하위 조인트도 연쇄 제거한다.
    /// 트리가 끊어지는 일이 없도록 재인덱싱/재부모화까지 수행하며,
    /// 살아남은 조인트의 이전 인덱스 목록을 돌려준다.
    pub fn remove_joints(&mut self, indices: &[usize]) -> Result<Vec<usize>> {
        let n = self.num_joints();
        let mut removed = vec![false; n];
        for &i in indices {
            if i >= n {
                bail!("제거 인덱스 {}가 조인트 수 {}를 벗어남", i, n);
            }
            if i == 0 {
                bail!("루트 조인트는 제거할 수 없음");
            }
            removed[i] = true;
        }
        // 부모가 제거되면 자식도 제거 (위상 순서라 한 번의 전진 패스로 충분)
        for j in 1..n {
            if let Some(p) = self.parents[j] {
                if removed[p] {
                    removed[j] = true;
                }
            }
        }

        let mut remap = vec![usize::MAX; n];
        let mut kept = Vec::new();
        for j in 0..n {
            if !removed[j] {
                remap[j] = kept.len();
                kept.push(j);
            }
        }

        let offsets = kept.iter().map(|&j| self.offsets[j]).collect();
        let parents = kept
            .iter()
            .map(|&j| self.parents[j].map(|p| remap[p]))
            .collect();
        self.offsets = offsets;
        self.parents = parents;
        Ok(kept)
    }

    /// 배치 FK. `local_q`: (B, T, J, 4) 단위 쿼터니언, `root_p`: (B, T, 3).
    /// 반환: (전역 위치 (B,T,J,3), 전역 회전 (B,T,J,4)).
    /// 입력 쿼터니언 정규화는 호출자 책임이다.
    pub fn forward_kinematics_with_rotation(
        &self,
        local_q: &Tensor,
        root_p: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let (b, t, j, four) = local_q.dims4()?;
        assert_eq!(j, self.num_joints(), "조인트 수 불일치");
        assert_eq!(four, 4, "쿼터니언 차원 불일치");
        assert_eq!(root_p.dims3()?, (b, t, 3), "루트 위치 형상 불일치");

        let mut global_p: Vec<Tensor> = Vec::with_capacity(j);
        let mut global_r: Vec<Tensor> = Vec::with_capacity(j);

        for joint in 0..j {
            let lq = local_q.narrow(2, joint, 1)?.squeeze(2)?; // (B, T, 4)
            match self.parents[joint] {
                None => {
                    global_r.push(lq);
                    global_p.push(root_p.clone());
                }
                Some(parent) => {
                    let offset = Tensor::new(&self.offsets[joint], &self.device)?
                        .to_dtype(DType::F32)?
                        .broadcast_as((b, t, 3))?;
                    let pos = (&global_p[parent] + &quat_rotate_vec(&global_r[parent], &offset)?)?;
                    let rot = quat_mul(&global_r[parent], &lq)?;
                    global_p.push(pos);
                    global_r.push(rot);
                }
            }
        }

        let positions = Tensor::stack(&global_p, 2)?;
        let rotations = Tensor::stack(&global_r, 2)?;
        Ok((positions, rotations))
    }
}

/// 지원 데이터셋 프로파일. 잘못된 선택자는 경고 후 기본값(Dfki)으로 폴백.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetProfile {
    Lafan,
    Dfki,
}

impl DatasetProfile {
    pub fn from_arg(arg: &str) -> Self {
        match arg.to_ascii_uppercase().as_str() {
            "LAFAN" => Self::Lafan,
            "DFKI" => Self::Dfki,
            other => {
                println!("⚠️ 지원하지 않는 데이터셋 '{}', 기본값 DFKI 사용", other);
                Self::Dfki
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lafan => "LAFAN",
            Self::Dfki => "DFKI",
        }
    }

    pub fn parents(&self) -> Vec<Option<usize>> {
        match self {
            Self::Lafan => LAFAN_PARENTS.iter().map(|&p| parent_of(p)).collect(),
            Self::Dfki => DFKI_PARENTS.iter().map(|&p| parent_of(p)).collect(),
        }
    }

    pub fn offsets(&self) -> Vec<[f32; 3]> {
        match self {
            Self::Lafan => LAFAN_OFFSETS.to_vec(),
            Self::Dfki => DFKI_OFFSETS.to_vec(),
        }
    }

    pub fn joints_to_remove(&self) -> &'static [usize] {
        match self {
            Self::Lafan => &LAFAN_JOINTS_TO_REMOVE,
            Self::Dfki => &DFKI_JOINTS_TO_REMOVE,
        }
    }

    /// 프루닝 후 살아남는 조인트 이름 (출력 레코드 라벨용)
    pub fn joint_names(&self) -> Vec<&'static str> {
        let remove: &[usize] = self.joints_to_remove();
        let names: &[&'static str] = match self {
            Self::Lafan => &LAFAN_JOINT_NAMES,
            Self::Dfki => &DFKI_JOINT_NAMES,
        };
        names
            .iter()
            .enumerate()
            .filter(|(j, _)| !remove.contains(j))
            .map(|(_, &n)| n)
            .collect()
    }

    /// 프루닝까지 적용한 스켈레톤 생성
    pub fn build_skeleton(&self, device: &Device) -> Result<Skeleton> {
        let mut skeleton = Skeleton::new(self.offsets(), self.parents(), device)?;
        skeleton.remove_joints(self.joints_to_remove())?;
        Ok(skeleton)
    }
}

fn parent_of(p: i32) -> Option<usize> {
    if p < 0 {
        None
    } else {
        Some(p as usize)
    }
}

// LAFAN 계열 스켈레톤: 26개 조인트, 말단 4개 제거 후 22개 사용
const LAFAN_PARENTS: [i32; 26] = [
    -1, 0, 1, 2, 3, 4, 0, 6, 7, 8, 9, 0, 11, 12, 13, 14, 13, 16, 17, 18, 19, 13, 21, 22, 23, 24,
];

const LAFAN_OFFSETS: [[f32; 3]; 26] = [
    [0.0, 0.0, 0.0],
    [0.1039, -0.0185, 0.0105],
    [0.0, -0.4103, 0.0],
    [0.0, -0.4031, 0.0],
    [0.0, -0.0537, 0.1293],
    [0.0, 0.0, 0.0621],
    [-0.1039, -0.0185, 0.0105],
    [0.0, -0.4103, 0.0],
    [0.0, -0.4031, 0.0],
    [0.0, -0.0537, 0.1293],
    [0.0, 0.0, 0.0621],
    [0.0, 0.1052, -0.0115],
    [0.0, 0.1175, 0.0],
    [0.0, 0.1281, 0.0],
    [0.0, 0.1137, 0.0],
    [0.0, 0.0902, 0.0],
    [0.0358, 0.0901, -0.0117],
    [0.1213, 0.0, 0.0],
    [0.2584, 0.0, 0.0],
    [0.2489, 0.0, 0.0],
    [0.0873, 0.0, 0.0],
    [-0.0358, 0.0901, -0.0117],
    [-0.1213, 0.0, 0.0],
    [-0.2584, 0.0, 0.0],
    [-0.2489, 0.0, 0.0],
    [-0.0873, 0.0, 0.0],
];

const LAFAN_JOINTS_TO_REMOVE: [usize; 4] = [5, 10, 20, 25];

const LAFAN_JOINT_NAMES: [&str; 26] = [
    "Hips",
    "LeftUpLeg",
    "LeftLeg",
    "LeftFoot",
    "LeftToe",
    "LeftToeEnd",
    "RightUpLeg",
    "RightLeg",
    "RightFoot",
    "RightToe",
    "RightToeEnd",
    "Spine",
    "Spine1",
    "Spine2",
    "Neck",
    "Head",
    "LeftShoulder",
    "LeftArm",
    "LeftForeArm",
    "LeftHand",
    "LeftHandEnd",
    "RightShoulder",
    "RightArm",
    "RightForeArm",
    "RightHand",
    "RightHandEnd",
];

// DFKI 수트 스켈레톤: 20개 조인트, 말단 3개 제거 후 17개 사용
const DFKI_PARENTS: [i32; 20] = [
    -1, 0, 1, 2, 3, 4, 2, 6, 7, 8, 2, 10, 11, 12, 0, 14, 15, 0, 17, 18,
];

const DFKI_OFFSETS: [[f32; 3]; 20] = [
    [0.0, 0.0, 0.0],
    [0.0, 0.0931, -0.0064],
    [0.0, 0.2174, 0.0],
    [0.0, 0.1034, 0.0],
    [0.0, 0.0881, 0.0],
    [0.0, 0.1106, 0.0],
    [0.0724, 0.0921, -0.0052],
    [0.2318, 0.0, 0.0],
    [0.2516, 0.0, 0.0],
    [0.0841, 0.0, 0.0],
    [-0.0724, 0.0921, -0.0052],
    [-0.2318, 0.0, 0.0],
    [-0.2516, 0.0, 0.0],
    [-0.0841, 0.0, 0.0],
    [0.0912, -0.0247, 0.0013],
    [0.0, -0.3921, 0.0],
    [0.0, -0.4114, 0.0],
    [-0.0912, -0.0247, 0.0013],
    [0.0, -0.3921, 0.0],
    [0.0, -0.4114, 0.0],
];

const DFKI_JOINTS_TO_REMOVE: [usize; 3] = [5, 9, 13];

const DFKI_JOINT_NAMES: [&str; 20] = [
    "Hips",
    "Spine",
    "Chest",
    "Neck",
    "Head",
    "HeadEnd",
    "LeftShoulder",
    "LeftElbow",
    "LeftWrist",
    "LeftWristEnd",
    "RightShoulder",
    "RightElbow",
    "RightWrist",
    "RightWristEnd",
    "LeftHip",
    "LeftKnee",
    "LeftAnkle",
    "RightHip",
    "RightKnee",
    "RightAnkle",
];
