/// 17 スロットの骨格レイアウト (COCO 順)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Nose),
            1 => Some(Self::LeftEye),
            2 => Some(Self::RightEye),
            3 => Some(Self::LeftEar),
            4 => Some(Self::RightEar),
            5 => Some(Self::LeftShoulder),
            6 => Some(Self::RightShoulder),
            7 => Some(Self::LeftElbow),
            8 => Some(Self::RightElbow),
            9 => Some(Self::LeftWrist),
            10 => Some(Self::RightWrist),
            11 => Some(Self::LeftHip),
            12 => Some(Self::RightHip),
            13 => Some(Self::LeftKnee),
            14 => Some(Self::RightKnee),
            15 => Some(Self::LeftAnkle),
            16 => Some(Self::RightAnkle),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

/// 画像平面上の2D座標（ピクセル）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 一様スケールを適用
    pub fn scaled(&self, scale: f64) -> Self {
        Self {
            x: self.x * scale,
            y: self.y * scale,
        }
    }
}

/// 解析結果のキーポイント列
///
/// 空か、17スロット固定。未検出スロットは `None` で、(0,0) とは区別する。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keypoints {
    slots: Vec<Option<Point2>>,
}

impl Keypoints {
    pub fn empty() -> Self {
        Self { slots: Vec::new() }
    }

    /// 17未満なら未検出で埋める。17を超える場合は `None`。
    pub fn from_slots(mut slots: Vec<Option<Point2>>) -> Option<Self> {
        if slots.is_empty() {
            return Some(Self::empty());
        }
        if slots.len() > KeypointIndex::COUNT {
            return None;
        }
        slots.resize(KeypointIndex::COUNT, None);
        Some(Self { slots })
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: KeypointIndex) -> Option<Point2> {
        self.slots.get(index as usize).copied().flatten()
    }

    /// 検出済みスロットのみ (インデックス, 座標)
    pub fn present(&self) -> impl Iterator<Item = (KeypointIndex, Point2)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            let point = (*slot)?;
            Some((KeypointIndex::from_index(i)?, point))
        })
    }

    pub fn present_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn slots(&self) -> &[Option<Point2>] {
        &self.slots
    }
}
