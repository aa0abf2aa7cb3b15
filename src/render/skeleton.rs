use crate::pose::{KeypointIndex, Keypoints, Point2};

/// 描画時の余白係数
pub const SCALE_MARGIN: f64 = 0.9;

/// 骨格線の太さ (px)
pub const LINE_THICKNESS: i32 = 3;

/// キーポイントの半径 (px)
pub const MARKER_RADIUS: i32 = 6;

/// キーポイントの塗り色 (RGB)
pub const MARKER_FILL: u32 = 0xC0C0C0;

/// キーポイントの枠線色 (RGB)
pub const MARKER_OUTLINE: u32 = 0x4CAF50;

/// 骨格線の部位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limb {
    Torso,
    Arm,
    Leg,
}

impl Limb {
    /// 線の色 (RGB)
    pub fn color(&self) -> u32 {
        match self {
            Limb::Torso => 0x0000FF, // 青
            Limb::Arm => 0x008000,   // 緑
            Limb::Leg => 0xFF0000,   // 赤
        }
    }
}

/// 骨格の接続定義 (開始キーポイント, 終了キーポイント, 部位)
pub const SKELETON_CONNECTIONS: [(KeypointIndex, KeypointIndex, Limb); 12] = [
    // 胴体
    (KeypointIndex::LeftShoulder, KeypointIndex::RightShoulder, Limb::Torso),
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftHip, Limb::Torso),
    (KeypointIndex::RightShoulder, KeypointIndex::RightHip, Limb::Torso),
    (KeypointIndex::LeftHip, KeypointIndex::RightHip, Limb::Torso),
    // 腕
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftElbow, Limb::Arm),
    (KeypointIndex::LeftElbow, KeypointIndex::LeftWrist, Limb::Arm),
    (KeypointIndex::RightShoulder, KeypointIndex::RightElbow, Limb::Arm),
    (KeypointIndex::RightElbow, KeypointIndex::RightWrist, Limb::Arm),
    // 脚
    (KeypointIndex::LeftHip, KeypointIndex::LeftKnee, Limb::Leg),
    (KeypointIndex::LeftKnee, KeypointIndex::LeftAnkle, Limb::Leg),
    (KeypointIndex::RightHip, KeypointIndex::RightKnee, Limb::Leg),
    (KeypointIndex::RightKnee, KeypointIndex::RightAnkle, Limb::Leg),
];

/// スケール済みの骨格線
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub from: KeypointIndex,
    pub to: KeypointIndex,
    pub limb: Limb,
    pub start: Point2,
    pub end: Point2,
}

/// キャンバス座標に変換済みの描画内容
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub scale: f64,
    pub segments: Vec<Segment>,
    pub markers: Vec<(KeypointIndex, Point2)>,
}

/// キーポイントをキャンバスに収まるよう一様にスケーリングする
///
/// 存在するキーポイントが無ければ `None`（何も描画しない）。
/// 最大値が 0 以下の軸は縮尺の計算から外す。
pub fn project(keypoints: &Keypoints, width: u32, height: u32) -> Option<Overlay> {
    let mut present = keypoints.present().peekable();
    present.peek()?;

    let (max_x, max_y) = present.fold((f64::MIN, f64::MIN), |(mx, my), (_, p)| {
        (mx.max(p.x), my.max(p.y))
    });

    let fit = [(width as f64, max_x), (height as f64, max_y)]
        .into_iter()
        .filter(|&(_, max)| max > 0.0)
        .map(|(extent, max)| extent / max)
        .fold(f64::INFINITY, f64::min);
    let scale = (if fit.is_finite() { fit } else { 1.0 }) * SCALE_MARGIN;

    let segments = SKELETON_CONNECTIONS
        .iter()
        .filter_map(|&(from, to, limb)| {
            let start = keypoints.get(from)?;
            let end = keypoints.get(to)?;
            Some(Segment {
                from,
                to,
                limb,
                start: start.scaled(scale),
                end: end.scaled(scale),
            })
        })
        .collect();

    let markers = keypoints
        .present()
        .map(|(index, p)| (index, p.scaled(scale)))
        .collect();

    Some(Overlay {
        scale,
        segments,
        markers,
    })
}
