use anyhow::{Context, Result};
use image::RgbImage;
use opencv::{
    core::{AlgorithmHint, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};

use super::source::{CameraBackend, CameraSource, Constraints, VideoDevice};
use crate::config::CameraConfig;
use crate::error::PipelineError;

/// OpenCVを使用したカメラバックエンド
#[derive(Debug, Clone, Copy)]
pub struct OpenCvBackend {
    index: i32,
}

impl OpenCvBackend {
    pub fn new(index: i32) -> Self {
        Self { index }
    }
}

impl CameraBackend for OpenCvBackend {
    type Device = OpenCvCamera;

    fn device_id(&self) -> String {
        format!("opencv:{}", self.index)
    }

    fn open(&self, constraints: &Constraints) -> Result<OpenCvCamera> {
        OpenCvCamera::open_with_resolution(self.index, constraints.width, constraints.height)
    }
}

/// OpenCVを使用したカメラキャプチャ
pub struct OpenCvCamera {
    capture: VideoCapture,
    width: u32,
    height: u32,
}

impl OpenCvCamera {
    /// 解像度を指定してカメラを開く
    pub fn open_with_resolution(index: i32, width: u32, height: u32) -> Result<Self> {
        let mut capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32)
            .with_context(|| format!("failed to open camera {index}"))?;

        if !capture.is_opened()? {
            anyhow::bail!("camera {} is not available", index);
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
        // 常に最新フレームを読む
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let actual_width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let actual_height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;

        Ok(Self {
            capture,
            width: actual_width,
            height: actual_height,
        })
    }

    /// BGR Mat を RGB 画像に変換
    fn to_rgb_image(frame: &Mat) -> Result<RgbImage> {
        let mut rgb = Mat::default();
        imgproc::cvt_color(
            frame,
            &mut rgb,
            imgproc::COLOR_BGR2RGB,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;
        if !rgb.is_continuous() {
            rgb = rgb.try_clone()?;
        }

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let bytes = rgb.data_bytes()?.to_vec();
        RgbImage::from_raw(width, height, bytes).context("unexpected frame buffer size")
    }
}

impl VideoDevice for OpenCvCamera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .context("failed to read frame")?;

        // 空フレーム。起動直後か抜線かはキャプチャスレッドが判断する
        if !grabbed || frame.empty() {
            return Ok(None);
        }

        Self::to_rgb_image(&frame).map(Some)
    }
}

/// 設定に従ってカメラを取得する
pub fn acquire_camera(config: &CameraConfig) -> Result<CameraSource, PipelineError> {
    CameraSource::acquire(
        &OpenCvBackend::new(config.index),
        Constraints {
            width: config.width,
            height: config.height,
        },
        config.jpeg_quality,
    )
}
