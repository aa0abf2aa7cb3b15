use anyhow::Result;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

use crate::render::canvas::OverlayCanvas;

/// minifbでオーバーレイを表示するウィンドウ
pub struct OverlayWindow {
    window: Window,
}

impl OverlayWindow {
    /// ウィンドウを作成
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let mut window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )?;
        window.set_target_fps(30);

        Ok(Self { window })
    }

    /// ウィンドウが開いているか
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    /// 今回のフレームで押されたキー（リピートなし）
    pub fn pressed(&self, key: Key) -> bool {
        self.window.is_key_pressed(key, KeyRepeat::No)
    }

    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    /// キャンバスをウィンドウに表示
    pub fn present(&mut self, canvas: &OverlayCanvas) -> Result<()> {
        self.window
            .update_with_buffer(canvas.buffer(), canvas.width(), canvas.height())?;
        Ok(())
    }
}
