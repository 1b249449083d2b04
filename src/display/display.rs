//! SDL2 Window Display Module
//! One SDL2 window per viewer label, created on first use.
//! Uses the sdl2 crate for window management and rendering.

use std::collections::HashMap;

use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::{EventPump, Sdl, VideoSubsystem};
use tracing::{debug, info};

use super::surface::RenderSurface;
use crate::capture::{decoder, Frame};
use crate::error::RenderError;

struct SdlWindow {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    id: u32,
}

/// SDL2 window set
/// Handles window creation, the event pump and frame rendering.
pub struct Sdl2Surface {
    _sdl: Sdl,
    video: VideoSubsystem,
    event_pump: EventPump,
    windows: HashMap<String, SdlWindow>,
    vsync: bool,
}

fn backend(e: impl ToString) -> RenderError {
    RenderError::Backend(e.to_string())
}

impl Sdl2Surface {
    pub fn new(vsync: bool) -> Result<Self, RenderError> {
        let sdl = sdl2::init().map_err(backend)?;
        let video = sdl.video().map_err(backend)?;
        let event_pump = sdl.event_pump().map_err(backend)?;

        Ok(Self {
            _sdl: sdl,
            video,
            event_pump,
            windows: HashMap::new(),
            vsync,
        })
    }

    fn open_window(&mut self, label: &str, width: u32, height: u32) -> Result<(), RenderError> {
        let window = self
            .video
            .window(label, width, height)
            .position_centered()
            .build()
            .map_err(backend)?;
        let id = window.id();

        let canvas_builder = window.into_canvas();
        let canvas_builder = if self.vsync {
            canvas_builder.present_vsync()
        } else {
            canvas_builder
        };
        let canvas = canvas_builder.build().map_err(backend)?;
        let texture_creator = canvas.texture_creator();

        info!("Opened window \"{}\" ({}x{})", label, width, height);
        self.windows.insert(
            label.to_string(),
            SdlWindow {
                canvas,
                texture_creator,
                id,
            },
        );
        Ok(())
    }
}

impl RenderSurface for Sdl2Surface {
    fn show(&mut self, label: &str, frame: &Frame) -> Result<(), RenderError> {
        let rgb = decoder::decode_frame(frame)?;
        if !self.windows.contains_key(label) {
            self.open_window(label, rgb.width, rgb.height)?;
        }
        let Some(window) = self.windows.get_mut(label) else {
            return Ok(());
        };

        let mut texture = window
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, rgb.width, rgb.height)
            .map_err(backend)?;

        texture
            .update(None, &rgb.pixels, (rgb.width * 3) as usize)
            .map_err(backend)?;

        window.canvas.clear();
        window.canvas.copy(&texture, None, None).map_err(backend)?;
        window.canvas.present();
        Ok(())
    }

    fn poll_key(&mut self) -> Option<char> {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    return Some('q');
                }
                Event::Window {
                    window_id,
                    win_event: WindowEvent::Close,
                    ..
                } => {
                    debug!("Window {} closed", window_id);
                    return Some('q');
                }
                Event::KeyDown {
                    keycode: Some(key), ..
                } => {
                    let pressed = match key {
                        Keycode::Q | Keycode::Escape => 'q',
                        Keycode::S => 's',
                        Keycode::T => 't',
                        _ => continue,
                    };
                    return Some(pressed);
                }
                _ => {}
            }
        }
        None
    }

    fn destroy(&mut self, label: &str) {
        if let Some(window) = self.windows.remove(label) {
            debug!("Closed window \"{}\" ({})", label, window.id);
        }
    }

    fn close_all(&mut self) {
        let count = self.windows.len();
        self.windows.clear();
        if count > 0 {
            info!("Closed {} windows", count);
        }
    }
}
