//! Rendering collaborator interface

use std::collections::{HashMap, VecDeque};

use crate::capture::Frame;
use crate::error::RenderError;

/// Discrete user commands read from the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// `q`
    Quit,
    /// `s`: save the side-by-side composite of every viewer
    Snapshot,
    /// `t`: append realized per-viewer delays to the diagnostics file
    Diagnostics,
}

impl KeyCommand {
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'q' => Some(KeyCommand::Quit),
            's' => Some(KeyCommand::Snapshot),
            't' => Some(KeyCommand::Diagnostics),
            _ => None,
        }
    }
}

/// Something that can show labelled frames and report key presses.
///
/// Implementations are driven from a single thread and need not be `Send`.
pub trait RenderSurface {
    /// Show `frame` in the window called `label`, creating it if needed.
    fn show(&mut self, label: &str, frame: &Frame) -> Result<(), RenderError>;

    /// Next pending key, if any. Closing a window reports `q`.
    fn poll_key(&mut self) -> Option<char>;

    fn destroy(&mut self, label: &str);

    fn close_all(&mut self);
}

/// Surface without windows. Keeps the last frame per label and can replay a
/// script of key presses, then reports `q` once `quit_when_drained` is set.
#[derive(Default)]
pub struct HeadlessSurface {
    shown: HashMap<String, Frame>,
    show_counts: HashMap<String, u64>,
    keys: VecDeque<char>,
    quit_when_drained: bool,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `q` after the scripted keys run out.
    pub fn quit_when_drained(mut self) -> Self {
        self.quit_when_drained = true;
        self
    }

    pub fn press(&mut self, key: char) {
        self.keys.push_back(key);
    }

    pub fn last_frame(&self, label: &str) -> Option<&Frame> {
        self.shown.get(label)
    }

    pub fn show_count(&self, label: &str) -> u64 {
        self.show_counts.get(label).copied().unwrap_or(0)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.shown.keys().map(String::as_str)
    }
}

impl RenderSurface for HeadlessSurface {
    fn show(&mut self, label: &str, frame: &Frame) -> Result<(), RenderError> {
        self.shown.insert(label.to_string(), frame.clone());
        *self.show_counts.entry(label.to_string()).or_default() += 1;
        Ok(())
    }

    fn poll_key(&mut self) -> Option<char> {
        match self.keys.pop_front() {
            Some(key) => Some(key),
            None if self.quit_when_drained => Some('q'),
            None => None,
        }
    }

    fn destroy(&mut self, label: &str) {
        self.shown.remove(label);
    }

    fn close_all(&mut self) {
        self.shown.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bindings() {
        assert_eq!(KeyCommand::from_key('q'), Some(KeyCommand::Quit));
        assert_eq!(KeyCommand::from_key('S'), Some(KeyCommand::Snapshot));
        assert_eq!(KeyCommand::from_key('t'), Some(KeyCommand::Diagnostics));
        assert_eq!(KeyCommand::from_key('x'), None);
    }

    #[test]
    fn scripted_keys_then_quit() {
        let mut surface = HeadlessSurface::new().quit_when_drained();
        surface.press('s');
        assert_eq!(surface.poll_key(), Some('s'));
        assert_eq!(surface.poll_key(), Some('q'));
    }
}
