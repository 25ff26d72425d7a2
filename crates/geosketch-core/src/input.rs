//! Map events delivered to a session and the pointer state derived from them.

use crate::feature::FeatureId;
use crate::map::MapEventKind;
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Keys a session reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Delete,
    Escape,
    Other(String),
}

impl Key {
    /// Parse a key name as reported by the host.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Delete" | "Del" | "Backspace" => Key::Delete,
            "Escape" | "Esc" => Key::Escape,
            other => Key::Other(other.to_string()),
        }
    }
}

/// Events emitted by the map surface. Pixels are screen coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapEvent {
    PointerMove { pixel: Point },
    PointerDown { pixel: Point },
    PointerUp { pixel: Point },
    Click { pixel: Point },
    DoubleClick { pixel: Point },
    Key(Key),
    /// The view was zoomed.
    ResolutionChanged,
    /// A feature of the working layer was edited by a map primitive.
    FeatureChanged(FeatureId),
}

impl MapEvent {
    pub fn kind(&self) -> MapEventKind {
        match self {
            MapEvent::PointerMove { .. } | MapEvent::PointerDown { .. } | MapEvent::PointerUp { .. } => {
                MapEventKind::Pointer
            }
            MapEvent::Click { .. } => MapEventKind::Click,
            MapEvent::DoubleClick { .. } => MapEventKind::DoubleClick,
            MapEvent::Key(_) => MapEventKind::Key,
            MapEvent::ResolutionChanged => MapEventKind::ResolutionChange,
            MapEvent::FeatureChanged(_) => MapEventKind::FeatureChange,
        }
    }

    pub fn pixel(&self) -> Option<Point> {
        match self {
            MapEvent::PointerMove { pixel }
            | MapEvent::PointerDown { pixel }
            | MapEvent::PointerUp { pixel }
            | MapEvent::Click { pixel }
            | MapEvent::DoubleClick { pixel } => Some(*pixel),
            _ => None,
        }
    }
}

/// Tracks the pointer across events.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    /// Last known pointer position in screen coordinates.
    pub pointer: Option<Point>,
    pressed: bool,
    dragging: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: &MapEvent) {
        match event {
            MapEvent::PointerDown { pixel } => {
                self.pressed = true;
                self.pointer = Some(*pixel);
            }
            MapEvent::PointerMove { pixel } => {
                if self.pressed && self.pointer != Some(*pixel) {
                    self.dragging = true;
                }
                self.pointer = Some(*pixel);
            }
            MapEvent::PointerUp { pixel } => {
                self.pressed = false;
                self.dragging = false;
                self.pointer = Some(*pixel);
            }
            _ => {}
        }
    }

    /// Whether the pointer moved while pressed.
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
