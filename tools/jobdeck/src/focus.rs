use serde::{Deserialize, Serialize};

/// Which input surface receives directional and category keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Surface {
    List,
    Tags,
}

impl Surface {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "LIST",
            Self::Tags => "TAGS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusState {
    pub surface: Surface,
    pub tag_cursor: Option<usize>,
}

impl Default for FocusState {
    fn default() -> Self {
        Self {
            surface: Surface::List,
            tag_cursor: None,
        }
    }
}

/// Tracks the focused surface and the cursor into the live tag collection.
/// The cursor is always `None` or within `[0, len-1]` of the collection
/// length it was last told about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusController {
    state: FocusState,
}

impl FocusController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FocusState {
        self.state
    }

    pub fn surface(&self) -> Surface {
        self.state.surface
    }

    pub fn tag_cursor(&self) -> Option<usize> {
        self.state.tag_cursor
    }

    /// Back to LIST with nothing highlighted. Runs on every view switch and
    /// every job (re)selection.
    pub fn reset(&mut self) {
        self.state = FocusState::default();
    }

    pub fn toggle(&mut self, len: usize) -> Surface {
        self.state = match self.state.surface {
            Surface::List => FocusState {
                surface: Surface::Tags,
                tag_cursor: (len > 0).then_some(0),
            },
            Surface::Tags => FocusState::default(),
        };
        self.state.surface
    }

    /// Moves the tag cursor, clamped to the collection. Returns whether it moved.
    pub fn move_cursor(&mut self, direction: Direction, len: usize) -> bool {
        if self.state.surface != Surface::Tags || len == 0 {
            return false;
        }
        let current = self.state.tag_cursor.map_or(0, |cursor| cursor.min(len - 1));
        let next = match direction {
            Direction::Next => (current + 1).min(len - 1),
            Direction::Previous => current.saturating_sub(1),
        };
        let moved = self.state.tag_cursor != Some(next);
        self.state.tag_cursor = Some(next);
        moved
    }

    /// Re-clamps the cursor after the collection changed size.
    pub fn revalidate(&mut self, len: usize) {
        if self.state.surface != Surface::Tags {
            self.state.tag_cursor = None;
            return;
        }
        self.state.tag_cursor = match (self.state.tag_cursor, len) {
            (_, 0) => None,
            (Some(cursor), len) => Some(cursor.min(len - 1)),
            (None, _) => Some(0),
        };
    }
}
