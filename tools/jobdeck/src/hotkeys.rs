use crate::focus::Surface;
use crate::types::TagCategory;
use crate::view::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Up,
    Down,
    Tab,
    Enter,
    Esc,
    Interrupt,
    Other,
}

impl From<char> for KeyInput {
    fn from(value: char) -> Self {
        match value {
            '\t' => Self::Tab,
            '\n' | '\r' => Self::Enter,
            other => Self::Char(other),
        }
    }
}

impl From<crossterm::event::KeyEvent> for KeyInput {
    fn from(event: crossterm::event::KeyEvent) -> Self {
        use crossterm::event::{KeyCode, KeyModifiers};

        match event.code {
            KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => {
                Self::Interrupt
            }
            KeyCode::Char(c) => Self::Char(c),
            KeyCode::Up => Self::Up,
            KeyCode::Down => Self::Down,
            KeyCode::Tab => Self::Tab,
            KeyCode::Enter => Self::Enter,
            KeyCode::Esc => Self::Esc,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub input: KeyInput,
    pub label: &'static str,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    Quit,
    ToggleFocus,
    Next,
    Previous,
    SwitchView(View),
    CancelBatch,
    Approve,
    Deny,
    Restore,
    Process,
    ToggleMark,
    ProcessMarked,
    ProcessAll,
    Deliver,
    ViewArtifact,
    Harvest(TagCategory),
    RejectTag,
    RejectCompany,
    RejectTitle,
}

impl HotkeyAction {
    /// Bindings that file or reject a tag; only live on the TAGS surface.
    pub fn is_category_binding(self) -> bool {
        matches!(
            self,
            Self::Harvest(_) | Self::RejectTag | Self::RejectCompany | Self::RejectTitle
        )
    }
}

const fn bind(key: char, label: &'static str, action: &'static str) -> HotkeyBinding {
    HotkeyBinding {
        input: KeyInput::Char(key),
        label,
        action,
    }
}

pub const NAVIGATION_BINDINGS: [HotkeyBinding; 5] = [
    HotkeyBinding {
        input: KeyInput::Tab,
        label: "tab",
        action: "focus",
    },
    bind('j', "j", "next"),
    bind('k', "k", "prev"),
    HotkeyBinding {
        input: KeyInput::Down,
        label: "↓",
        action: "next",
    },
    HotkeyBinding {
        input: KeyInput::Up,
        label: "↑",
        action: "prev",
    },
];

pub const LIST_COMMON_BINDINGS: [HotkeyBinding; 1] = [bind('q', "q", "quit")];

pub const NEW_LIST_BINDINGS: [HotkeyBinding; 2] =
    [bind('a', "a", "approve"), bind('d', "d", "deny")];

pub const TAGGING_LIST_BINDINGS: [HotkeyBinding; 1] = [bind('d', "d", "deny")];

pub const TAILORING_LIST_BINDINGS: [HotkeyBinding; 7] = [
    bind('p', "p", "process"),
    bind(' ', "space", "mark"),
    bind('P', "P", "process marked"),
    bind('A', "A", "process all"),
    bind('g', "g", "deliver"),
    bind('v', "v", "view artifact"),
    bind('d', "d", "deny"),
];

pub const DELIVERED_LIST_BINDINGS: [HotkeyBinding; 1] = [bind('v', "v", "view artifact")];

pub const DENIED_LIST_BINDINGS: [HotkeyBinding; 1] = [bind('r', "r", "restore")];

pub const HARVEST_BINDINGS: [HotkeyBinding; 3] = [
    bind('q', "q", "qualifications"),
    bind('s', "s", "skills"),
    bind('b', "b", "benefits"),
];

pub const REJECT_BINDINGS: [HotkeyBinding; 3] = [
    bind('x', "x", "reject tag"),
    bind('c', "c", "reject company"),
    bind('t', "t", "reject title"),
];

pub const BATCH_BINDINGS: [HotkeyBinding; 1] = [HotkeyBinding {
    input: KeyInput::Esc,
    label: "esc",
    action: "cancel batch",
}];

/// Bindings advertised for a view and surface, in legend order.
pub fn bindings_for(view: View, surface: Surface) -> Vec<HotkeyBinding> {
    let mut bindings = NAVIGATION_BINDINGS.to_vec();
    match surface {
        Surface::List => {
            bindings.extend(LIST_COMMON_BINDINGS);
            match view {
                View::New => bindings.extend(NEW_LIST_BINDINGS),
                View::ApprovedTagging => bindings.extend(TAGGING_LIST_BINDINGS),
                View::ApprovedTailoring => {
                    bindings.extend(TAILORING_LIST_BINDINGS);
                    bindings.extend(BATCH_BINDINGS);
                }
                View::Delivered => bindings.extend(DELIVERED_LIST_BINDINGS),
                View::Denied => bindings.extend(DENIED_LIST_BINDINGS),
            }
        }
        Surface::Tags => match view {
            View::ApprovedTagging => bindings.extend(HARVEST_BINDINGS),
            View::New | View::Denied => bindings.extend(REJECT_BINDINGS),
            View::ApprovedTailoring | View::Delivered => {}
        },
    }
    bindings
}

pub fn controls_legend(view: View, surface: Surface) -> String {
    format_bindings("Keys: ", &bindings_for(view, surface))
}

pub fn action_for_key(view: View, surface: Surface, key: KeyInput) -> Option<HotkeyAction> {
    match key {
        KeyInput::Interrupt => return Some(HotkeyAction::Quit),
        KeyInput::Tab => return Some(HotkeyAction::ToggleFocus),
        KeyInput::Down | KeyInput::Char('j') => return Some(HotkeyAction::Next),
        KeyInput::Up | KeyInput::Char('k') => return Some(HotkeyAction::Previous),
        KeyInput::Esc => return Some(HotkeyAction::CancelBatch),
        KeyInput::Char(c) => {
            if let Some(target) = View::from_hotkey(c) {
                return Some(HotkeyAction::SwitchView(target));
            }
        }
        KeyInput::Enter | KeyInput::Other => return None,
    }
    let KeyInput::Char(key) = key else {
        return None;
    };

    match surface {
        Surface::List => list_action(view, key),
        Surface::Tags => tag_action(view, key),
    }
}

fn list_action(view: View, key: char) -> Option<HotkeyAction> {
    use HotkeyAction as A;

    match (view, key) {
        (_, 'q') => Some(A::Quit),
        (View::New, 'a') => Some(A::Approve),
        (View::New | View::ApprovedTagging | View::ApprovedTailoring, 'd') => Some(A::Deny),
        (View::Denied, 'r') => Some(A::Restore),
        (View::ApprovedTailoring, 'p') => Some(A::Process),
        (View::ApprovedTailoring, ' ') => Some(A::ToggleMark),
        (View::ApprovedTailoring, 'P') => Some(A::ProcessMarked),
        (View::ApprovedTailoring, 'A') => Some(A::ProcessAll),
        (View::ApprovedTailoring, 'g') => Some(A::Deliver),
        (View::ApprovedTailoring | View::Delivered, 'v') => Some(A::ViewArtifact),
        _ => None,
    }
}

fn tag_action(view: View, key: char) -> Option<HotkeyAction> {
    use HotkeyAction as A;

    match (view, key) {
        (View::ApprovedTagging, 'q') => Some(A::Harvest(TagCategory::Qualifications)),
        (View::ApprovedTagging, 's') => Some(A::Harvest(TagCategory::Skills)),
        (View::ApprovedTagging, 'b') => Some(A::Harvest(TagCategory::Benefits)),
        (View::New | View::Denied, 'x') => Some(A::RejectTag),
        (View::New | View::Denied, 'c') => Some(A::RejectCompany),
        (View::New | View::Denied, 't') => Some(A::RejectTitle),
        _ => None,
    }
}

fn format_bindings(prefix: &str, bindings: &[HotkeyBinding]) -> String {
    let parts = bindings
        .iter()
        .map(|binding| format!("{} {}", binding.label, binding.action))
        .collect::<Vec<_>>();
    format!("{prefix}{}", parts.join("  "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_letter_means_different_things_per_surface() {
        assert_eq!(
            action_for_key(View::ApprovedTagging, Surface::List, KeyInput::Char('q')),
            Some(HotkeyAction::Quit)
        );
        assert_eq!(
            action_for_key(View::ApprovedTagging, Surface::Tags, KeyInput::Char('q')),
            Some(HotkeyAction::Harvest(TagCategory::Qualifications))
        );
        assert_eq!(
            action_for_key(View::New, Surface::Tags, KeyInput::Char('a')),
            None
        );
    }

    #[test]
    fn category_bindings_never_resolve_on_the_list_surface() {
        for view in View::ALL {
            for key in ['q', 's', 'b', 'x', 'c', 't'] {
                let action = action_for_key(view, Surface::List, KeyInput::Char(key));
                assert!(
                    !action.is_some_and(HotkeyAction::is_category_binding),
                    "{view:?} list resolved {key} to a category binding"
                );
            }
        }
    }

    #[test]
    fn navigation_works_on_both_surfaces() {
        for surface in [Surface::List, Surface::Tags] {
            assert_eq!(
                action_for_key(View::Denied, surface, KeyInput::Down),
                Some(HotkeyAction::Next)
            );
            assert_eq!(
                action_for_key(View::Denied, surface, KeyInput::Tab),
                Some(HotkeyAction::ToggleFocus)
            );
            assert_eq!(
                action_for_key(View::Denied, surface, KeyInput::Char('4')),
                Some(HotkeyAction::SwitchView(View::Delivered))
            );
        }
    }

    #[test]
    fn legend_matches_surface() {
        let list = controls_legend(View::New, Surface::List);
        assert!(list.contains("a approve"));
        assert!(!list.contains("reject"));
        let tags = controls_legend(View::New, Surface::Tags);
        assert!(tags.contains("c reject company"));
        assert!(!tags.contains("approve"));
    }
}
