//! Input routing: keyboard keys → session commands.
//!
//! Pure mapping with no side effects. Digits are bounds-checked against the
//! current question's option count, and every mapping is inert while a text
//! entry field holds focus so quiz shortcuts never hijack typing.

use evdev::Key;
use tracing::debug;

/// Commands the session consumes via exhaustive matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    SelectOption(usize),
    RepeatQuestion,
    RepeatOptions,
    TogglePause,
    SkipNarration,
    Help,
    Begin,
    SkipInstructions,
    Quit,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RouterContext {
    /// True while the focused element accepts text; all mappings are
    /// suppressed so typing is never interpreted as quiz input.
    pub text_entry_focused: bool,
    pub option_count: usize,
    pub in_instructions: bool,
}

/// Map a key-down event to a command, or None when the key means nothing
/// in the current context.
pub fn route(key: Key, ctx: &RouterContext) -> Option<SessionCommand> {
    if ctx.text_entry_focused {
        return None;
    }

    if let Some(digit) = digit_value(key) {
        if digit <= ctx.option_count {
            return Some(SessionCommand::SelectOption(digit - 1));
        }
        debug!("Digit {digit} out of range for {} option(s)", ctx.option_count);
        return None;
    }

    match key {
        Key::KEY_R => Some(SessionCommand::RepeatQuestion),
        Key::KEY_O => Some(SessionCommand::RepeatOptions),
        Key::KEY_P => Some(SessionCommand::TogglePause),
        Key::KEY_S => Some(SessionCommand::SkipNarration),
        Key::KEY_H => Some(SessionCommand::Help),
        Key::KEY_ENTER | Key::KEY_KPENTER if ctx.in_instructions => Some(SessionCommand::Begin),
        Key::KEY_ESC if ctx.in_instructions => Some(SessionCommand::SkipInstructions),
        _ => None,
    }
}

fn digit_value(key: Key) -> Option<usize> {
    let digit = match key {
        Key::KEY_1 | Key::KEY_KP1 => 1,
        Key::KEY_2 | Key::KEY_KP2 => 2,
        Key::KEY_3 | Key::KEY_KP3 => 3,
        Key::KEY_4 | Key::KEY_KP4 => 4,
        Key::KEY_5 | Key::KEY_KP5 => 5,
        Key::KEY_6 | Key::KEY_KP6 => 6,
        Key::KEY_7 | Key::KEY_KP7 => 7,
        Key::KEY_8 | Key::KEY_KP8 => 8,
        Key::KEY_9 | Key::KEY_KP9 => 9,
        _ => return None,
    };
    Some(digit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(option_count: usize) -> RouterContext {
        RouterContext {
            text_entry_focused: false,
            option_count,
            in_instructions: false,
        }
    }

    #[test]
    fn digits_map_to_zero_based_options() {
        assert_eq!(route(Key::KEY_1, &ctx(4)), Some(SessionCommand::SelectOption(0)));
        assert_eq!(route(Key::KEY_4, &ctx(4)), Some(SessionCommand::SelectOption(3)));
        assert_eq!(route(Key::KEY_KP2, &ctx(4)), Some(SessionCommand::SelectOption(1)));
    }

    #[test]
    fn digits_beyond_option_count_are_ignored() {
        assert_eq!(route(Key::KEY_5, &ctx(4)), None);
        assert_eq!(route(Key::KEY_9, &ctx(2)), None);
        assert_eq!(route(Key::KEY_1, &ctx(0)), None);
    }

    #[test]
    fn letters_map_to_narration_commands() {
        assert_eq!(route(Key::KEY_R, &ctx(2)), Some(SessionCommand::RepeatQuestion));
        assert_eq!(route(Key::KEY_O, &ctx(2)), Some(SessionCommand::RepeatOptions));
        assert_eq!(route(Key::KEY_P, &ctx(2)), Some(SessionCommand::TogglePause));
        assert_eq!(route(Key::KEY_S, &ctx(2)), Some(SessionCommand::SkipNarration));
        assert_eq!(route(Key::KEY_H, &ctx(2)), Some(SessionCommand::Help));
    }

    #[test]
    fn enter_and_escape_only_apply_during_instructions() {
        assert_eq!(route(Key::KEY_ENTER, &ctx(2)), None);
        assert_eq!(route(Key::KEY_ESC, &ctx(2)), None);

        let instructions = RouterContext {
            in_instructions: true,
            ..ctx(0)
        };
        assert_eq!(route(Key::KEY_ENTER, &instructions), Some(SessionCommand::Begin));
        assert_eq!(route(Key::KEY_KPENTER, &instructions), Some(SessionCommand::Begin));
        assert_eq!(route(Key::KEY_ESC, &instructions), Some(SessionCommand::SkipInstructions));
    }

    #[test]
    fn text_entry_focus_suppresses_everything() {
        let suppressed = RouterContext {
            text_entry_focused: true,
            option_count: 4,
            in_instructions: true,
        };
        for key in [Key::KEY_1, Key::KEY_R, Key::KEY_S, Key::KEY_ENTER, Key::KEY_ESC] {
            assert_eq!(route(key, &suppressed), None);
        }
    }

    #[test]
    fn unmapped_keys_do_nothing() {
        assert_eq!(route(Key::KEY_A, &ctx(4)), None);
        assert_eq!(route(Key::KEY_SPACE, &ctx(4)), None);
    }
}
