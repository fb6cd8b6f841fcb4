//! The fixed table of remote-control buttons the daemon reacts to.
//!
//! Key codes are the ones from [input-event-codes.h].
//!
//! [input-event-codes.h]: https://elixir.bootlin.com/linux/v5.19.17/source/include/uapi/linux/input-event-codes.h

pub const KEY_ENTER: u16 = 28;
pub const KEY_PAUSE: u16 = 119;
pub const KEY_STOP: u16 = 128;
pub const KEY_BACK: u16 = 158;
pub const KEY_FORWARD: u16 = 159;
pub const KEY_PLAY: u16 = 207;
pub const KEY_NEXT: u16 = 0x197;
pub const KEY_PREVIOUS: u16 = 0x19c;

/// A recognized button: the name handed to the command and the code the device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding {
    pub name: &'static str,
    pub code: u16,
}

const BINDINGS: [KeyBinding; 8] = [
    KeyBinding { name: "KEY_PREVIOUS", code: KEY_PREVIOUS },
    KeyBinding { name: "KEY_NEXT", code: KEY_NEXT },
    KeyBinding { name: "KEY_BACK", code: KEY_BACK },
    KeyBinding { name: "KEY_FORWARD", code: KEY_FORWARD },
    KeyBinding { name: "KEY_PLAY", code: KEY_PLAY },
    KeyBinding { name: "KEY_PAUSE", code: KEY_PAUSE },
    KeyBinding { name: "KEY_STOP", code: KEY_STOP },
    KeyBinding { name: "KEY_ENTER", code: KEY_ENTER },
];

/// Maps key codes to the symbolic action names passed to the command.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMapping;

impl KeyMapping {
    /// Return the action name bound to `code`, if any.
    pub fn lookup(&self, code: u16) -> Option<&'static str> {
        BINDINGS.iter().find(|b| b.code == code).map(|b| b.name)
    }

    pub fn bindings(&self) -> &'static [KeyBinding] {
        &BINDINGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique() {
        let codes: HashSet<u16> = BINDINGS.iter().map(|b| b.code).collect();
        assert_eq!(codes.len(), BINDINGS.len());
    }

    #[test]
    fn names_are_unique() {
        let names: HashSet<&str> = BINDINGS.iter().map(|b| b.name).collect();
        assert_eq!(names.len(), BINDINGS.len());
    }

    #[test]
    fn lookup_finds_every_binding() {
        let keymap = KeyMapping;
        for binding in keymap.bindings() {
            assert_eq!(keymap.lookup(binding.code), Some(binding.name));
        }
    }

    #[test]
    fn lookup_known_codes() {
        let keymap = KeyMapping;
        assert_eq!(keymap.lookup(KEY_NEXT), Some("KEY_NEXT"));
        assert_eq!(keymap.lookup(KEY_ENTER), Some("KEY_ENTER"));
        assert_eq!(keymap.lookup(KEY_PAUSE), Some("KEY_PAUSE"));
    }

    #[test]
    fn unmapped_codes_have_no_action() {
        let keymap = KeyMapping;
        // KEY_ESC, KEY_A, KEY_VOLUMEUP
        for code in [0, 1, 30, 115, u16::MAX] {
            assert_eq!(keymap.lookup(code), None);
        }
    }
}
