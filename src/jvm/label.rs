use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_LABEL: AtomicU32 = AtomicU32::new(0);

/// Position in a method body
///
/// Labels are only identifiers: they are created before the position they mark is known, passed
/// to jumps, switches, and exception handlers, and then placed with `visit_label`. Writers keep
/// track of where each label ended up.
///
/// Labels made with [`Label::new_debug`] are only referenced from debug attributes (line numbers,
/// local variable ranges), so they never start a basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    id: u32,
    debug: bool,
}

impl Label {
    pub fn new() -> Label {
        Label {
            id: NEXT_LABEL.fetch_add(1, Ordering::Relaxed),
            debug: false,
        }
    }

    pub fn new_debug() -> Label {
        Label {
            id: NEXT_LABEL.fetch_add(1, Ordering::Relaxed),
            debug: true,
        }
    }

    pub fn is_debug(self) -> bool {
        self.debug
    }

    pub fn id(self) -> u32 {
        self.id
    }
}

impl Default for Label {
    fn default() -> Self {
        Label::new()
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.id)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn labels_are_distinct() {
        let a = Label::new();
        let b = Label::new();
        let c = Label::new_debug();
        assert_ne!(a, b);
        assert_ne!(b.id(), c.id());
        assert!(c.is_debug() && !a.is_debug());
        assert_eq!(format!("{:?}", a), format!("L{}", a.id()));
    }
}
