//! Termination tracking for multi-input processes.

/// Tracks which of a process's named inputs have closed.
///
/// A process whose termination condition is "all inputs are exhausted"
/// registers its input names up front and calls [`complete`][Self::complete]
/// each time one of them signals closure. Single-input processes do not need
/// a guard; a plain `recv` loop already terminates on `None`.
///
/// In a `tokio::select!` loop, gate each branch on
/// [`is_open`][Self::is_open] so a drained input stops being polled instead
/// of yielding `None` on every iteration.
///
/// Misuse (unknown names, completing an input twice) is a programming error
/// and panics.
pub struct InputGuard {
    inputs: Vec<(String, bool)>,
    remaining: usize,
}

impl InputGuard {
    /// Creates a guard tracking the given input names, all open.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inputs: Vec<(String, bool)> = Vec::new();
        for name in names {
            let name = name.into();
            assert!(
                inputs.iter().all(|(existing, _)| *existing != name),
                "duplicate input name '{}'",
                name
            );
            inputs.push((name, false));
        }

        let remaining = inputs.len();
        Self { inputs, remaining }
    }

    /// Marks the named input as closed.
    ///
    /// Returns `true` iff this call closed the last remaining open input,
    /// which is the process's cue to terminate.
    pub fn complete(&mut self, name: &str) -> bool {
        let entry = self
            .inputs
            .iter_mut()
            .find(|(existing, _)| existing == name)
            .unwrap_or_else(|| panic!("unknown input name '{}'", name));
        assert!(!entry.1, "input '{}' completed twice", name);

        entry.1 = true;
        self.remaining -= 1;
        self.remaining == 0
    }

    /// Returns whether the named input is still open.
    pub fn is_open(&self, name: &str) -> bool {
        self.inputs
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, closed)| !closed)
            .unwrap_or_else(|| panic!("unknown input name '{}'", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_only_on_last_input() {
        let mut guard = InputGuard::new(["op1", "op2", "op3"]);

        assert!(!guard.complete("op2"));
        assert!(!guard.complete("op1"));
        assert!(guard.complete("op3"));
    }

    #[test]
    fn is_open_reflects_completion() {
        let mut guard = InputGuard::new(["a", "b"]);
        assert!(guard.is_open("a"));

        guard.complete("a");
        assert!(!guard.is_open("a"));
        assert!(guard.is_open("b"));
    }

    #[test]
    #[should_panic(expected = "unknown input name")]
    fn unknown_name_panics() {
        let mut guard = InputGuard::new(["a"]);
        guard.complete("b");
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn double_complete_panics() {
        let mut guard = InputGuard::new(["a", "b"]);
        guard.complete("a");
        guard.complete("a");
    }

    #[test]
    #[should_panic(expected = "duplicate input name")]
    fn duplicate_name_panics() {
        let _ = InputGuard::new(["a", "a"]);
    }
}
