//! A stack that always has a current value.

/// A base value plus a stack of overrides.
///
/// Used for dynamically scoped fiber state: every push is matched by a pop
/// on every exit path, and popping never removes the base value.
#[derive(Debug, Clone)]
pub struct ScopedStack<T> {
    base: T,
    overrides: Vec<T>,
}

impl<T> ScopedStack<T> {
    /// Creates a stack holding only `base`.
    #[must_use]
    pub const fn new(base: T) -> Self {
        Self {
            base,
            overrides: Vec::new(),
        }
    }

    /// The innermost value.
    #[must_use]
    pub fn current(&self) -> &T {
        self.overrides.last().unwrap_or(&self.base)
    }

    /// Pushes an override.
    pub fn push(&mut self, value: T) {
        self.overrides.push(value);
    }

    /// Pops the innermost override. The base value is never popped.
    pub fn pop(&mut self) -> Option<T> {
        self.overrides.pop()
    }

    /// Number of active overrides.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.overrides.len()
    }
}
