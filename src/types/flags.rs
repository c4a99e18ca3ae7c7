//! Per-fiber runtime flags.

/// Flags consulted by the interpreter on every step.
///
/// Flags are dynamically scoped: `SetInterruptStatus` and
/// `UpdateRuntimeFlags` push a new value for the nested effect and pop it on
/// every exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeFlags {
    /// Whether interruption requests take effect immediately.
    pub interrupt_status: bool,
    /// Whether trace labels on instructions are recorded as frames.
    pub should_trace: bool,
}

impl RuntimeFlags {
    /// Interruptible, tracing enabled.
    pub const DEFAULT: Self = Self {
        interrupt_status: true,
        should_trace: true,
    };

    /// Returns a copy with the interrupt status replaced.
    #[must_use]
    pub const fn with_interrupt_status(mut self, interrupt_status: bool) -> Self {
        self.interrupt_status = interrupt_status;
        self
    }

    /// Returns a copy with tracing toggled.
    #[must_use]
    pub const fn with_should_trace(mut self, should_trace: bool) -> Self {
        self.should_trace = should_trace;
        self
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}
