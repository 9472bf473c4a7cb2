//! Override value port.

/// A named external value that pins the active spec when set.
pub trait OverrideSource: Send + Sync {
    /// Current raw value, if any. Trimming is the caller's job.
    fn read(&self) -> Option<String>;
}

impl<F> OverrideSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn read(&self) -> Option<String> {
        self()
    }
}

/// Reads the override from a process environment variable.
#[derive(Debug, Clone)]
pub struct EnvOverride {
    var: String,
}

impl EnvOverride {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl OverrideSource for EnvOverride {
    fn read(&self) -> Option<String> {
        // Non-UTF-8 values cannot name a spec; treat them as unset.
        std::env::var(&self.var).ok()
    }
}

/// Trim a candidate name; empty or whitespace-only becomes `None`.
pub fn normalize_name(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
