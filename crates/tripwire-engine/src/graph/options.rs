use std::time::Duration;

use tripwire_core::config::EngineConfig;

/// How many times a graph walks its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphOptions {
    /// Restart at the head after each traversal, including a branch halt.
    pub repeat: bool,
    /// Pause between traversals.
    pub cycle_delay: Duration,
    /// Upper bound on traversals when repeating.
    pub max_cycles: Option<u64>,
}

impl GraphOptions {
    /// Walk the chain once.
    pub fn once() -> Self {
        Self::default()
    }

    /// Walk the chain until cancelled.
    pub fn repeating() -> Self {
        Self {
            repeat: true,
            ..Self::default()
        }
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    pub fn with_max_cycles(mut self, max: u64) -> Self {
        self.max_cycles = Some(max);
        self
    }

    /// Whether another traversal should start after `completed` of them.
    pub(crate) fn another_cycle(&self, completed: u64) -> bool {
        self.repeat && self.max_cycles.map_or(true, |max| completed < max)
    }
}

impl From<&EngineConfig> for GraphOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            repeat: config.repeat,
            cycle_delay: Duration::from_millis(config.cycle_delay_ms),
            max_cycles: config.max_cycles,
        }
    }
}
