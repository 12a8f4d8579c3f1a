#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunloopMode {
    Inline,
    Threaded,
}

#[derive(Clone, Copy, Debug)]
pub struct RunloopConfig {
    pub mode: RunloopMode,
    pub file_steps_per_tick: usize,
    pub image_chunk_divisor: usize,
    pub image_process_divisor: usize,
    pub queue_capacity: usize,
}

impl RunloopConfig {
    pub fn inline() -> Self {
        Self {
            mode: RunloopMode::Inline,
            file_steps_per_tick: 5,
            image_chunk_divisor: 2,
            image_process_divisor: 4,
            queue_capacity: 8,
        }
    }

    pub fn threaded() -> Self {
        Self {
            mode: RunloopMode::Threaded,
            ..Self::inline()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_file_steps_per_tick(mut self, steps: usize) -> Self {
        self.file_steps_per_tick = steps.max(1);
        self
    }
}

impl Default for RunloopConfig {
    fn default() -> Self {
        Self::inline()
    }
}

// The chunk and processing budgets scale with the input so small images
// finish in a couple of ticks and large ones still make progress.
pub fn increment_for(len: usize, divisor: usize) -> usize {
    (len / divisor.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_never_zero() {
        assert_eq!(increment_for(0, 2), 1);
        assert_eq!(increment_for(1, 2), 1);
        assert_eq!(increment_for(1, 4), 1);
        assert_eq!(increment_for(8, 2), 4);
        assert_eq!(increment_for(8, 4), 2);
        assert_eq!(increment_for(7, 4), 1);
    }

    #[test]
    fn builders_clamp_to_one() {
        let config = RunloopConfig::inline()
            .with_queue_capacity(0)
            .with_file_steps_per_tick(0);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.file_steps_per_tick, 1);
    }

    #[test]
    fn threaded_keeps_step_budgets() {
        let config = RunloopConfig::threaded();
        assert_eq!(config.mode, RunloopMode::Threaded);
        assert_eq!(config.file_steps_per_tick, 5);
        assert_eq!(config.image_chunk_divisor, 2);
        assert_eq!(config.image_process_divisor, 4);
        assert_eq!(config.queue_capacity, 8);
    }
}
