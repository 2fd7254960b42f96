//! The outer driver: steps each core one atomic operation at a time and
//! flushes statistics when the simulation ends.

use tracing::debug;

use crate::core::{Core, SwitchCosts, TimerMode};
use crate::error::SimError;
use crate::hierarchy::Hierarchy;
use crate::log::{Event, EventKind, EventSink, ThreadRef, ThreadStatsRecord};
use crate::module::Modules;
use crate::thread::Threads;
use crate::time::Time;
use crate::types::CoreUid;

/// World-level knobs.
#[derive(Debug, Clone, Copy)]
pub struct WorldConfig {
    pub timer_mode: TimerMode,
    pub costs: SwitchCosts,
}

impl Default for WorldConfig {
    fn default() -> WorldConfig {
        WorldConfig {
            timer_mode: TimerMode::Local,
            costs: SwitchCosts::default(),
        }
    }
}

/// Owns the arenas, the cores and the event sink.
pub struct World {
    threads: Threads,
    modules: Modules,
    cores: Vec<Core>,
    sink: Box<dyn EventSink>,
}

impl World {
    /// Single-core world over the given hierarchy.
    pub fn new(
        hierarchy: Hierarchy,
        config: WorldConfig,
        mut sink: Box<dyn EventSink>,
    ) -> Result<World, SimError> {
        let Hierarchy {
            threads,
            modules,
            kernel_scheduler,
        } = hierarchy;
        let core = Core::new(
            CoreUid(0),
            kernel_scheduler,
            config.timer_mode,
            config.costs,
            &threads,
            &modules,
            sink.as_mut(),
        )?;
        Ok(World {
            threads,
            modules,
            cores: vec![core],
            sink,
        })
    }

    /// Advance every core by one atomic operation. On a fatal error the
    /// sink receives a final failure event and the error propagates.
    pub fn step(&mut self) -> Result<Time, SimError> {
        let core = &mut self.cores[0];
        match core.execute(&mut self.threads, &self.modules, self.sink.as_mut()) {
            Ok(()) => Ok(core.current_time()),
            Err(err) => {
                let failure = Event {
                    core: core.uid(),
                    time: core.current_time(),
                    kind: EventKind::CoreFailure {
                        reason: err.to_string(),
                    },
                };
                // Best effort; the failure itself is what we report.
                let _ = self.sink.emit(&failure);
                Err(err)
            }
        }
    }

    /// All work done and every core idle for good.
    pub fn is_finished(&self) -> bool {
        self.cores.iter().all(Core::is_finished)
    }

    pub fn current_time(&self) -> Time {
        self.cores[0].current_time()
    }

    /// Step until the simulation completes or the clock passes `limit`.
    pub fn run_until(&mut self, limit: Time) -> Result<Time, SimError> {
        while !self.is_finished() {
            let now = self.step()?;
            if now > limit {
                break;
            }
        }
        debug!(time = %self.current_time(), "run complete");
        Ok(self.current_time())
    }

    /// Flush per-thread and per-core statistics into the event stream,
    /// in arena order so the output is stable.
    pub fn log_statistics(&mut self) -> Result<(), SimError> {
        let now = self.current_time();
        let core_uid = self.cores[0].uid();

        for (_, thread) in self.threads.iter() {
            let stats = ThreadStatsRecord {
                execution_time: thread.stats.execution_time(),
                run: thread
                    .stats
                    .run
                    .iter()
                    .map(|s| (s.start, s.duration))
                    .collect(),
                wait: thread.stats.wait.clone(),
                bg: thread.stats.bg.clone(),
                ctx_switch_in: thread.stats.ctx_switch_in,
                ctx_switch_out: thread.stats.ctx_switch_out,
                finished_time: thread.stats.finished_time,
                remaining: thread.remaining,
            };
            self.sink.emit(&Event {
                core: core_uid,
                time: now,
                kind: EventKind::ThreadStatistics {
                    thread: ThreadRef {
                        module: thread.module_name.clone(),
                        tid: thread.tid,
                    },
                    stats,
                },
            })?;
        }

        for core in &self.cores {
            self.sink.emit(&Event {
                core: core.uid(),
                time: now,
                kind: EventKind::CoreStatistics {
                    stats: core.statistics(),
                },
            })?;
        }
        Ok(())
    }
}
