//! Builder for static module hierarchies.
//!
//! Modules are declared with their scheduler, threads are attached, and
//! the VCPU threads that let a parent dispatch into a child module are
//! materialized automatically. The hierarchy is fixed for the lifetime of
//! a simulation.

use crate::context::Chain;
use crate::module::{Module, Modules};
use crate::sched::Scheduler;
use crate::thread::{Thread, ThreadKind, Threads};
use crate::time::Time;
use crate::types::{ModuleId, ThreadId};

/// The assembled world inputs: thread and module arenas plus the kernel
/// scheduler thread that becomes the chain bottom.
pub struct Hierarchy {
    pub threads: Threads,
    pub modules: Modules,
    pub kernel_scheduler: ThreadId,
}

pub struct HierarchyBuilder {
    threads: Threads,
    modules: Modules,
    kernel: Option<ModuleId>,
}

impl HierarchyBuilder {
    pub fn new() -> HierarchyBuilder {
        HierarchyBuilder {
            threads: Threads::default(),
            modules: Modules::default(),
            kernel: None,
        }
    }

    /// Declare the kernel module. Must come first and exactly once.
    pub fn kernel(&mut self, name: impl Into<String>, scheduler: Box<dyn Scheduler>) -> ModuleId {
        assert!(self.kernel.is_none(), "the kernel is already declared");
        let id = self.declare_module(name.into(), None, scheduler);
        self.kernel = Some(id);
        id
    }

    /// Attach a child module under `parent`. With no name given the child
    /// is named `<parent>.<index>`.
    pub fn module(
        &mut self,
        parent: ModuleId,
        name: Option<String>,
        scheduler: Box<dyn Scheduler>,
    ) -> ModuleId {
        let name = name.unwrap_or_else(|| {
            let children = self
                .modules
                .iter()
                .filter(|(_, m)| m.parent == Some(parent))
                .count();
            format!("{}.{}", self.modules[parent].name, children)
        });
        let child = self.declare_module(name, Some(parent), scheduler);

        // The parent schedules the child through a VCPU thread proxying
        // the child's scheduler thread.
        let child_scheduler = self.modules[child].scheduler_thread;
        let vcpu_tid = self.modules[parent].threads.len() as u32;
        let vcpu = self.threads.add(Thread::new(
            parent,
            self.modules[parent].name.clone(),
            vcpu_tid,
            Time::zero(),
            None,
            ThreadKind::Vcpu {
                child: child_scheduler,
                chain: None,
            },
        ));
        self.modules[parent].threads.push(vcpu);
        self.register(parent, vcpu);
        child
    }

    /// Add a worker thread. `units` of `None` makes it endless.
    pub fn worker(&mut self, module: ModuleId, start_time: Time, units: Option<Time>) -> ThreadId {
        self.attach(module, start_time, units, ThreadKind::Worker)
    }

    /// Add a periodic worker needing `burst` units of CPU every `period`.
    pub fn periodic(
        &mut self,
        module: ModuleId,
        start_time: Time,
        units: Option<Time>,
        period: Time,
        burst: Time,
    ) -> ThreadId {
        assert!(period.is_positive(), "the period must be positive");
        assert!(burst < period, "the burst must not exceed the period");
        self.attach(
            module,
            start_time,
            units,
            ThreadKind::Periodic {
                period,
                burst,
                origin: start_time,
            },
        )
    }

    pub fn build(self) -> Hierarchy {
        let kernel = self.kernel.expect("a hierarchy needs a kernel module");
        Hierarchy {
            kernel_scheduler: self.modules[kernel].scheduler_thread,
            threads: self.threads,
            modules: self.modules,
        }
    }

    fn declare_module(
        &mut self,
        name: String,
        parent: Option<ModuleId>,
        scheduler: Box<dyn Scheduler>,
    ) -> ModuleId {
        let id = self.modules.add(Module {
            name: name.clone(),
            parent,
            // Placeholder until the scheduler thread exists.
            scheduler_thread: ThreadId(usize::MAX),
            threads: Vec::new(),
        });
        let scheduler_thread = self.threads.add(Thread::new(
            id,
            name,
            0,
            Time::zero(),
            None,
            ThreadKind::Scheduler {
                scheduler: Some(scheduler),
                bg_since_pick: Time::zero(),
            },
        ));
        self.modules[id].scheduler_thread = scheduler_thread;
        self.modules[id].threads.push(scheduler_thread);
        id
    }

    fn attach(
        &mut self,
        module: ModuleId,
        start_time: Time,
        units: Option<Time>,
        kind: ThreadKind,
    ) -> ThreadId {
        let tid = self.modules[module].threads.len() as u32;
        let thread = self.threads.add(Thread::new(
            module,
            self.modules[module].name.clone(),
            tid,
            start_time,
            units,
            kind,
        ));
        self.modules[module].threads.push(thread);
        self.register(module, thread);
        thread
    }

    /// Hand the thread's singleton chain to its module's scheduler.
    fn register(&mut self, module: ModuleId, thread: ThreadId) {
        let scheduler_thread = self.modules[module].scheduler_thread;
        let mut scheduler = match &mut self.threads[scheduler_thread].kind {
            ThreadKind::Scheduler { scheduler, .. } => {
                scheduler.take().expect("scheduler is present during setup")
            }
            _ => unreachable!("module scheduler thread has scheduler kind"),
        };
        let chain = Chain::from_thread(thread, &self.threads);
        scheduler.add_chain(chain, &self.threads);
        if let ThreadKind::Scheduler { scheduler: slot, .. } =
            &mut self.threads[scheduler_thread].kind
        {
            *slot = Some(scheduler);
        }
    }
}

impl Default for HierarchyBuilder {
    fn default() -> HierarchyBuilder {
        HierarchyBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::RoundRobin;

    #[test]
    fn builds_modules_threads_and_vcpus() {
        let mut hb = HierarchyBuilder::new();
        let kernel = hb.kernel("0", Box::new(RoundRobin::new(Some(Time::from_units(10)))));
        let child = hb.module(
            kernel,
            None,
            Box::new(RoundRobin::new(Some(Time::from_units(5)))),
        );
        hb.worker(kernel, Time::zero(), Some(Time::from_units(20)));
        hb.worker(child, Time::zero(), Some(Time::from_units(5)));

        let hierarchy = hb.build();
        assert_eq!(hierarchy.modules.len(), 2);
        assert_eq!(hierarchy.modules[child].name, "0.0");
        // Kernel: scheduler thread, VCPU, worker.
        assert_eq!(hierarchy.modules[kernel].threads.len(), 3);
        assert_eq!(
            hierarchy.kernel_scheduler,
            hierarchy.modules[kernel].scheduler_thread
        );
        let vcpu = hierarchy.modules[kernel].threads[1];
        assert!(matches!(
            hierarchy.threads[vcpu].kind,
            ThreadKind::Vcpu { .. }
        ));
    }

    #[test]
    #[should_panic(expected = "burst must not exceed the period")]
    fn rejects_a_burst_longer_than_its_period() {
        let mut hb = HierarchyBuilder::new();
        let kernel = hb.kernel("0", Box::new(RoundRobin::new(None)));
        hb.periodic(
            kernel,
            Time::zero(),
            None,
            Time::from_units(2),
            Time::from_units(3),
        );
    }
}
