//! Cooperative millisecond task scheduler.
//!
//! Tasks run only from [`Scheduler::execute`], one after another, on the
//! caller's thread. Callbacks get mutable access to the context that owns
//! the scheduler; while a callback runs it is moved out of its slot, so it
//! may freely add, re-arm or remove tasks, including itself.

use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

/// Callback of a task
pub type TaskCallback<C> = Box<dyn FnMut(&mut C)>;

/// Stable handle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// How often a task runs once enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    /// Until disabled
    Forever,
    /// This many times, then the task disables itself
    Times(u32),
}

struct Task<C> {
    interval: u64,
    iterations: Iterations,
    remaining: Iterations,
    next_run: u64,
    enabled: bool,
    persistent: bool,
    callback: Option<TaskCallback<C>>,
}

/// Task table driven by an external clock
pub struct Scheduler<C> {
    tasks: BTreeMap<TaskId, Task<C>>,
    next_id: u64,
    now: u64,
}

impl<C> Scheduler<C> {
    /// Empty scheduler at time 0
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 1,
            now: 0,
        }
    }

    /// Time of the last [`Scheduler::execute`]
    pub fn now(&self) -> u64 {
        self.now
    }

    fn insert<F>(
        &mut self,
        interval: u64,
        iterations: Iterations,
        persistent: bool,
        callback: F,
    ) -> TaskId
    where
        F: FnMut(&mut C) + 'static,
    {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.insert(
            id,
            Task {
                interval,
                iterations,
                remaining: iterations,
                next_run: self.now,
                enabled: !persistent,
                persistent,
                callback: Some(Box::new(callback)),
            },
        );
        id
    }

    /// Add an enabled task whose first run is due immediately.
    ///
    /// The task is dropped once its iterations are used up or it is disabled.
    pub fn add_task<F>(&mut self, interval: u64, iterations: Iterations, callback: F) -> TaskId
    where
        F: FnMut(&mut C) + 'static,
    {
        self.insert(interval, iterations, false, callback)
    }

    /// Run `callback` once on the next pass
    pub fn add_once<F>(&mut self, callback: F) -> TaskId
    where
        F: FnMut(&mut C) + 'static,
    {
        self.add_task(0, Iterations::Times(1), callback)
    }

    /// Add a disabled task that stays registered until removed
    pub fn create_persistent<F>(
        &mut self,
        interval: u64,
        iterations: Iterations,
        callback: F,
    ) -> TaskId
    where
        F: FnMut(&mut C) + 'static,
    {
        self.insert(interval, iterations, true, callback)
    }

    /// Enable a disabled task with its first run due now
    pub fn enable(&mut self, id: TaskId) -> bool {
        let now = self.now;
        match self.tasks.get_mut(&id) {
            Some(task) => {
                if !task.enabled {
                    task.enabled = true;
                    task.remaining = task.iterations;
                    task.next_run = now;
                }
                true
            }
            None => false,
        }
    }

    /// Enable a task if needed and push its next run `delay` ms out
    pub fn enable_delayed(&mut self, id: TaskId, delay: u64) -> bool {
        if !self.enable(id) {
            return false;
        }
        self.delay(id, delay)
    }

    /// Enable a task afresh: full iteration count, first run after `delay` ms
    pub fn restart_delayed(&mut self, id: TaskId, delay: u64) -> bool {
        let now = self.now;
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.enabled = true;
                task.remaining = task.iterations;
                task.next_run = now + delay;
                true
            }
            None => false,
        }
    }

    /// Stop a task; non-persistent tasks are dropped
    pub fn disable(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if task.persistent => {
                task.enabled = false;
                true
            }
            Some(_) => self.tasks.remove(&id).is_some(),
            None => false,
        }
    }

    /// Make an enabled task due on the next pass
    pub fn force_next_iteration(&mut self, id: TaskId) -> bool {
        let now = self.now;
        match self.tasks.get_mut(&id) {
            Some(task) if task.enabled => {
                task.next_run = now;
                true
            }
            _ => false,
        }
    }

    /// Push the next run of an enabled task `delay` ms from now
    pub fn delay(&mut self, id: TaskId, delay: u64) -> bool {
        let now = self.now;
        match self.tasks.get_mut(&id) {
            Some(task) if task.enabled => {
                task.next_run = now + delay;
                true
            }
            _ => false,
        }
    }

    /// Forget a task
    pub fn remove(&mut self, id: TaskId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Forget every task
    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Whether the task exists and is enabled
    pub fn is_enabled(&self, id: TaskId) -> bool {
        self.tasks.get(&id).is_some_and(|t| t.enabled)
    }

    /// Whether the task exists
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task due at `now`, in creation order; returns how many ran.
    ///
    /// Tasks made due by a callback during this pass run on the next one.
    pub fn execute(ctx: &mut C, select: fn(&mut C) -> &mut Self, now: u64) -> usize {
        let scheduler = select(ctx);
        scheduler.now = now;
        let due: Vec<TaskId> = scheduler
            .tasks
            .iter()
            .filter(|(_, t)| t.enabled && t.next_run <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut ran = 0;
        for id in due {
            let scheduler = select(ctx);
            let Some(task) = scheduler.tasks.get_mut(&id) else {
                continue;
            };
            // An earlier callback may have disabled or delayed it
            if !task.enabled || task.next_run > now {
                continue;
            }
            let Some(mut callback) = task.callback.take() else {
                continue;
            };

            // Account for this run up front so the callback can re-arm the task
            task.next_run = now + task.interval;
            if let Iterations::Times(n) = task.remaining {
                let left = n.saturating_sub(1);
                task.remaining = Iterations::Times(left);
                if left == 0 {
                    task.enabled = false;
                }
            }

            trace!(task = %id, now, "running task");
            callback(ctx);
            ran += 1;

            let scheduler = select(ctx);
            if let Some(task) = scheduler.tasks.get_mut(&id) {
                task.callback = Some(callback);
                if !task.enabled && !task.persistent {
                    scheduler.tasks.remove(&id);
                }
            }
        }
        ran
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ctx {
        scheduler: Scheduler<Ctx>,
        log: Vec<&'static str>,
        handle: Option<TaskId>,
    }

    fn scheduler(ctx: &mut Ctx) -> &mut Scheduler<Ctx> {
        &mut ctx.scheduler
    }

    fn run(ctx: &mut Ctx, now: u64) -> usize {
        Scheduler::execute(ctx, scheduler, now)
    }

    #[test]
    fn test_periodic_task() {
        let mut ctx = Ctx::default();
        ctx.scheduler.add_task(100, Iterations::Times(3), |c: &mut Ctx| c.log.push("tick"));

        assert_eq!(run(&mut ctx, 0), 1);
        assert_eq!(run(&mut ctx, 50), 0);
        assert_eq!(run(&mut ctx, 100), 1);
        assert_eq!(run(&mut ctx, 200), 1);
        // Exhausted pooled tasks are dropped
        assert!(ctx.scheduler.is_empty());
        assert_eq!(run(&mut ctx, 300), 0);
        assert_eq!(ctx.log.len(), 3);
    }

    #[test]
    fn test_add_once() {
        let mut ctx = Ctx::default();
        ctx.scheduler.add_once(|c: &mut Ctx| c.log.push("once"));
        run(&mut ctx, 5);
        run(&mut ctx, 10);
        assert_eq!(ctx.log, vec!["once"]);
        assert!(ctx.scheduler.is_empty());
    }

    #[test]
    fn test_persistent_task_survives_exhaustion() {
        let mut ctx = Ctx::default();
        let id = ctx
            .scheduler
            .create_persistent(1000, Iterations::Times(1), |c: &mut Ctx| c.log.push("timeout"));
        assert!(!ctx.scheduler.is_enabled(id));
        assert_eq!(run(&mut ctx, 0), 0);

        ctx.scheduler.restart_delayed(id, 1000);
        assert_eq!(run(&mut ctx, 999), 0);
        assert_eq!(run(&mut ctx, 1000), 1);
        assert!(ctx.scheduler.contains(id));
        assert!(!ctx.scheduler.is_enabled(id));

        ctx.scheduler.restart_delayed(id, 10);
        assert_eq!(run(&mut ctx, 1010), 1);
        assert_eq!(ctx.log, vec!["timeout", "timeout"]);
    }

    #[test]
    fn test_force_and_delay() {
        let mut ctx = Ctx::default();
        let id = ctx.scheduler.add_task(1000, Iterations::Forever, |c: &mut Ctx| c.log.push("run"));
        run(&mut ctx, 0);

        assert!(ctx.scheduler.force_next_iteration(id));
        assert_eq!(run(&mut ctx, 10), 1);

        ctx.scheduler.delay(id, 5000);
        assert_eq!(run(&mut ctx, 1010), 0);
        assert_eq!(run(&mut ctx, 5010), 1);
    }

    #[test]
    fn test_enable_delayed() {
        let mut ctx = Ctx::default();
        let id = ctx
            .scheduler
            .create_persistent(100, Iterations::Forever, |c: &mut Ctx| c.log.push("sync"));
        ctx.scheduler.enable_delayed(id, 500);
        assert_eq!(run(&mut ctx, 400), 0);
        assert_eq!(run(&mut ctx, 500), 1);
        assert_eq!(run(&mut ctx, 600), 1);

        ctx.scheduler.disable(id);
        assert_eq!(run(&mut ctx, 700), 0);
        assert!(ctx.scheduler.contains(id));
    }

    #[test]
    fn test_callback_can_remove_itself() {
        let mut ctx = Ctx::default();
        let id = ctx.scheduler.add_task(10, Iterations::Forever, |c: &mut Ctx| {
            let me = c.handle.unwrap();
            c.scheduler.remove(me);
            c.log.push("gone");
        });
        ctx.handle = Some(id);
        run(&mut ctx, 0);
        run(&mut ctx, 10);
        assert_eq!(ctx.log, vec!["gone"]);
        assert!(!ctx.scheduler.contains(id));
    }

    #[test]
    fn test_tasks_added_during_pass_run_next_pass() {
        let mut ctx = Ctx::default();
        ctx.scheduler.add_once(|c: &mut Ctx| {
            c.log.push("outer");
            c.scheduler.add_once(|c: &mut Ctx| c.log.push("inner"));
        });
        assert_eq!(run(&mut ctx, 0), 1);
        assert_eq!(ctx.log, vec!["outer"]);
        assert_eq!(run(&mut ctx, 0), 1);
        assert_eq!(ctx.log, vec!["outer", "inner"]);
    }

    #[test]
    fn test_disable_pooled_task_drops_it() {
        let mut ctx = Ctx::default();
        let id = ctx.scheduler.add_task(10, Iterations::Forever, |c: &mut Ctx| c.log.push("x"));
        assert!(ctx.scheduler.disable(id));
        assert!(!ctx.scheduler.contains(id));
        assert!(!ctx.scheduler.enable(id));
    }
}
