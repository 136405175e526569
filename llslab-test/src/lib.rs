//! A lock-step test runner for flushing out data races and race conditions.
//!
//! The runner coordinates N threads so that each registered step starts as simultaneously as possible on every
//! thread, and no thread enters a step before every thread finished the previous one. Hammering the same step from
//! all threads at once is far more effective at surfacing races than free-running loops.
//!
//! Each thread owns a Local state, and all threads share one Global state.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

/// Builder for a lock-step run.
///
/// #   Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use llslab_test::LockstepBuilder;
///
/// let mut builder = LockstepBuilder::new(AtomicUsize::new(0), vec![1usize, 2, 3]);
///
/// builder.step(|| |global: &AtomicUsize, local: &mut usize| {
///     global.fetch_add(*local, Ordering::Relaxed);
/// });
///
/// let (global, locals) = builder.launch(10).join();
///
/// assert_eq!(60, global.load(Ordering::Relaxed));
/// assert_eq!(vec![1, 2, 3], locals);
/// ```
pub struct LockstepBuilder<Global, Local> {
    global: Arc<Global>,
    locals: Vec<Local>,
    //  One serie of steps per thread; `steps[t][s]` is step `s` of thread `t`.
    steps: Vec<Vec<Box<dyn FnMut(&Global, &mut Local) + Send + 'static>>>,
}

impl<Global, Local> LockstepBuilder<Global, Local>
where
    Global: Send + Sync + 'static,
    Local: Send + 'static,
{
    /// Creates a builder running one thread per element of `locals`.
    pub fn new(global: Global, locals: Vec<Local>) -> Self {
        assert!(!locals.is_empty(), "a lock-step run needs at least one thread");

        let steps = locals.iter().map(|_| Vec::new()).collect();

        Self { global: Arc::new(global), locals, steps }
    }

    /// Adds a step, run in lock-step on every thread.
    ///
    /// `factory` is invoked once per thread to create that thread's copy of the step.
    pub fn step<Factory, Step>(&mut self, mut factory: Factory)
    where
        Factory: FnMut() -> Step,
        Step: FnMut(&Global, &mut Local) + Send + 'static,
    {
        for serie in &mut self.steps {
            serie.push(Box::new(factory()));
        }
    }

    /// Spawns the threads, each running its serie of steps `iterations` times.
    pub fn launch(self, iterations: usize) -> Lockstep<Global, Local> {
        assert!(self.steps[0].len() > 0, "a lock-step run needs at least one step");

        let barrier = Arc::new(SpinBarrier::new(self.locals.len()));

        let handles = self
            .locals
            .into_iter()
            .zip(self.steps)
            .map(|(mut local, mut serie)| {
                let global = self.global.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    let guard = PoisonGuard(&barrier);

                    for _ in 0..iterations {
                        for step in &mut serie {
                            barrier.wait();
                            step(&global, &mut local);
                        }
                    }

                    guard.dismiss();

                    local
                })
            })
            .collect();

        Lockstep { global: self.global, handles }
    }
}

/// A launched lock-step run.
pub struct Lockstep<Global, Local> {
    global: Arc<Global>,
    handles: Vec<thread::JoinHandle<Local>>,
}

impl<Global, Local> Lockstep<Global, Local> {
    /// Joins every thread, returning the Global state and the Local states in thread order.
    ///
    /// #   Panics
    ///
    /// -   If any thread panicked.
    pub fn join(self) -> (Global, Vec<Local>) {
        //  Join everything before unwrapping, so one panicking thread does not leave the rest dangling.
        let results: Vec<_> = self.handles.into_iter().map(|handle| handle.join()).collect();

        let locals = results
            .into_iter()
            .map(|result| result.expect("lock-step thread panicked"))
            .collect();

        //  All clones died with their threads.
        let global = Arc::try_unwrap(self.global).unwrap_or_else(|_| unreachable!("threads were joined"));

        (global, locals)
    }
}

//
//  Implementation
//

//  A reusable spinning barrier.
//
//  The generation counter makes the barrier safe to reuse immediately: late spinners of round G wake up on any
//  generation other than G, and the arrival count is reset before the generation advances.
struct SpinBarrier {
    arrivals: AtomicUsize,
    generation: AtomicUsize,
    threads: usize,
    poisoned: AtomicBool,
}

impl SpinBarrier {
    fn new(threads: usize) -> Self {
        Self {
            arrivals: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            threads,
            poisoned: AtomicBool::new(false),
        }
    }

    fn wait(&self) {
        let generation = self.generation.load(Ordering::Acquire);

        if self.arrivals.fetch_add(1, Ordering::AcqRel) + 1 == self.threads {
            self.arrivals.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
            return;
        }

        while self.generation.load(Ordering::Acquire) == generation {
            if self.poisoned.load(Ordering::Relaxed) {
                panic!("a lock-step peer panicked");
            }

            std::hint::spin_loop();
        }
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::Relaxed);
        //  Unblock spinners so they can observe the poison.
        self.generation.fetch_add(1, Ordering::Release);
    }
}

//  Poisons the barrier if the thread unwinds, so its peers stop spinning instead of hanging the test.
struct PoisonGuard<'a>(&'a SpinBarrier);

impl PoisonGuard<'_> {
    fn dismiss(self) { std::mem::forget(self); }
}

impl Drop for PoisonGuard<'_> {
    fn drop(&mut self) { self.0.poison(); }
}

#[cfg(test)]
mod tests {

use std::sync::Mutex;

use super::*;

#[test]
fn steps_run_in_lock_step() {
    //  Record (iteration, step, thread) triples; because no thread may enter a round before every thread finished
    //  the previous one, the trace must come out in chunks of `threads` entries sharing (iteration, step).
    let threads = 3usize;

    let mut builder = LockstepBuilder::new(Mutex::new(Vec::new()), (0..threads).collect());

    for step in 0..3usize {
        builder.step(move || {
            let mut iteration = 0;

            move |trace: &Mutex<Vec<(usize, usize, usize)>>, thread: &mut usize| {
                trace.lock().unwrap().push((iteration, step, *thread));
                iteration += 1;
            }
        });
    }

    let (trace, _) = builder.launch(5).join();
    let trace = trace.into_inner().unwrap();

    assert_eq!(5 * 3 * threads, trace.len());

    for chunk in trace.chunks(threads) {
        let (iteration, step, _) = chunk[0];

        for &(i, s, _) in chunk {
            assert_eq!((iteration, step), (i, s));
        }
    }
}

#[test]
fn locals_come_back_in_thread_order() {
    let mut builder = LockstepBuilder::new((), vec![0usize, 10, 20]);

    builder.step(|| |_: &(), local: &mut usize| *local += 1);

    let (_, locals) = builder.launch(3).join();

    assert_eq!(vec![3, 13, 23], locals);
}

#[test]
#[should_panic(expected = "lock-step thread panicked")]
fn panics_propagate() {
    let mut builder = LockstepBuilder::new((), vec![0usize, 1]);

    builder.step(|| |_: &(), local: &mut usize| {
        assert!(*local != 1, "thread 1 goes down");
    });

    builder.launch(1).join();
}

} // mod tests
