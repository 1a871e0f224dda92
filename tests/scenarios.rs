//! End-to-end scenarios on the simulated kernel: several tasks, interrupts
//! and primitives working together through the public API only.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use taskkit::port::sim::{self, Sim};
use taskkit::{
    ms_to_ticks, task, BoundedChannel, Context, EventBits, EventSet, Lock, MessageConsumer,
    MessageProducer, Signal, Task, TaskBody, TaskConfig, TaskState, MAX_DELAY,
};

const PRODUCED: EventBits = EventSet::<Sim>::bit(0);
const CONSUMED: EventBits = EventSet::<Sim>::bit(1);

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

// ---------------------------------------------------------------------------
// Interrupt-driven producer/consumer pipeline
// ---------------------------------------------------------------------------

struct Producer {
    tick: &'static Signal<Sim>,
    out: MessageProducer<'static, Sim, u32, 4>,
    events: &'static EventSet<Sim>,
}

impl TaskBody for Producer {
    type Arg = u32;

    fn run(&self, count: u32) {
        for value in 0..count {
            self.tick.take();
            assert!(self.out.produce(&value, 1000));
        }
        self.events.set_bits(PRODUCED);
    }
}

struct Summer {
    input: &'static MessageConsumer<Sim, u32, 4>,
    total: AtomicU32,
    events: &'static EventSet<Sim>,
}

impl TaskBody for Summer {
    type Arg = u32;

    fn run(&self, count: u32) {
        for _ in 0..count {
            if let Some(value) = self.input.consume(1000) {
                self.total.fetch_add(value, Ordering::SeqCst);
            }
        }
        self.events.set_bits(CONSUMED);
    }
}

#[test]
fn interrupt_driven_pipeline_delivers_every_item() {
    const COUNT: u32 = 25;

    let tick = leak(Signal::<Sim>::new());
    let events = leak(EventSet::<Sim>::new());
    let input = leak(MessageConsumer::<Sim, u32, 4>::new());

    let producer = Pin::static_ref(leak(Task::<Sim, _>::new(
        TaskConfig::new("producer").with_priority(3),
        Producer {
            tick,
            out: MessageProducer::new(Some(input.incoming())),
            events,
        },
    )));
    let summer = Pin::static_ref(leak(Task::<Sim, _>::new(
        TaskConfig::new("summer").with_priority(2),
        Summer {
            input,
            total: AtomicU32::new(0),
            events,
        },
    )));

    summer.start(COUNT);
    producer.start(COUNT);

    // Timer interrupt: one tick per item until the producer is done
    while events.bits() & PRODUCED == 0 {
        sim::interrupt(|| {
            assert_eq!(Context::current::<Sim>(), Context::Interrupt);
            tick.try_give();
        });
        thread::sleep(Duration::from_millis(1));
    }

    let seen = events.wait_for_all(PRODUCED | CONSUMED, ms_to_ticks::<Sim>(2000), true);
    assert_eq!(seen, PRODUCED | CONSUMED);
    assert_eq!(events.bits(), 0);
    assert_eq!(summer.body().total.load(Ordering::SeqCst), (0..COUNT).sum::<u32>());

    eventually("both tasks idle", || {
        producer.state() == TaskState::Idle && summer.state() == TaskState::Idle
    });
    assert!(!input.has_messages());
}

// ---------------------------------------------------------------------------
// Shared state under a recursive lock
// ---------------------------------------------------------------------------

struct Account {
    lock: Lock<Sim>,
    balance: AtomicU32,
}

impl Account {
    fn deposit(&self, amount: u32) {
        let _guard = self.lock.scoped();
        // Non-atomic read-modify-write made safe by the lock
        let balance = self.balance.load(Ordering::Relaxed);
        thread::yield_now();
        self.balance.store(balance + amount, Ordering::Relaxed);
    }

    fn deposit_twice(&self, amount: u32) {
        let _guard = self.lock.scoped();
        self.deposit(amount);
        self.deposit(amount);
    }
}

struct Depositor {
    account: &'static Account,
    done: &'static Signal<Sim>,
}

impl TaskBody for Depositor {
    type Arg = u32;

    fn run(&self, rounds: u32) {
        for _ in 0..rounds {
            self.account.deposit_twice(1);
        }
        self.done.give();
    }
}

#[test]
fn recursive_lock_serializes_tasks() {
    let account = leak(Account {
        lock: Lock::new(),
        balance: AtomicU32::new(0),
    });

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let done = leak(Signal::<Sim>::new());
            let worker = Pin::static_ref(leak(Task::<Sim, _>::new(
                TaskConfig::new("depositor"),
                Depositor { account, done },
            )));
            worker.start(50);
            done
        })
        .collect();

    for done in workers {
        assert!(done.try_take(5000));
    }
    assert_eq!(account.balance.load(Ordering::Relaxed), 4 * 50 * 2);
    assert_eq!(account.lock.raw().depth(), 0);
}

// ---------------------------------------------------------------------------
// Task lifecycle against the kernel
// ---------------------------------------------------------------------------

struct Heartbeat {
    beats: &'static BoundedChannel<Sim, u32, 64>,
    stopped: AtomicU32,
}

impl TaskBody for Heartbeat {
    type Arg = ();

    fn run(&self, _arg: ()) {
        let mut beat = 0;
        loop {
            self.beats.send_back(&beat, 0);
            beat += 1;
            task::delay::<Sim>(2);
        }
    }

    fn on_stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn suspend_resume_stop_against_kernel() {
    let beats = leak(BoundedChannel::<Sim, u32, 64>::new());
    let heart = Pin::static_ref(leak(Task::<Sim, _>::new(
        TaskConfig::new("heartbeat"),
        Heartbeat {
            beats,
            stopped: AtomicU32::new(0),
        },
    )));

    heart.suspend();
    assert_eq!(heart.state(), TaskState::Idle);

    heart.start(());
    assert!(heart.is_running());
    assert!(beats.receive(ms_to_ticks::<Sim>(1000)).is_some());
    let kernel_task = heart.raw().unwrap();

    heart.suspend();
    heart.suspend();
    assert_eq!(heart.state(), TaskState::Suspended);
    assert!(kernel_task.is_suspended());
    // Let the beat in flight land, then expect silence
    thread::sleep(Duration::from_millis(10));
    beats.reset();
    assert_eq!(beats.receive(ms_to_ticks::<Sim>(30)), None);

    heart.resume();
    assert_eq!(heart.state(), TaskState::Running);
    assert!(beats.receive(MAX_DELAY).is_some());

    heart.stop();
    assert_eq!(heart.state(), TaskState::Idle);
    assert!(kernel_task.is_deleted());
    assert_eq!(heart.body().stopped.load(Ordering::SeqCst), 1);

    heart.stop();
    assert_eq!(heart.body().stopped.load(Ordering::SeqCst), 1);
}
