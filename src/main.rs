//! # taskkit Demo Firmware
//!
//! A sensor pipeline on FreeRTOS exercising every taskkit primitive:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `sampler` | 3 | Waits for the tick-hook heartbeat, produces a sample |
//! | `reporter` | 2 | Consumes samples, prints them under the console lock |
//! | `supervisor` | 4 | Checks both stages ran, pauses the sampler now and then |
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► create primitives       ← Signal, EventSet, Lock, consumer queue
//!         ├─► Task::start() (×3)
//!         └─► vTaskStartScheduler()   ← does not return
//!
//! vApplicationTickHook (ISR, every tick)
//!   └─► Signal::try_give() every HEARTBEAT_TICKS
//! ```
//!
//! The FreeRTOS Cortex-M port provides the exception handlers; map them to
//! the cortex-m-rt names in `FreeRTOSConfig.h`:
//!
//! ```c
//! #define vPortSVCHandler    SVCall
//! #define xPortPendSVHandler PendSV
//! #define xPortSysTickHandler SysTick
//! #define configUSE_TICK_HOOK 1
//! ```

#![no_std]
#![no_main]

use core::cell::Cell;
use core::pin::Pin;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::interrupt::{self, Mutex};
use cortex_m_rt::entry;
use panic_halt as _;

use taskkit::port::freertos::FreeRtos;
use taskkit::{
    contract_violation, ms_to_ticks, task, EventBits, EventSet, Lock, MessageConsumer,
    MessageProducer, Signal, Task, TaskBody, TaskConfig,
};

extern "C" {
    fn vTaskStartScheduler();
}

type Kernel = FreeRtos;

/// Ticks between two heartbeats (500 ms at 1 kHz).
const HEARTBEAT_TICKS: u32 = 500;

const SAMPLE_QUEUE_DEPTH: usize = 8;

/// Both stages must report within this window.
const SUPERVISOR_PERIOD_MS: u32 = 1000;

const SAMPLED: EventBits = EventSet::<Kernel>::bit(0);
const REPORTED: EventBits = EventSet::<Kernel>::bit(1);

#[derive(Debug, Clone, Copy)]
struct Sample {
    sequence: u32,
    value: u16,
}

// ---------------------------------------------------------------------------
// Heartbeat from the kernel tick interrupt
// ---------------------------------------------------------------------------

static HEARTBEAT: Mutex<Cell<Option<&'static Signal<Kernel>>>> = Mutex::new(Cell::new(None));
static TICKS: AtomicU32 = AtomicU32::new(0);

/// Called by FreeRTOS from the SysTick interrupt.
#[no_mangle]
pub extern "C" fn vApplicationTickHook() {
    let ticks = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    if ticks % HEARTBEAT_TICKS != 0 {
        return;
    }
    if let Some(heartbeat) = interrupt::free(|cs| HEARTBEAT.borrow(cs).get()) {
        // A missed take leaves the signal given; one pending beat is enough
        heartbeat.try_give();
    }
}

// ---------------------------------------------------------------------------
// Task bodies
// ---------------------------------------------------------------------------

struct Sampler {
    heartbeat: &'static Signal<Kernel>,
    samples: MessageProducer<'static, Kernel, Sample, SAMPLE_QUEUE_DEPTH>,
    progress: &'static EventSet<Kernel>,
}

impl TaskBody for Sampler {
    type Arg = u16;

    fn run(&self, seed: u16) {
        let mut value = seed;
        for sequence in 0.. {
            self.heartbeat.take();
            // Stand-in for an ADC read
            value = value.wrapping_mul(75).wrapping_add(74);
            if !self.samples.produce_default(&Sample { sequence, value }) {
                log::warn!("sample {} dropped, reporter is behind", sequence);
                continue;
            }
            self.progress.set_bits(SAMPLED);
        }
    }

    fn on_stop(&self) {
        self.progress.clear_bits(SAMPLED);
    }
}

struct Reporter {
    samples: &'static MessageConsumer<Kernel, Sample, SAMPLE_QUEUE_DEPTH>,
    console: &'static Lock<Kernel>,
    progress: &'static EventSet<Kernel>,
}

impl TaskBody for Reporter {
    type Arg = ();

    fn run(&self, _arg: ()) {
        while let Some(sample) = self.samples.consume_default() {
            {
                let _console = self.console.scoped();
                log::info!("sample #{}: {}", sample.sequence, sample.value);
            }
            self.progress.set_bits(REPORTED);
        }
    }
}

struct Supervisor {
    sampler: Pin<&'static Task<Kernel, Sampler>>,
    console: &'static Lock<Kernel>,
    progress: &'static EventSet<Kernel>,
}

impl TaskBody for Supervisor {
    type Arg = ();

    fn run(&self, _arg: ()) {
        let period = ms_to_ticks::<Kernel>(SUPERVISOR_PERIOD_MS);
        for round in 1u32.. {
            let seen = self.progress.wait_for_all(SAMPLED | REPORTED, period, true);
            if seen != SAMPLED | REPORTED {
                let _console = self.console.scoped();
                log::warn!("pipeline stalled, stages seen: {:#04b}", seen);
            }
            if round % 10 == 0 {
                self.sampler.suspend();
                task::delay::<Kernel>(SUPERVISOR_PERIOD_MS);
                self.sampler.resume();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

macro_rules! make_static {
    ($ty:ty = $init:expr) => {
        match cortex_m::singleton!(: $ty = $init) {
            Some(value) => &*value,
            None => contract_violation("static initialised twice"),
        }
    };
}

/// Firmware entry point. Builds the pipeline and starts the scheduler.
/// Does not return.
#[entry]
fn main() -> ! {
    let heartbeat = make_static!(Signal<Kernel> = Signal::new());
    let progress = make_static!(EventSet<Kernel> = EventSet::new());
    let console = make_static!(Lock<Kernel> = Lock::new());
    let samples = make_static!(
        MessageConsumer<Kernel, Sample, SAMPLE_QUEUE_DEPTH> = MessageConsumer::new()
    );

    interrupt::free(|cs| HEARTBEAT.borrow(cs).set(Some(heartbeat)));

    let sampler = make_static!(Task<Kernel, Sampler> = Task::new(
        TaskConfig::new("sampler").with_priority(3),
        Sampler {
            heartbeat,
            samples: MessageProducer::new(Some(samples.incoming())),
            progress,
        },
    ));
    let sampler = Pin::static_ref(sampler);

    let reporter = make_static!(Task<Kernel, Reporter> = Task::new(
        TaskConfig::new("reporter").with_priority(2).with_stack_size(2048),
        Reporter {
            samples,
            console,
            progress,
        },
    ));

    let supervisor = make_static!(Task<Kernel, Supervisor> = Task::new(
        TaskConfig::new("supervisor").with_priority(4),
        Supervisor {
            sampler,
            console,
            progress,
        },
    ));

    sampler.start(0x1234);
    Pin::static_ref(reporter).start(());
    Pin::static_ref(supervisor).start(());

    // SAFETY: tasks and primitives above are 'static; the scheduler never
    // returns while it has tasks to run.
    unsafe { vTaskStartScheduler() };
    contract_violation("scheduler returned")
}
