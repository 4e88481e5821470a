//! Demo driver running every guard side by side.
//!
//! Each strategy gets its background updater, a few writes go through the
//! device facade, and the current values are printed as a table.
//!
//! Run with:
//! ```bash
//! RUST_LOG=info cargo run --example demo --features demo -- --help
//! ```

use clap::{Parser, ValueEnum};
use custodi::config::DemoConfig;
use custodi::device::DeviceFile;
use custodi::guards::atomic::AtomicCounter;
use custodi::guards::percpu::AggregatedCounter;
use custodi::guards::rcu::VersionedSnapshot;
use custodi::guards::rwlock::{RwCounter, RwGuard};
use custodi::guards::seqlock::{SeqCounter, SeqGuard};
use custodi::guards::spin::SpinCounter;
use custodi::guards::wait::ChangeNotifier;
use custodi::guards::Observable;
use custodi::observers::table::{TableObserver, TableStyle};
use custodi::ticker::Ticking;
use custodi::{Error, Result};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Table style selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum StyleChoice {
    Ascii,
    #[default]
    Rounded,
    Sharp,
    Modern,
    Markdown,
    Blank,
}

impl From<StyleChoice> for TableStyle {
    fn from(choice: StyleChoice) -> Self {
        match choice {
            StyleChoice::Ascii => TableStyle::Ascii,
            StyleChoice::Rounded => TableStyle::Rounded,
            StyleChoice::Sharp => TableStyle::Sharp,
            StyleChoice::Modern => TableStyle::Modern,
            StyleChoice::Markdown => TableStyle::Markdown,
            StyleChoice::Blank => TableStyle::Blank,
        }
    }
}

/// Demo application for custodi - seven ways to guard one shared value.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Ticker period in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Number of spin workers
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Pause between spin worker iterations in milliseconds
    #[arg(long, default_value = "1000")]
    worker_interval_ms: u64,

    /// How long to let the updaters run, in seconds
    #[arg(short, long, default_value = "5")]
    duration: u64,

    /// Refresh the table every N milliseconds while running
    #[arg(short, long)]
    watch: Option<u64>,

    /// Table style
    #[arg(short, long, value_enum, default_value = "rounded")]
    style: StyleChoice,

    /// Render as a compact grid with this many columns
    #[arg(short, long)]
    columns: Option<usize>,

    /// Add a title to the output
    #[arg(long)]
    title: Option<String>,

    /// Hide header in list mode
    #[arg(long)]
    no_header: bool,
}

impl Args {
    fn config(&self) -> DemoConfig {
        DemoConfig::new()
            .with_tick(Duration::from_millis(self.tick_ms))
            .with_workers(self.workers)
            .with_worker_interval(Duration::from_millis(self.worker_interval_ms))
    }

    fn observer(&self) -> TableObserver {
        let mut observer = TableObserver::new()
            .with_style(self.style.into())
            .with_header(!self.no_header);
        if let Some(columns) = self.columns {
            observer = observer.compact(true).columns(columns);
        }
        if let Some(ref title) = self.title {
            observer = observer.with_title(title.clone());
        }
        observer
    }
}

/// The demo state of every strategy, each behind its device facade.
struct Devices {
    atomic: DeviceFile<AtomicCounter>,
    totaler: DeviceFile<Ticking<AggregatedCounter>>,
    rcu: DeviceFile<VersionedSnapshot>,
    rwlock: DeviceFile<RwCounter>,
    seqlock: DeviceFile<SeqCounter>,
    spin: DeviceFile<SpinCounter>,
    wait: Arc<DeviceFile<Ticking<ChangeNotifier>>>,
}

impl Devices {
    fn new(config: &DemoConfig) -> Self {
        Devices {
            atomic: DeviceFile::new(
                AtomicCounter::new()
                    .with_name("demo_atomic")
                    .with_period(config.tick),
            ),
            totaler: DeviceFile::new(Ticking::new(AggregatedCounter::new().with_name("totaler"))),
            rcu: DeviceFile::new(VersionedSnapshot::new().with_name("demo_rcu")),
            rwlock: DeviceFile::new(RwCounter::new(RwGuard::new(0).with_name("demo_rwlock"))),
            seqlock: DeviceFile::new(SeqCounter::new(SeqGuard::new(0).with_name("demo_seqlock"))),
            spin: DeviceFile::new(SpinCounter::new(*config).with_name("spin_demo")),
            wait: Arc::new(DeviceFile::new(Ticking::new(
                ChangeNotifier::new().with_name("demo_wait"),
            ))),
        }
    }

    fn start(&self, config: &DemoConfig) -> Result<()> {
        self.totaler.strategy().start(config.tick)?;
        self.rwlock.strategy().start(config.tick)?;
        self.seqlock.strategy().start(config.tick)?;
        self.wait.strategy().start(config.tick)?;
        self.spin.strategy().start()
    }

    fn stop(&self) {
        self.totaler.strategy().stop();
        self.rwlock.strategy().stop();
        self.seqlock.strategy().stop();
        self.wait.strategy().stop();
        self.spin.strategy().stop();
        self.atomic.strategy().shutdown();
    }

    fn observables(&self) -> Vec<&dyn Observable> {
        vec![
            self.atomic.strategy(),
            self.totaler.strategy(),
            self.rcu.strategy(),
            self.rwlock.strategy(),
            self.seqlock.strategy(),
            self.spin.strategy(),
            self.wait.strategy(),
        ]
    }
}

/// Exercises the write path of each facade once.
fn seed(devices: &Devices) -> Result<()> {
    let mut handle = devices.totaler.open()?;
    devices.totaler.write(&mut handle, b"100\n")?;
    devices.totaler.close(handle);

    let mut handle = devices.rcu.open()?;
    devices.rcu.write(&mut handle, b"hello from rcu")?;
    devices.rcu.close(handle);

    let mut handle = devices.seqlock.open()?;
    devices.seqlock.write(&mut handle, b"1000\n")?;
    devices.seqlock.close(handle);

    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = args.config();
    let observer = args.observer();

    let devices = Devices::new(&config);
    devices.start(&config)?;
    seed(&devices)?;

    // keeps the atomic counter ticking for the whole run
    let atomic_session = devices.atomic.open()?;

    // blocks on the notifier until it is interrupted at shutdown
    let mut wait_session = devices.wait.open()?;
    let interrupter = devices.wait.strategy().interrupter(wait_session.session());
    let waiter = {
        let wait = Arc::clone(&devices.wait);
        thread::spawn(move || loop {
            wait_session.seek(0);
            match wait.read(&mut wait_session, 64) {
                Ok(bytes) => {
                    log::info!("demo_wait: read {}", String::from_utf8_lossy(&bytes).trim_end())
                }
                Err(Error::Interrupted) => break,
                Err(e) => {
                    log::warn!("demo_wait: {e}");
                    break;
                }
            }
        })
    };

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    match args.watch {
        Some(interval_ms) => {
            while Instant::now() < deadline {
                // Clear screen (ANSI escape code)
                print!("\x1B[2J\x1B[1;1H");
                println!("{}", observer.render(devices.observables().into_iter()));
                thread::sleep(Duration::from_millis(interval_ms));
            }
        }
        None => thread::sleep(deadline.saturating_duration_since(Instant::now())),
    }

    interrupter.interrupt();
    if waiter.join().is_err() {
        log::warn!("demo_wait: reader panicked");
    }
    devices.atomic.close(atomic_session);
    devices.stop();

    println!("{}", observer.render(devices.observables().into_iter()));
    Ok(())
}
